//! Stream exchange (stages C and D)
//!
//! Both drivers run over any `AsyncRead + AsyncWrite` transport through a
//! [`Framed`] [`FrameCodec`], so they work on a `TcpStream` as well as on an
//! in-memory mock. Before every read the codec is told which header to
//! expect, so a bad header fails before its payload is awaited.
//!
//! Message order on the connection:
//!
//! 1. initiator: empty frame framed with secret B (announce)
//! 2. responder: [`StreamSetup`] framed with secret B
//! 3. initiator: `num2` frames of `len2` fill bytes framed with secret C
//! 4. responder: [`StreamReply`] framed with secret C

use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, trace};

use crate::core::{Error, PeerTag, Result, Secret, Step, MAX_STREAM_PAYLOAD};
use crate::protocol::validate::check_fill;
use crate::protocol::{
    Expectation, Frame, FrameCodec, Payload, Rejection, StreamReply, StreamSetup,
};

/// Reads the next frame, bounding the wait
async fn next_frame<S>(
    framed: &mut Framed<S, FrameCodec>,
    wait: Duration,
    what: &str,
) -> Result<Frame>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match timeout(wait, framed.next()).await {
        Err(_) => Err(Error::timeout(format!("no {} within {:?}", what, wait))),
        Ok(None) => Err(Error::connection_lost(format!("stream closed before {}", what))),
        Ok(Some(frame)) => frame,
    }
}

/// Responder side: validates the initiator's frames and hands out secret D
///
/// `secret_b` authenticates the announce frame. Fails without writing the
/// reply if any frame is out of shape.
pub async fn serve_stream<S>(
    stream: S,
    secret_b: Secret,
    setup: StreamSetup,
    secret_d: Secret,
    peer_tag: PeerTag,
    read_timeout: Duration,
) -> Result<StreamReply>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, FrameCodec::new());

    framed
        .codec_mut()
        .expect(Expectation::new(secret_b, Step::Request, 0));
    next_frame(&mut framed, read_timeout, "stream announce").await?;
    trace!("stream announce received");

    framed
        .send(Frame::new(secret_b, Step::Response, peer_tag, setup.to_bytes()))
        .await?;
    debug!(num2 = setup.num2, len2 = setup.len2, fill = %char::from(setup.fill), "stream setup sent");

    framed
        .codec_mut()
        .expect(Expectation::new(setup.secret_c, Step::Request, setup.len2));
    for index in 0..setup.num2 {
        let frame = next_frame(&mut framed, read_timeout, "stream frame").await?;
        check_fill(&frame.payload, setup.fill)
            .map_err(|r| Rejection::content(format!("frame {}: {}", index, r)))?;
    }

    let reply = StreamReply { secret_d };
    framed
        .send(Frame::new(setup.secret_c, Step::Response, peer_tag, reply.to_bytes()))
        .await?;
    debug!(frames = setup.num2, "stream frames validated");
    Ok(reply)
}

/// Initiator side: announces itself, streams the requested frames and
/// collects secret D
pub async fn exchange_stream<S>(
    stream: S,
    secret_b: Secret,
    peer_tag: PeerTag,
    read_timeout: Duration,
) -> Result<(StreamSetup, StreamReply)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, FrameCodec::new());

    framed
        .send(Frame::new(secret_b, Step::Request, peer_tag, Bytes::new()))
        .await?;

    framed.codec_mut().expect(Expectation::new(
        secret_b,
        Step::Response,
        StreamSetup::LEN as u32,
    ));
    let frame = next_frame(&mut framed, read_timeout, "stream setup").await?;
    let setup = StreamSetup::parse(&frame.payload)?;
    if setup.len2 as usize > MAX_STREAM_PAYLOAD {
        return Err(Rejection::content(format!(
            "len2 of {} exceeds the {} byte limit",
            setup.len2, MAX_STREAM_PAYLOAD
        ))
        .into());
    }
    debug!(num2 = setup.num2, len2 = setup.len2, "stream setup received");

    let body = Bytes::from(vec![setup.fill; setup.len2 as usize]);
    for _ in 0..setup.num2 {
        framed
            .feed(Frame::new(setup.secret_c, Step::Request, peer_tag, body.clone()))
            .await?;
    }
    SinkExt::<Frame>::flush(&mut framed).await?;

    framed.codec_mut().expect(Expectation::new(
        setup.secret_c,
        Step::Response,
        StreamReply::LEN as u32,
    ));
    let frame = next_frame(&mut framed, read_timeout, "stream reply").await?;
    let reply = StreamReply::parse(&frame.payload)?;
    Ok((setup, reply))
}
