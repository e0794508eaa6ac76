use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::{Error, PeerTag, Secret, Step, MAX_STREAM_PAYLOAD};
use super::validate::{Expectation, Rejection};

/// Size of the fixed frame header in bytes
pub const HEADER_LEN: usize = 12;

/// Fixed 12-byte header carried in front of every payload
///
/// ```text
///  0               4               8       10      12
/// +---------------+---------------+-------+-------+
/// | payloadLength | prevSecret    | step  |  tag  |
/// +---------------+---------------+-------+-------+
/// ```
///
/// All fields are big-endian on the wire. `payload_len` counts the payload
/// before padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub payload_len: u32,
    pub previous_secret: Secret,
    /// Raw step value; kept unparsed so unknown values can be reported
    pub step: u16,
    pub peer_tag: PeerTag,
}

impl Header {
    pub fn new(payload_len: u32, previous_secret: Secret, step: Step, peer_tag: PeerTag) -> Self {
        Header {
            payload_len,
            previous_secret,
            step: step.as_u16(),
            peer_tag,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.payload_len.to_be_bytes());
        buf[4..8].copy_from_slice(&self.previous_secret.0.to_be_bytes());
        buf[8..10].copy_from_slice(&self.step.to_be_bytes());
        buf[10..12].copy_from_slice(&self.peer_tag.0.to_be_bytes());
        buf
    }

    /// Decodes the first 12 bytes of `bytes`; anything after them is ignored
    pub fn decode(bytes: &[u8]) -> Result<Self, Rejection> {
        if bytes.len() < HEADER_LEN {
            return Err(Rejection::ShortHeader { got: bytes.len() });
        }
        let mut buf = &bytes[..HEADER_LEN];
        Ok(Header {
            payload_len: buf.get_u32(),
            previous_secret: Secret(buf.get_u32()),
            step: buf.get_u16(),
            peer_tag: PeerTag(buf.get_u16()),
        })
    }

    /// Total wire length this header announces
    pub fn frame_len(&self) -> usize {
        expected_frame_len(self.payload_len)
    }
}

/// Encodes a header from its raw fields
pub fn encode_header(
    payload_len: u32,
    previous_secret: Secret,
    step: Step,
    peer_tag: PeerTag,
) -> [u8; HEADER_LEN] {
    Header::new(payload_len, previous_secret, step, peer_tag).encode()
}

/// Decodes a header, failing with `ShortHeader` below 12 bytes
pub fn decode_header(bytes: &[u8]) -> Result<Header, Rejection> {
    Header::decode(bytes)
}

/// Zero bytes needed after a payload of `payload_len` bytes
pub fn padding_for(payload_len: usize) -> usize {
    (4 - payload_len % 4) % 4
}

/// Copies `payload` and appends zero padding up to a multiple of 4
pub fn pad(payload: &[u8]) -> Vec<u8> {
    let mut padded = Vec::with_capacity(payload.len() + 3);
    padded.extend_from_slice(payload);
    padded.resize(payload.len() + padding_for(payload.len()), 0);
    padded
}

/// Wire length of a frame whose header declares `payload_len`
pub fn expected_frame_len(payload_len: u32) -> usize {
    let payload_len = payload_len as usize;
    HEADER_LEN + payload_len + padding_for(payload_len)
}

/// Header plus unpadded payload, the unit exchanged on both transports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Header,
    pub payload: Bytes,
}

impl Frame {
    /// Builds a frame whose header length matches `payload`
    pub fn new(previous_secret: Secret, step: Step, peer_tag: PeerTag, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        Frame {
            header: Header::new(payload.len() as u32, previous_secret, step, peer_tag),
            payload,
        }
    }

    /// Appends `header || payload || padding` to `dst`
    pub fn write_to(&self, dst: &mut BytesMut) {
        let padding = padding_for(self.payload.len());
        dst.reserve(HEADER_LEN + self.payload.len() + padding);
        dst.put_slice(&self.header.encode());
        dst.put_slice(&self.payload);
        dst.put_bytes(0, padding);
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.write_to(&mut buf);
        buf.freeze()
    }

    /// Parses one datagram, which must be exactly as long as its header announces
    pub fn decode_datagram(bytes: &[u8]) -> Result<Self, Rejection> {
        let header = Header::decode(bytes)?;
        let expected = header.frame_len();
        if bytes.len() != expected {
            return Err(Rejection::FrameLengthMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        let end = HEADER_LEN + header.payload_len as usize;
        Ok(Frame {
            header,
            payload: Bytes::copy_from_slice(&bytes[HEADER_LEN..end]),
        })
    }
}

/// Stream codec that reassembles frames from partial reads
///
/// When an [`Expectation`] is installed, the header is checked as soon as
/// its 12 bytes are buffered, before the payload is awaited.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    expectation: Option<Expectation>,
    max_payload: usize,
    pending: Option<Header>,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Creates a new frame codec
    pub fn new() -> Self {
        FrameCodec {
            expectation: None,
            max_payload: MAX_STREAM_PAYLOAD,
            pending: None,
        }
    }

    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    /// Header checks applied to every following inbound frame
    pub fn expect(&mut self, expectation: Expectation) {
        self.expectation = Some(expectation);
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.pending {
            Some(header) => header,
            None => {
                if src.len() < HEADER_LEN {
                    // Need more data to read the header
                    return Ok(None);
                }
                let header = Header::decode(&src[..HEADER_LEN])?;
                if let Some(expectation) = &self.expectation {
                    expectation.check_header(&header)?;
                }
                if header.payload_len as usize > self.max_payload {
                    return Err(Error::malformed(format!(
                        "payload of {} bytes exceeds the {} byte limit",
                        header.payload_len, self.max_payload
                    )));
                }
                src.advance(HEADER_LEN);
                self.pending = Some(header);
                header
            }
        };

        let payload_len = header.payload_len as usize;
        let body_len = payload_len + padding_for(payload_len);
        if src.len() < body_len {
            src.reserve(body_len - src.len());
            return Ok(None);
        }

        self.pending = None;
        let mut body = src.split_to(body_len);
        body.truncate(payload_len);
        Ok(Some(Frame {
            header,
            payload: body.freeze(),
        }))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() && self.pending.is_none() => Ok(None),
            None => Err(Error::connection_lost(format!(
                "stream closed inside a frame with {} bytes buffered",
                buf.len()
            ))),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.write_to(dst);
        Ok(())
    }
}
