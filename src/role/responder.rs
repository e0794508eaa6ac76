use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::core::{Error, Result, Secret, SecretChain, ServerConfig, StageError, Step};
use crate::network::{
    ephemeral, receive_all, serve_stream, AckPolicy, AlwaysAck, RandomAckDrop, TransferReceiver,
};
use crate::protocol::validate::check_greeting;
use crate::protocol::{
    Expectation, Frame, GreetingReply, Payload, Rejection, Role, Session, StreamSetup,
    TransferReply, GREETING,
};
use crate::util::SessionParams;

/// Outcome of one server-side session
#[derive(Debug)]
pub struct SessionReport {
    /// Address the greeting came from
    pub peer: SocketAddr,
    pub outcome: std::result::Result<SecretChain, StageError>,
}

/// Server side of the handshake
///
/// Listens for greetings on one datagram endpoint. Every valid greeting
/// starts an independent session task with its own transfer socket and
/// stream listener.
pub struct Responder {
    config: Arc<ServerConfig>,
    socket: Arc<UdpSocket>,
    reports: Option<mpsc::Sender<SessionReport>>,
}

impl Responder {
    /// Validates `config` and binds the greeting endpoint
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let socket = UdpSocket::bind(config.bind_addr).await?;
        info!(addr = %socket.local_addr()?, "greeting endpoint bound");
        Ok(Responder {
            config: Arc::new(config),
            socket: Arc::new(socket),
            reports: None,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Publishes every finished session on the returned channel
    pub fn session_reports(&mut self, capacity: usize) -> mpsc::Receiver<SessionReport> {
        let (tx, rx) = mpsc::channel(capacity);
        self.reports = Some(tx);
        rx
    }

    /// Accepts greetings until `shutdown` resolves
    ///
    /// Sessions already running are left to finish on their own.
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut buf = vec![0u8; 2048];

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("greeting endpoint shutting down");
                    return Ok(());
                }
                received = self.socket.recv_from(&mut buf) => {
                    let (n, peer) = match received {
                        Ok(received) => received,
                        Err(e) => {
                            warn!(error = %e, "greeting receive failed");
                            continue;
                        }
                    };
                    match accept_greeting(&buf[..n]) {
                        Ok(()) => self.spawn_session(peer),
                        Err(rejection) => warn!(%peer, %rejection, "ignoring invalid greeting"),
                    }
                }
            }
        }
    }

    /// Accepts greetings forever
    pub async fn run(self) -> Result<()> {
        self.serve(std::future::pending()).await
    }

    fn spawn_session(&self, peer: SocketAddr) {
        let config = Arc::clone(&self.config);
        let socket = Arc::clone(&self.socket);
        let reports = self.reports.clone();

        tokio::spawn(async move {
            let outcome = handle_session(&config, &socket, peer).await;
            match &outcome {
                Ok(chain) => info!(%peer, %chain, "session complete"),
                Err(e) => error!(%peer, error = %e, "session failed"),
            }
            if let Some(reports) = reports {
                if reports.send(SessionReport { peer, outcome }).await.is_err() {
                    debug!(%peer, "session report dropped; receiver closed");
                }
            }
        });
    }
}

/// Checks a datagram against the stage A request shape
pub fn accept_greeting(raw: &[u8]) -> std::result::Result<(), Rejection> {
    let expectation = Expectation::new(Secret::NONE, Step::Request, GREETING.len() as u32);
    check_greeting(expectation.accept(raw)?)
}

async fn handle_session(
    config: &ServerConfig,
    greeting_socket: &UdpSocket,
    peer: SocketAddr,
) -> std::result::Result<SecretChain, StageError> {
    let mut session = Session::new(Role::Responder, peer);
    match drive_session(config, greeting_socket, &mut session).await {
        Ok(chain) => Ok(chain),
        Err(e) => Err(session.fail(e)),
    }
}

async fn drive_session(
    config: &ServerConfig,
    greeting_socket: &UdpSocket,
    session: &mut Session,
) -> Result<SecretChain> {
    let peer = session.peer();
    let tag = config.peer_tag;
    let params = SessionParams::draw(config, &mut StdRng::from_entropy());

    // Stage A: the reply goes out from the greeting endpoint, which the
    // initiator's socket is connected to
    let transfer_socket = UdpSocket::bind(ephemeral(config.bind_addr)).await?;
    let greeting = GreetingReply {
        num: params.num,
        length: params.length,
        udp_port: u32::from(transfer_socket.local_addr()?.port()),
        secret_a: params.secret_a,
    };
    let reply = Frame::new(Secret::NONE, Step::Response, tag, greeting.to_bytes());
    greeting_socket.send_to(&reply.encode(), peer).await?;
    session.greeted(greeting)?;
    info!(
        %peer,
        num = greeting.num,
        length = greeting.length,
        udp_port = greeting.udp_port,
        secret_a = %greeting.secret_a,
        "greeting answered"
    );

    // Stage B
    let mut acks: Box<dyn AckPolicy> = if config.ack_drop_probability > 0.0 {
        Box::new(RandomAckDrop::new(config.ack_drop_probability)?)
    } else {
        Box::new(AlwaysAck)
    };
    let mut receiver = TransferReceiver::new(&greeting, config.sequence_policy);
    let transfer_peer = receive_all(
        &transfer_socket,
        &mut receiver,
        acks.as_mut(),
        tag,
        peer.ip(),
        config.receive_timeout,
    )
    .await?;

    // The listener must exist before its port is advertised
    let listener = TcpListener::bind(ephemeral(config.bind_addr)).await?;
    let transfer = TransferReply {
        tcp_port: u32::from(listener.local_addr()?.port()),
        secret_b: params.secret_b,
    };
    let terminal = Frame::new(params.secret_b, Step::Response, tag, transfer.to_bytes());
    transfer_socket.send_to(&terminal.encode(), transfer_peer).await?;
    session.transferred(transfer)?;
    info!(
        %peer,
        resets = receiver.resets(),
        tcp_port = transfer.tcp_port,
        secret_b = %transfer.secret_b,
        "datagram transfer complete"
    );

    // Stages C and D
    let (stream, stream_peer) = timeout(config.accept_timeout, listener.accept())
        .await
        .map_err(|_| Error::timeout("no stream connection"))??;
    drop(listener);
    debug!(%peer, %stream_peer, "stream connection accepted");

    let setup = StreamSetup {
        num2: params.num2,
        len2: params.len2,
        secret_c: params.secret_c,
        fill: params.fill,
    };
    let reply = serve_stream(
        stream,
        params.secret_b,
        setup,
        params.secret_d,
        tag,
        config.stream_timeout,
    )
    .await?;

    session.completed(&setup, reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PeerTag;

    #[test]
    fn test_accept_greeting() {
        let valid = Frame::new(Secret::NONE, Step::Request, PeerTag(1), GREETING).encode();
        assert!(accept_greeting(&valid).is_ok());

        let wrong_text = Frame::new(Secret::NONE, Step::Request, PeerTag(1), &b"hello there\0"[..]).encode();
        assert!(matches!(
            accept_greeting(&wrong_text),
            Err(Rejection::ContentMismatch(_))
        ));

        let wrong_secret = Frame::new(Secret(5), Step::Request, PeerTag(1), GREETING).encode();
        assert!(matches!(
            accept_greeting(&wrong_secret),
            Err(Rejection::SecretMismatch { .. })
        ));

        assert!(accept_greeting(&valid[..10]).is_err());
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let config = ServerConfig {
            ack_drop_probability: 2.0,
            ..Default::default()
        };
        assert!(matches!(Responder::bind(config).await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        let responder = Responder::bind(config).await.unwrap();
        assert_ne!(responder.local_addr().unwrap().port(), 0);

        responder.serve(async {}).await.unwrap();
    }
}
