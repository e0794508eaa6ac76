use std::net::SocketAddr;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::core::{ClientConfig, Error, Result, Secret, SecretChain, StageError, Step};
use crate::network::{
    self, connected_udp, exchange_stream, recv_within, RetransmitConfig, TransferSender,
};
use crate::protocol::message::port;
use crate::protocol::{
    Expectation, Frame, GreetingReply, Payload, Role, Session, StreamReply, StreamSetup,
    TransferReply, GREETING,
};

/// Client side of the handshake
///
/// Runs the stages strictly in sequence against one server and collects the
/// secret chain.
#[derive(Debug)]
pub struct Initiator {
    config: ClientConfig,
    server: SocketAddr,
    session: Session,
}

impl Initiator {
    /// Resolves `host` and prepares a session against it
    pub async fn connect(host: &str, port: u16, config: ClientConfig) -> Result<Self> {
        let server = network::resolve(host, port).await?;
        Self::new(server, config)
    }

    pub fn new(server: SocketAddr, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Initiator {
            config,
            server,
            session: Session::new(Role::Initiator, server),
        })
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Runs every stage; the error names the stage that failed first
    pub async fn run(&mut self) -> std::result::Result<SecretChain, StageError> {
        match self.drive().await {
            Ok(chain) => Ok(chain),
            Err(e) => Err(self.session.fail(e)),
        }
    }

    async fn drive(&mut self) -> Result<SecretChain> {
        let greeting = self.greet().await?;
        self.session.greeted(greeting)?;

        let transfer = self.transfer(&greeting).await?;
        self.session.transferred(transfer)?;

        let (setup, reply) = self.stream(&transfer).await?;
        let chain = self.session.completed(&setup, reply)?;
        info!(server = %self.server, %chain, "handshake complete");
        Ok(chain)
    }

    /// Stage A
    async fn greet(&self) -> Result<GreetingReply> {
        let socket = connected_udp(self.server).await?;
        let request = Frame::new(Secret::NONE, Step::Request, self.config.peer_tag, GREETING);
        socket.send(&request.encode()).await?;
        debug!(server = %self.server, "greeting sent");

        let mut buf = [0u8; 64];
        let n = recv_within(&socket, &mut buf, self.config.greeting_timeout, "greeting reply").await?;
        let expectation = Expectation::new(Secret::NONE, Step::Response, GreetingReply::LEN as u32);
        let reply = GreetingReply::parse(expectation.accept(&buf[..n])?)?;
        port(reply.udp_port)?;

        info!(
            num = reply.num,
            length = reply.length,
            udp_port = reply.udp_port,
            secret_a = %reply.secret_a,
            "greeting accepted"
        );
        Ok(reply)
    }

    /// Stage B
    async fn transfer(&self, greeting: &GreetingReply) -> Result<TransferReply> {
        let endpoint = SocketAddr::new(self.server.ip(), port(greeting.udp_port)?);
        let socket = connected_udp(endpoint).await?;

        let mut sender = TransferSender::new(greeting, self.config.peer_tag);
        let reply = network::send_all(&socket, &mut sender, &RetransmitConfig::from(&self.config)).await?;
        port(reply.tcp_port)?;

        let resent = (0..greeting.num)
            .filter(|&id| sender.transmissions(id) > 1)
            .count();
        info!(
            tcp_port = reply.tcp_port,
            secret_b = %reply.secret_b,
            resent,
            "datagram transfer complete"
        );
        Ok(reply)
    }

    /// Stages C and D
    async fn stream(&self, transfer: &TransferReply) -> Result<(StreamSetup, StreamReply)> {
        let endpoint = SocketAddr::new(self.server.ip(), port(transfer.tcp_port)?);
        let stream = timeout(self.config.stream_timeout, TcpStream::connect(endpoint))
            .await
            .map_err(|_| Error::timeout(format!("connecting to {}", endpoint)))??;
        stream.set_nodelay(true)?;

        let (setup, reply) = exchange_stream(
            stream,
            transfer.secret_b,
            self.config.peer_tag,
            self.config.stream_timeout,
        )
        .await?;
        info!(secret_c = %setup.secret_c, secret_d = %reply.secret_d, "stream exchange complete");
        Ok((setup, reply))
    }
}
