//! Reliable datagram transfer (stage B).
//!
//! [`TransferSender`] and [`TransferReceiver`] only manage state; the async
//! drivers [`send_all`] and [`receive_all`] own the socket I/O.
//!
//! The initiator keeps a set of outstanding packet ids and retransmits the
//! whole set every `interval` until each id is acknowledged or the responder's
//! terminal message arrives. The responder delivers strictly in order: an id
//! above `next_expected` is out of turn and, under
//! [`SequencePolicy::FullReset`], restarts expectation at 0. An id below
//! `next_expected` was already delivered and is only re-acknowledged. The
//! initiator never resends an acknowledged id, so the responder steps
//! `next_expected` past those after a reset.
//!
//! The transfer completes once every id has been delivered and acknowledged
//! at least once, so a withheld acknowledgment forces a retransmission before
//! the terminal message is sent.

use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use rand::distributions::{Bernoulli, Distribution};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::net::UdpSocket;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, trace};

use crate::core::{ClientConfig, Error, PeerTag, Result, Secret, SequencePolicy, Step};
use crate::protocol::message::{parse_transfer_packet, transfer_packet};
use crate::protocol::validate::check_packet_id;
use crate::protocol::{
    Ack, Expectation, Frame, GreetingReply, Payload, Rejection, TransferReply,
};

/// Receive buffer size; large enough for any datagram
const RECV_BUFFER: usize = 65_536;

/// Timing of the initiator's retransmission loop
#[derive(Debug, Clone)]
pub struct RetransmitConfig {
    /// Listening window after each burst
    pub interval: Duration,
    /// Bursts sent before the transfer fails
    pub max_rounds: u32,
    /// Wait for the terminal response once nothing is outstanding
    pub terminal_timeout: Duration,
}

impl From<&ClientConfig> for RetransmitConfig {
    fn from(config: &ClientConfig) -> Self {
        RetransmitConfig {
            interval: config.retransmit_interval,
            max_rounds: config.max_retransmit_rounds,
            terminal_timeout: config.terminal_timeout,
        }
    }
}

/// What an inbound datagram meant to the initiator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderEvent {
    /// An outstanding id was acknowledged
    Acked(u32),
    /// Acknowledgment for an id that was no longer outstanding
    StaleAck(u32),
    /// The responder's terminal message
    Finished(TransferReply),
}

/// Initiator-side transfer state
#[derive(Debug)]
pub struct TransferSender {
    num: u32,
    length: u32,
    secret_a: Secret,
    peer_tag: PeerTag,
    outstanding: BTreeSet<u32>,
    transmissions: Vec<u32>,
}

impl TransferSender {
    pub fn new(greeting: &GreetingReply, peer_tag: PeerTag) -> Self {
        TransferSender {
            num: greeting.num,
            length: greeting.length,
            secret_a: greeting.secret_a,
            peer_tag,
            outstanding: (0..greeting.num).collect(),
            transmissions: vec![0; greeting.num as usize],
        }
    }

    /// Number of ids still awaiting acknowledgment
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    pub fn is_drained(&self) -> bool {
        self.outstanding.is_empty()
    }

    /// How many times `packet_id` has been put on the wire
    pub fn transmissions(&self, packet_id: u32) -> u32 {
        self.transmissions
            .get(packet_id as usize)
            .copied()
            .unwrap_or(0)
    }

    /// Encoded frames for every outstanding id, lowest first
    ///
    /// Each returned frame is counted as transmitted.
    pub fn next_burst(&mut self) -> Vec<Bytes> {
        let mut burst = Vec::with_capacity(self.outstanding.len());
        for &packet_id in &self.outstanding {
            self.transmissions[packet_id as usize] += 1;
            let payload = transfer_packet(packet_id, self.length);
            burst.push(Frame::new(self.secret_a, Step::Request, self.peer_tag, payload).encode());
        }
        burst
    }

    /// Interprets one inbound datagram
    ///
    /// A 4-byte payload is an acknowledgment framed with secret A. An 8-byte
    /// payload is the terminal response, framed with the secret B it carries.
    pub fn on_datagram(&mut self, raw: &[u8]) -> std::result::Result<SenderEvent, Rejection> {
        let frame = Frame::decode_datagram(raw)?;
        match frame.header.payload_len as usize {
            Ack::LEN => {
                Expectation::new(self.secret_a, Step::Response, Ack::LEN as u32)
                    .check_header(&frame.header)?;
                let ack = Ack::parse(&frame.payload)?;
                check_packet_id(ack.packet_id, self.num)?;
                if self.outstanding.remove(&ack.packet_id) {
                    Ok(SenderEvent::Acked(ack.packet_id))
                } else {
                    Ok(SenderEvent::StaleAck(ack.packet_id))
                }
            }
            TransferReply::LEN => {
                let reply = TransferReply::parse(&frame.payload)?;
                Expectation::new(reply.secret_b, Step::Response, TransferReply::LEN as u32)
                    .check_header(&frame.header)?;
                Ok(SenderEvent::Finished(reply))
            }
            other => Err(Rejection::LengthMismatch {
                expected: Ack::LEN as u32,
                actual: other as u32,
            }),
        }
    }
}

/// Drives the initiator side over a socket connected to the transfer endpoint
pub async fn send_all(
    socket: &UdpSocket,
    sender: &mut TransferSender,
    config: &RetransmitConfig,
) -> Result<TransferReply> {
    let mut buf = vec![0u8; RECV_BUFFER];
    let mut rounds = 0;

    while !sender.is_drained() {
        if rounds == config.max_rounds {
            return Err(Error::timeout(format!(
                "{} packets unacknowledged after {} rounds",
                sender.outstanding(),
                rounds
            )));
        }
        rounds += 1;

        let burst = sender.next_burst();
        debug!(round = rounds, packets = burst.len(), "sending transfer burst");
        for frame in &burst {
            socket.send(frame).await?;
        }

        let deadline = Instant::now() + config.interval;
        while !sender.is_drained() {
            let n = match timeout_at(deadline, socket.recv(&mut buf)).await {
                Ok(received) => received?,
                Err(_) => break,
            };
            match sender.on_datagram(&buf[..n])? {
                SenderEvent::Finished(reply) => {
                    debug!(outstanding = sender.outstanding(), "terminal response ends transfer");
                    return Ok(reply);
                }
                SenderEvent::Acked(packet_id) => trace!(packet_id, "acknowledged"),
                SenderEvent::StaleAck(packet_id) => trace!(packet_id, "stale acknowledgment"),
            }
        }
    }

    // Every packet is acknowledged; the terminal response may still be in flight
    let deadline = Instant::now() + config.terminal_timeout;
    loop {
        let n = timeout_at(deadline, socket.recv(&mut buf))
            .await
            .map_err(|_| Error::timeout("no terminal transfer response"))??;
        if let SenderEvent::Finished(reply) = sender.on_datagram(&buf[..n])? {
            return Ok(reply);
        }
    }
}

/// Decides whether the responder acknowledges a packet
pub trait AckPolicy: Send {
    fn should_ack(&mut self, packet_id: u32) -> bool;
}

/// Acknowledges everything
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysAck;

impl AckPolicy for AlwaysAck {
    fn should_ack(&mut self, _packet_id: u32) -> bool {
        true
    }
}

/// Withholds each acknowledgment with a fixed probability
#[derive(Debug, Clone)]
pub struct RandomAckDrop {
    drop: Bernoulli,
    rng: StdRng,
}

impl RandomAckDrop {
    pub fn new(probability: f64) -> Result<Self> {
        Self::with_rng(probability, StdRng::from_entropy())
    }

    /// Reproducible variant for tests
    pub fn seeded(probability: f64, seed: u64) -> Result<Self> {
        Self::with_rng(probability, StdRng::seed_from_u64(seed))
    }

    fn with_rng(probability: f64, rng: StdRng) -> Result<Self> {
        let drop = Bernoulli::new(probability)
            .map_err(|e| Error::config(format!("invalid ack drop probability: {}", e)))?;
        Ok(RandomAckDrop { drop, rng })
    }
}

impl AckPolicy for RandomAckDrop {
    fn should_ack(&mut self, _packet_id: u32) -> bool {
        !self.drop.sample(&mut self.rng)
    }
}

/// What an inbound transfer packet meant to the responder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// The expected id, delivered
    Delivered(u32),
    /// An id below `next_expected`, already delivered
    Duplicate(u32),
    /// An id above `next_expected`
    OutOfTurn { packet_id: u32, expected: u32 },
}

/// Responder-side transfer state
#[derive(Debug)]
pub struct TransferReceiver {
    num: u32,
    length: u32,
    secret_a: Secret,
    policy: SequencePolicy,
    next_expected: u32,
    acked: Vec<bool>,
    acked_count: u32,
    resets: u32,
}

impl TransferReceiver {
    pub fn new(greeting: &GreetingReply, policy: SequencePolicy) -> Self {
        TransferReceiver {
            num: greeting.num,
            length: greeting.length,
            secret_a: greeting.secret_a,
            policy,
            next_expected: 0,
            acked: vec![false; greeting.num as usize],
            acked_count: 0,
            resets: 0,
        }
    }

    pub fn next_expected(&self) -> u32 {
        self.next_expected
    }

    /// Times expectation was restarted at packet 0
    pub fn resets(&self) -> u32 {
        self.resets
    }

    /// Validates one datagram and applies its packet id
    ///
    /// A rejected datagram leaves the state untouched.
    pub fn on_datagram(&mut self, raw: &[u8]) -> std::result::Result<ReceiveOutcome, Rejection> {
        let expectation = Expectation::new(self.secret_a, Step::Request, 4 + self.length);
        let payload = expectation.accept(raw)?;
        let packet_id = parse_transfer_packet(payload, self.num)?;
        Ok(self.on_packet(packet_id))
    }

    fn on_packet(&mut self, packet_id: u32) -> ReceiveOutcome {
        if packet_id == self.next_expected {
            self.next_expected += 1;
            self.skip_acked();
            ReceiveOutcome::Delivered(packet_id)
        } else if packet_id < self.next_expected {
            ReceiveOutcome::Duplicate(packet_id)
        } else {
            let expected = self.next_expected;
            if self.policy == SequencePolicy::FullReset {
                self.next_expected = 0;
                self.resets += 1;
                self.skip_acked();
            }
            ReceiveOutcome::OutOfTurn {
                packet_id,
                expected,
            }
        }
    }

    /// Moves `next_expected` past ids whose acknowledgment already went out
    ///
    /// The initiator stops sending an id once it is acknowledged, so waiting
    /// for one again after a reset would stall the transfer.
    fn skip_acked(&mut self) {
        while self
            .acked
            .get(self.next_expected as usize)
            .copied()
            .unwrap_or(false)
        {
            self.next_expected += 1;
        }
    }

    /// Records that an acknowledgment for `packet_id` went out
    pub fn mark_acked(&mut self, packet_id: u32) {
        if let Some(acked) = self.acked.get_mut(packet_id as usize) {
            if !*acked {
                *acked = true;
                self.acked_count += 1;
            }
        }
    }

    /// Every id delivered and acknowledged at least once
    pub fn is_complete(&self) -> bool {
        self.next_expected == self.num && self.acked_count == self.num
    }

    pub fn ack_frame(&self, packet_id: u32, peer_tag: PeerTag) -> Bytes {
        Frame::new(self.secret_a, Step::Response, peer_tag, Ack { packet_id }.to_bytes()).encode()
    }
}

/// Drives the responder side until every packet is delivered and acknowledged
///
/// Returns the initiator's address. Only datagrams from `initiator_ip` are
/// considered. Until the first valid packet locks in the sender, datagrams
/// that fail validation are dropped; after that, datagrams from any other
/// address are ignored and an invalid one from the locked sender fails the
/// transfer.
pub async fn receive_all(
    socket: &UdpSocket,
    receiver: &mut TransferReceiver,
    acks: &mut dyn AckPolicy,
    peer_tag: PeerTag,
    initiator_ip: IpAddr,
    idle_timeout: Duration,
) -> Result<SocketAddr> {
    let mut buf = vec![0u8; RECV_BUFFER];
    let mut peer: Option<SocketAddr> = None;

    loop {
        let (n, from) = timeout(idle_timeout, socket.recv_from(&mut buf))
            .await
            .map_err(|_| Error::timeout(format!("no transfer packet within {:?}", idle_timeout)))??;

        if from.ip() != initiator_ip || matches!(peer, Some(locked) if locked != from) {
            debug!(%from, "ignoring datagram from foreign source");
            continue;
        }

        let outcome = match (receiver.on_datagram(&buf[..n]), peer) {
            (Ok(outcome), _) => outcome,
            (Err(rejection), None) => {
                debug!(%from, %rejection, "dropping invalid datagram before sender lock");
                continue;
            }
            (Err(rejection), Some(_)) => return Err(rejection.into()),
        };
        peer = Some(from);

        match outcome {
            ReceiveOutcome::Delivered(packet_id) | ReceiveOutcome::Duplicate(packet_id) => {
                if acks.should_ack(packet_id) {
                    socket.send_to(&receiver.ack_frame(packet_id, peer_tag), from).await?;
                    receiver.mark_acked(packet_id);
                } else {
                    debug!(packet_id, "withholding acknowledgment");
                }
            }
            ReceiveOutcome::OutOfTurn { packet_id, expected } => {
                debug!(packet_id, expected, next = receiver.next_expected(), "packet out of turn");
            }
        }

        if receiver.is_complete() {
            return Ok(from);
        }
    }
}
