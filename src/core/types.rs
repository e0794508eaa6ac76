use std::fmt;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{Error, Result};

/// A per-stage secret echoed as `previousSecret` by the next stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Secret(pub u32);

impl Secret {
    /// Placeholder carried before any secret has been established
    pub const NONE: Secret = Secret(0);

    /// Draws a fresh secret; never collides with [`Secret::NONE`]
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Secret(rng.gen_range(super::MIN_SECRET..=u32::MAX))
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed identifier of the acting party, carried in every header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerTag(pub u16);

impl Default for PeerTag {
    fn default() -> Self {
        PeerTag(super::DEFAULT_PEER_TAG)
    }
}

/// Direction of a frame within a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    /// Initiator to responder
    Request,
    /// Responder to initiator
    Response,
}

impl Step {
    pub fn as_u16(self) -> u16 {
        match self {
            Step::Request => 1,
            Step::Response => 2,
        }
    }

    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            1 => Some(Step::Request),
            2 => Some(Step::Response),
            _ => None,
        }
    }
}

/// The four protocol phases; C and D share one stream connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Stage A
    Greeting,
    /// Stage B
    Transfer,
    /// Stages C and D
    Stream,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Greeting => write!(f, "stage A (greeting)"),
            Stage::Transfer => write!(f, "stage B (datagram transfer)"),
            Stage::Stream => write!(f, "stage C/D (stream exchange)"),
        }
    }
}

/// The full set of secrets collected by a completed session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretChain {
    pub a: Secret,
    pub b: Secret,
    pub c: Secret,
    pub d: Secret,
}

impl fmt::Display for SecretChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A={} B={} C={} D={}", self.a, self.b, self.c, self.d)
    }
}

/// What the responder does when a transfer packet arrives out of turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SequencePolicy {
    /// Restart expectation at packet 0; the whole window must be redelivered
    #[default]
    FullReset,
    /// Drop the packet and keep waiting for the expected one
    Resume,
}

/// Configuration for the initiating (client) role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Tag written into every outbound header
    pub peer_tag: PeerTag,
    /// Wait for the greeting response
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub greeting_timeout: Duration,
    /// Listening window after each transfer burst
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub retransmit_interval: Duration,
    /// Transfer bursts sent before giving up
    pub max_retransmit_rounds: u32,
    /// Wait for the terminal transfer response once every packet is acknowledged
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub terminal_timeout: Duration,
    /// Bound on connecting and on every stream read
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub stream_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            peer_tag: PeerTag::default(),
            greeting_timeout: Duration::from_secs(3),
            retransmit_interval: Duration::from_millis(500),
            max_retransmit_rounds: 20,
            terminal_timeout: Duration::from_secs(5),
            stream_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.retransmit_interval.is_zero() {
            return Err(Error::config("retransmit interval must be non-zero"));
        }
        if self.max_retransmit_rounds == 0 {
            return Err(Error::config("at least one transfer round is required"));
        }
        if self.greeting_timeout.is_zero() || self.stream_timeout.is_zero() {
            return Err(Error::config("timeouts must be non-zero"));
        }
        Ok(())
    }
}

/// Configuration for the responding (server) role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the greeting endpoint binds to
    pub bind_addr: SocketAddr,
    /// Tag written into every outbound header
    pub peer_tag: PeerTag,
    /// Range `num` (transfer packet count) is drawn from
    pub num_range: RangeInclusive<u32>,
    /// Range `length` (zero bytes per transfer packet) is drawn from
    pub length_range: RangeInclusive<u32>,
    /// Range `num2` (stream frame count) is drawn from
    pub num2_range: RangeInclusive<u32>,
    /// Range `len2` (stream frame length) is drawn from
    pub len2_range: RangeInclusive<u32>,
    /// Fixed fill character; a random ASCII letter when unset
    pub fill: Option<u8>,
    /// Probability that a transfer acknowledgment is withheld
    pub ack_drop_probability: f64,
    /// Handling of out-of-turn transfer packets
    pub sequence_policy: SequencePolicy,
    /// Idle bound on every transfer receive
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub receive_timeout: Duration,
    /// Wait for the initiator's stream connection
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub accept_timeout: Duration,
    /// Bound on every stream read
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub stream_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], super::DEFAULT_PORT)),
            peer_tag: PeerTag::default(),
            num_range: 5..=25,
            length_range: 5..=50,
            num2_range: 5..=25,
            len2_range: 5..=50,
            fill: None,
            ack_drop_probability: 0.0,
            sequence_policy: SequencePolicy::FullReset,
            receive_timeout: Duration::from_secs(5),
            accept_timeout: Duration::from_secs(5),
            stream_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    /// Checks that every range can be sampled and every bound is usable
    pub fn validate(&self) -> Result<()> {
        let ranges = [
            ("num", &self.num_range, 1),
            ("length", &self.length_range, 0),
            ("num2", &self.num2_range, 1),
            ("len2", &self.len2_range, 1),
        ];
        for (name, range, min) in ranges {
            if range.is_empty() {
                return Err(Error::config(format!("{} range is empty", name)));
            }
            if *range.start() < min {
                return Err(Error::config(format!("{} must be at least {}", name, min)));
            }
        }

        let max_length = super::MAX_DATAGRAM_PAYLOAD - 4;
        if *self.length_range.end() as usize > max_length {
            return Err(Error::config(format!("length may not exceed {}", max_length)));
        }
        if *self.len2_range.end() as usize > super::MAX_STREAM_PAYLOAD {
            return Err(Error::config(format!(
                "len2 may not exceed {}",
                super::MAX_STREAM_PAYLOAD
            )));
        }

        if !(0.0..1.0).contains(&self.ack_drop_probability) {
            return Err(Error::config("ack drop probability must lie in [0, 1)"));
        }

        if self.receive_timeout.is_zero()
            || self.accept_timeout.is_zero()
            || self.stream_timeout.is_zero()
        {
            return Err(Error::config("timeouts must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_secret_never_none() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            assert_ne!(Secret::generate(&mut rng), Secret::NONE);
        }
    }

    #[test]
    fn test_step_wire_values() {
        assert_eq!(Step::Request.as_u16(), 1);
        assert_eq!(Step::Response.as_u16(), 2);
        assert_eq!(Step::from_u16(2), Some(Step::Response));
        assert_eq!(Step::from_u16(3), None);
    }

    #[test]
    fn test_default_configs_validate() {
        assert!(ClientConfig::default().validate().is_ok());
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_server_config_rejects_bad_values() {
        let config = ServerConfig {
            num_range: 0..=3,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        #[allow(clippy::reversed_empty_ranges)]
        let config = ServerConfig {
            len2_range: 9..=3,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            ack_drop_probability: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            length_range: 5..=70_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = ServerConfig {
            fill: Some(b'X'),
            receive_timeout: Duration::from_millis(250),
            ..Default::default()
        };

        let json = serde_json::to_string(&config).unwrap();
        let decoded: ServerConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded.fill, Some(b'X'));
        assert_eq!(decoded.num_range, config.num_range);
        assert_eq!(decoded.receive_timeout, Duration::from_millis(250));
        assert_eq!(decoded.sequence_policy, SequencePolicy::FullReset);
    }
}
