//! Core types shared by every stage of the handshake
//!
//! This module contains the error taxonomy, the secret and tag newtypes, and
//! the configuration for both roles.

pub mod error;
pub mod types;
pub mod serde;

pub use self::error::{Error, Result, StageError};
pub use self::types::{
    ClientConfig,
    PeerTag,
    Secret,
    SecretChain,
    SequencePolicy,
    ServerConfig,
    Stage,
    Step,
};

/// Default port of the greeting endpoint
pub const DEFAULT_PORT: u16 = 12235;

/// Default peer tag written into headers
pub const DEFAULT_PEER_TAG: u16 = 56;

/// Smallest secret the responder hands out
pub const MIN_SECRET: u32 = 10_000;

/// Largest payload that fits one datagram frame
pub const MAX_DATAGRAM_PAYLOAD: usize = 65_507 - crate::protocol::HEADER_LEN - 3;

/// Largest payload accepted on the stream transport
pub const MAX_STREAM_PAYLOAD: usize = 1 << 20;
