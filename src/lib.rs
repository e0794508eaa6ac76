//! Staged handshake: a four-stage challenge protocol over UDP and TCP
//!
//! A client greets the server over UDP (stage A), delivers a counted series
//! of datagrams under a stop-and-wait acknowledgment scheme (stage B), then
//! opens a TCP connection to receive stream parameters (stage C) and streams
//! the requested frames (stage D). Each stage hands out a secret that the
//! next stage must echo in every header, chaining the stages together.

pub mod core;
pub mod network;
pub mod protocol;
pub mod role;
pub mod util;

// Re-export commonly used items
pub use crate::core::{
    ClientConfig, Error, PeerTag, Result, Secret, SecretChain, SequencePolicy, ServerConfig,
    Stage, StageError,
};
pub use crate::role::{Initiator, Responder, SessionReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
