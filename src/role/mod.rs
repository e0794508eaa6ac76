//! The two parties of the handshake
//!
//! [`Initiator`] drives a single client session to completion. [`Responder`]
//! accepts greetings and runs one session task per client.

mod initiator;
mod responder;

pub use self::initiator::Initiator;
pub use self::responder::{accept_greeting, Responder, SessionReport};
