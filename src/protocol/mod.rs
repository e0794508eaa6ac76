//! Protocol implementation module
//!
//! This module defines the frame layout, the payload of every stage, the
//! validation applied to inbound frames, and the session state machine.

pub mod codec;
pub mod message;
pub mod state;
pub mod validate;

pub use self::codec::{
    decode_header, encode_header, expected_frame_len, pad, padding_for, Frame, FrameCodec, Header,
    HEADER_LEN,
};
pub use self::message::{
    Ack, GreetingReply, Payload, StreamReply, StreamSetup, TransferReply, GREETING,
};
pub use self::state::{Role, Session, SessionState, StateInfo};
pub use self::validate::{Expectation, Rejection};
