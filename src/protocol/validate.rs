//! Inbound packet validation
//!
//! Every frame is checked against what the current stage expects before any
//! of its header fields are trusted. Header checks run in a fixed order:
//! secret, step, declared length, then the actual frame length. Content
//! checks are applied to the payload afterwards by the stage that owns it.

use thiserror::Error;

use crate::core::{Secret, Step};
use super::codec::{expected_frame_len, Header, HEADER_LEN};
use super::message::GREETING;

/// Why an inbound frame was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("short header: {got} bytes")]
    ShortHeader { got: usize },

    #[error("secret mismatch: expected {expected}, got {actual}")]
    SecretMismatch { expected: Secret, actual: Secret },

    #[error("step mismatch: expected {expected}, got {actual}")]
    StepMismatch { expected: u16, actual: u16 },

    #[error("length mismatch: expected {expected} payload bytes, header declares {actual}")]
    LengthMismatch { expected: u32, actual: u32 },

    #[error("frame length mismatch: expected {expected} bytes, received {actual}")]
    FrameLengthMismatch { expected: usize, actual: usize },

    #[error("content mismatch: {0}")]
    ContentMismatch(String),
}

impl Rejection {
    pub fn content(msg: impl Into<String>) -> Self {
        Rejection::ContentMismatch(msg.into())
    }
}

/// The `(previousSecret, step, payloadLength)` a stage requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expectation {
    pub previous_secret: Secret,
    pub step: Step,
    pub payload_len: u32,
}

impl Expectation {
    pub fn new(previous_secret: Secret, step: Step, payload_len: u32) -> Self {
        Expectation {
            previous_secret,
            step,
            payload_len,
        }
    }

    /// Checks secret, step and declared length
    pub fn check_header(&self, header: &Header) -> Result<(), Rejection> {
        if header.previous_secret != self.previous_secret {
            return Err(Rejection::SecretMismatch {
                expected: self.previous_secret,
                actual: header.previous_secret,
            });
        }
        if header.step != self.step.as_u16() {
            return Err(Rejection::StepMismatch {
                expected: self.step.as_u16(),
                actual: header.step,
            });
        }
        if header.payload_len != self.payload_len {
            return Err(Rejection::LengthMismatch {
                expected: self.payload_len,
                actual: header.payload_len,
            });
        }
        Ok(())
    }

    /// Runs the header checks, then checks that `frame` is exactly as long
    /// as the padded length the header predicts
    pub fn validate(&self, header: &Header, frame: &[u8]) -> Result<(), Rejection> {
        self.check_header(header)?;
        let expected = expected_frame_len(header.payload_len);
        if frame.len() != expected {
            return Err(Rejection::FrameLengthMismatch {
                expected,
                actual: frame.len(),
            });
        }
        Ok(())
    }

    /// Decodes and validates a raw datagram, returning its unpadded payload
    pub fn accept<'a>(&self, frame: &'a [u8]) -> Result<&'a [u8], Rejection> {
        let header = Header::decode(frame)?;
        self.validate(&header, frame)?;
        Ok(&frame[HEADER_LEN..HEADER_LEN + header.payload_len as usize])
    }
}

/// Greeting payload must be the literal text with its NUL terminator
pub fn check_greeting(payload: &[u8]) -> Result<(), Rejection> {
    if payload != GREETING {
        return Err(Rejection::content(format!(
            "unexpected greeting {:?}",
            String::from_utf8_lossy(payload)
        )));
    }
    Ok(())
}

pub fn check_zeroes(bytes: &[u8]) -> Result<(), Rejection> {
    match bytes.iter().position(|&b| b != 0) {
        None => Ok(()),
        Some(i) => Err(Rejection::content(format!(
            "byte {} is {:#04x}, expected zero",
            i, bytes[i]
        ))),
    }
}

pub fn check_fill(bytes: &[u8], fill: u8) -> Result<(), Rejection> {
    match bytes.iter().position(|&b| b != fill) {
        None => Ok(()),
        Some(i) => Err(Rejection::content(format!(
            "byte {} is {:#04x}, expected fill {:#04x}",
            i, bytes[i], fill
        ))),
    }
}

pub fn check_packet_id(packet_id: u32, num: u32) -> Result<(), Rejection> {
    if packet_id >= num {
        return Err(Rejection::content(format!(
            "packet id {} outside 0..{}",
            packet_id, num
        )));
    }
    Ok(())
}
