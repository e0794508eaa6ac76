use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::core::{Error, Result, SecretChain, Stage, StageError};
use super::message::{GreetingReply, StreamReply, StreamSetup, TransferReply};

/// Which side of the handshake a session plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Client: sends the greeting and the payloads
    Initiator,
    /// Server: hands out secrets and validates payloads
    Responder,
}

/// Represents the current state of one handshake session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for (or about to send) the greeting
    Greeting,

    /// Greeting done, datagram transfer in progress
    Transfer {
        /// Stage A outcome
        greeting: GreetingReply,
    },

    /// Transfer done, stream exchange in progress
    Stream {
        /// Stage A outcome
        greeting: GreetingReply,
        /// Stage B outcome
        transfer: TransferReply,
    },

    /// Every stage validated
    Complete {
        /// The full secret chain
        chain: SecretChain,
    },

    /// Absorbing failure state
    Failed {
        /// Stage the first failure happened in
        stage: Stage,
        /// Description of the first failure
        reason: String,
    },
}

/// Information about the current session state
#[derive(Debug, Clone)]
pub struct StateInfo {
    /// Current state type
    pub state_type: &'static str,
    /// Stage in progress (if not terminal)
    pub stage: Option<Stage>,
    /// Time in current state
    pub time_in_state: Duration,
}

/// Session state machine owned by a single handler
///
/// Transitions only move forward. Any out-of-order transition is refused
/// with [`Error::InvalidState`] and leaves the state untouched.
#[derive(Debug)]
pub struct Session {
    role: Role,
    peer: SocketAddr,
    state: SessionState,
    entered: Instant,
}

impl Session {
    /// Creates a session in the greeting state
    pub fn new(role: Role, peer: SocketAddr) -> Self {
        Session {
            role,
            peer,
            state: SessionState::Greeting,
            entered: Instant::now(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Stage in progress, `None` once the session is terminal
    pub fn stage(&self) -> Option<Stage> {
        match self.state {
            SessionState::Greeting => Some(Stage::Greeting),
            SessionState::Transfer { .. } => Some(Stage::Transfer),
            SessionState::Stream { .. } => Some(Stage::Stream),
            SessionState::Complete { .. } | SessionState::Failed { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage().is_none()
    }

    /// The secret chain, only once every stage has completed
    pub fn chain(&self) -> Option<SecretChain> {
        match self.state {
            SessionState::Complete { chain } => Some(chain),
            _ => None,
        }
    }

    /// Greeting → Transfer
    pub fn greeted(&mut self, greeting: GreetingReply) -> Result<()> {
        match self.state {
            SessionState::Greeting => {
                self.enter(SessionState::Transfer { greeting });
                Ok(())
            }
            _ => Err(self.refuse("greeting reply")),
        }
    }

    /// Transfer → Stream
    pub fn transferred(&mut self, transfer: TransferReply) -> Result<()> {
        match self.state {
            SessionState::Transfer { greeting } => {
                self.enter(SessionState::Stream { greeting, transfer });
                Ok(())
            }
            _ => Err(self.refuse("transfer reply")),
        }
    }

    /// Stream → Complete, yielding the secret chain
    pub fn completed(&mut self, setup: &StreamSetup, reply: StreamReply) -> Result<SecretChain> {
        match self.state {
            SessionState::Stream { greeting, transfer } => {
                let chain = SecretChain {
                    a: greeting.secret_a,
                    b: transfer.secret_b,
                    c: setup.secret_c,
                    d: reply.secret_d,
                };
                self.enter(SessionState::Complete { chain });
                Ok(chain)
            }
            _ => Err(self.refuse("stream reply")),
        }
    }

    /// Moves to `Failed`, keeping the first recorded reason
    ///
    /// Once failed, later errors are only logged; the returned error is
    /// rebuilt from the first stage and reason.
    pub fn fail(&mut self, error: Error) -> StageError {
        if let SessionState::Failed { stage, reason } = &self.state {
            debug!(peer = %self.peer, %error, "error after session already failed");
            return StageError::new(
                *stage,
                Error::invalid_state(format!("session already failed: {}", reason)),
            );
        }

        // A completed session has nothing left to fail; attribute to the last stage
        let stage = self.stage().unwrap_or(Stage::Stream);
        warn!(peer = %self.peer, role = ?self.role, %stage, %error, "session failed");
        self.enter(SessionState::Failed {
            stage,
            reason: error.to_string(),
        });
        StageError::new(stage, error)
    }

    /// Gets information about the current state
    pub fn get_state_info(&self) -> StateInfo {
        let state_type = match self.state {
            SessionState::Greeting => "Greeting",
            SessionState::Transfer { .. } => "Transfer",
            SessionState::Stream { .. } => "Stream",
            SessionState::Complete { .. } => "Complete",
            SessionState::Failed { .. } => "Failed",
        };
        StateInfo {
            state_type,
            stage: self.stage(),
            time_in_state: self.entered.elapsed(),
        }
    }

    fn enter(&mut self, state: SessionState) {
        self.state = state;
        self.entered = Instant::now();
        debug!(peer = %self.peer, role = ?self.role, state = self.get_state_info().state_type, "session advanced");
    }

    fn refuse(&self, event: &str) -> Error {
        Error::invalid_state(format!(
            "{} received in {} state",
            event,
            self.get_state_info().state_type
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Secret;

    fn greeting() -> GreetingReply {
        GreetingReply {
            num: 3,
            length: 8,
            udp_port: 40_000,
            secret_a: Secret(11),
        }
    }

    fn transfer() -> TransferReply {
        TransferReply {
            tcp_port: 40_001,
            secret_b: Secret(22),
        }
    }

    fn setup() -> StreamSetup {
        StreamSetup {
            num2: 2,
            len2: 4,
            secret_c: Secret(33),
            fill: b'X',
        }
    }

    fn session() -> Session {
        Session::new(Role::Initiator, "127.0.0.1:12235".parse().unwrap())
    }

    #[test]
    fn test_forward_transitions() {
        let mut session = session();
        assert_eq!(session.stage(), Some(Stage::Greeting));

        session.greeted(greeting()).unwrap();
        assert_eq!(session.stage(), Some(Stage::Transfer));
        assert!(session.chain().is_none());

        session.transferred(transfer()).unwrap();
        assert_eq!(session.stage(), Some(Stage::Stream));

        let chain = session
            .completed(&setup(), StreamReply { secret_d: Secret(44) })
            .unwrap();
        assert_eq!(
            chain,
            SecretChain {
                a: Secret(11),
                b: Secret(22),
                c: Secret(33),
                d: Secret(44),
            }
        );
        assert!(session.is_terminal());
        assert_eq!(session.chain(), Some(chain));
    }

    #[test]
    fn test_stage_cannot_be_skipped() {
        let mut session = session();
        assert!(matches!(
            session.transferred(transfer()),
            Err(Error::InvalidState(_))
        ));
        assert_eq!(session.state(), &SessionState::Greeting);

        session.greeted(greeting()).unwrap();
        assert!(session.greeted(greeting()).is_err());
        assert!(session
            .completed(&setup(), StreamReply { secret_d: Secret(44) })
            .is_err());
    }

    #[test]
    fn test_failed_is_absorbing() {
        let mut session = session();
        session.greeted(greeting()).unwrap();

        let err = session.fail(Error::timeout("retry ceiling reached"));
        assert_eq!(err.stage, Stage::Transfer);
        assert!(session.is_terminal());
        assert!(session.chain().is_none());
        assert!(session.transferred(transfer()).is_err());

        // The first reason is kept, in the state and in the returned error
        let err = session.fail(Error::connection_lost("late"));
        assert_eq!(err.stage, Stage::Transfer);
        assert!(err.source.to_string().contains("retry ceiling"));
        assert!(!err.to_string().contains("late"));
        match session.state() {
            SessionState::Failed { stage, reason } => {
                assert_eq!(*stage, Stage::Transfer);
                assert!(reason.contains("retry ceiling"));
            }
            other => panic!("Expected Failed state, got {:?}", other),
        }
    }

    #[test]
    fn test_state_info() {
        let mut session = session();
        let info = session.get_state_info();
        assert_eq!(info.state_type, "Greeting");
        assert_eq!(info.stage, Some(Stage::Greeting));

        session.greeted(greeting()).unwrap();
        session.fail(Error::timeout("no ack"));
        let info = session.get_state_info();
        assert_eq!(info.state_type, "Failed");
        assert!(info.stage.is_none());
        assert!(info.time_in_state < Duration::from_secs(5));
    }
}
