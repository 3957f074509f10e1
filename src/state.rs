//! Session finite-state machine.
//!
//! Both peers walk the same sequence of states; the only difference is
//! whether a step is triggered by sending or by receiving a message.
//!
//! ```text
//!   Idle ──Greet──▶ Greeted ──Welcome──▶ Ready ──Request──▶ Requesting
//!                                                               │
//!                                                           Transfer
//!                                                               ▼
//!                                  Completed ◀──Complete── Transferring ◀─┐
//!                                                               │ Transfer│
//!                                                               └─────────┘
//!
//!   any state ──fail()──▶ Failed
//! ```
//!
//! `Complete` is also legal straight from `Requesting`: an empty resource
//! has no chunks, so `End` follows `RequestData` directly.
//!
//! Transitions are guarded: [`SessionState::advance`] returns a
//! [`SequenceError`] and leaves the state untouched when a step is not legal
//! from the current state. `Completed` and `Failed` are terminal; a new
//! session starts from a freshly constructed `Idle`.

use thiserror::Error;

/// All states a session can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Nothing exchanged yet.
    #[default]
    Idle,
    /// `Hello` exchanged.
    Greeted,
    /// `Welcome` exchanged.
    Ready,
    /// `RequestData` exchanged; no chunk has moved yet.
    Requesting,
    /// Chunks are flowing.
    Transferring,
    /// `End` exchanged. Terminal.
    Completed,
    /// Session aborted. Terminal.
    Failed,
}

/// A protocol step that moves the session forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Greet,
    Welcome,
    Request,
    Transfer,
    Complete,
}

/// A step attempted from a state that does not allow it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{step:?} is not allowed in state {state}")]
pub struct SequenceError {
    pub state: SessionState,
    pub step: Step,
}

impl SessionState {
    /// The state reached by taking `step`, without changing `self`.
    pub fn next(self, step: Step) -> Result<SessionState, SequenceError> {
        use SessionState::*;
        match (self, step) {
            (Idle, Step::Greet) => Ok(Greeted),
            (Greeted, Step::Welcome) => Ok(Ready),
            (Ready, Step::Request) => Ok(Requesting),
            (Requesting | Transferring, Step::Transfer) => Ok(Transferring),
            (Requesting | Transferring, Step::Complete) => Ok(Completed),
            (state, step) => Err(SequenceError { state, step }),
        }
    }

    /// Take `step`, updating `self` only if it is legal.
    pub fn advance(&mut self, step: Step) -> Result<(), SequenceError> {
        *self = self.next(step)?;
        Ok(())
    }

    /// Abort the session.
    pub fn fail(&mut self) {
        *self = SessionState::Failed;
    }

    /// `true` once the session has ended either way.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }

    /// `true` between the first `Hello` and a terminal state.
    pub fn is_active(self) -> bool {
        !matches!(self, SessionState::Idle) && !self.is_terminal()
    }

    /// `true` once `RequestData` has been exchanged and `End` has not.
    pub fn accepts_data(self) -> bool {
        matches!(self, SessionState::Requesting | SessionState::Transferring)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
