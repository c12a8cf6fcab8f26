//! Error types shared by every tutoring component.
//!
//! The variants mirror how a failure is handled: validation and state errors go
//! back to the learner, upstream errors are either absorbed (retrieval,
//! classification) or surfaced (generation), and a missing session ends the
//! conversation.

use crate::phase::Phase;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TutorError {
    /// An inbound payload was malformed or missing a required field.
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Session '{0}' not found")]
    NotFound(Uuid),

    /// A transition was requested from or with something the phase table does not define.
    #[error("Invalid transition from {phase}: {reason}")]
    State { phase: Phase, reason: String },

    /// The phase name itself is not part of the cycle.
    #[error("Unknown phase '{0}'")]
    UnknownPhase(String),

    /// The generation or retrieval service could not be reached or answered with a failure status.
    #[error("Upstream service unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The upstream answered, but the payload could not be understood.
    #[error("Malformed upstream response: {0}")]
    UpstreamMalformed(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl TutorError {
    pub fn state(phase: Phase, reason: impl Into<String>) -> Self {
        Self::State {
            phase,
            reason: reason.into(),
        }
    }

    /// Errors that end the conversation instead of just failing the current turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TutorError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, TutorError>;
