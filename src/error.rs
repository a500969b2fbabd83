//! Error types for jobgate.
//!
//! Every failure is local to the call that produced it. None of these
//! variants is fatal to the process; `InvalidKeySize` only means the server
//! or worker cannot be built with the secret it was given.

use thiserror::Error;

use crate::event::Hook;
use crate::model::{Work, WorkStatus};

#[derive(Debug, Error)]
pub enum Error {
    #[error("secret must be 32 bytes, got {0}")]
    InvalidKeySize(usize),

    #[error("failed to decrypt verification response")]
    DecryptionFailure,

    #[error("failed to parse worker id {0:?}")]
    IdentityParse(String),

    #[error("authentication failed")]
    AuthenticationFailure,

    #[error("verification response does not match the issued challenge")]
    ChallengeMismatch,

    #[error("handler already registered for {0}")]
    HandlerExists(Hook),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("work {} timed out", .0.id)]
    Timeout(Box<Work>),

    #[error("work item not found: {0}")]
    NotFound(String),

    #[error("invalid work id {0:?}")]
    InvalidWorkId(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: WorkStatus, to: WorkStatus },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for the expected deadline outcome, as opposed to a protocol failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
