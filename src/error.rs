//! Domain errors
//!
//! Storage, config and CLI plumbing use `anyhow`; the typed errors here are
//! the ones callers are expected to match on.

use crate::prompt::PromptField;
use crate::provider::{GatewayError, Provider};
use thiserror::Error;

/// Rejected input at the session boundary. Nothing is changed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("code is {len} characters; the limit is {max}")]
    CodeTooLarge { len: usize, max: usize },
    #[error("{field} prompt is {len} characters; the limit is {max}")]
    PromptTooLong {
        field: PromptField,
        len: usize,
        max: usize,
    },
    #[error("unknown model '{0}'")]
    UnknownModel(String),
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),
}

/// Why a review request did not complete.
///
/// `Unchanged` and `AlreadyInFlight` are refusals: nothing was written. All
/// other variants ended a started request and left a message in the log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReviewError {
    #[error("No changes to code or prompt text since the last prompt.")]
    Unchanged,
    #[error("a review is already in progress")]
    AlreadyInFlight,
    #[error("no API key set for {provider}")]
    MissingCredential { provider: Provider },
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("Output truncated due to time limit.")]
    StreamTimeout,
    #[error("Prompt cancelled by user.")]
    UserCancelled,
}

impl ReviewError {
    /// True when the request never started.
    pub fn is_refusal(&self) -> bool {
        matches!(self, ReviewError::Unchanged | ReviewError::AlreadyInFlight)
    }
}
