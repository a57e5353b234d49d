//! Error taxonomy for the login and scraping flows.

use crate::session::SessionError;
use thiserror::Error;

/// Errors that can end a grade-check cycle.
#[derive(Debug, Error)]
pub enum GradeError {
    /// DNS/connect/TLS/timeout failure, tagged with the flow step it
    /// interrupted.
    #[error("transport failure during {step}: {message}")]
    Transport { step: &'static str, message: String },

    /// An expected HTML structure was absent. Usually means the target site
    /// changed layout; fatal for the cycle.
    #[error("expected page structure missing: {what}")]
    Extraction { what: String },

    /// The server explicitly rejected the username or password.
    #[error("login rejected: incorrect user ID or password")]
    InvalidCredentials,

    /// The server reported a generic failure during login.
    #[error("upstream login failure: {message}")]
    Upstream { message: String },
}

impl GradeError {
    /// Wraps a session-layer failure with the step it happened in.
    pub fn transport(step: &'static str, err: SessionError) -> Self {
        GradeError::Transport {
            step,
            message: err.to_string(),
        }
    }

    /// Builds an extraction error for a missing structure.
    pub fn missing(what: impl Into<String>) -> Self {
        GradeError::Extraction { what: what.into() }
    }

    /// True when a prompt retry is reasonable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GradeError::Transport { .. } | GradeError::Upstream { .. }
        )
    }

    /// True when the scheduler must hold off for a long cooldown.
    ///
    /// Repeated attempts with a rejected password can lock the account out,
    /// so the caller stretches the next check well beyond the normal
    /// interval.
    pub fn needs_cooldown(&self) -> bool {
        matches!(self, GradeError::InvalidCredentials)
    }
}
