//! Error taxonomy shared across the engine.
//!
//! Each crate keeps its own `thiserror` enum for the errors it can actually produce
//! (`LlmError`, `StoreError`, `DispatchError`, ...). [`ModerationError`] is the coarser
//! seven-kind classification that the retry wrapper and worker main loop dispatch on,
//! when they need to decide "retry or not" / "fail fast or log and continue" without
//! matching on every crate-specific variant.

use thiserror::Error;

/// Coarse error classification. Transport and Protocol are retryable at their owning
/// component's bounded budget; Validation, Authorization, NotFound and Internal are
/// not retried; Fatal means the worker should stop rather than continue.
#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("protocol: {0}")]
    Protocol(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("authorization: {0}")]
    Authorization(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal: {0}")]
    Internal(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ModerationError {
    /// Whether this kind of failure is worth retrying at a bounded budget.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ModerationError::Transport(_) | ModerationError::Protocol(_)
        )
    }
}
