//! Error types for admission and batch verification.
//!
//! [`Error`] covers the request-level failures: a caller that is over its
//! rate allowance, a batch that is too large, or a component constructed with
//! unusable options. Per-token failures are never errors at this level; they
//! are reported as [`InvalidReason`](crate::InvalidReason) data inside a
//! [`BatchOutcome`](crate::BatchOutcome).
//!
//! ## Error Cases
//! - `RateLimited`: the client exhausted its requests for the current window.
//! - `BatchTooLarge`: the batch holds more tokens than the configured maximum.
//! - `InvalidConfig`: options rejected at construction time.

pub type Result<T> = core::result::Result<T, Error>;

/// Unified request-level error type.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The client has no requests left in the current window.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// The batch exceeds the maximum number of tokens per request.
    #[error("Batch of {size} tokens exceeds maximum allowed ({max})")]
    BatchTooLarge { size: usize, max: usize },

    /// A component was constructed with options it cannot honor.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}
