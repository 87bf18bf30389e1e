use core::future::Future;

/// Why the external authority did not hand back an exchanged credential.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthorityError {
    /// The authority answered, but not with success (e.g., revoked, expired,
    /// or unknown token). `status` is the protocol status it answered with.
    #[error("Rejected by authority (status {status})")]
    Rejected { status: u16 },

    /// The call did not complete in time.
    #[error("Authority call timed out")]
    Timeout,

    /// The call failed below the protocol level (connect, TLS, reset, ...).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The authority signalled success but the body was unusable.
    #[error("Malformed authority response: {0}")]
    Malformed(String),
}

/// The remote procedure every token is verified against.
///
/// One call per token; implementations must not retry. A successful call
/// yields the exchanged credential.
pub trait Authority: Send + Sync + 'static {
    fn verify(&self, token: &str) -> impl Future<Output = Result<String, AuthorityError>> + Send;
}
