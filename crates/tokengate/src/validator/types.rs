//! Per-token requests and outcomes.

use crate::authority::AuthorityError;
use core::fmt;

/// A single token scheduled for verification, with its position in the
/// submitted batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationRequest {
    pub index: usize,
    pub token: String,
}

/// Why a token was reported invalid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InvalidReason {
    /// The token was empty or whitespace only. No call was made.
    Empty,
    /// The authority declined the token.
    Rejected { status: u16 },
    /// The call exceeded the per-call timeout.
    Timeout,
    /// The call failed in transport.
    Transport(String),
    /// The authority's success response could not be used.
    Malformed(String),
    /// The unit of work itself faulted before producing a result.
    Internal(String),
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Token is empty"),
            Self::Rejected { .. } => write!(f, "Token is invalid or expired"),
            Self::Timeout => write!(f, "Verification timed out"),
            Self::Transport(e) => write!(f, "Verification failed: {e}"),
            Self::Malformed(e) => write!(f, "Unexpected authority response: {e}"),
            Self::Internal(e) => write!(f, "Verification error: {e}"),
        }
    }
}

impl From<AuthorityError> for InvalidReason {
    fn from(err: AuthorityError) -> Self {
        match err {
            AuthorityError::Rejected { status } => Self::Rejected { status },
            AuthorityError::Timeout => Self::Timeout,
            AuthorityError::Transport(e) => Self::Transport(e),
            AuthorityError::Malformed(e) => Self::Malformed(e),
        }
    }
}

/// Outcome of verifying one token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerificationResult {
    Valid {
        /// Credential issued by the authority in exchange for the token.
        exchanged_credential: String,
        /// The submitted token, trimmed.
        original_token: String,
    },
    Invalid {
        reason: InvalidReason,
    },
}

impl VerificationResult {
    pub const fn invalid(reason: InvalidReason) -> Self {
        Self::Invalid { reason }
    }

    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }
}

/// Results of one batch, aligned 1:1 with the submitted tokens.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    results: Vec<VerificationResult>,
}

impl BatchOutcome {
    /// Builds an outcome from per-position slots. A slot that was never
    /// filled becomes an internal failure so the outcome keeps its length.
    pub(crate) fn from_slots(slots: Vec<Option<VerificationResult>>) -> Self {
        let results = slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    VerificationResult::invalid(InvalidReason::Internal(
                        "no result was produced".to_string(),
                    ))
                })
            })
            .collect();
        Self { results }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn results(&self) -> &[VerificationResult] {
        &self.results
    }

    pub fn valid_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_valid()).count()
    }

    pub fn into_results(self) -> Vec<VerificationResult> {
        self.results
    }
}

impl IntoIterator for BatchOutcome {
    type Item = VerificationResult;
    type IntoIter = std::vec::IntoIter<VerificationResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}
