//! Bounded-concurrency batch verification.
//!
//! [`BatchValidator`] fans a batch of tokens out to an [`Authority`], one call
//! per non-empty token, and collects the outcomes into a [`BatchOutcome`] in
//! input order.
//!
//! ## Guarantees
//!
//! - The outcome has exactly one entry per submitted token, at the token's
//!   position, whatever order the calls complete in.
//! - Empty or whitespace-only tokens resolve to [`InvalidReason::Empty`]
//!   without taking a gate permit or calling the authority.
//! - At most `concurrency_limit` calls are in flight per gate. Waiters are
//!   admitted in FIFO order.
//! - A failure, timeout, or panic in one unit only affects that unit's entry.
//!
//! ## Structure
//!
//! - `types` - per-token request and result types.

mod types;
pub use types::*;

use crate::{
    authority::Authority,
    defaults::{DEFAULT_CONCURRENCY_LIMIT, DEFAULT_PER_CALL_TIMEOUT},
    error::{Error, Result},
};
use core::time::Duration;
use std::{collections::HashMap, sync::Arc};
use tokio::{runtime::Handle, sync::Semaphore, task::JoinSet, time::timeout};

#[cfg(test)]
mod tests;

/// Reported for a unit that panicked or was cancelled.
const UNIT_FAULTED: &str = "verification task failed";

/// Reported when a batch is polled outside a Tokio runtime.
const NO_RUNTIME: &str = "no async runtime available";

/// Scope of the concurrency ceiling.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GatePolicy {
    /// One gate shared by every batch, bounding total load on the authority.
    #[default]
    Global,
    /// Each batch gets its own gate of `concurrency_limit` permits.
    PerBatch,
}

/// Configuration for a [`BatchValidator`].
#[derive(Clone, Debug)]
pub struct ValidatorOptions {
    /// Maximum simultaneous authority calls per gate.
    pub concurrency_limit: usize,
    /// Bound on each authority call. Time spent waiting for a permit is not
    /// counted.
    pub per_call_timeout: Duration,
    pub gate_policy: GatePolicy,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            per_call_timeout: DEFAULT_PER_CALL_TIMEOUT,
            gate_policy: GatePolicy::Global,
        }
    }
}

/// Verifies batches of tokens against an [`Authority`].
pub struct BatchValidator<A> {
    authority: Arc<A>,
    gate: Arc<Semaphore>,
    options: ValidatorOptions,
}

impl<A: Authority> BatchValidator<A> {
    /// Creates a validator with a gate of `options.concurrency_limit` permits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the concurrency limit is zero or
    /// above [`Semaphore::MAX_PERMITS`], or if the per-call timeout is zero.
    pub fn new(authority: A, options: ValidatorOptions) -> Result<Self> {
        if options.concurrency_limit == 0 {
            return Err(Error::invalid_config(
                "concurrency limit must be greater than 0",
            ));
        }

        if options.concurrency_limit > Semaphore::MAX_PERMITS {
            return Err(Error::invalid_config(format!(
                "concurrency limit {} exceeds maximum ({})",
                options.concurrency_limit,
                Semaphore::MAX_PERMITS
            )));
        }

        if options.per_call_timeout.is_zero() {
            return Err(Error::invalid_config(
                "per-call timeout must be greater than 0",
            ));
        }

        Ok(Self {
            authority: Arc::new(authority),
            gate: Arc::new(Semaphore::new(options.concurrency_limit)),
            options,
        })
    }

    pub fn options(&self) -> &ValidatorOptions {
        &self.options
    }

    /// Permits currently free on the shared gate.
    ///
    /// Under [`GatePolicy::PerBatch`] the shared gate is unused and this
    /// always reports the full limit.
    pub fn available_permits(&self) -> usize {
        self.gate.available_permits()
    }

    /// Verifies every token and returns the outcomes in input order.
    ///
    /// Never fails as a whole: every per-token problem, including a unit that
    /// panics, is reported in that token's entry. Dropping the returned future
    /// aborts the batch's outstanding calls.
    ///
    /// Units are spawned onto the current Tokio runtime. When polled outside
    /// one, every non-empty token is reported as [`InvalidReason::Internal`].
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(tokens = tokens.len())))]
    pub async fn validate_batch<S: AsRef<str>>(&self, tokens: &[S]) -> BatchOutcome {
        let gate = match self.options.gate_policy {
            GatePolicy::Global => Arc::clone(&self.gate),
            GatePolicy::PerBatch => Arc::new(Semaphore::new(self.options.concurrency_limit)),
        };

        let mut slots: Vec<Option<VerificationResult>> = vec![None; tokens.len()];
        let runtime = Handle::try_current();
        let mut units = JoinSet::new();
        let mut positions = HashMap::with_capacity(tokens.len());

        for (index, token) in tokens.iter().enumerate() {
            let token = token.as_ref().trim();
            if token.is_empty() {
                slots[index] = Some(VerificationResult::invalid(InvalidReason::Empty));
                continue;
            }

            let Ok(runtime) = &runtime else {
                slots[index] = Some(VerificationResult::invalid(InvalidReason::Internal(
                    NO_RUNTIME.to_string(),
                )));
                continue;
            };

            let request = VerificationRequest {
                index,
                token: token.to_owned(),
            };
            let handle = units.spawn_on(
                verify_unit(
                    Arc::clone(&self.authority),
                    Arc::clone(&gate),
                    request,
                    self.options.per_call_timeout,
                ),
                runtime,
            );
            positions.insert(handle.id(), index);
        }

        while let Some(joined) = units.join_next_with_id().await {
            match joined {
                Ok((id, result)) => {
                    if let Some(&index) = positions.get(&id) {
                        slots[index] = Some(result);
                    }
                }
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Verification unit faulted: {e}");

                    // The join error carries the panic payload; keep it in the log only.
                    if let Some(&index) = positions.get(&e.id()) {
                        slots[index] = Some(VerificationResult::invalid(InvalidReason::Internal(
                            UNIT_FAULTED.to_string(),
                        )));
                    }
                }
            }
        }

        BatchOutcome::from_slots(slots)
    }
}

/// Verifies one token: waits for a gate permit, then makes exactly one
/// authority call bounded by `per_call_timeout`.
async fn verify_unit<A: Authority>(
    authority: Arc<A>,
    gate: Arc<Semaphore>,
    request: VerificationRequest,
    per_call_timeout: Duration,
) -> VerificationResult {
    let token = request.token.trim();
    if token.is_empty() {
        return VerificationResult::invalid(InvalidReason::Empty);
    }

    let Ok(_permit) = gate.acquire_owned().await else {
        return VerificationResult::invalid(InvalidReason::Internal(
            "concurrency gate closed".to_string(),
        ));
    };

    let result = match timeout(per_call_timeout, authority.verify(token)).await {
        Ok(Ok(exchanged_credential)) => VerificationResult::Valid {
            exchanged_credential,
            original_token: token.to_owned(),
        },
        Ok(Err(e)) => VerificationResult::invalid(e.into()),
        Err(_) => VerificationResult::invalid(InvalidReason::Timeout),
    };

    #[cfg(feature = "tracing")]
    match &result {
        VerificationResult::Valid { .. } => tracing::trace!("Token {} verified", request.index),
        VerificationResult::Invalid { reason } => {
            tracing::debug!("Token {} invalid: {reason}", request.index);
        }
    }

    result
}
