use crate::{
    admission::AdmissionController,
    authority::Authority,
    error::{Error, Result},
    time::{MonotonicClock, TimeSource},
    validator::{BatchOutcome, BatchValidator},
};
use core::hash::Hash;
use std::sync::Arc;

/// Admission control and batch validation behind one call.
///
/// [`check`](Self::check) applies, in order:
///
/// 1. the per-identity rate limit, rejecting with [`Error::RateLimited`];
/// 2. the batch size ceiling, rejecting with [`Error::BatchTooLarge`];
/// 3. batch validation.
///
/// An oversized batch has already been admitted, so it still uses up one of
/// the identity's requests for the window.
pub struct TokenChecker<K, A, C = MonotonicClock> {
    admission: Arc<AdmissionController<K, C>>,
    validator: BatchValidator<A>,
    max_tokens_per_batch: usize,
}

impl<K, A, C> TokenChecker<K, A, C>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    A: Authority,
    C: TimeSource + Send + Sync + 'static,
{
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `max_tokens_per_batch` is zero.
    pub fn new(
        admission: Arc<AdmissionController<K, C>>,
        validator: BatchValidator<A>,
        max_tokens_per_batch: usize,
    ) -> Result<Self> {
        if max_tokens_per_batch == 0 {
            return Err(Error::invalid_config(
                "max tokens per batch must be greater than 0",
            ));
        }

        Ok(Self {
            admission,
            validator,
            max_tokens_per_batch,
        })
    }

    pub fn admission(&self) -> &Arc<AdmissionController<K, C>> {
        &self.admission
    }

    pub fn validator(&self) -> &BatchValidator<A> {
        &self.validator
    }

    pub fn max_tokens_per_batch(&self) -> usize {
        self.max_tokens_per_batch
    }

    /// Checks one request from `identity` carrying `tokens`.
    ///
    /// # Errors
    ///
    /// - [`Error::RateLimited`] if `identity` has no requests left in its
    ///   window. The authority is not called.
    /// - [`Error::BatchTooLarge`] if `tokens` exceeds the batch ceiling. The
    ///   authority is not called.
    pub async fn check<S: AsRef<str>>(&self, identity: &K, tokens: &[S]) -> Result<BatchOutcome> {
        if !self.admission.admit(identity) {
            return Err(Error::RateLimited);
        }

        if tokens.len() > self.max_tokens_per_batch {
            return Err(Error::BatchTooLarge {
                size: tokens.len(),
                max: self.max_tokens_per_batch,
            });
        }

        Ok(self.validator.validate_batch(tokens).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        admission::{AdmissionOptions, ReclaimPolicy},
        authority::AuthorityError,
        validator::{InvalidReason, ValidatorOptions, VerificationResult},
    };
    use core::time::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct CountingAuthority {
        calls: Arc<AtomicUsize>,
    }

    impl Authority for CountingAuthority {
        async fn verify(&self, token: &str) -> core::result::Result<String, AuthorityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if token == "good" {
                Ok("fresh-access".to_string())
            } else {
                Err(AuthorityError::Rejected { status: 401 })
            }
        }
    }

    fn checker(max_requests: u64, max_tokens: usize) -> (TokenChecker<&'static str, CountingAuthority>, Arc<AtomicUsize>) {
        let authority = CountingAuthority::default();
        let calls = Arc::clone(&authority.calls);
        let admission = Arc::new(
            AdmissionController::new(AdmissionOptions {
                window: Duration::from_secs(60),
                max_requests,
                reclaim: ReclaimPolicy::Manual,
            })
            .unwrap(),
        );
        let validator = BatchValidator::new(authority, ValidatorOptions::default()).unwrap();
        (
            TokenChecker::new(admission, validator, max_tokens).unwrap(),
            calls,
        )
    }

    #[tokio::test]
    async fn verifies_an_admitted_batch() {
        let (checker, calls) = checker(10, 5);

        let outcome = checker.check(&"10.0.0.1", &["good", "bad", ""]).await.unwrap();

        assert_eq!(
            outcome.into_results(),
            vec![
                VerificationResult::Valid {
                    exchanged_credential: "fresh-access".to_string(),
                    original_token: "good".to_string(),
                },
                VerificationResult::invalid(InvalidReason::Rejected { status: 401 }),
                VerificationResult::invalid(InvalidReason::Empty),
            ]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rate_limited_request_never_reaches_the_authority() {
        let (checker, calls) = checker(1, 5);

        checker.check(&"10.0.0.1", &["good"]).await.unwrap();
        let err = checker.check(&"10.0.0.1", &["good"]).await.unwrap_err();

        assert_eq!(err, Error::RateLimited);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rate_limit_is_checked_before_batch_size() {
        let (checker, _) = checker(1, 1);

        checker.check(&"10.0.0.1", &["good"]).await.unwrap();
        let err = checker
            .check(&"10.0.0.1", &["good", "good"])
            .await
            .unwrap_err();

        assert_eq!(err, Error::RateLimited);
    }

    #[tokio::test]
    async fn oversized_batch_is_rejected_and_uses_a_request() {
        let (checker, calls) = checker(2, 2);

        let err = checker
            .check(&"10.0.0.1", &["a", "b", "c"])
            .await
            .unwrap_err();

        assert_eq!(err, Error::BatchTooLarge { size: 3, max: 2 });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(checker.admission().bucket(&"10.0.0.1").unwrap().count, 1);
    }

    #[tokio::test]
    async fn batch_at_the_ceiling_is_accepted() {
        let (checker, _) = checker(10, 2);

        let outcome = checker.check(&"10.0.0.1", &["good", "good"]).await.unwrap();

        assert_eq!(outcome.valid_count(), 2);
    }

    #[test]
    fn rejects_zero_batch_ceiling() {
        let admission = Arc::new(AdmissionController::<&str>::new(AdmissionOptions::default()).unwrap());
        let validator = BatchValidator::new(CountingAuthority::default(), ValidatorOptions::default()).unwrap();

        assert!(matches!(
            TokenChecker::new(admission, validator, 0),
            Err(Error::InvalidConfig { .. })
        ));
    }
}
