use super::*;
use crate::authority::AuthorityError;
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use std::{
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    task::{Context, Poll, Waker},
};
use tokio::time::sleep;

/// Call bookkeeping shared between a test and its [`FakeAuthority`].
#[derive(Default)]
struct Probe {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    started: Mutex<Vec<String>>,
}

impl Probe {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

struct InFlight(Arc<Probe>);

impl InFlight {
    fn enter(probe: &Arc<Probe>) -> Self {
        let now = probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        probe.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(Arc::clone(probe))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Answers according to the token's prefix. A `@<ms>` suffix delays the
/// answer by that many milliseconds.
#[derive(Clone, Default)]
struct FakeAuthority {
    probe: Arc<Probe>,
}

impl Authority for FakeAuthority {
    async fn verify(&self, token: &str) -> core::result::Result<String, AuthorityError> {
        self.probe.calls.fetch_add(1, Ordering::SeqCst);
        self.probe.started.lock().unwrap().push(token.to_string());
        let _in_flight = InFlight::enter(&self.probe);

        let (name, delay) = match token.split_once('@') {
            Some((name, ms)) => (name, Duration::from_millis(ms.parse().unwrap())),
            None => (token, Duration::ZERO),
        };
        if !delay.is_zero() {
            sleep(delay).await;
        }

        if name.starts_with("hang") {
            std::future::pending::<()>().await;
        }
        if name.starts_with("reject") {
            return Err(AuthorityError::Rejected { status: 401 });
        }
        if name.starts_with("malformed") {
            return Err(AuthorityError::Malformed("missing access_token".into()));
        }
        if name.starts_with("transport") {
            return Err(AuthorityError::Transport("connection reset".into()));
        }
        if name.starts_with("panic") {
            panic!("authority blew up");
        }

        Ok(format!("access-{name}"))
    }
}

fn validator(concurrency_limit: usize, gate_policy: GatePolicy) -> (BatchValidator<FakeAuthority>, Arc<Probe>) {
    let authority = FakeAuthority::default();
    let probe = Arc::clone(&authority.probe);
    let validator = BatchValidator::new(
        authority,
        ValidatorOptions {
            concurrency_limit,
            per_call_timeout: Duration::from_secs(1),
            gate_policy,
        },
    )
    .unwrap();
    (validator, probe)
}

fn valid(name: &str, original: &str) -> VerificationResult {
    VerificationResult::Valid {
        exchanged_credential: format!("access-{name}"),
        original_token: original.to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn results_follow_input_order_not_completion_order() {
    let (validator, _) = validator(8, GatePolicy::Global);

    let outcome = validator.validate_batch(&["a@30", "b@20", "c@10"]).await;

    assert_eq!(
        outcome.into_results(),
        vec![valid("a", "a@30"), valid("b", "b@20"), valid("c", "c@10")]
    );
}

#[tokio::test(start_paused = true)]
async fn results_follow_input_order_under_shuffled_delays() {
    const TOKENS: u64 = 32;

    for seed in 0..8 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut delays: Vec<u64> = (1..=TOKENS).collect();
        delays.shuffle(&mut rng);
        let tokens: Vec<String> = delays
            .iter()
            .enumerate()
            .map(|(i, ms)| format!("t{i}@{ms}"))
            .collect();

        for limit in [1, 5, TOKENS as usize] {
            let (validator, _) = validator(limit, GatePolicy::Global);
            let outcome = validator.validate_batch(&tokens).await;

            let expected: Vec<_> = tokens
                .iter()
                .enumerate()
                .map(|(i, token)| valid(&format!("t{i}"), token))
                .collect();
            assert_eq!(outcome.into_results(), expected, "seed {seed}, limit {limit}");
        }
    }
}

#[tokio::test(start_paused = true)]
async fn empty_tokens_are_invalid_without_calls() {
    let (validator, probe) = validator(8, GatePolicy::Global);

    let outcome = validator.validate_batch(&["", "   ", "\t\n"]).await;

    assert_eq!(outcome.len(), 3);
    for result in outcome {
        assert_eq!(result, VerificationResult::invalid(InvalidReason::Empty));
    }
    assert_eq!(probe.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn empty_batch_yields_empty_outcome() {
    let (validator, probe) = validator(8, GatePolicy::Global);

    let outcome = validator.validate_batch::<&str>(&[]).await;

    assert!(outcome.is_empty());
    assert_eq!(probe.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn tokens_are_trimmed_before_verification() {
    let (validator, probe) = validator(8, GatePolicy::Global);

    let outcome = validator.validate_batch(&["  tok \n", ""]).await;

    assert_eq!(
        outcome.into_results(),
        vec![
            valid("tok", "tok"),
            VerificationResult::invalid(InvalidReason::Empty)
        ]
    );
    assert_eq!(probe.started(), vec!["tok".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn every_rejected_token_gets_its_own_entry() {
    let (validator, _) = validator(8, GatePolicy::Global);

    let outcome = validator
        .validate_batch(&["reject-1", "reject-2", "reject-3"])
        .await;

    assert_eq!(outcome.len(), 3);
    assert_eq!(outcome.valid_count(), 0);
    for result in outcome {
        assert_eq!(
            result,
            VerificationResult::invalid(InvalidReason::Rejected { status: 401 })
        );
    }
}

#[tokio::test(start_paused = true)]
async fn authority_errors_map_to_reasons() {
    let (validator, _) = validator(8, GatePolicy::Global);

    let outcome = validator
        .validate_batch(&["malformed", "transport", "ok"])
        .await;

    assert_eq!(
        outcome.into_results(),
        vec![
            VerificationResult::invalid(InvalidReason::Malformed("missing access_token".into())),
            VerificationResult::invalid(InvalidReason::Transport("connection reset".into())),
            valid("ok", "ok"),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn timeout_only_affects_the_slow_token() {
    let (validator, _) = validator(8, GatePolicy::Global);

    let outcome = validator.validate_batch(&["fast@10", "hang", "slow@900"]).await;

    assert_eq!(
        outcome.into_results(),
        vec![
            valid("fast", "fast@10"),
            VerificationResult::invalid(InvalidReason::Timeout),
            valid("slow", "slow@900"),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn waiting_for_a_permit_does_not_count_toward_the_timeout() {
    let (validator, _) = validator(1, GatePolicy::Global);

    // Each call takes 0.6s of a 1s budget; the second waits 0.6s for the gate.
    let outcome = validator.validate_batch(&["a@600", "b@600"]).await;

    assert_eq!(outcome.valid_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn in_flight_calls_never_exceed_the_limit() {
    let (validator, probe) = validator(3, GatePolicy::Global);
    let tokens: Vec<String> = (0..10).map(|i| format!("t{i}@50")).collect();

    let outcome = validator.validate_batch(&tokens).await;

    assert_eq!(outcome.valid_count(), 10);
    assert_eq!(probe.calls(), 10);
    assert_eq!(probe.max_in_flight(), 3);
}

#[tokio::test(start_paused = true)]
async fn global_gate_is_shared_across_batches() {
    let (validator, probe) = validator(2, GatePolicy::Global);
    let first = ["a1@50", "a2@50", "a3@50", "a4@50"];
    let second = ["b1@50", "b2@50", "b3@50", "b4@50"];

    let (a, b) = tokio::join!(validator.validate_batch(&first), validator.validate_batch(&second));

    assert_eq!(a.valid_count() + b.valid_count(), 8);
    assert_eq!(probe.max_in_flight(), 2);
}

#[tokio::test(start_paused = true)]
async fn per_batch_gates_are_independent() {
    let (validator, probe) = validator(2, GatePolicy::PerBatch);
    let first = ["a1@50", "a2@50", "a3@50", "a4@50"];
    let second = ["b1@50", "b2@50", "b3@50", "b4@50"];

    let (a, b) = tokio::join!(validator.validate_batch(&first), validator.validate_batch(&second));

    assert_eq!(a.valid_count() + b.valid_count(), 8);
    assert_eq!(probe.max_in_flight(), 4);
}

#[tokio::test(start_paused = true)]
async fn duplicate_tokens_are_verified_independently() {
    let (validator, probe) = validator(8, GatePolicy::Global);

    let outcome = validator.validate_batch(&["same", "same"]).await;

    assert_eq!(
        outcome.into_results(),
        vec![valid("same", "same"), valid("same", "same")]
    );
    assert_eq!(probe.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn panicking_unit_is_isolated() {
    let (validator, _) = validator(8, GatePolicy::Global);

    let outcome = validator.validate_batch(&["ok@10", "panic", "ok@20"]).await;
    let results = outcome.into_results();

    assert_eq!(results.len(), 3);
    assert_eq!(results[0], valid("ok", "ok@10"));
    assert_eq!(
        results[1],
        VerificationResult::invalid(InvalidReason::Internal(UNIT_FAULTED.to_string()))
    );
    assert_eq!(results[2], valid("ok", "ok@20"));

    let VerificationResult::Invalid { reason } = &results[1] else {
        panic!("expected an invalid result, got {:?}", results[1]);
    };
    assert!(!reason.to_string().contains("blew up"), "{reason}");
}

#[tokio::test(start_paused = true)]
async fn waiters_are_admitted_in_submission_order() {
    let (validator, probe) = validator(1, GatePolicy::Global);
    let tokens = ["a@10", "b@10", "c@10", "d@10"];

    validator.validate_batch(&tokens).await;

    assert_eq!(probe.started(), tokens.map(String::from).to_vec());
}

#[tokio::test(start_paused = true)]
async fn permits_are_returned_after_every_outcome() {
    let (validator, probe) = validator(4, GatePolicy::Global);

    validator
        .validate_batch(&["ok", "reject", "hang", "panic", "transport"])
        .await;

    assert_eq!(validator.available_permits(), 4);
    assert_eq!(probe.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn dropping_a_batch_aborts_outstanding_calls() {
    let (validator, probe) = validator(4, GatePolicy::Global);

    let abandoned = tokio::time::timeout(
        Duration::from_millis(100),
        validator.validate_batch(&["hang", "hang@5", "ok@10"]),
    )
    .await;
    assert!(abandoned.is_err());

    // Aborted tasks are torn down the next time the runtime runs them.
    sleep(Duration::from_millis(1)).await;

    assert_eq!(probe.in_flight(), 0);
    assert_eq!(validator.available_permits(), 4);
}

#[test]
fn rejects_unusable_options() {
    let build = |concurrency_limit, per_call_timeout| {
        BatchValidator::new(
            FakeAuthority::default(),
            ValidatorOptions {
                concurrency_limit,
                per_call_timeout,
                gate_policy: GatePolicy::Global,
            },
        )
    };

    assert!(matches!(
        build(0, Duration::from_secs(1)),
        Err(Error::InvalidConfig { .. })
    ));
    assert!(matches!(
        build(Semaphore::MAX_PERMITS + 1, Duration::from_secs(1)),
        Err(Error::InvalidConfig { .. })
    ));
    assert!(matches!(
        build(1, Duration::ZERO),
        Err(Error::InvalidConfig { .. })
    ));
    assert!(build(1, Duration::from_millis(1)).is_ok());
}

#[test]
fn batch_polled_outside_a_runtime_reports_every_token() {
    let (validator, probe) = validator(8, GatePolicy::Global);

    let mut batch = std::pin::pin!(validator.validate_batch(&["ok", "  ", "reject"]));
    let mut cx = Context::from_waker(Waker::noop());
    let Poll::Ready(outcome) = batch.as_mut().poll(&mut cx) else {
        panic!("batch without spawned units should complete on first poll");
    };

    let no_runtime = VerificationResult::invalid(InvalidReason::Internal(NO_RUNTIME.to_string()));
    assert_eq!(
        outcome.into_results(),
        vec![
            no_runtime.clone(),
            VerificationResult::invalid(InvalidReason::Empty),
            no_runtime,
        ]
    );
    assert_eq!(probe.calls(), 0);
}
