//! Default limits shared by the library options and the server CLI.

use core::time::Duration;

/// Length of one fixed rate-limit window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Requests a single client may make within one window.
pub const DEFAULT_MAX_REQUESTS_PER_WINDOW: u64 = 1000;

/// Tokens accepted in a single batch request.
pub const DEFAULT_MAX_TOKENS_PER_BATCH: usize = 5;

/// Ceiling on simultaneous outbound verification calls.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 5000;

/// Upper bound on a single outbound verification call.
pub const DEFAULT_PER_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Chance that an admission check also sweeps stale buckets, when the
/// probabilistic reclaim policy is selected.
pub const DEFAULT_RECLAIM_PROBABILITY: f64 = 0.01;
