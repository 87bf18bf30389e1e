//! Per-client fixed-window admission control.
//!
//! [`AdmissionController`] decides, before any verification work is scheduled,
//! whether a client identity still has requests left in its current window.
//! State is one [`ClientBucket`] per identity, held in a sharded
//! [`DashMap`]: checks for different identities proceed independently, while
//! checks for the same identity are serialized by the entry guard.
//!
//! Buckets are created lazily and reclaimed once their window has been stale
//! for at least twice the window duration. See [`ReclaimPolicy`] for when the
//! sweep runs.

use crate::{
    defaults::{DEFAULT_MAX_REQUESTS_PER_WINDOW, DEFAULT_WINDOW},
    error::{Error, Result},
    time::{MonotonicClock, TimeSource},
};
use core::{hash::Hash, time::Duration};
use dashmap::DashMap;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::{
    runtime::Handle,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;


/// Rate-limit state for one client identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientBucket {
    /// Requests admitted in the current window.
    pub count: u64,
    /// Start of the current window, in [`TimeSource`] milliseconds.
    pub window_start_ms: u64,
}

impl ClientBucket {
    const fn fresh(now_ms: u64) -> Self {
        Self {
            count: 0,
            window_start_ms: now_ms,
        }
    }
}

/// When stale [`ClientBucket`]s are swept from the table.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ReclaimPolicy {
    /// Only explicit calls to [`AdmissionController::reclaim`] sweep.
    Manual,
    /// A background task sweeps on a fixed interval. Started with
    /// [`AdmissionController::spawn_reclaimer`].
    Interval { every: Duration },
    /// Each admission check starts a background sweep with the given
    /// probability. At most one such sweep runs at a time.
    Probabilistic { probability: f64 },
}

impl Default for ReclaimPolicy {
    fn default() -> Self {
        Self::Interval {
            every: DEFAULT_WINDOW,
        }
    }
}

/// Configuration for an [`AdmissionController`].
#[derive(Clone, Debug)]
pub struct AdmissionOptions {
    /// Length of one fixed window.
    pub window: Duration,
    /// Requests admitted per identity per window.
    pub max_requests: u64,
    /// Stale bucket reclamation strategy.
    pub reclaim: ReclaimPolicy,
}

impl Default for AdmissionOptions {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            max_requests: DEFAULT_MAX_REQUESTS_PER_WINDOW,
            reclaim: ReclaimPolicy::default(),
        }
    }
}

/// Fixed-window request counter keyed by client identity.
///
/// # Algorithm
///
/// On each [`admit`](Self::admit):
///
/// 1. If `now - window_start >= window`, reset `count` to 0 and start a new
///    window at `now`.
/// 2. If `count >= max_requests`, reject without incrementing.
/// 3. Otherwise increment `count` and admit.
///
/// Window boundaries are not smoothed: a client may spend its whole allowance
/// at the end of one window and again at the start of the next. Replacing
/// this with a sliding window or token bucket moves the observable
/// admit/reject boundary.
///
/// # Thread Safety
///
/// The bucket for an identity is only read or written while holding its
/// [`DashMap`] entry guard, so concurrent checks for one identity never lose
/// an increment and never admit more than `max_requests` per window.
pub struct AdmissionController<K, C = MonotonicClock> {
    buckets: DashMap<K, ClientBucket>,
    window_ms: u64,
    max_requests: u64,
    reclaim: ReclaimPolicy,
    sweeping: AtomicBool,
    clock: C,
}

impl<K> AdmissionController<K, MonotonicClock>
where
    K: Eq + Hash + Clone,
{
    /// Creates a controller measuring windows with a [`MonotonicClock`].
    ///
    /// # Errors
    ///
    /// See [`with_clock`](Self::with_clock).
    pub fn new(options: AdmissionOptions) -> Result<Self> {
        Self::with_clock(options, MonotonicClock::new())
    }
}

impl<K, C> AdmissionController<K, C>
where
    K: Eq + Hash + Clone,
    C: TimeSource,
{
    /// Creates a controller reading time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if:
    /// - the window is shorter than one millisecond,
    /// - an interval reclaim policy has a zero interval,
    /// - a probabilistic reclaim policy is outside `[0, 1]`.
    pub fn with_clock(options: AdmissionOptions, clock: C) -> Result<Self> {
        let window_ms = u64::try_from(options.window.as_millis()).unwrap_or(u64::MAX);
        if window_ms == 0 {
            return Err(Error::invalid_config(
                "rate-limit window must be at least 1ms",
            ));
        }

        match options.reclaim {
            ReclaimPolicy::Interval { every } if every.is_zero() => {
                return Err(Error::invalid_config(
                    "reclaim interval must be greater than 0",
                ));
            }
            ReclaimPolicy::Probabilistic { probability }
                if !(0.0..=1.0).contains(&probability) =>
            {
                return Err(Error::invalid_config(format!(
                    "reclaim probability {probability} is outside [0, 1]"
                )));
            }
            _ => {}
        }

        Ok(Self {
            buckets: DashMap::new(),
            window_ms,
            max_requests: options.max_requests,
            reclaim: options.reclaim,
            sweeping: AtomicBool::new(false),
            clock,
        })
    }

    fn consume(&self, bucket: &mut ClientBucket, now: u64) -> bool {
        if now.saturating_sub(bucket.window_start_ms) >= self.window_ms {
            *bucket = ClientBucket::fresh(now);
        }

        if bucket.count >= self.max_requests {
            return false;
        }

        bucket.count += 1;
        true
    }

    /// Removes every bucket whose window started at least two windows ago and
    /// returns how many were removed.
    pub fn reclaim(&self) -> usize {
        let now = self.clock.current_millis();
        let stale_after = self.window_ms.saturating_mul(2);
        let mut removed = 0;

        self.buckets.retain(|_, bucket| {
            let keep = now.saturating_sub(bucket.window_start_ms) < stale_after;
            if !keep {
                removed += 1;
            }
            keep
        });

        #[cfg(feature = "tracing")]
        if removed > 0 {
            tracing::debug!(
                "Reclaimed {removed} stale client buckets ({} tracked)",
                self.buckets.len()
            );
        }

        removed
    }

    /// Number of identities currently holding a bucket.
    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }

    /// Snapshot of the bucket for `identity`, if one exists.
    pub fn bucket(&self, identity: &K) -> Option<ClientBucket> {
        self.buckets.get(identity).map(|bucket| *bucket)
    }

    pub fn reclaim_policy(&self) -> ReclaimPolicy {
        self.reclaim
    }
}

impl<K, C> AdmissionController<K, C>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    C: TimeSource + Send + Sync + 'static,
{
    /// Records a request from `identity` and reports whether it is admitted.
    ///
    /// A rejected request does not count against the window.
    ///
    /// Under [`ReclaimPolicy::Probabilistic`] a triggered sweep is handed to
    /// the Tokio blocking pool and this call returns without waiting for it.
    /// Outside a Tokio runtime the trigger is ignored.
    pub fn admit(self: &Arc<Self>, identity: &K) -> bool {
        let now = self.clock.current_millis();

        let allowed = match self.buckets.get_mut(identity) {
            Some(mut bucket) => self.consume(&mut bucket, now),
            None => {
                let mut bucket = self
                    .buckets
                    .entry(identity.clone())
                    .or_insert(ClientBucket::fresh(now));
                self.consume(&mut bucket, now)
            }
        };

        #[cfg(feature = "tracing")]
        if !allowed {
            tracing::debug!("Client exceeded {} requests in window", self.max_requests);
        }

        if let ReclaimPolicy::Probabilistic { probability } = self.reclaim {
            if rand::random::<f64>() < probability {
                self.spawn_sweep();
            }
        }

        allowed
    }

    /// Starts a background sweep unless one is already running.
    fn spawn_sweep(self: &Arc<Self>) {
        let Ok(runtime) = Handle::try_current() else {
            return;
        };

        if self
            .sweeping
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let controller = Arc::clone(self);
        runtime.spawn_blocking(move || {
            let _flight = SweepFlight(&controller.sweeping);
            controller.reclaim();
        });
    }

    /// Starts the background sweep for [`ReclaimPolicy::Interval`].
    ///
    /// Returns `None` for any other policy. The task stops when `shutdown` is
    /// cancelled or when the last strong reference to the controller is
    /// dropped.
    pub fn spawn_reclaimer(self: &Arc<Self>, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        let ReclaimPolicy::Interval { every } = self.reclaim else {
            return None;
        };

        let controller = Arc::downgrade(self);
        Some(tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; there is nothing to sweep yet.
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(controller) = controller.upgrade() else {
                            break;
                        };
                        controller.reclaim();
                    }
                }
            }

            #[cfg(feature = "tracing")]
            tracing::trace!("Bucket reclaimer stopped");
        }))
    }
}

/// Clears the single-flight flag when a sweep ends, including by panic.
struct SweepFlight<'a>(&'a AtomicBool);

impl Drop for SweepFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
