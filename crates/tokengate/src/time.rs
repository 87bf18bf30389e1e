use std::time::Instant;

/// A source of non-decreasing time in milliseconds.
///
/// The admission controller reads time only through this trait, so tests can
/// step across window boundaries without sleeping.
pub trait TimeSource {
    /// Returns the number of milliseconds elapsed since the source's origin.
    fn current_millis(&self) -> u64;
}

/// A [`TimeSource`] backed by [`Instant`], with its origin at construction.
///
/// Being monotonic, it is unaffected by wall-clock adjustments (e.g., NTP
/// steps), which would otherwise shrink or stretch rate-limit windows.
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicClock {
    fn current_millis(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}
