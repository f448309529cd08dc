//! Refresh scheduling: single-shot timer guard and failure backoff.
//!
//! Only one refresh timer is ever live. Arming an already-live timer is
//! a no-op, and a firing carries the generation it was armed with so a
//! firing from a cancelled arm is recognized as stale and discarded
//! instead of triggering a duplicate refresh.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use tally_contrib::backoff;
use tally_types::config::{RefreshConfig, RetryConfig};

/// Generation-guarded single-shot timer.
pub struct SingleShotTimer {
    generation: AtomicU64,
    live: AtomicBool,
}

impl SingleShotTimer {
    /// A timer that has never been armed.
    pub fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            live: AtomicBool::new(false),
        }
    }

    /// Arm the timer, returning the generation token the eventual firing
    /// must present. Returns `None` if a timer is already live.
    pub fn arm(&self) -> Option<u64> {
        if self.live.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Report a firing. Returns whether the firing is current; a stale
    /// firing (token from a cancelled arm) must be discarded.
    pub fn fire(&self, token: u64) -> bool {
        if self.generation.load(Ordering::SeqCst) != token {
            return false;
        }
        self.live.store(false, Ordering::SeqCst);
        true
    }

    /// Cancel the live timer, if any. An in-flight firing for the old
    /// generation becomes stale.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.live.store(false, Ordering::SeqCst);
    }
}

impl Default for SingleShotTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes the delay until the next promotion refresh.
///
/// Healthy refreshes repeat at the configured interval; consecutive
/// failures back off with the same jittered-geometric ladder the
/// settlement engine uses, capped by the ladder's max delay.
pub struct RefreshSchedule {
    refresh: RefreshConfig,
    retry: RetryConfig,
    consecutive_failures: AtomicU32,
}

impl RefreshSchedule {
    /// Build a schedule from the refresh interval and retry ladder.
    pub fn new(refresh: RefreshConfig, retry: RetryConfig) -> Self {
        Self {
            refresh,
            retry,
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Record a successful refresh; the next delay is the plain interval.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    /// Record a failed refresh; subsequent delays back off.
    pub fn record_failure(&self) {
        self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
    }

    /// Seconds until the next refresh should fire.
    pub fn next_delay(&self, rng: &mut impl rand::Rng) -> u64 {
        let failures = self.consecutive_failures.load(Ordering::SeqCst);
        if failures == 0 {
            return self.refresh.interval_secs;
        }
        backoff::jittered_delay(&self.retry, failures - 1, rng)
    }
}
