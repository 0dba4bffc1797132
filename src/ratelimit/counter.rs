//! Per-key limiter state.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Time window for rate limiting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    /// Per-second rate limiting
    #[default]
    Second,
    /// Per-minute rate limiting
    Minute,
    /// Per-hour rate limiting
    Hour,
    /// Per-day rate limiting
    Day,
}

impl TimeWindow {
    /// Get the duration of this time window.
    pub fn duration(&self) -> Duration {
        match self {
            TimeWindow::Second => Duration::from_secs(1),
            TimeWindow::Minute => Duration::from_secs(60),
            TimeWindow::Hour => Duration::from_secs(3600),
            TimeWindow::Day => Duration::from_secs(86400),
        }
    }
}

/// Sliding-window log of admitted acquisitions for one key.
///
/// Holds the timestamps of admissions younger than the window, so the number of
/// admissions inside any interval of window length never exceeds the limit.
/// Callers serialize access with a lock.
#[derive(Debug, Default)]
pub struct WindowLog {
    admitted: VecDeque<Instant>,
    retired: bool,
}

impl WindowLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an acquisition at `now` if fewer than `limit` are in the window.
    pub fn try_admit(&mut self, now: Instant, window: Duration, limit: u64) -> bool {
        self.prune(now, window);

        if (self.admitted.len() as u64) < limit {
            self.admitted.push_back(now);
            true
        } else {
            false
        }
    }

    /// Drop timestamps that have aged out of the window.
    pub fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.admitted.front() {
            if now.saturating_duration_since(oldest) < window {
                break;
            }
            self.admitted.pop_front();
        }
    }

    /// Number of acquisitions currently in the window.
    pub fn len(&self) -> usize {
        self.admitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.admitted.is_empty()
    }

    /// Mark the log as removed from its map. A retired log must not admit.
    pub fn retire(&mut self) {
        self.retired = true;
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }
}

/// Persistent cumulative counter for one key.
///
/// Admission is a compare-and-swap loop, so concurrent callers can never push
/// the total past the limit.
#[derive(Debug, Default)]
pub struct TotalCounter {
    total: AtomicU64,
}

impl TotalCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `increment` if the new total stays within `max_total`.
    ///
    /// Returns `true` if the increment was applied.
    pub fn try_add(&self, increment: u64, max_total: u64) -> bool {
        let mut current = self.total.load(Ordering::Acquire);
        loop {
            let next = match current.checked_add(increment) {
                Some(next) if next <= max_total => next,
                _ => return false,
            };

            match self.total.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Get the current total.
    pub fn get(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    /// Reset to zero, returning the previous total.
    pub fn reset(&self) -> u64 {
        self.total.swap(0, Ordering::AcqRel)
    }
}
