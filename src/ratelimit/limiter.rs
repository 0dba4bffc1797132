//! Core in-process rate limiter implementation.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use super::backend::RateLimiterBackend;
use super::clock::{Clock, SystemClock};
use super::counter::{TimeWindow, TotalCounter, WindowLog};
use crate::config::LimiterConfig;

/// Default cap on tracked keys of each kind.
pub const DEFAULT_MAX_KEYS: usize = 100_000;

/// The in-process rate limiter.
///
/// Per-key state lives in sharded maps so unrelated keys never contend on a
/// single lock. Rate state is a [`WindowLog`] behind its own mutex; count state
/// is a lock-free [`TotalCounter`].
///
/// This struct is thread-safe and can be shared across threads and tasks.
pub struct LocalRateLimiter {
    /// Sliding-window logs indexed by limiter key
    windows: DashMap<String, Arc<Mutex<WindowLog>>>,
    /// Persistent totals indexed by limiter key
    counters: DashMap<String, Arc<TotalCounter>>,
    window: TimeWindow,
    max_keys: usize,
    clock: Arc<dyn Clock>,
    /// Reference point for `next_cap_sweep`
    epoch: Instant,
    /// Nanoseconds after `epoch` before which a saturated cap denies without sweeping
    next_cap_sweep: AtomicU64,
}

impl LocalRateLimiter {
    /// Create a limiter with the given window and default settings.
    pub fn new(window: TimeWindow) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            windows: DashMap::new(),
            counters: DashMap::new(),
            window,
            max_keys: DEFAULT_MAX_KEYS,
            epoch: clock.now(),
            clock,
            next_cap_sweep: AtomicU64::new(0),
        }
    }

    /// Create a limiter from configuration.
    pub fn from_config(config: &LimiterConfig) -> Self {
        Self::new(config.window).with_max_keys(config.max_keys)
    }

    /// Cap the number of tracked keys of each kind.
    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys;
        self
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.epoch = clock.now();
        self.clock = clock;
        self
    }

    /// Get the time window rate admissions are measured over.
    pub fn window(&self) -> TimeWindow {
        self.window
    }

    /// Number of acquisitions for `key` inside the current window.
    ///
    /// Returns `None` if no window state exists for the key.
    pub fn window_usage(&self, key: &str) -> Option<usize> {
        let log = self.windows.get(key).map(|entry| Arc::clone(entry.value()))?;
        let mut log = log.lock();
        log.prune(self.clock.now(), self.window.duration());
        Some(log.len())
    }

    /// Get the persistent total for `key`.
    ///
    /// Returns `None` if no counter exists for the key.
    pub fn current_count(&self, key: &str) -> Option<u64> {
        self.counters.get(key).map(|entry| entry.value().get())
    }

    /// Reset the persistent total for `key` to zero, returning the previous value.
    ///
    /// This is an administrative operation; admission never resets a counter.
    pub fn reset_count(&self, key: &str) -> Option<u64> {
        let previous = self.counters.get(key).map(|entry| entry.value().reset());
        if let Some(previous) = previous {
            debug!(key = %key, previous = previous, "Reset total counter");
        }
        previous
    }

    /// Number of keys with window state.
    pub fn window_key_count(&self) -> usize {
        self.windows.len()
    }

    /// Number of keys with a persistent total.
    pub fn counter_key_count(&self) -> usize {
        self.counters.len()
    }

    /// Clear all state.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.windows.retain(|_, log| {
            log.lock().retire();
            false
        });
        self.counters.clear();
    }

    /// Remove window state whose acquisitions have all aged out.
    ///
    /// Returns the number of keys evicted.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let window = self.window.duration();
        let mut evicted = 0;

        self.windows.retain(|_, log| {
            let mut log = log.lock();
            log.prune(now, window);
            if log.is_empty() {
                log.retire();
                evicted += 1;
                false
            } else {
                true
            }
        });

        if evicted > 0 {
            debug!(evicted = evicted, remaining = self.windows.len(), "Evicted expired rate windows");
        }
        evicted
    }

    /// Spawn a Tokio task that calls [`evict_expired`](Self::evict_expired) every `interval`.
    ///
    /// The task keeps the limiter alive until it is aborted through the returned handle.
    pub fn spawn_eviction_task(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = self.evict_expired();
                trace!(evicted = evicted, "Rate limiter eviction tick completed");
            }
        })
    }

    /// Get or create the window log for a key, honouring the key cap.
    fn window_log(&self, key: &str) -> Option<Arc<Mutex<WindowLog>>> {
        if let Some(entry) = self.windows.get(key) {
            return Some(Arc::clone(entry.value()));
        }

        if self.windows.len() >= self.max_keys {
            if self.claim_cap_sweep() {
                self.evict_expired();
            }
            if self.windows.len() >= self.max_keys {
                warn!(
                    key = %key,
                    max_keys = self.max_keys,
                    "Rate window capacity reached, denying new key"
                );
                return None;
            }
        }

        let entry = self.windows.entry(key.to_string()).or_default();
        Some(Arc::clone(entry.value()))
    }

    /// Allow at most one full sweep per window while the key cap is saturated.
    fn claim_cap_sweep(&self) -> bool {
        let now = self.clock.now().saturating_duration_since(self.epoch);
        let now = u64::try_from(now.as_nanos()).unwrap_or(u64::MAX);
        let window = u64::try_from(self.window.duration().as_nanos()).unwrap_or(u64::MAX);

        let next = self.next_cap_sweep.load(Ordering::Acquire);
        if now < next {
            return false;
        }
        self.next_cap_sweep
            .compare_exchange(next, now.saturating_add(window), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Get or create the counter for a key, honouring the key cap.
    fn counter(&self, key: &str) -> Option<Arc<TotalCounter>> {
        if let Some(entry) = self.counters.get(key) {
            return Some(Arc::clone(entry.value()));
        }

        if self.counters.len() >= self.max_keys {
            warn!(
                key = %key,
                max_keys = self.max_keys,
                "Counter capacity reached, denying new key"
            );
            return None;
        }

        let entry = self.counters.entry(key.to_string()).or_default();
        Some(Arc::clone(entry.value()))
    }
}

impl Default for LocalRateLimiter {
    fn default() -> Self {
        Self::new(TimeWindow::default())
    }
}

impl RateLimiterBackend for LocalRateLimiter {
    fn try_acquire(&self, key: &str, rate_per_window: u64) -> bool {
        if rate_per_window == 0 {
            return false;
        }

        let window = self.window.duration();
        loop {
            let Some(log) = self.window_log(key) else {
                return false;
            };

            let mut log = log.lock();
            // Evicted between lookup and lock; the map now holds a fresh log.
            if log.is_retired() {
                continue;
            }

            let admitted = log.try_admit(self.clock.now(), window, rate_per_window);
            trace!(
                key = %key,
                limit = rate_per_window,
                in_window = log.len(),
                admitted = admitted,
                "Checked rate window"
            );
            return admitted;
        }
    }

    fn try_count(&self, increment: u64, key: &str, max_total: u64) -> bool {
        let Some(counter) = self.counter(key) else {
            return false;
        };

        let admitted = counter.try_add(increment, max_total);
        trace!(
            key = %key,
            increment = increment,
            limit = max_total,
            total = counter.get(),
            admitted = admitted,
            "Checked total counter"
        );
        admitted
    }
}
