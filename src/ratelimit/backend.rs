//! Rate limiter trait for abstracting concrete limiter algorithms.

use std::sync::Arc;

/// Admission operations the guard drives.
///
/// Implementations must make each call atomic with respect to its
/// read-test-increment sequence: concurrent callers for the same key can never
/// be admitted past the stated bound.
pub trait RateLimiterBackend: Send + Sync {
    /// Admit if fewer than `rate_per_window` acquisitions for `key` fall inside
    /// the limiter's window.
    fn try_acquire(&self, key: &str, rate_per_window: u64) -> bool;

    /// Add `increment` to the persistent counter for `key` if the resulting
    /// total stays within `max_total`.
    fn try_count(&self, increment: u64, key: &str, max_total: u64) -> bool;
}

impl<T: RateLimiterBackend + ?Sized> RateLimiterBackend for Arc<T> {
    fn try_acquire(&self, key: &str, rate_per_window: u64) -> bool {
        (**self).try_acquire(key, rate_per_window)
    }

    fn try_count(&self, increment: u64, key: &str, max_total: u64) -> bool {
        (**self).try_count(increment, key, max_total)
    }
}
