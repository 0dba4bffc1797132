//! Interception dispatcher.

use std::future::Future;
use std::sync::Arc;
use tracing::{debug, trace};

use super::resolver::resolve_key;
use crate::context::CallContext;
use crate::error::{GuardError, Result};
use crate::policy::{AdmissionMode, Policy, PolicyRegistry};
use crate::ratelimit::RateLimiterBackend;

/// Lifecycle of one guarded call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Policies are still being checked
    Pending,
    /// Every policy admitted the call
    Admitted,
    /// A policy denied the call; terminal
    Denied,
    /// The wrapped operation was invoked; terminal
    Delegated,
}

/// Wraps protected operations with policy checks against a limiter.
pub struct Guard<R: RateLimiterBackend> {
    limiter: Arc<R>,
    registry: Arc<PolicyRegistry>,
}

impl<R: RateLimiterBackend> Clone for Guard<R> {
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<R: RateLimiterBackend> Guard<R> {
    /// Create a guard with an empty policy registry.
    pub fn new(limiter: Arc<R>) -> Self {
        Self::with_registry(limiter, PolicyRegistry::new())
    }

    /// Create a guard that looks up policies in a registry.
    pub fn with_registry(limiter: Arc<R>, registry: PolicyRegistry) -> Self {
        Self {
            limiter,
            registry: Arc::new(registry),
        }
    }

    /// Get the limiter.
    pub fn limiter(&self) -> &Arc<R> {
        &self.limiter
    }

    /// Get the policy registry.
    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    /// Check every policy in order, stopping at the first denial.
    pub fn admit(&self, ctx: &CallContext, policies: &[Policy]) -> Result<()> {
        trace!(
            operation = %ctx.operation(),
            policies = policies.len(),
            state = ?CallState::Pending,
            "Checking policies"
        );

        for policy in policies {
            let key = resolve_key(policy, ctx)?;
            debug!(
                operation = %ctx.operation(),
                strategy = %policy.strategy,
                mode = %policy.admission_mode,
                key = %key,
                "Applying rate limit policy"
            );

            let admitted = match policy.admission_mode {
                AdmissionMode::Rate => self.limiter.try_acquire(&key, policy.rate_limit),
                AdmissionMode::TotalCount => {
                    self.limiter.try_count(1, &key, policy.total_count_limit)
                }
            };

            if !admitted {
                debug!(
                    operation = %ctx.operation(),
                    key = %key,
                    mode = %policy.admission_mode,
                    limit = policy.limit(),
                    state = ?CallState::Denied,
                    "Rate limit exceeded"
                );
                return Err(GuardError::RateLimitExceeded {
                    mode: policy.admission_mode,
                    limit: policy.limit(),
                    key,
                });
            }
        }

        trace!(operation = %ctx.operation(), state = ?CallState::Admitted, "Call admitted");
        Ok(())
    }

    /// Run `proceed` if every policy admits the call.
    ///
    /// `proceed` is invoked at most once and its output is returned unmodified.
    pub fn guard<T, F>(&self, ctx: &CallContext, policies: &[Policy], proceed: F) -> Result<T>
    where
        F: FnOnce() -> T,
    {
        self.admit(ctx, policies)?;
        trace!(operation = %ctx.operation(), state = ?CallState::Delegated, "Invoking operation");
        Ok(proceed())
    }

    /// Like [`guard`](Self::guard), for operations that return a future.
    ///
    /// Admission itself never suspends; only the wrapped operation is awaited.
    pub async fn guard_async<T, F, Fut>(
        &self,
        ctx: &CallContext,
        policies: &[Policy],
        proceed: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.admit(ctx, policies)?;
        trace!(operation = %ctx.operation(), state = ?CallState::Delegated, "Invoking operation");
        Ok(proceed().await)
    }

    /// Guard a call with the policies registered for its operation.
    pub fn guard_operation<T, F>(&self, ctx: &CallContext, proceed: F) -> Result<T>
    where
        F: FnOnce() -> T,
    {
        let policies = self.registry.policies_for(ctx.operation());
        self.guard(ctx, policies, proceed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::KeyStrategy;
    use crate::ratelimit::{LocalRateLimiter, MockClock, TimeWindow};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::cell::Cell;

    /// Records every limiter call and denies the keys it is told to.
    #[derive(Default)]
    struct RecordingLimiter {
        calls: Mutex<Vec<String>>,
        deny: Vec<String>,
    }

    impl RecordingLimiter {
        fn denying(keys: &[&str]) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                deny: keys.iter().map(|k| k.to_string()).collect(),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    impl RateLimiterBackend for RecordingLimiter {
        fn try_acquire(&self, key: &str, _rate_per_window: u64) -> bool {
            self.calls.lock().push(format!("acquire:{}", key));
            !self.deny.iter().any(|k| k == key)
        }

        fn try_count(&self, _increment: u64, key: &str, _max_total: u64) -> bool {
            self.calls.lock().push(format!("count:{}", key));
            !self.deny.iter().any(|k| k == key)
        }
    }

    fn local_guard() -> Guard<LocalRateLimiter> {
        let limiter = LocalRateLimiter::new(TimeWindow::Minute)
            .with_clock(Arc::new(MockClock::default()));
        Guard::new(Arc::new(limiter))
    }

    #[test]
    fn test_no_policies_always_proceeds() {
        let guard = Guard::new(Arc::new(RecordingLimiter::default()));
        let ctx = CallContext::new("Svc.get", "1.1.1.1");

        assert_eq!(guard.guard(&ctx, &[], || 7).unwrap(), 7);
        assert!(guard.limiter().calls().is_empty());
    }

    #[test]
    fn test_modes_dispatch_to_limiter_operations() {
        let guard = Guard::new(Arc::new(RecordingLimiter::default()));
        let ctx = CallContext::new("Svc.get", "1.1.1.1");
        let policies = [
            Policy::rate(KeyStrategy::ByOperation, 5),
            Policy::total_count(KeyStrategy::Global, 5),
        ];

        guard.guard(&ctx, &policies, || ()).unwrap();

        assert_eq!(
            guard.limiter().calls(),
            vec!["acquire:Svc.get".to_string(), "count:global".to_string()]
        );
    }

    #[test]
    fn test_first_denial_short_circuits() {
        let guard = Guard::new(Arc::new(RecordingLimiter::denying(&["1.1.1.1_Svc.get"])));
        let ctx = CallContext::new("Svc.get", "1.1.1.1");
        let policies = [
            Policy::rate(KeyStrategy::ByCallerAddress, 5),
            // Would fail to resolve if it were ever evaluated.
            Policy::rate(KeyStrategy::ByComputedKey, 5).with_key_template("#unbound"),
        ];
        let invoked = Cell::new(false);

        let err = guard
            .guard(&ctx, &policies, || invoked.set(true))
            .unwrap_err();

        assert!(matches!(
            err,
            GuardError::RateLimitExceeded {
                mode: AdmissionMode::Rate,
                limit: 5,
                ..
            }
        ));
        assert_eq!(guard.limiter().calls().len(), 1);
        assert!(!invoked.get());
    }

    #[test]
    fn test_denial_carries_triggering_policy() {
        let guard = Guard::new(Arc::new(RecordingLimiter::denying(&["global"])));
        let ctx = CallContext::new("Svc.get", "1.1.1.1");
        let policies = [
            Policy::rate(KeyStrategy::ByOperation, 50),
            Policy::total_count(KeyStrategy::Global, 1000),
        ];

        match guard.guard(&ctx, &policies, || ()) {
            Err(GuardError::RateLimitExceeded { mode, limit, key }) => {
                assert_eq!(mode, AdmissionMode::TotalCount);
                assert_eq!(limit, 1000);
                assert_eq!(key, "global");
            }
            other => panic!("Expected RateLimitExceeded, got {:?}", other),
        }
    }

    #[test]
    fn test_config_errors_propagate() {
        let guard = Guard::new(Arc::new(RecordingLimiter::default()));
        let ctx = CallContext::new("Svc.get", "1.1.1.1");
        let policies = [Policy::rate(KeyStrategy::ByComputedKey, 5).with_key_template("#missing")];

        let err = guard.guard(&ctx, &policies, || ()).unwrap_err();

        assert!(matches!(err, GuardError::Expression(_)));
        assert!(guard.limiter().calls().is_empty());
    }

    #[test]
    fn test_operation_result_returned_unmodified() {
        let guard = local_guard();
        let ctx = CallContext::new("Svc.get", "1.1.1.1");
        let policies = [Policy::rate(KeyStrategy::ByOperation, 5)];

        let result: Result<std::result::Result<u8, String>> =
            guard.guard(&ctx, &policies, || Err("downstream failed".to_string()));

        assert_eq!(result.unwrap(), Err("downstream failed".to_string()));
    }

    #[test]
    fn test_computed_key_buckets_per_user() {
        let guard = local_guard();
        let policies = [Policy::rate(KeyStrategy::ByComputedKey, 1).with_key_template("#userId")];
        let alice = CallContext::new("Svc.get", "1.1.1.1").with_arg("userId", json!("alice"));
        let bob = CallContext::new("Svc.get", "1.1.1.1").with_arg("userId", json!("bob"));

        assert!(guard.guard(&alice, &policies, || ()).is_ok());
        assert!(guard.guard(&bob, &policies, || ()).is_ok());
        assert!(guard.guard(&alice, &policies, || ()).unwrap_err().is_denial());
    }

    #[test]
    fn test_guard_operation_uses_registry() {
        let mut registry = PolicyRegistry::new();
        registry.attach("Report.export", Policy::total_count(KeyStrategy::ByOperation, 2));
        let limiter = LocalRateLimiter::new(TimeWindow::Second);
        let guard = Guard::with_registry(Arc::new(limiter), registry);

        let ctx = CallContext::new("Report.export", "1.1.1.1");
        assert!(guard.guard_operation(&ctx, || ()).is_ok());
        assert!(guard.guard_operation(&ctx, || ()).is_ok());
        assert!(guard.guard_operation(&ctx, || ()).is_err());

        // Operations without policies are never limited.
        let other = CallContext::new("Report.view", "1.1.1.1");
        for _ in 0..10 {
            assert!(guard.guard_operation(&other, || ()).is_ok());
        }
    }

    #[tokio::test]
    async fn test_guard_async() {
        let guard = local_guard();
        let ctx = CallContext::new("Svc.fetch", "1.1.1.1");
        let policies = [Policy::rate(KeyStrategy::ByCallerAddress, 1)];

        let value = guard
            .guard_async(&ctx, &policies, || async { 42 })
            .await
            .unwrap();
        assert_eq!(value, 42);

        let denied = guard
            .guard_async(&ctx, &policies, || async { 42 })
            .await;
        assert!(matches!(denied, Err(GuardError::RateLimitExceeded { .. })));
    }
}
