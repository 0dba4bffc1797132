//! Limiter key derivation.

use crate::context::CallContext;
use crate::error::{GuardError, Result};
use crate::policy::{KeyStrategy, Policy};

/// Key shared by every call under the global strategy.
pub const GLOBAL_KEY: &str = "global";

/// Derive the limiter key for one policy and call.
///
/// The key template is only evaluated as an expression under
/// [`KeyStrategy::ByComputedKey`]; every other strategy uses it verbatim.
pub fn resolve_key(policy: &Policy, ctx: &CallContext) -> Result<String> {
    let operation = ctx.operation();

    match policy.strategy {
        KeyStrategy::ByCallerAddress => {
            // An explicit template shares one bucket across the operations that name it.
            let scope = if policy.key_template.is_empty() {
                operation
            } else {
                policy.key_template.source()
            };
            Ok(format!("{}_{}", ctx.caller_address(), scope))
        }
        KeyStrategy::ByOperation => Ok(operation.to_string()),
        KeyStrategy::ByComputedKey => {
            let key = policy.key_template.evaluate(ctx)?;
            if key.is_empty() {
                return Err(GuardError::MissingKey {
                    policy: Box::new(policy.clone()),
                });
            }
            Ok(key)
        }
        KeyStrategy::Global => Ok(GLOBAL_KEY.to_string()),
        KeyStrategy::Unspecified => Ok(operation.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ExpressionError;
    use serde_json::{json, Value};

    fn ctx(operation: &str, caller: &str) -> CallContext {
        CallContext::new(operation, caller).with_arg("userId", json!("42"))
    }

    #[test]
    fn test_caller_address_per_operation() {
        let policy = Policy::rate(KeyStrategy::ByCallerAddress, 10);
        let key = resolve_key(&policy, &ctx("Svc.get", "10.0.0.1")).unwrap();
        assert_eq!(key, "10.0.0.1_Svc.get");
    }

    #[test]
    fn test_caller_address_shared_template() {
        let policy = Policy::rate(KeyStrategy::ByCallerAddress, 10).with_key_template("api");

        let a = resolve_key(&policy, &ctx("Svc.get", "10.0.0.1")).unwrap();
        let b = resolve_key(&policy, &ctx("Svc.put", "10.0.0.1")).unwrap();
        assert_eq!(a, "10.0.0.1_api");
        assert_eq!(a, b);
    }

    #[test]
    fn test_caller_address_ignores_sigil() {
        let policy = Policy::rate(KeyStrategy::ByCallerAddress, 10).with_key_template("#userId");
        let key = resolve_key(&policy, &ctx("Svc.get", "10.0.0.1")).unwrap();
        assert_eq!(key, "10.0.0.1_#userId");
    }

    #[test]
    fn test_by_operation() {
        let policy = Policy::rate(KeyStrategy::ByOperation, 10).with_key_template("#userId");
        let key = resolve_key(&policy, &ctx("Svc.get", "10.0.0.1")).unwrap();
        assert_eq!(key, "Svc.get");
    }

    #[test]
    fn test_global_is_constant() {
        let policy = Policy::rate(KeyStrategy::Global, 10);
        let a = resolve_key(&policy, &ctx("Svc.get", "10.0.0.1")).unwrap();
        let b = resolve_key(&policy, &ctx("Other.call", "172.16.0.9")).unwrap();
        assert_eq!(a, GLOBAL_KEY);
        assert_eq!(a, b);
    }

    #[test]
    fn test_unspecified_falls_back_to_operation() {
        let policy = Policy::rate(KeyStrategy::Unspecified, 10);
        let key = resolve_key(&policy, &ctx("Svc.get", "10.0.0.1")).unwrap();
        assert_eq!(key, "Svc.get");
    }

    #[test]
    fn test_computed_key() {
        let policy = Policy::rate(KeyStrategy::ByComputedKey, 10)
            .with_key_template("#fullMethodName + ':' + #userId");
        let key = resolve_key(&policy, &ctx("Svc.get", "10.0.0.1")).unwrap();
        assert_eq!(key, "Svc.get:42");
    }

    #[test]
    fn test_computed_key_literal_template() {
        let policy = Policy::rate(KeyStrategy::ByComputedKey, 10).with_key_template("tenant-a");
        let key = resolve_key(&policy, &ctx("Svc.get", "10.0.0.1")).unwrap();
        assert_eq!(key, "tenant-a");
    }

    #[test]
    fn test_computed_key_empty() {
        let empty_template = Policy::rate(KeyStrategy::ByComputedKey, 10);
        assert!(matches!(
            resolve_key(&empty_template, &ctx("Svc.get", "10.0.0.1")),
            Err(GuardError::MissingKey { .. })
        ));

        let null_arg = Policy::rate(KeyStrategy::ByComputedKey, 10).with_key_template("#tenant");
        let ctx = CallContext::new("Svc.get", "10.0.0.1").with_arg("tenant", Value::Null);
        assert!(matches!(
            resolve_key(&null_arg, &ctx),
            Err(GuardError::MissingKey { .. })
        ));
    }

    #[test]
    fn test_computed_key_unbound_variable() {
        let policy = Policy::rate(KeyStrategy::ByComputedKey, 10).with_key_template("#nope");
        let err = resolve_key(&policy, &ctx("Svc.get", "10.0.0.1")).unwrap_err();
        assert!(matches!(
            err,
            GuardError::Expression(ExpressionError::UnboundVariable { .. })
        ));
    }
}
