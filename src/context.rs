//! Per-call context handed to the guard.

use serde_json::Value;

/// Supplies the network origin of the current call.
///
/// Implemented by the host's transport layer. Resolution must not fail; hosts
/// that cannot determine an address should return a placeholder such as `"unknown"`.
pub trait CallerAddress {
    fn caller_address(&self) -> String;
}

impl CallerAddress for str {
    fn caller_address(&self) -> String {
        self.to_string()
    }
}

impl<F> CallerAddress for F
where
    F: Fn() -> String,
{
    fn caller_address(&self) -> String {
        self()
    }
}

/// Everything the key resolver may read about one invocation.
///
/// Built once at call entry and dropped when the call returns.
#[derive(Debug, Clone, PartialEq)]
pub struct CallContext {
    operation: String,
    caller_address: String,
    arguments: Vec<Value>,
    argument_names: Vec<String>,
}

impl CallContext {
    /// Create a context with no arguments.
    pub fn new(operation: impl Into<String>, caller_address: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            caller_address: caller_address.into(),
            arguments: Vec::new(),
            argument_names: Vec::new(),
        }
    }

    /// Create a context, asking the provider for the caller address exactly once.
    pub fn capture<A>(operation: impl Into<String>, caller: &A) -> Self
    where
        A: CallerAddress + ?Sized,
    {
        Self::new(operation, caller.caller_address())
    }

    /// Append a named argument.
    pub fn with_arg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.argument_names.push(name.into());
        self.arguments.push(value);
        self
    }

    /// Append a sequence of named arguments in order.
    pub fn with_args<I, N>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = (N, Value)>,
        N: Into<String>,
    {
        for (name, value) in args {
            self = self.with_arg(name, value);
        }
        self
    }

    /// Identity of the protected operation, e.g. `OrderController.create`.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn caller_address(&self) -> &str {
        &self.caller_address
    }

    /// Argument values in declaration order.
    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    /// Parameter names, parallel to [`arguments`](Self::arguments).
    pub fn argument_names(&self) -> &[String] {
        &self.argument_names
    }

    /// Look up an argument by parameter name.
    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.argument_names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.arguments[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    #[test]
    fn test_arguments_stay_parallel() {
        let ctx = CallContext::new("Svc.get", "10.0.0.1")
            .with_arg("id", json!(1))
            .with_args([("name", json!("x")), ("flag", json!(true))]);

        assert_eq!(ctx.arguments(), &[json!(1), json!("x"), json!(true)]);
        assert_eq!(ctx.argument_names(), &["id", "name", "flag"]);
        assert_eq!(ctx.argument("name"), Some(&json!("x")));
        assert_eq!(ctx.argument("missing"), None);
    }

    #[test]
    fn test_capture_resolves_address_once() {
        let calls = Cell::new(0);
        let provider = || {
            calls.set(calls.get() + 1);
            "192.168.1.10".to_string()
        };

        let ctx = CallContext::capture("Svc.get", &provider);

        assert_eq!(ctx.caller_address(), "192.168.1.10");
        assert_eq!(ctx.operation(), "Svc.get");
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_str_provider() {
        let ctx = CallContext::capture("Svc.get", "127.0.0.1");
        assert_eq!(ctx.caller_address(), "127.0.0.1");
    }
}
