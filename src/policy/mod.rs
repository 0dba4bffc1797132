//! Admission policies attached to protected operations.

mod registry;

pub use registry::PolicyRegistry;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{GuardError, Result};
use crate::expr::Template;

/// How a policy derives the limiter key for a call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// One bucket per caller address, per operation or per shared template
    ByCallerAddress,
    /// One bucket per operation
    ByOperation,
    /// Key computed from the call arguments by the key template
    ByComputedKey,
    /// One bucket shared by every call using this strategy
    Global,
    /// Unrecognized strategy; keyed by operation
    #[default]
    #[serde(other)]
    Unspecified,
}

impl fmt::Display for KeyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyStrategy::ByCallerAddress => "by_caller_address",
            KeyStrategy::ByOperation => "by_operation",
            KeyStrategy::ByComputedKey => "by_computed_key",
            KeyStrategy::Global => "global",
            KeyStrategy::Unspecified => "unspecified",
        };
        f.write_str(name)
    }
}

/// Which limiter operation a policy is checked with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionMode {
    /// At most `rate_limit` calls per limiter window
    #[default]
    Rate,
    /// At most `total_count_limit` calls, ever
    TotalCount,
}

impl fmt::Display for AdmissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionMode::Rate => f.write_str("rate"),
            AdmissionMode::TotalCount => f.write_str("total_count"),
        }
    }
}

/// A declarative rate limit rule bound to an operation.
///
/// Policies are created at startup and shared read-only between calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Optional label used in logs and diagnostics
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub strategy: KeyStrategy,
    /// Literal key suffix, or an expression when it starts with `#`
    #[serde(default)]
    pub key_template: Template,
    /// Maximum calls per window in `rate` mode
    #[serde(default)]
    pub rate_limit: u64,
    /// Maximum cumulative calls in `total_count` mode
    #[serde(default)]
    pub total_count_limit: u64,
    #[serde(default)]
    pub admission_mode: AdmissionMode,
}

impl Policy {
    /// A rate-mode policy.
    pub fn rate(strategy: KeyStrategy, rate_limit: u64) -> Self {
        Self {
            strategy,
            rate_limit,
            admission_mode: AdmissionMode::Rate,
            ..Default::default()
        }
    }

    /// A total-count-mode policy.
    pub fn total_count(strategy: KeyStrategy, total_count_limit: u64) -> Self {
        Self {
            strategy,
            total_count_limit,
            admission_mode: AdmissionMode::TotalCount,
            ..Default::default()
        }
    }

    pub fn with_key_template(mut self, template: impl Into<String>) -> Self {
        self.key_template = Template::new(template);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The limit that applies under this policy's admission mode.
    pub fn limit(&self) -> u64 {
        match self.admission_mode {
            AdmissionMode::Rate => self.rate_limit,
            AdmissionMode::TotalCount => self.total_count_limit,
        }
    }

    /// Check the policy for configuration defects.
    ///
    /// Templates are parsed when the policy is built; a computed-key template
    /// with a syntax error is reported here instead of on the first protected call.
    pub fn validate(&self) -> Result<()> {
        if self.limit() == 0 {
            return Err(GuardError::Config(format!(
                "{} has no {} limit configured",
                self, self.admission_mode
            )));
        }

        match self.strategy {
            KeyStrategy::ByComputedKey => {
                if self.key_template.is_empty() {
                    return Err(GuardError::MissingKey {
                        policy: Box::new(self.clone()),
                    });
                }
                if let Some(e) = self.key_template.parse_error() {
                    return Err(e.clone().into());
                }
                if self.key_template.has_inner_sigil() {
                    warn!(
                        policy = %self,
                        "Key template does not start with '#' and is used verbatim"
                    );
                }
            }
            KeyStrategy::Unspecified => {
                warn!(policy = %self, "Unrecognized key strategy, keying by operation");
            }
            _ if self.key_template.is_expression() => {
                warn!(
                    policy = %self,
                    "Key template looks like an expression but is only evaluated for by_computed_key"
                );
            }
            _ => {}
        }

        Ok(())
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "policy '{}' ({}", name, self.strategy)?,
            None => write!(f, "policy ({}", self.strategy)?,
        }
        if !self.key_template.is_empty() {
            write!(f, ", template '{}'", self.key_template)?;
        }
        write!(f, ", {} limit {})", self.admission_mode, self.limit())
    }
}
