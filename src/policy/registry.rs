//! Operation-to-policy mapping.
//!
//! The registry is the load-time product of whatever mechanism attaches policies to
//! operations: a YAML file, or code calling [`PolicyRegistry::attach`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{error, info};

use super::Policy;
use crate::error::{GuardError, Result};

/// Ordered policies per operation identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyRegistry {
    /// Map of operation identity to its policies, in declaration order
    #[serde(default)]
    pub operations: HashMap<String, Vec<Policy>>,
}

impl PolicyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a registry from a YAML file and validate it.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading policy registry");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load a registry from a YAML string and validate it.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let registry: PolicyRegistry = serde_yaml::from_str(yaml)
            .map_err(|e| GuardError::Config(format!("Failed to parse policy registry: {}", e)))?;
        registry.validate()?;

        info!(
            operations = registry.operation_count(),
            policies = registry.policy_count(),
            "Policy registry loaded"
        );
        Ok(registry)
    }

    /// Append a policy to an operation, after any already attached.
    pub fn attach(&mut self, operation: impl Into<String>, policy: Policy) -> &mut Self {
        self.operations
            .entry(operation.into())
            .or_default()
            .push(policy);
        self
    }

    /// Policies for an operation; empty when none are attached.
    pub fn policies_for(&self, operation: &str) -> &[Policy] {
        self.operations
            .get(operation)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Validate every policy, failing on the first defect.
    pub fn validate(&self) -> Result<()> {
        for (operation, policies) in &self.operations {
            for (index, policy) in policies.iter().enumerate() {
                if let Err(e) = policy.validate() {
                    error!(
                        operation = %operation,
                        index = index,
                        error = %e,
                        "Invalid policy"
                    );
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    pub fn policy_count(&self) -> usize {
        self.operations.values().map(Vec::len).sum()
    }
}
