//! Error types for the guard.

use thiserror::Error;

use crate::expr::ExpressionError;
use crate::policy::{AdmissionMode, Policy};

/// Main error type for guard operations.
#[derive(Error, Debug)]
pub enum GuardError {
    /// A key template could not be parsed or evaluated
    #[error("Key template error: {0}")]
    Expression(#[from] ExpressionError),

    /// A computed-key policy produced an empty key
    #[error("Computed key is empty for {policy}")]
    MissingKey { policy: Box<Policy> },

    /// A policy denied the call
    #[error("{}", denial_message(.mode, .limit))]
    RateLimitExceeded {
        mode: AdmissionMode,
        limit: u64,
        key: String,
    },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GuardError {
    /// Whether this is an ordinary denial rather than a deployment defect.
    pub fn is_denial(&self) -> bool {
        matches!(self, GuardError::RateLimitExceeded { .. })
    }
}

fn denial_message(mode: &AdmissionMode, limit: &u64) -> String {
    match mode {
        AdmissionMode::Rate => "Too many requests, please try again later".to_string(),
        AdmissionMode::TotalCount => {
            format!("Maximum number of calls reached: {}, please try again later", limit)
        }
    }
}

/// Result type alias for guard operations.
pub type Result<T> = std::result::Result<T, GuardError>;
