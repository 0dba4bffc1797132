//! ratelimit-guard - Policy-Driven Admission Control
//!
//! This crate guards protected operations with declarative rate limit policies.
//! Each policy derives a limiter key for the call (per caller address, per
//! operation, globally, or from a key template evaluated over the call's
//! arguments) and checks it against an in-process limiter, either as a rate per
//! time window or as a cumulative count.

pub mod config;
pub mod context;
pub mod error;
pub mod expr;
pub mod guard;
pub mod policy;
pub mod ratelimit;

pub use context::{CallContext, CallerAddress};
pub use error::{GuardError, Result};
pub use guard::Guard;
pub use policy::{AdmissionMode, KeyStrategy, Policy, PolicyRegistry};
pub use ratelimit::{LocalRateLimiter, RateLimiterBackend};
