//! Admission checks around protected operations.
//!
//! A host wraps each protected call in [`Guard::guard`]: the guard derives one
//! limiter key per attached policy, asks the limiter for admission in declaration
//! order, and only invokes the wrapped operation when every policy admits it.

mod dispatcher;
mod resolver;

pub use dispatcher::{CallState, Guard};
pub use resolver::{resolve_key, GLOBAL_KEY};
