//! Error classification and retry module
//!
//! This module maps arbitrary failures onto a closed taxonomy of review
//! error kinds, decides whether they are worth retrying, and runs fallible
//! operations under exponential backoff with an optional fallback path.

pub mod classifier;
pub mod kind;
pub mod retry;

pub use classifier::{ErrorClassifier, ErrorPattern};
pub use kind::{ErrorContext, ErrorKind, ReviewError, UnknownErrorKind};
pub use retry::{RetryEngine, RetryPolicy};

/// Boxed failure returned by job processors and retried operations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
