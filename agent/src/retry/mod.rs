//! Bounded retries with exponential backoff

pub mod executor;
pub mod policy;

pub use executor::{FailureClass, RetryExecutor, RetryPatterns, DEFAULT_RETRYABLE_PATTERNS};
pub use policy::RetryPolicy;
