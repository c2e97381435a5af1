//! Retry executor with exponential backoff and transient-failure classification

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::app::clock::Sleeper;
use crate::errors::EnrollError;
use crate::retry::policy::RetryPolicy;

/// Patterns matched against failure messages when none are configured
pub const DEFAULT_RETRYABLE_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "connection",
    "network",
    "429",
    "503",
    "504",
    "throttl*",
    "too many requests",
    "service unavailable",
    "gateway timeout",
    "temporarily unavailable",
    "transient",
    "try again",
];

/// Whether a failure is worth another attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Permanent,
}

/// Case-insensitive message patterns; `*` matches any run of characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPatterns {
    patterns: Vec<String>,
}

impl Default for RetryPatterns {
    fn default() -> Self {
        Self::new(DEFAULT_RETRYABLE_PATTERNS.iter().copied())
    }
}

impl RetryPatterns {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Use the configured patterns, or the default set when none are given
    pub fn from_config(configured: &[String]) -> Self {
        let patterns = Self::new(configured);
        if patterns.patterns.is_empty() {
            Self::default()
        } else {
            patterns
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Test a message against the pattern set
    pub fn matches(&self, message: &str) -> bool {
        let message = message.to_lowercase();
        self.patterns.iter().any(|p| wildcard_contains(&message, p))
    }

    /// Classify an error as transient or permanent.
    ///
    /// Explicit taxonomy kinds decide first. Opaque remote failures are
    /// classified by their message.
    pub fn classify(&self, err: &EnrollError) -> FailureClass {
        match err {
            EnrollError::TransientNetwork(_) => FailureClass::Transient,
            EnrollError::Remote(message) | EnrollError::CleanupError { message, .. } => {
                if self.matches(message) {
                    FailureClass::Transient
                } else {
                    FailureClass::Permanent
                }
            }
            _ => FailureClass::Permanent,
        }
    }
}

/// Substring match where `*` in the pattern spans any characters.
fn wildcard_contains(haystack: &str, pattern: &str) -> bool {
    let mut rest = haystack;
    for segment in pattern.split('*').filter(|s| !s.is_empty()) {
        match rest.find(segment) {
            Some(idx) => rest = &rest[idx + segment.len()..],
            None => return false,
        }
    }
    true
}

/// Runs operations with bounded retries
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    patterns: RetryPatterns,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .field("patterns", &self.patterns)
            .finish()
    }
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, patterns: RetryPatterns, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            policy,
            patterns,
            sleeper,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn patterns(&self) -> &RetryPatterns {
        &self.patterns
    }

    /// Execute `operation` up to `policy.max_attempts` times.
    ///
    /// A permanent failure stops immediately. A transient failure is retried
    /// after the backoff delay until attempts run out. The surfaced error is
    /// always wrapped in `EnrollError::RetryExhausted` carrying the attempt
    /// count and classification.
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, EnrollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EnrollError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let delay = self.policy.delay_before_attempt(attempt);
            if !delay.is_zero() {
                debug!(operation, attempt, delay_ms = delay.as_millis() as u64, "Backing off");
                self.sleeper.sleep(delay).await;
            }

            info!(operation, attempt, max_attempts, "Attempting operation");

            match op().await {
                Ok(value) => {
                    info!(operation, attempts = attempt, "Operation succeeded");
                    return Ok(value);
                }
                Err(e) => {
                    let retryable = self.patterns.classify(&e) == FailureClass::Transient;

                    // Callers decide how loud a final failure is
                    if !retryable || attempt >= max_attempts {
                        debug!(
                            operation,
                            attempts = attempt,
                            retryable,
                            error = %e,
                            "Giving up"
                        );
                        return Err(EnrollError::RetryExhausted {
                            operation: operation.to_string(),
                            attempts: attempt,
                            retryable,
                            source: Box::new(e),
                        });
                    }

                    warn!(operation, attempt, error = %e, "Transient failure, retrying");
                }
            }
        }
    }
}
