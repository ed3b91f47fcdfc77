//! Retry with exponential backoff for git network and checkout operations
//!
//! Every clone, fetch and checkout goes through [`retry_with_backoff`]. Whether
//! a failure is worth another attempt is decided from the git error text by
//! [`classify_git_error`].

use crate::{ReposyncError, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Predicate deciding whether an error deserves another attempt
pub type ShouldRetry = Arc<dyn Fn(&ReposyncError) -> bool + Send + Sync>;

/// Configuration for retry behavior
#[derive(Clone)]
pub struct RetryOptions {
    /// Maximum number of retry attempts (not including the initial attempt)
    pub max_retries: u32,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,

    /// Overrides the error's own [`RetryableError`] classification
    pub should_retry: Option<ShouldRetry>,
}

impl std::fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("should_retry", &self.should_retry.is_some())
            .finish()
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            should_retry: None,
        }
    }
}

impl RetryOptions {
    /// Create options for quick retries (short backoff), mostly for tests
    pub fn quick() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            should_retry: None,
        }
    }

    /// Replace the retry predicate
    pub fn with_should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ReposyncError) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    /// Delay applied before `attempt` (attempt 0 never waits)
    ///
    /// `min(base_delay * 2^(attempt-1), max_delay)`
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn allows_retry(&self, err: &ReposyncError) -> bool {
        match &self.should_retry {
            Some(predicate) => predicate(err),
            None => err.retry_decision() == RetryDecision::Retry,
        }
    }
}

/// Retry classification for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the operation
    Retry,
    /// Don't retry, the error is permanent
    NoRetry,
}

/// Trait for errors that can indicate whether to retry
pub trait RetryableError {
    /// Determine if this error should be retried
    fn retry_decision(&self) -> RetryDecision;
}

const NON_RETRYABLE_PATTERNS: &[&str] = &[
    "repository not found",
    "authentication failed",
    "permission denied",
    "unknown revision",
    "did not match any file(s)",
    "couldn't find remote ref",
];

const NETWORK_PATTERNS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection timed out",
    "timed out",
    "timeout",
    "could not resolve host",
    "temporary failure in name resolution",
    "name or service not known",
    "network is unreachable",
    "early eof",
    "the remote end hung up unexpectedly",
];

const LOCK_PATTERNS: &[&str] = &["index.lock", "file exists"];

const CHECKOUT_CONFLICT_PATTERN: &str = "would be overwritten by checkout";

/// Classify git failure text
///
/// Order matters: permanent failures are recognized before the generic
/// `exit status 128` fallback, which would otherwise swallow them.
pub fn classify_git_error(message: &str) -> RetryDecision {
    let msg = message.to_lowercase();

    if NON_RETRYABLE_PATTERNS.iter().any(|p| msg.contains(p)) {
        return RetryDecision::NoRetry;
    }
    if NETWORK_PATTERNS.iter().any(|p| msg.contains(p)) {
        return RetryDecision::Retry;
    }
    if LOCK_PATTERNS.iter().any(|p| msg.contains(p)) {
        return RetryDecision::Retry;
    }
    if msg.contains("exit status 128") {
        return RetryDecision::Retry;
    }
    RetryDecision::NoRetry
}

/// True when git refused to checkout because local files would be clobbered
pub fn is_checkout_conflict(message: &str) -> bool {
    message.to_lowercase().contains(CHECKOUT_CONFLICT_PATTERN)
}

/// Best-effort explanation of an opaque git failure, for verbose output
pub fn diagnose_git_error(message: &str) -> Option<&'static str> {
    let msg = message.to_lowercase();

    if msg.contains("authentication failed")
        || msg.contains("permission denied")
        || msg.contains("could not read username")
    {
        return Some("authentication problem: check credentials or SSH keys for this remote");
    }
    if msg.contains("repository not found") || msg.contains("does not appear to be a git repository")
    {
        return Some("repository missing: the project name or remote fetch URL may be wrong");
    }
    if msg.contains("already exists and is not an empty directory")
        || msg.contains(CHECKOUT_CONFLICT_PATTERN)
    {
        return Some("path conflict: files already present at the project path");
    }
    if NETWORK_PATTERNS.iter().any(|p| msg.contains(p)) {
        return Some("network problem: the remote could not be reached");
    }
    if msg.contains("exit status 128") {
        return Some("git exited with status 128: likely network, authentication, missing repository or path conflict");
    }
    None
}

/// Execute an async operation with retry logic
///
/// `operation` receives the attempt number (starting at 0) and is invoked for
/// attempts `0..=max_retries` until it succeeds, the error is rejected by the
/// retry predicate, or attempts run out. Cancellation aborts immediately,
/// including while waiting out a backoff delay.
pub async fn retry_with_backoff<F, Fut, T>(
    cancel: &CancellationToken,
    options: &RetryOptions,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    let mut last_error: Option<String> = None;

    loop {
        if attempt > 0 {
            let delay = options.backoff_duration(attempt);
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(ReposyncError::Cancelled(last_error));
                }
                _ = sleep(delay) => {}
            }
        }
        if cancel.is_cancelled() {
            return Err(ReposyncError::Cancelled(last_error));
        }

        match operation(attempt).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !options.allows_retry(&e) {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        "Operation failed with non-retryable error: {}",
                        e
                    );
                    return Err(e);
                }

                if attempt >= options.max_retries {
                    warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        "Operation failed after {} attempts: {}",
                        attempt + 1,
                        e
                    );
                    return Err(e);
                }

                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = options.max_retries + 1,
                    backoff_secs = options.backoff_duration(attempt + 1).as_secs_f64(),
                    "Retrying after error: {}",
                    e
                );

                last_error = Some(e.to_string());
                attempt += 1;
            }
        }
    }
}
