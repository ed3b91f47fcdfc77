//! Error types for reposync
//!
//! Defines the error enum covering every failure mode of manifest resolution
//! and synchronization. Uses thiserror for ergonomic error handling.

use crate::retry::{classify_git_error, RetryDecision, RetryableError};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for reposync operations
pub type Result<T> = std::result::Result<T, ReposyncError>;

/// Error type for reposync operations
#[derive(Error, Debug)]
pub enum ReposyncError {
    /// No `.repo` directory (or no manifest link) where one was expected
    #[error("Workspace not initialized: {} not found (run init first)", .0.display())]
    NotInitialized(PathBuf),

    /// The workspace exists but the named manifest does not
    #[error("Manifest not found: {}", .0.display())]
    ManifestNotFound(PathBuf),

    /// Malformed manifest XML
    #[error("Parse error: {0}")]
    Parse(String),

    /// Missing, unreadable or cyclic `<include>` target
    #[error("Include error: cannot resolve '{name}': {reason}")]
    IncludeResolution { name: String, reason: String },

    /// Merge was asked to combine nothing
    #[error("Merge error: {0}")]
    Merge(String),

    /// Clone or fetch failure for one project
    #[error("Network error: {project}: {message}")]
    Network {
        project: String,
        message: String,
        retryable: bool,
    },

    /// Working tree has local changes and a forced sync was not requested
    #[error("Checkout conflict: {project}: {message}")]
    CheckoutConflict { project: String, message: String },

    /// Checkout failed for any other reason
    #[error("Checkout error: {project}: {message}")]
    Checkout { project: String, message: String },

    /// Transport failure or non-200 status from the manifest server
    #[error("Manifest server error: {0}")]
    ManifestServer(String),

    /// Missing superproject settings, or its fetch/checkout failed
    #[error("Superproject error: {0}")]
    Superproject(String),

    /// A project name or path given on the command line is not in the manifest
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    /// Refused to touch a path outside the workspace
    #[error("Refusing to modify unsafe path: {}", .0.display())]
    UnsafePath(PathBuf),

    /// The surrounding operation was cancelled
    #[error("Operation cancelled{}", .0.as_ref().map(|e| format!(" (last error: {e})")).unwrap_or_default())]
    Cancelled(Option<String>),

    /// Final aggregate for a pass in which some projects failed
    #[error("Sync failed for {failed} project(s)")]
    SyncFailed { failed: usize },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Git subprocess errors
    #[error("Git error: {0}")]
    Git(#[from] gitcmd::Error),

    /// Git repository inspection errors
    #[error("Git library error: {0}")]
    Git2(#[from] git2::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl ReposyncError {
    /// Build a network error for `project`, classifying the git failure text
    pub fn network(project: impl Into<String>, err: impl std::fmt::Display) -> Self {
        let message = err.to_string();
        let retryable = classify_git_error(&message) != RetryDecision::NoRetry;
        ReposyncError::Network {
            project: project.into(),
            message,
            retryable,
        }
    }

    /// True for errors that must abort the whole pass
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReposyncError::NotInitialized(_)
                | ReposyncError::ManifestNotFound(_)
                | ReposyncError::Parse(_)
                | ReposyncError::IncludeResolution { .. }
                | ReposyncError::Merge(_)
        )
    }
}

impl RetryableError for ReposyncError {
    fn retry_decision(&self) -> RetryDecision {
        match self {
            ReposyncError::Network { retryable, .. } => {
                if *retryable {
                    RetryDecision::Retry
                } else {
                    RetryDecision::NoRetry
                }
            }
            ReposyncError::Git(e) => classify_git_error(&e.to_string()),
            ReposyncError::Checkout { message, .. } => classify_git_error(message),
            // Carries the failing git step's output
            ReposyncError::Superproject(message) => classify_git_error(message),
            ReposyncError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    RetryDecision::Retry
                } else {
                    RetryDecision::NoRetry
                }
            }
            // Non-retryable errors
            ReposyncError::NotInitialized(_)
            | ReposyncError::ManifestNotFound(_)
            | ReposyncError::Parse(_)
            | ReposyncError::IncludeResolution { .. }
            | ReposyncError::Merge(_)
            | ReposyncError::CheckoutConflict { .. }
            | ReposyncError::ManifestServer(_)
            | ReposyncError::ProjectNotFound(_)
            | ReposyncError::UnsafePath(_)
            | ReposyncError::Cancelled(_)
            | ReposyncError::SyncFailed { .. }
            | ReposyncError::Config(_)
            | ReposyncError::Git2(_)
            | ReposyncError::Io(_)
            | ReposyncError::Json(_)
            | ReposyncError::Yaml(_)
            | ReposyncError::Other(_) => RetryDecision::NoRetry,
        }
    }
}
