//! Configuration validation
//!
//! Validates reposync configuration for correctness:
//! - Job limits are positive
//! - Retry delays are ordered
//! - The manifest server URL parses and carries no stray credentials

use super::reposync_config::ReposyncConfig;
use crate::ReposyncError;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// Validate a reposync configuration
pub fn validate_config(config: &ReposyncConfig) -> ValidationResult {
    let mut errors = Vec::new();

    if config.jobs_network == 0 {
        errors.push(ValidationError::new(
            "jobs_network",
            "Must be greater than 0",
        ));
    }
    if config.jobs_checkout == 0 {
        errors.push(ValidationError::new(
            "jobs_checkout",
            "Must be greater than 0",
        ));
    }

    if config.manifest_name.trim().is_empty() {
        errors.push(ValidationError::new(
            "manifest_name",
            "Manifest name cannot be empty",
        ));
    }

    if config.retry.base_delay_ms > config.retry.max_delay_ms {
        errors.push(ValidationError::new(
            "retry.base_delay_ms",
            format!(
                "Base delay ({}ms) exceeds max delay ({}ms)",
                config.retry.base_delay_ms, config.retry.max_delay_ms
            ),
        ));
    }

    if let Some(ref server) = config.manifest_server {
        match reqwest::Url::parse(&server.url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {
                if !url.username().is_empty() || url.password().is_some() {
                    errors.push(ValidationError::new(
                        "manifest_server.url",
                        "Put credentials in username/password, not in the URL",
                    ));
                }
            }
            Ok(url) => errors.push(ValidationError::new(
                "manifest_server.url",
                format!("Unsupported scheme '{}'", url.scheme()),
            )),
            Err(e) => errors.push(ValidationError::new(
                "manifest_server.url",
                format!("Invalid URL '{}': {}", server.url, e),
            )),
        }

        if server.password.is_some() && server.username.is_none() {
            errors.push(ValidationError::new(
                "manifest_server.username",
                "A password was given without a username",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate and convert to a single error for callers that just need `?`
pub fn validate_config_result(config: &ReposyncConfig) -> crate::Result<()> {
    validate_config(config).map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        ReposyncError::Config(messages.join("; "))
    })
}
