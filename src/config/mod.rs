//! Configuration system
//!
//! Loads `.repo/reposync.yaml` (or `~/.config/reposync/config.yaml`) with:
//! - Network and checkout job limits
//! - Retry/backoff tuning
//! - Manifest server location and credentials for SmartSync/HyperSync
//! - Superproject and fetch-timeout toggles

mod reposync_config;
pub mod validation;

pub use reposync_config::{ManifestServerConfig, ReposyncConfig, RetryConfig};
pub use validation::{validate_config, validate_config_result, ValidationError};
