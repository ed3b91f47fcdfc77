//! Reposync configuration file handling
//!
//! Loads `<root>/.repo/reposync.yaml`, falling back to
//! `~/.config/reposync/config.yaml`. A missing file means defaults.

use crate::retry::RetryOptions;
use crate::workspace::Workspace;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Retry settings as written in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn to_options(&self) -> RetryOptions {
        RetryOptions {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            should_retry: None,
        }
    }
}

/// Manifest server used by SmartSync and HyperSync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestServerConfig {
    /// Base URL, e.g. `https://manifests.example.com`
    pub url: String,

    #[serde(default)]
    pub username: Option<String>,

    /// Literal password, or `$VAR` to read it from the environment
    #[serde(default)]
    pub password: Option<String>,
}

impl ManifestServerConfig {
    /// Password with `$VAR` references expanded
    pub fn resolved_password(&self) -> Option<String> {
        let password = self.password.as_ref()?;
        match password.strip_prefix('$') {
            Some(var) => std::env::var(var).ok(),
            None => Some(password.clone()),
        }
    }
}

/// Reposync configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReposyncConfig {
    /// Parallel fetch groups (defaults to 2x CPU cores)
    #[serde(default = "default_jobs_network")]
    pub jobs_network: usize,

    /// Parallel checkouts (defaults to CPU cores)
    #[serde(default = "default_jobs_checkout")]
    pub jobs_checkout: usize,

    /// Manifest file inside `.repo/manifests/` used when `.repo/manifest.xml` is absent
    #[serde(default = "default_manifest_name")]
    pub manifest_name: String,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub manifest_server: Option<ManifestServerConfig>,

    /// Pin project revisions from the superproject
    #[serde(default)]
    pub use_superproject: bool,

    /// Per-fetch timeout in seconds (0 disables)
    #[serde(default)]
    pub fetch_timeout_secs: u64,
}

fn cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
}

fn default_jobs_network() -> usize {
    cpu_count() * 2
}

fn default_jobs_checkout() -> usize {
    cpu_count()
}

fn default_manifest_name() -> String {
    "default.xml".to_string()
}

impl Default for ReposyncConfig {
    fn default() -> Self {
        Self {
            jobs_network: default_jobs_network(),
            jobs_checkout: default_jobs_checkout(),
            manifest_name: default_manifest_name(),
            retry: RetryConfig::default(),
            manifest_server: None,
            use_superproject: false,
            fetch_timeout_secs: 0,
        }
    }
}

impl ReposyncConfig {
    /// Load the workspace config, then the user config, else defaults
    pub fn load_for(workspace: &Workspace) -> Result<Self> {
        let candidates = [Some(workspace.config_path()), Self::user_path()];
        for path in candidates.into_iter().flatten() {
            if path.is_file() {
                return Self::load(&path);
            }
        }
        tracing::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(crate::ReposyncError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading reposync configuration");

        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;

        tracing::debug!(
            jobs_network = config.jobs_network,
            jobs_checkout = config.jobs_checkout,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    /// `~/.config/reposync/config.yaml`
    pub fn user_path() -> Option<PathBuf> {
        let mut path = dirs::home_dir()?;
        path.push(".config");
        path.push("reposync");
        path.push("config.yaml");
        Some(path)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        (self.fetch_timeout_secs > 0).then(|| Duration::from_secs(self.fetch_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ReposyncConfig::default();
        assert_eq!(config.jobs_network, config.jobs_checkout * 2);
        assert_eq!(config.manifest_name, "default.xml");
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.fetch_timeout(), None);

        let options = config.retry.to_options();
        assert_eq!(options.base_delay, Duration::from_secs(2));
        assert_eq!(options.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "jobs_network: 3\nmanifest_server:\n  url: https://ms.example.com\n";
        let config: ReposyncConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.jobs_network, 3);
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(
            config.manifest_server.unwrap().url,
            "https://ms.example.com"
        );
    }

    #[test]
    fn test_save_and_load_for_workspace() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::new(temp.path());

        let config = ReposyncConfig {
            jobs_network: 7,
            fetch_timeout_secs: 90,
            ..Default::default()
        };
        config.save(ws.config_path()).unwrap();

        let loaded = ReposyncConfig::load_for(&ws).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.fetch_timeout(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_load_missing_file() {
        let result = ReposyncConfig::load("/nonexistent/reposync.yaml");
        assert!(result.is_err());
    }

    #[test]
    fn test_password_env_expansion() {
        std::env::set_var("REPOSYNC_TEST_MS_PASSWORD", "s3cret");
        let server = ManifestServerConfig {
            url: "https://ms".into(),
            username: Some("bot".into()),
            password: Some("$REPOSYNC_TEST_MS_PASSWORD".into()),
        };
        assert_eq!(server.resolved_password().as_deref(), Some("s3cret"));

        let literal = ManifestServerConfig {
            password: Some("plain".into()),
            ..server
        };
        assert_eq!(literal.resolved_password().as_deref(), Some("plain"));
    }
}
