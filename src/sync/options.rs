//! Options for one sync pass

use crate::config::{ManifestServerConfig, ReposyncConfig};
use crate::retry::RetryOptions;
use std::time::Duration;

/// How long a HyperSync pass trusts the last manifest repository fetch
pub const MANIFEST_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Everything that shapes a sync pass
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Concurrent fetch groups
    pub jobs_network: usize,

    /// Concurrent checkouts
    pub jobs_checkout: usize,

    /// Stop the current phase at the first project failure
    pub fail_fast: bool,

    /// Check out over local modifications, resetting on conflict
    pub force_sync: bool,

    /// Prune checkouts even when they have uncommitted changes
    pub force_remove_dirty: bool,

    /// Delete checkouts of projects that left the manifest
    pub prune: bool,

    /// Fetch only, no checkout
    pub network_only: bool,

    /// Checkout only, no fetch
    pub local_only: bool,

    pub quiet: bool,
    pub verbose: bool,

    /// Group filter applied when loading the manifest
    pub groups: Vec<String>,

    /// Restrict the pass to these project names or paths
    pub projects: Vec<String>,

    /// Replace the manifest with the server's approved manifest
    pub smart_sync: bool,

    /// Replace the manifest with the server's manifest for this tag
    pub smart_tag: Option<String>,

    /// Only fetch projects the server reports as changed
    pub hyper_sync: bool,

    /// Pin revisions from the superproject
    pub use_superproject: bool,

    /// Branch passed to the manifest server (defaults to the manifest's default revision)
    pub manifest_branch: Option<String>,

    pub manifest_server: Option<ManifestServerConfig>,

    pub retry: RetryOptions,

    /// Kill a single fetch after this long
    pub fetch_timeout: Option<Duration>,

    /// HyperSync skips the manifest repository fetch if it is younger than this
    pub manifest_refresh_interval: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from_config(&ReposyncConfig::default())
    }
}

impl SyncOptions {
    /// Options seeded from the config file; CLI flags are applied on top by the caller
    pub fn from_config(config: &ReposyncConfig) -> Self {
        Self {
            jobs_network: config.jobs_network.max(1),
            jobs_checkout: config.jobs_checkout.max(1),
            fail_fast: false,
            force_sync: false,
            force_remove_dirty: false,
            prune: true,
            network_only: false,
            local_only: false,
            quiet: false,
            verbose: false,
            groups: Vec::new(),
            projects: Vec::new(),
            smart_sync: false,
            smart_tag: None,
            hyper_sync: false,
            use_superproject: config.use_superproject,
            manifest_branch: None,
            manifest_server: config.manifest_server.clone(),
            retry: config.retry.to_options(),
            fetch_timeout: config.fetch_timeout(),
            manifest_refresh_interval: MANIFEST_REFRESH_INTERVAL,
        }
    }

    /// SmartSync in either branch or tag mode
    pub fn wants_smart_sync(&self) -> bool {
        self.smart_sync || self.smart_tag.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let config = ReposyncConfig {
            jobs_network: 0,
            jobs_checkout: 3,
            use_superproject: true,
            fetch_timeout_secs: 45,
            ..Default::default()
        };
        let options = SyncOptions::from_config(&config);

        assert_eq!(options.jobs_network, 1);
        assert_eq!(options.jobs_checkout, 3);
        assert!(options.use_superproject);
        assert!(options.prune);
        assert_eq!(options.fetch_timeout, Some(Duration::from_secs(45)));
        assert_eq!(options.retry.max_retries, 3);
    }

    #[test]
    fn test_smart_sync_modes() {
        let mut options = SyncOptions::default();
        assert!(!options.wants_smart_sync());
        options.smart_tag = Some("release-1".into());
        assert!(options.wants_smart_sync());
    }
}
