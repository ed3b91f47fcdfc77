//! Manifest server HTTP client used by SmartSync and HyperSync
//!
//! Endpoints:
//! - `GET /api/GetApprovedManifest?branch=&target=` returns manifest XML
//! - `GET /api/GetManifest?tag=` returns manifest XML
//! - `GET /api/GetChangedProjects?branch=` returns a JSON array of project names

use crate::config::ManifestServerConfig;
use crate::{ReposyncError, Result};
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use tracing::{debug, info};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for one manifest server
#[derive(Debug, Clone)]
pub struct ManifestServerClient {
    client: Client,
    base_url: Url,
}

impl ManifestServerClient {
    /// Create a client; credentials are embedded in the URL as basic auth
    pub fn new(config: &ManifestServerConfig) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        let mut base_url = Url::parse(config.url.trim_end_matches('/')).map_err(|e| {
            ReposyncError::ManifestServer(format!("invalid server URL '{}': {}", config.url, e))
        })?;

        if let Some(ref username) = config.username {
            let password = config.resolved_password();
            base_url
                .set_username(username)
                .and_then(|_| base_url.set_password(password.as_deref()))
                .map_err(|_| {
                    ReposyncError::ManifestServer(format!(
                        "cannot attach credentials to '{}'",
                        config.url
                    ))
                })?;
        }

        Ok(Self { client, base_url })
    }

    /// SmartSync branch mode
    pub async fn approved_manifest(&self, branch: &str, target: Option<&str>) -> Result<Vec<u8>> {
        let mut query = vec![("branch", branch)];
        if let Some(target) = target {
            query.push(("target", target));
        }
        let url = self.endpoint("GetApprovedManifest", &query)?;

        info!(branch = %branch, target = ?target, "Requesting approved manifest");
        let body = self.get(url).await?.bytes().await?;
        Ok(body.to_vec())
    }

    /// SmartSync tag mode
    pub async fn manifest_for_tag(&self, tag: &str) -> Result<Vec<u8>> {
        let url = self.endpoint("GetManifest", &[("tag", tag)])?;

        info!(tag = %tag, "Requesting tagged manifest");
        let body = self.get(url).await?.bytes().await?;
        Ok(body.to_vec())
    }

    /// HyperSync: names of projects changed on `branch`
    pub async fn changed_projects(&self, branch: &str) -> Result<Vec<String>> {
        let url = self.endpoint("GetChangedProjects", &[("branch", branch)])?;

        debug!(branch = %branch, "Requesting changed projects");
        let response = self.get(url).await?;
        let projects: Vec<String> = response.json().await.map_err(|e| {
            ReposyncError::ManifestServer(format!("invalid changed-projects response: {}", e))
        })?;

        info!(count = projects.len(), "Manifest server reported changed projects");
        Ok(projects)
    }

    fn endpoint(&self, api: &str, query: &[(&str, &str)]) -> Result<Url> {
        let base = format!("{}/", self.base_url.as_str().trim_end_matches('/'));
        let mut url = Url::parse(&base)
            .and_then(|base| base.join(&format!("api/{}", api)))
            .map_err(|e| ReposyncError::ManifestServer(format!("invalid endpoint: {}", e)))?;
        url.query_pairs_mut().extend_pairs(query);
        Ok(url)
    }

    /// GET with transport errors and non-200 statuses mapped to ManifestServer errors
    async fn get(&self, url: Url) -> Result<reqwest::Response> {
        let api = url.path().to_string();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ReposyncError::ManifestServer(format!("{}: {}", api, e)))?;

        match response.status() {
            StatusCode::OK => Ok(response),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(
                ReposyncError::ManifestServer(format!("{}: authentication failed", api)),
            ),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ReposyncError::ManifestServer(format!(
                    "{}: HTTP {}: {}",
                    api,
                    status,
                    body.trim()
                )))
            }
        }
    }
}

/// Build target for SmartSync: `SYNC_TARGET`, else `TARGET_PRODUCT-TARGET_BUILD_VARIANT`
pub fn smart_sync_target() -> Option<String> {
    target_from(|name| std::env::var(name).ok())
}

fn target_from(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(target) = non_empty("SYNC_TARGET") {
        return Some(target);
    }
    match (non_empty("TARGET_PRODUCT"), non_empty("TARGET_BUILD_VARIANT")) {
        (Some(product), Some(variant)) => Some(format!("{}-{}", product, variant)),
        _ => None,
    }
}
