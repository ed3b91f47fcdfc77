//! Pluggable remote-resolution strategies
//!
//! Each strategy inspects the current manifest snapshot before the network
//! phase and tells the engine how to adjust the pass. The engine picks the
//! strategies from [`SyncOptions`] and applies their outcomes in order.

use super::manifest_server::{smart_sync_target, ManifestServerClient};
use super::options::SyncOptions;
use super::superproject::Superproject;
use crate::manifest::Manifest;
use crate::workspace::Workspace;
use crate::{ReposyncError, Result};
use async_trait::async_trait;
use gitcmd::GitRunner;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a strategy may look at
pub struct StrategyContext<'a> {
    pub workspace: &'a Workspace,
    pub manifest: &'a Manifest,
    pub options: &'a SyncOptions,
    pub runner: Arc<dyn GitRunner>,
    pub cancel: &'a CancellationToken,
}

/// How a strategy changes the pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyOutcome {
    /// Nothing to change
    Unchanged,

    /// Use this manifest XML instead of the one on disk
    ReplaceManifest(Vec<u8>),

    /// Fetch only these project names
    RestrictTo(BTreeSet<String>),

    /// Check out these exact revisions, keyed by project path
    PinRevisions(BTreeMap<String, String>),
}

#[async_trait]
pub trait SyncStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn resolve(&self, ctx: &StrategyContext<'_>) -> Result<StrategyOutcome>;
}

/// Strategies requested by `options`, in the order they must run
///
/// Manifest replacement runs first so later strategies see the new snapshot.
pub fn select(options: &SyncOptions) -> Result<Vec<Box<dyn SyncStrategy>>> {
    let mut strategies: Vec<Box<dyn SyncStrategy>> = Vec::new();

    if options.wants_smart_sync() || options.hyper_sync {
        let server = options.manifest_server.as_ref().ok_or_else(|| {
            ReposyncError::ManifestServer("no manifest server configured".to_string())
        })?;
        let client = ManifestServerClient::new(server)?;

        if options.wants_smart_sync() {
            strategies.push(Box::new(SmartSync {
                client: client.clone(),
                tag: options.smart_tag.clone(),
                target: smart_sync_target(),
            }));
        }
        if options.hyper_sync {
            strategies.push(Box::new(HyperSync { client }));
        }
    }

    if options.use_superproject {
        strategies.push(Box::new(Superproject::new()));
    }
    Ok(strategies)
}

/// Branch sent to the manifest server
fn server_branch(ctx: &StrategyContext<'_>) -> Result<String> {
    ctx.options
        .manifest_branch
        .clone()
        .or_else(|| ctx.manifest.default.as_ref()?.revision.clone())
        .ok_or_else(|| {
            ReposyncError::ManifestServer(
                "no branch: pass one explicitly or set <default revision>".to_string(),
            )
        })
}

/// Replace the manifest with one approved by the manifest server
pub struct SmartSync {
    client: ManifestServerClient,
    tag: Option<String>,
    target: Option<String>,
}

#[async_trait]
impl SyncStrategy for SmartSync {
    fn name(&self) -> &'static str {
        "smart-sync"
    }

    async fn resolve(&self, ctx: &StrategyContext<'_>) -> Result<StrategyOutcome> {
        let xml = match self.tag {
            Some(ref tag) => self.client.manifest_for_tag(tag).await?,
            None => {
                let branch = server_branch(ctx)?;
                self.client
                    .approved_manifest(&branch, self.target.as_deref())
                    .await?
            }
        };
        Ok(StrategyOutcome::ReplaceManifest(xml))
    }
}

/// Fetch only the projects the manifest server reports as changed
pub struct HyperSync {
    client: ManifestServerClient,
}

#[async_trait]
impl SyncStrategy for HyperSync {
    fn name(&self) -> &'static str {
        "hyper-sync"
    }

    async fn resolve(&self, ctx: &StrategyContext<'_>) -> Result<StrategyOutcome> {
        let branch = server_branch(ctx)?;
        let changed = self.client.changed_projects(&branch).await?;
        Ok(StrategyOutcome::RestrictTo(changed.into_iter().collect()))
    }
}
