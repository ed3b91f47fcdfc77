//! Superproject revision pinning
//!
//! The superproject is a separate repository whose tree records a gitlink
//! for every managed project path. Its URL and branch come from the
//! `superproject-url` and `superproject-branch` manifest attributes (on
//! `<default>`, or on the root `<manifest>` element).

use super::strategy::{StrategyContext, StrategyOutcome, SyncStrategy};
use crate::manifest::Manifest;
use crate::retry::retry_with_backoff;
use crate::{ReposyncError, Result};
use async_trait::async_trait;
use gitcmd::GitRunner;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const URL_ATTR: &str = "superproject-url";
pub const BRANCH_ATTR: &str = "superproject-branch";

#[derive(Debug, Default)]
pub struct Superproject;

impl Superproject {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SyncStrategy for Superproject {
    fn name(&self) -> &'static str {
        "superproject"
    }

    async fn resolve(&self, ctx: &StrategyContext<'_>) -> Result<StrategyOutcome> {
        let url = required_attr(ctx.manifest, URL_ATTR)?;
        let branch = required_attr(ctx.manifest, BRANCH_ATTR)?;

        let checkout = SuperprojectCheckout {
            dir: ctx.workspace.superproject_dir(),
            runner: Arc::clone(&ctx.runner),
            timeout: ctx.options.fetch_timeout,
        };

        tracing::info!(url = %url, branch = %branch, "Updating superproject");
        let tree = retry_with_backoff(ctx.cancel, &ctx.options.retry, "superproject", |_| {
            let checkout = checkout.clone();
            let url = url.clone();
            let branch = branch.clone();
            async move {
                tokio::task::spawn_blocking(move || checkout.update(&url, &branch))
                    .await
                    .map_err(|e| {
                        ReposyncError::Superproject(format!("superproject task failed: {}", e))
                    })?
            }
        })
        .await?;

        let pins = pins_for(ctx.manifest, &tree);
        let unpinned = ctx.manifest.projects.len() - pins.len();
        if unpinned > 0 {
            tracing::debug!(unpinned, "Projects absent from the superproject stay unpinned");
        }

        write_pinned_manifest(
            ctx.manifest,
            &pins,
            &ctx.workspace.superproject_manifest_path(),
        )?;
        Ok(StrategyOutcome::PinRevisions(pins))
    }
}

fn required_attr(manifest: &Manifest, name: &str) -> Result<String> {
    manifest
        .custom_attr(name)
        .map(str::to_string)
        .ok_or_else(|| ReposyncError::Superproject(format!("manifest has no {} attribute", name)))
}

/// Local clone of the superproject
#[derive(Clone)]
struct SuperprojectCheckout {
    dir: PathBuf,
    runner: Arc<dyn GitRunner>,
    timeout: Option<Duration>,
}

impl SuperprojectCheckout {
    /// Fetch `branch`, check out `FETCH_HEAD`, and return the tree as path -> object id
    fn update(&self, url: &str, branch: &str) -> Result<BTreeMap<String, String>> {
        if !self.dir.join(".git").exists() {
            fs::create_dir_all(&self.dir)?;
            let dir = self.dir.to_string_lossy().into_owned();
            self.runner
                .run(&["init", "-q", dir.as_str()])
                .map_err(|e| superproject_error("init", e))?;
        }

        let fetch = ["fetch", "--no-tags", url, branch];
        let fetched = match self.timeout {
            Some(timeout) => {
                let dir = self.dir.to_string_lossy().into_owned();
                let mut args = vec!["-C", dir.as_str()];
                args.extend_from_slice(&fetch);
                self.runner.run_with_timeout(timeout, &args)
            }
            None => self.runner.run_in_dir(&self.dir, &fetch),
        };
        fetched.map_err(|e| superproject_error("fetch", e))?;

        self.runner
            .run_in_dir(&self.dir, &["checkout", "-q", "--detach", "FETCH_HEAD"])
            .map_err(|e| superproject_error("checkout", e))?;

        let listing = self
            .runner
            .run_in_dir(&self.dir, &["ls-tree", "-r", "HEAD"])
            .map_err(|e| superproject_error("ls-tree", e))?;
        Ok(parse_ls_tree(&String::from_utf8_lossy(&listing)))
    }
}

fn superproject_error(step: &str, err: gitcmd::Error) -> ReposyncError {
    ReposyncError::Superproject(format!("{} failed: {}", step, err))
}

/// `<mode> SP <type> SP <object>\t<path>` lines into path -> object
fn parse_ls_tree(listing: &str) -> BTreeMap<String, String> {
    listing
        .lines()
        .filter_map(|line| {
            let (meta, path) = line.split_once('\t')?;
            let object = meta.split_whitespace().nth(2)?;
            Some((path.to_string(), object.to_string()))
        })
        .collect()
}

/// Project path -> pinned id, for projects whose path is in the tree
fn pins_for(manifest: &Manifest, tree: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    manifest
        .projects
        .iter()
        .filter_map(|p| {
            let path = if p.path.is_empty() { &p.name } else { &p.path };
            tree.get(path).map(|id| (path.clone(), id.clone()))
        })
        .collect()
}

fn write_pinned_manifest(
    manifest: &Manifest,
    pins: &BTreeMap<String, String>,
    path: &Path,
) -> Result<()> {
    let mut pinned = manifest.clone();
    for project in &mut pinned.projects {
        let key = if project.path.is_empty() { &project.name } else { &project.path };
        if let Some(id) = pins.get(key).cloned() {
            project.revision = Some(id);
        }
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, pinned.to_xml()?)?;
    Ok(())
}
