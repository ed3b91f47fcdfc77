//! Sync engine
//!
//! One [`SyncEngine::sync`] pass:
//!
//! 1. refresh the manifest repository and load a manifest snapshot
//! 2. prune checkouts of projects that left the manifest
//! 3. remove stale `<copyfile>`/`<linkfile>` destinations
//! 4. run the remote-resolution strategies (SmartSync, HyperSync, superproject)
//! 5. network phase: fetch by object-directory group, retrying missing projects
//!    against a reloaded manifest until the missing set stops shrinking
//! 6. local phase: checkout, hooks, copy/link, submodules
//! 7. record the pass's project paths in `project.list`
//!
//! Project failures are collected rather than returned; the pass ends with
//! [`ReposyncError::SyncFailed`] if any were recorded.

mod checkout;
pub mod copylink;
mod fetch;
pub mod manifest_server;
pub mod options;
pub mod pool;
pub mod prune;
pub mod state;
pub mod strategy;
pub mod superproject;

pub use options::{SyncOptions, MANIFEST_REFRESH_INTERVAL};
pub use prune::{is_safe_to_delete, prune_projects, PruneReport};
pub use state::{CopyLinkFiles, FetchTimes, ProjectState, SyncState};
pub use strategy::{StrategyContext, StrategyOutcome, SyncStrategy};

use crate::manifest::Manifest;
use crate::project::{Project, ProjectManager};
use crate::report::{Output, Reporter, TracingReporter};
use crate::retry::retry_with_backoff;
use crate::workspace::Workspace;
use crate::{ReposyncError, Result};
use chrono::Utc;
use gitcmd::GitRunner;
use state::{read_project_list, write_project_list, MANIFEST_REPO_KEY};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where the engine reads its manifest from
#[derive(Debug, Clone)]
pub enum ManifestSource {
    /// A manifest file on disk, includes resolved relative to it
    File(PathBuf),

    /// Manifest XML handed over by the manifest server
    Bytes(Arc<[u8]>),
}

/// Counts for a finished pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    pub pruned: usize,
    pub stale_files_removed: usize,
    pub fetched: usize,
    pub checked_out: usize,

    /// Final state of every project in the pass, by path
    pub states: BTreeMap<String, ProjectState>,
}

/// Shared by the tasks of one phase
#[derive(Clone)]
pub(crate) struct PhaseContext {
    pub options: Arc<SyncOptions>,
    pub output: Output,
    pub state: Arc<SyncState>,
    pub workspace: Workspace,
    pub cancel: CancellationToken,
}

/// Drives sync passes for one workspace
pub struct SyncEngine {
    workspace: Workspace,
    runner: Arc<dyn GitRunner>,
    reporter: Arc<dyn Reporter>,
    source: ManifestSource,
    manifest: Option<Arc<Manifest>>,
    state: Arc<SyncState>,
    cancel: CancellationToken,
}

impl SyncEngine {
    pub fn new(workspace: Workspace, manifest_path: PathBuf, runner: Arc<dyn GitRunner>) -> Self {
        Self {
            workspace,
            runner,
            reporter: Arc::new(TracingReporter),
            source: ManifestSource::File(manifest_path),
            manifest: None,
            state: Arc::new(SyncState::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Send user-facing progress and errors to `reporter`
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Cancelling `cancel` stops the pass at the next safe point
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Messages for every project that failed during the last pass
    pub fn errors(&self) -> Vec<String> {
        self.state.errors()
    }

    /// Where each project of the last pass ended up, by path
    pub fn project_states(&self) -> BTreeMap<String, ProjectState> {
        self.state.project_states()
    }

    /// Snapshot used by the most recent load, if any
    pub fn manifest(&self) -> Option<Arc<Manifest>> {
        self.manifest.clone()
    }

    pub fn source(&self) -> &ManifestSource {
        &self.source
    }

    /// Load (or reload) the manifest snapshot with the given group filter
    pub fn load_manifest(&mut self, groups: &[String]) -> Result<Arc<Manifest>> {
        let manifest = match self.source {
            ManifestSource::File(ref path) => Manifest::from_file(path, groups)?,
            ManifestSource::Bytes(ref xml) => Manifest::parse(&xml[..], groups)?,
        };
        for name in manifest.unresolved_remotes() {
            warn!(remote = %name, "Manifest references an undefined remote");
        }
        let manifest = Arc::new(manifest);
        self.manifest = Some(Arc::clone(&manifest));
        Ok(manifest)
    }

    /// Run one sync pass
    pub async fn sync(&mut self, options: SyncOptions) -> Result<SyncSummary> {
        self.state.reset();
        let options = Arc::new(options);
        let output = Output::new(Arc::clone(&self.reporter), options.quiet, options.verbose);
        let ctx = PhaseContext {
            options: Arc::clone(&options),
            output: output.clone(),
            state: Arc::clone(&self.state),
            workspace: self.workspace.clone(),
            cancel: self.cancel.clone(),
        };
        let mut summary = SyncSummary::default();

        if !options.local_only {
            self.refresh_manifest_repo(&options, &output).await?;
        }
        let mut manifest = self.load_manifest(&options.groups)?;

        // Paths from before this pass that project.list must keep listing
        let full_pass = options.projects.is_empty();
        let mut carried: BTreeSet<String> = BTreeSet::new();
        if full_pass {
            let manager = self.manager(&manifest);
            let previous = read_project_list(&self.workspace.project_list_path())?;
            let current: BTreeSet<String> =
                manager.projects().iter().map(|p| p.relpath.clone()).collect();

            if options.prune && !options.network_only {
                let report = prune_projects(
                    &self.workspace,
                    &previous,
                    &current,
                    options.force_remove_dirty,
                )?;
                summary.pruned = report.removed.len();
                carried.extend(report.kept().cloned());
            } else {
                carried.extend(previous.difference(&current).cloned());
            }
            carried.extend(current);

            if !options.network_only {
                summary.stale_files_removed = self.update_copy_link_files(&manager)?;
            }
        }

        let mut restrict: Option<BTreeSet<String>> = None;
        let mut pins: BTreeMap<String, String> = BTreeMap::new();
        if !options.local_only {
            for strategy in strategy::select(&options)? {
                debug!(strategy = strategy.name(), "Resolving");
                let outcome = {
                    let sctx = StrategyContext {
                        workspace: &self.workspace,
                        manifest: &manifest,
                        options: &options,
                        runner: Arc::clone(&self.runner),
                        cancel: &self.cancel,
                    };
                    strategy.resolve(&sctx).await?
                };
                match outcome {
                    StrategyOutcome::Unchanged => {}
                    StrategyOutcome::ReplaceManifest(xml) => {
                        self.replace_manifest(xml)?;
                        manifest = self.load_manifest(&options.groups)?;
                    }
                    StrategyOutcome::RestrictTo(names) => restrict = Some(names),
                    StrategyOutcome::PinRevisions(revisions) => pins = revisions,
                }
            }
        }

        let selected = self.select_projects(&manifest, &options, &pins)?;
        for project in &selected {
            let state = if project.exists() {
                ProjectState::CheckedOut
            } else {
                ProjectState::Missing
            };
            self.state.set_state(&project.relpath, state);
        }
        let mut fetched_paths: Option<BTreeSet<String>> = None;

        if !options.local_only {
            let wanted: Vec<Project> = match restrict {
                Some(ref names) => selected
                    .iter()
                    .filter(|p| names.contains(&p.name))
                    .cloned()
                    .collect(),
                None => selected.clone(),
            };
            let wanted_paths: BTreeSet<String> =
                wanted.iter().map(|p| p.relpath.clone()).collect();
            info!(projects = wanted.len(), jobs = options.jobs_network, "Fetching");

            let first = fetch::fetch_projects(&ctx, wanted).await;
            let mut fetched = first.fetched;
            let mut failed = first.failed;
            let mut stopped = first.cancelled;
            let mut previous_missing: Option<BTreeSet<String>> = None;

            while !stopped {
                let have: BTreeSet<&String> = fetched.iter().map(|p| &p.relpath).collect();
                let missing: BTreeSet<String> = wanted_paths
                    .iter()
                    .filter(|path| !have.contains(path))
                    .cloned()
                    .collect();
                if missing.is_empty() || previous_missing.as_ref() == Some(&missing) {
                    break;
                }

                info!(missing = missing.len(), "Reloading manifest to retry missing projects");
                manifest = self.load_manifest(&options.groups)?;
                let retry: Vec<Project> = self
                    .select_projects(&manifest, &options, &pins)?
                    .into_iter()
                    .filter(|p| missing.contains(&p.relpath))
                    .collect();

                let round = fetch::fetch_projects(&ctx, retry).await;
                for project in round.fetched {
                    failed.remove(&project.relpath);
                    fetched.push(project);
                }
                failed.extend(round.failed);
                stopped = round.cancelled;
                previous_missing = Some(missing);
            }

            for error in failed.into_values() {
                self.record_failure(&output, &error);
            }
            fetch::gc_projects(&ctx, &fetched).await;

            summary.fetched = fetched.len();
            fetched_paths = Some(fetched.into_iter().map(|p| p.relpath).collect());
        }

        if self.cancel.is_cancelled() {
            return Err(ReposyncError::Cancelled(None));
        }

        let fail_fast_stop = options.fail_fast && !self.state.errors().is_empty();
        if fail_fast_stop {
            info!("Skipping checkout after fetch failure");
        }

        if !options.network_only && !fail_fast_stop {
            let candidates = self.select_projects(&manifest, &options, &pins)?;
            let to_checkout: Vec<Project> = match fetched_paths {
                Some(ref paths) => candidates
                    .into_iter()
                    .filter(|p| paths.contains(&p.relpath))
                    .collect(),
                None => candidates.into_iter().filter(Project::exists).collect(),
            };
            info!(projects = to_checkout.len(), jobs = options.jobs_checkout, "Checking out");

            let outcome = checkout::checkout_projects(&ctx, to_checkout).await;
            for error in outcome.failed.into_values() {
                self.record_failure(&output, &error);
            }
            summary.checked_out = outcome.checked_out.len();
        }

        if self.cancel.is_cancelled() {
            return Err(ReposyncError::Cancelled(None));
        }

        if full_pass {
            self.record_project_list(&manifest, &carried)?;
        }

        let failed = self.state.errors().len();
        if failed > 0 {
            return Err(ReposyncError::SyncFailed { failed });
        }
        output.info(&format!(
            "Synced {} project(s): {} fetched, {} checked out",
            selected.len(),
            summary.fetched,
            summary.checked_out
        ));
        summary.states = self.state.project_states();
        Ok(summary)
    }

    fn manager(&self, manifest: &Arc<Manifest>) -> ProjectManager {
        ProjectManager::new(
            Arc::clone(manifest),
            self.workspace.clone(),
            Arc::clone(&self.runner),
        )
    }

    /// Projects taking part in the pass, with superproject pins applied
    fn select_projects(
        &self,
        manifest: &Arc<Manifest>,
        options: &SyncOptions,
        pins: &BTreeMap<String, String>,
    ) -> Result<Vec<Project>> {
        let manager = self.manager(manifest);
        let mut projects = if options.projects.is_empty() {
            manager.projects().to_vec()
        } else {
            manager.get_projects_by_names(&options.projects)?
        };
        for project in &mut projects {
            if let Some(id) = pins.get(&project.relpath) {
                project.revision_id = Some(id.clone());
            }
        }
        Ok(projects)
    }

    fn record_failure(&self, output: &Output, error: &ReposyncError) {
        let message = error.to_string();
        output.error(&message);
        self.state.record_error(message);
    }

    /// Fetch `.repo/manifests`; HyperSync skips it while the last fetch is recent
    ///
    /// Failure here is reported but does not stop the pass.
    async fn refresh_manifest_repo(&self, options: &SyncOptions, output: &Output) -> Result<()> {
        let dir = self.workspace.manifests_dir();
        if !dir.join(".git").exists() {
            return Ok(());
        }

        let times_path = self.workspace.fetch_times_path();
        let mut times = FetchTimes::load(&times_path)?;
        if options.hyper_sync {
            if let Some(last) = times.get(MANIFEST_REPO_KEY) {
                let fresh = Utc::now()
                    .signed_duration_since(last)
                    .to_std()
                    .map_or(true, |age| age < options.manifest_refresh_interval);
                if fresh {
                    debug!("Manifest repository fetched recently, skipping");
                    return Ok(());
                }
            }
        }

        let runner = Arc::clone(&self.runner);
        let result = retry_with_backoff(&self.cancel, &options.retry, "fetch manifests", |_| {
            let runner = Arc::clone(&runner);
            let dir = dir.clone();
            async move {
                tokio::task::spawn_blocking(move || {
                    runner
                        .run_in_dir(&dir, &["fetch", "--prune", "origin"])
                        .map(drop)
                        .map_err(|e| ReposyncError::network("manifests", e))
                })
                .await
                .map_err(|e| ReposyncError::Other(format!("manifest fetch task failed: {}", e)))?
            }
        })
        .await;

        match result {
            Ok(()) => {
                let now = Utc::now();
                times.set(MANIFEST_REPO_KEY, now);
                self.state.record_fetch(MANIFEST_REPO_KEY, now);
                times.save(&times_path)?;
            }
            Err(ReposyncError::Cancelled(last)) => return Err(ReposyncError::Cancelled(last)),
            Err(e) => {
                warn!(error = %e, "Manifest repository fetch failed, using local manifest");
                output.info(&format!("warning: could not update manifests: {}", e));
            }
        }
        Ok(())
    }

    /// Write `project.list` at the end of a full pass
    ///
    /// Lists the final manifest's paths plus any `carried` path whose
    /// checkout is still on disk, so a checkout that prune skipped or never
    /// looked at stays a candidate for the next prune.
    fn record_project_list(
        &self,
        manifest: &Arc<Manifest>,
        carried: &BTreeSet<String>,
    ) -> Result<()> {
        let mut paths: BTreeSet<String> = self
            .manager(manifest)
            .projects()
            .iter()
            .map(|p| p.relpath.clone())
            .collect();
        paths.extend(
            carried
                .iter()
                .filter(|p| self.workspace.worktree(p).exists())
                .cloned(),
        );
        write_project_list(&self.workspace.project_list_path(), &paths)
    }

    /// Remove destinations no longer declared and record the current set
    fn update_copy_link_files(&self, manager: &ProjectManager) -> Result<usize> {
        let path = self.workspace.copy_link_files_path();
        let previous = CopyLinkFiles::load(&path)?;
        let current = copylink::generated_files(manager.projects());

        let removed = copylink::remove_stale(&self.workspace, &previous.stale(&current))?;
        current.save(&path)?;
        Ok(removed)
    }

    /// Persist a server-provided manifest and switch the engine over to it
    fn replace_manifest(&mut self, xml: Vec<u8>) -> Result<()> {
        let path = self.workspace.smart_sync_manifest_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, &xml)?;
        info!(path = %path.display(), "Using manifest from the manifest server");
        self.source = ManifestSource::Bytes(Arc::from(xml));
        Ok(())
    }
}
