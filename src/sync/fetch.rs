//! Network phase: clone or fetch every selected project
//!
//! Projects sharing an object directory are fetched one after another inside
//! a single pool task; distinct object directories run concurrently, up to
//! `jobs_network` at a time.

use super::options::SyncOptions;
use super::pool::TaskPool;
use super::state::ProjectState;
use super::PhaseContext;
use crate::project::Project;
use crate::retry::retry_with_backoff;
use crate::{ReposyncError, Result};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Result of one fetch round
#[derive(Debug, Default)]
pub(crate) struct FetchOutcome {
    /// Projects fetched this round, with `last_fetch` and `need_gc` set
    pub fetched: Vec<Project>,

    /// Failures keyed by project path; cancellations are not included
    pub failed: BTreeMap<String, ReposyncError>,

    /// The round stopped early (fail-fast or interrupted)
    pub cancelled: bool,
}

type GroupResult = Vec<std::result::Result<Project, (String, ReposyncError)>>;

/// Fetch `projects`, grouped by object directory
pub(crate) async fn fetch_projects(ctx: &PhaseContext, projects: Vec<Project>) -> FetchOutcome {
    let total = projects.len();
    let done = Arc::new(AtomicUsize::new(0));
    let mut pool: TaskPool<GroupResult> =
        TaskPool::new(ctx.options.jobs_network, ctx.options.fail_fast, &ctx.cancel);

    for group in group_by_objdir(projects).into_values() {
        let ctx = ctx.clone();
        let done = Arc::clone(&done);
        pool.spawn(move |signal| async move {
            let mut results = Vec::with_capacity(group.len());
            for mut project in group {
                if signal.is_cancelled() {
                    break;
                }
                if !project.exists() {
                    ctx.state.set_state(&project.relpath, ProjectState::Cloning);
                }
                let result = fetch_one(&project, &ctx.options, signal.token()).await;
                ctx.output.progress(
                    "Fetching",
                    done.fetch_add(1, Ordering::SeqCst) + 1,
                    total,
                );

                match result {
                    Ok(()) => {
                        let now = Utc::now();
                        project.last_fetch = Some(now);
                        project.need_gc = true;
                        ctx.state.record_fetch(&project.name, now);
                        ctx.state.set_state(&project.relpath, ProjectState::Fetched);
                        results.push(Ok(project));
                    }
                    Err(e) => {
                        if !matches!(e, ReposyncError::Cancelled(_)) {
                            ctx.state.set_state(&project.relpath, ProjectState::Failed);
                            signal.failed();
                        }
                        results.push(Err((project.relpath.clone(), e)));
                    }
                }
            }
            results
        });
    }

    let joined = pool.join().await;
    let mut outcome = FetchOutcome {
        cancelled: joined.cancelled,
        ..FetchOutcome::default()
    };
    for result in joined.completed.into_iter().flatten() {
        match result {
            Ok(project) => outcome.fetched.push(project),
            Err((_, ReposyncError::Cancelled(_))) => {}
            Err((relpath, e)) => {
                outcome.failed.insert(relpath, e);
            }
        }
    }
    outcome
}

/// Projects grouped by object directory, manifest order kept within a group
fn group_by_objdir(projects: Vec<Project>) -> BTreeMap<PathBuf, Vec<Project>> {
    let mut groups: BTreeMap<PathBuf, Vec<Project>> = BTreeMap::new();
    for project in projects {
        groups.entry(project.objdir.clone()).or_default().push(project);
    }
    groups
}

/// Clone a missing project or fetch an existing one, with retries
async fn fetch_one(
    project: &Project,
    options: &SyncOptions,
    cancel: &CancellationToken,
) -> Result<()> {
    let verb = if project.exists() { "fetch" } else { "clone" };
    let operation = format!("{} {}", verb, project.name);
    let timeout = options.fetch_timeout;

    retry_with_backoff(cancel, &options.retry, &operation, |_| {
        let project = project.clone();
        async move {
            tokio::task::spawn_blocking(move || {
                if project.exists() {
                    project.fetch(timeout)
                } else {
                    project.clone_repo(timeout)
                }
            })
            .await
            .map_err(|e| ReposyncError::Other(format!("fetch task failed: {}", e)))?
        }
    })
    .await
}

/// `git gc --auto` for every project flagged by the fetch; failures only warn
pub(crate) async fn gc_projects(ctx: &PhaseContext, projects: &[Project]) {
    let mut pool: TaskPool<()> = TaskPool::new(ctx.options.jobs_checkout, false, &ctx.cancel);
    for project in projects.iter().filter(|p| p.need_gc).cloned() {
        pool.spawn(move |_| async move {
            let name = project.name.clone();
            match tokio::task::spawn_blocking(move || project.gc()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(project = %name, error = %e, "git gc failed"),
                Err(e) => tracing::warn!(project = %name, error = %e, "git gc task failed"),
            }
        });
    }
    pool.join().await;
}
