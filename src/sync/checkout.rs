//! Local phase: detach every fetched project at its target revision, then
//! install hooks, copy/link files and update submodules

use super::copylink;
use super::pool::TaskPool;
use super::state::ProjectState;
use super::PhaseContext;
use crate::project::Project;
use crate::retry::{retry_with_backoff, RetryDecision, RetryableError};
use crate::{ReposyncError, Result};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub(crate) struct CheckoutOutcome {
    /// Paths of projects that finished the local phase, sorted
    pub checked_out: Vec<String>,

    /// Failures keyed by project path; cancellations are not included
    pub failed: BTreeMap<String, ReposyncError>,

    pub cancelled: bool,
}

pub(crate) async fn checkout_projects(
    ctx: &PhaseContext,
    projects: Vec<Project>,
) -> CheckoutOutcome {
    let total = projects.len();
    let done = Arc::new(AtomicUsize::new(0));
    let mut pool: TaskPool<(String, Result<()>)> =
        TaskPool::new(ctx.options.jobs_checkout, ctx.options.fail_fast, &ctx.cancel);

    for project in projects {
        let ctx = ctx.clone();
        let done = Arc::clone(&done);
        pool.spawn(move |signal| async move {
            let result = checkout_one(&ctx, &project, signal.token()).await;
            ctx.output.progress(
                "Checking out",
                done.fetch_add(1, Ordering::SeqCst) + 1,
                total,
            );
            if let Err(ref e) = result {
                if !matches!(e, ReposyncError::Cancelled(_)) {
                    ctx.state.set_state(&project.relpath, ProjectState::Failed);
                    signal.failed();
                }
            }
            (project.relpath, result)
        });
    }

    let joined = pool.join().await;
    let mut outcome = CheckoutOutcome {
        cancelled: joined.cancelled,
        ..CheckoutOutcome::default()
    };
    for (relpath, result) in joined.completed {
        match result {
            Ok(()) => outcome.checked_out.push(relpath),
            Err(ReposyncError::Cancelled(_)) => {}
            Err(e) => {
                outcome.failed.insert(relpath, e);
            }
        }
    }
    outcome.checked_out.sort();
    outcome
}

async fn checkout_one(
    ctx: &PhaseContext,
    project: &Project,
    cancel: &CancellationToken,
) -> Result<()> {
    let force = ctx.options.force_sync;

    // A conflict is worth another attempt only after a forced reset
    let retry = ctx
        .options
        .retry
        .clone()
        .with_should_retry(move |e| match e {
            ReposyncError::CheckoutConflict { .. } => force,
            other => other.retry_decision() == RetryDecision::Retry,
        });

    let operation = format!("checkout {}", project.name);
    retry_with_backoff(cancel, &retry, &operation, |_| {
        let project = project.clone();
        async move {
            tokio::task::spawn_blocking(move || detach(&project, force))
                .await
                .map_err(|e| ReposyncError::Other(format!("checkout task failed: {}", e)))?
        }
    })
    .await?;
    ctx.state.set_state(&project.relpath, ProjectState::CheckedOut);

    let hooks_dir = ctx.workspace.hooks_dir();
    let root = ctx.workspace.root().to_path_buf();
    let state = Arc::clone(&ctx.state);
    let project = project.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let hooks = project.install_hooks(&hooks_dir)?;
        if hooks > 0 {
            tracing::debug!(project = %project.name, hooks, "Installed hooks");
        }
        copylink::apply(&project, &root)?;
        if project.sync_s {
            project.update_submodules()?;
        }
        state.set_state(&project.relpath, ProjectState::Synced);
        Ok(())
    })
    .await
    .map_err(|e| ReposyncError::Other(format!("checkout task failed: {}", e)))?
}

fn detach(project: &Project, force: bool) -> Result<()> {
    if !force && !project.is_clean()? {
        return Err(ReposyncError::CheckoutConflict {
            project: project.name.clone(),
            message: "working tree has local changes (use --force-sync to discard them)"
                .to_string(),
        });
    }
    match project.checkout() {
        Err(conflict @ ReposyncError::CheckoutConflict { .. }) if force => {
            project.reset_hard()?;
            Err(conflict)
        }
        other => other,
    }
}
