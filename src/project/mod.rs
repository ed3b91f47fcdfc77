//! Runtime projects
//!
//! A [`Project`] is one managed repository derived from a resolved manifest
//! entry and bound to a [`GitRunner`]. Its git verbs are blocking; the sync
//! engine runs them on the blocking thread pool.

mod manager;

pub use manager::ProjectManager;

use crate::manifest::{CopyFile, LinkFile, Manifest, ManifestProject};
use crate::retry::is_checkout_conflict;
use crate::workspace::Workspace;
use crate::{ReposyncError, Result};
use chrono::{DateTime, Utc};
use gitcmd::GitRunner;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// One managed git repository
#[derive(Clone)]
pub struct Project {
    /// Repository name from the manifest
    pub name: String,

    /// Path relative to the workspace root
    pub relpath: String,

    /// Absolute checkout directory
    pub worktree: PathBuf,

    /// `<worktree>/.git`
    pub gitdir: PathBuf,

    /// Shared object store; projects with the same objdir never fetch concurrently
    pub objdir: PathBuf,

    /// Git remote name inside the checkout (the remote's alias when set)
    pub remote_name: String,

    pub remote_url: Option<String>,

    /// Revision from the manifest (branch, tag or commit)
    pub revision: Option<String>,

    /// Exact commit pinned by the superproject, overriding `revision` at checkout
    pub revision_id: Option<String>,

    pub groups: String,
    pub clone_depth: Option<u32>,
    pub sync_c: bool,
    pub sync_s: bool,
    pub copyfiles: Vec<CopyFile>,
    pub linkfiles: Vec<LinkFile>,

    /// Completion time of the last successful fetch in this pass
    pub last_fetch: Option<DateTime<Utc>>,

    /// Set after a fetch so `gc --auto` runs once the network phase ends
    pub need_gc: bool,

    runner: Arc<dyn GitRunner>,
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("name", &self.name)
            .field("relpath", &self.relpath)
            .field("remote_name", &self.remote_name)
            .field("remote_url", &self.remote_url)
            .field("revision", &self.revision)
            .field("revision_id", &self.revision_id)
            .finish_non_exhaustive()
    }
}

impl Project {
    /// Bind a resolved manifest entry to the workspace and a git runner
    pub fn from_manifest(
        entry: &ManifestProject,
        manifest: &Manifest,
        workspace: &Workspace,
        runner: Arc<dyn GitRunner>,
    ) -> Self {
        let relpath = if entry.path.is_empty() {
            entry.name.clone()
        } else {
            entry.path.clone()
        };
        let worktree = workspace.worktree(&relpath);
        let remote_name = manifest
            .project_remote(entry)
            .map(|r| r.git_name().to_string())
            .or_else(|| entry.remote.clone())
            .unwrap_or_else(|| "origin".to_string());

        Self {
            name: entry.name.clone(),
            gitdir: worktree.join(".git"),
            objdir: workspace.objdir(&entry.name),
            worktree,
            relpath,
            remote_name,
            remote_url: entry.remote_url.clone(),
            revision: entry.revision.clone(),
            revision_id: None,
            groups: entry.groups.clone(),
            clone_depth: entry.clone_depth,
            sync_c: entry.sync_c.unwrap_or(false),
            sync_s: entry.sync_s.unwrap_or(false),
            copyfiles: entry.copyfiles.clone(),
            linkfiles: entry.linkfiles.clone(),
            last_fetch: None,
            need_gc: false,
            runner,
        }
    }

    /// Whether the checkout exists on disk
    pub fn exists(&self) -> bool {
        self.gitdir.exists()
    }

    /// Ref or commit that checkout should detach to
    pub fn checkout_target(&self) -> String {
        if let Some(ref id) = self.revision_id {
            return id.clone();
        }
        match self.revision.as_deref() {
            Some(rev) if is_commit_id(rev) || rev.starts_with("refs/tags/") => rev.to_string(),
            Some(rev) => {
                let branch = rev.strip_prefix("refs/heads/").unwrap_or(rev);
                format!("refs/remotes/{}/{}", self.remote_name, branch)
            }
            None => format!("refs/remotes/{}/HEAD", self.remote_name),
        }
    }

    /// Clone into the worktree without checking anything out
    pub fn clone_repo(&self, timeout: Option<Duration>) -> Result<()> {
        let url = self.remote_url.as_deref().ok_or_else(|| ReposyncError::Network {
            project: self.name.clone(),
            message: "no remote URL (unknown remote)".to_string(),
            retryable: false,
        })?;

        if let Some(parent) = self.worktree.parent() {
            fs::create_dir_all(parent)?;
        }

        let depth = self.clone_depth.map(|d| d.to_string());
        let dest = self.worktree.to_string_lossy().into_owned();

        let mut args = vec!["clone", "--no-checkout", "--origin", self.remote_name.as_str()];
        if let Some(ref depth) = depth {
            args.extend(["--depth", depth.as_str()]);
        }
        args.extend([url, dest.as_str()]);

        tracing::debug!(project = %self.name, url, "Cloning");
        self.git(None, timeout, &args)
            .map(drop)
            .map_err(|e| ReposyncError::network(&self.name, e))
    }

    /// Fetch from the project's remote
    ///
    /// `sync-c` projects fetch only their own revision; `clone-depth` keeps
    /// the fetch shallow.
    pub fn fetch(&self, timeout: Option<Duration>) -> Result<()> {
        let depth = self.clone_depth.map(|d| d.to_string());
        let refspec = if self.sync_c {
            self.revision.as_deref().map(|rev| self.refspec(rev))
        } else {
            None
        };

        let mut args = vec!["fetch", "--prune"];
        if let Some(ref depth) = depth {
            args.extend(["--depth", depth.as_str()]);
        }
        args.push(self.remote_name.as_str());
        if let Some(ref refspec) = refspec {
            args.push(refspec.as_str());
        }

        tracing::debug!(project = %self.name, remote = %self.remote_name, "Fetching");
        self.git(Some(&self.worktree), timeout, &args)
            .map(drop)
            .map_err(|e| ReposyncError::network(&self.name, e))
    }

    /// Whether the working tree has no local modifications
    ///
    /// A checkout that was cloned but never populated has no index yet and
    /// counts as clean.
    pub fn is_clean(&self) -> Result<bool> {
        if !self.gitdir.join("index").exists() {
            return Ok(true);
        }
        let out = self
            .runner
            .run_in_dir(&self.worktree, &["status", "--porcelain"])
            .map_err(|e| self.checkout_error(e))?;
        Ok(String::from_utf8_lossy(&out).trim().is_empty())
    }

    /// Detach HEAD at [`Project::checkout_target`]
    pub fn checkout(&self) -> Result<()> {
        let target = self.checkout_target();
        tracing::debug!(project = %self.name, target = %target, "Checking out");
        self.runner
            .run_in_dir(&self.worktree, &["checkout", "-q", "--detach", target.as_str()])
            .map(drop)
            .map_err(|e| self.checkout_error(e))
    }

    /// Discard local modifications
    pub fn reset_hard(&self) -> Result<()> {
        tracing::warn!(project = %self.name, "Resetting working tree");
        self.runner
            .run_in_dir(&self.worktree, &["reset", "-q", "--hard"])
            .map(drop)
            .map_err(|e| self.checkout_error(e))
    }

    /// Copy every file in `hooks_dir` into `.git/hooks`, returning how many were installed
    pub fn install_hooks(&self, hooks_dir: &Path) -> Result<usize> {
        if !hooks_dir.is_dir() {
            return Ok(0);
        }
        let dest_dir = self.gitdir.join("hooks");
        fs::create_dir_all(&dest_dir)?;

        let mut installed = 0;
        for entry in fs::read_dir(hooks_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let dest = dest_dir.join(entry.file_name());
            fs::copy(entry.path(), &dest)?;
            make_executable(&dest)?;
            installed += 1;
        }
        Ok(installed)
    }

    pub fn update_submodules(&self) -> Result<()> {
        self.runner
            .run_in_dir(
                &self.worktree,
                &["submodule", "update", "--init", "--recursive"],
            )
            .map(drop)
            .map_err(|e| self.checkout_error(e))
    }

    /// `git gc --auto`
    pub fn gc(&self) -> Result<()> {
        self.runner
            .run_in_dir(&self.worktree, &["gc", "--auto"])
            .map(drop)
            .map_err(ReposyncError::from)
    }

    fn refspec(&self, revision: &str) -> String {
        if is_commit_id(revision) || revision.starts_with("refs/tags/") {
            return revision.to_string();
        }
        let branch = revision.strip_prefix("refs/heads/").unwrap_or(revision);
        format!(
            "+refs/heads/{0}:refs/remotes/{1}/{0}",
            branch, self.remote_name
        )
    }

    fn checkout_error(&self, err: gitcmd::Error) -> ReposyncError {
        let message = err.to_string();
        if is_checkout_conflict(&message) {
            ReposyncError::CheckoutConflict {
                project: self.name.clone(),
                message,
            }
        } else {
            ReposyncError::Checkout {
                project: self.name.clone(),
                message,
            }
        }
    }

    /// Run git, routing through `run_with_timeout` when a timeout is set
    fn git(
        &self,
        dir: Option<&Path>,
        timeout: Option<Duration>,
        args: &[&str],
    ) -> gitcmd::Result<Vec<u8>> {
        match (timeout, dir) {
            (Some(timeout), Some(dir)) => {
                let dir = dir.to_string_lossy().into_owned();
                let mut full = vec!["-C", dir.as_str()];
                full.extend_from_slice(args);
                self.runner.run_with_timeout(timeout, &full)
            }
            (Some(timeout), None) => self.runner.run_with_timeout(timeout, args),
            (None, Some(dir)) => self.runner.run_in_dir(dir, args),
            (None, None) => self.runner.run(args),
        }
    }
}

/// A full 40-character hex object id
pub fn is_commit_id(revision: &str) -> bool {
    revision.len() == 40 && revision.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
