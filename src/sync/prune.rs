//! Removing checkouts of projects that left the manifest

use crate::workspace::Workspace;
use crate::{ReposyncError, Result};
use git2::{Repository, StatusOptions};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Whether `path` may be deleted on behalf of the workspace at `root`
///
/// Rejects `.`, `..`, filesystem roots, the root itself and anything that
/// resolves outside it. Relative paths are taken relative to `root`.
pub fn is_safe_to_delete(root: &Path, path: &Path) -> bool {
    if path.as_os_str().is_empty() || path == Path::new(".") || path == Path::new("..") {
        return false;
    }

    let Some(root) = normalize(root) else {
        return false;
    };
    if root.parent().is_none() {
        return false;
    }

    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    let Some(target) = normalize(&joined) else {
        return false;
    };

    if target.parent().is_none() || target == root || !target.starts_with(&root) {
        return false;
    }

    // Symlinked parents must not lead outside the workspace either
    if let (Some(parent), Ok(real_root)) = (target.parent(), root.canonicalize()) {
        if let Ok(real_parent) = parent.canonicalize() {
            return real_parent.starts_with(&real_root);
        }
    }
    true
}

/// Lexically resolve `.` and `..`; `None` if `..` climbs above the start
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() || out.as_os_str().is_empty() {
                    return None;
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}

/// What a prune pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneReport {
    /// Relative paths whose checkouts were deleted (or were already gone)
    pub removed: Vec<String>,

    /// Relative paths left alone, with the reason
    pub skipped: Vec<(String, String)>,
}

impl PruneReport {
    /// Paths that must stay in `project.list` so a later pass retries them
    pub fn kept(&self) -> impl Iterator<Item = &String> {
        self.skipped.iter().map(|(path, _)| path)
    }
}

/// Delete checkouts listed in `previous` but not in `current`
///
/// Children are removed before their parents. A path is left alone when it
/// still contains an active project, is unsafe, is not a git checkout, or is
/// dirty without `force_remove_dirty`.
pub fn prune_projects(
    workspace: &Workspace,
    previous: &BTreeSet<String>,
    current: &BTreeSet<String>,
    force_remove_dirty: bool,
) -> Result<PruneReport> {
    let mut stale: Vec<&String> = previous.difference(current).collect();
    stale.sort_by(|a, b| b.cmp(a));

    let mut report = PruneReport::default();
    for relpath in stale {
        match prune_one(workspace, relpath, current, force_remove_dirty) {
            Ok(()) => {
                tracing::info!(path = %relpath, "Pruned project checkout");
                report.removed.push(relpath.clone());
            }
            Err(reason) => {
                tracing::warn!(path = %relpath, reason = %reason, "Not pruning project checkout");
                report.skipped.push((relpath.clone(), reason));
            }
        }
    }
    Ok(report)
}

fn prune_one(
    workspace: &Workspace,
    relpath: &str,
    current: &BTreeSet<String>,
    force_remove_dirty: bool,
) -> std::result::Result<(), String> {
    let nested_prefix = format!("{}/", relpath.trim_end_matches('/'));
    if current.iter().any(|p| p.starts_with(&nested_prefix)) {
        return Err("contains an active project".to_string());
    }

    let root = workspace.root();
    let worktree = workspace.worktree(relpath);
    if !is_safe_to_delete(root, Path::new(relpath)) {
        return Err(ReposyncError::UnsafePath(worktree).to_string());
    }
    if !worktree.exists() {
        return Ok(());
    }

    let repo = Repository::open(&worktree).map_err(|_| "not a git checkout".to_string())?;
    if !force_remove_dirty && is_dirty(&repo).map_err(|e| e.to_string())? {
        return Err("has uncommitted changes".to_string());
    }
    drop(repo);

    fs::remove_dir_all(&worktree).map_err(|e| e.to_string())?;
    remove_empty_parents(root, &worktree);
    Ok(())
}

fn is_dirty(repo: &Repository) -> std::result::Result<bool, git2::Error> {
    let mut opts = StatusOptions::new();
    opts.include_untracked(true).include_ignored(false);
    Ok(!repo.statuses(Some(&mut opts))?.is_empty())
}

/// Remove now-empty directories between `path` and `root`
pub(crate) fn remove_empty_parents(root: &Path, path: &Path) {
    let mut dir = path.parent();
    while let Some(current) = dir {
        if current == root || !current.starts_with(root) {
            break;
        }
        if fs::remove_dir(current).is_err() {
            break;
        }
        dir = current.parent();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn set(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_is_safe_to_delete() {
        let root = Path::new("/work/tree");
        assert!(!is_safe_to_delete(root, Path::new(".")));
        assert!(!is_safe_to_delete(root, Path::new("..")));
        assert!(!is_safe_to_delete(root, Path::new("/")));
        assert!(!is_safe_to_delete(root, Path::new("/work/tree")));
        assert!(!is_safe_to_delete(root, Path::new("/work/other")));
        assert!(!is_safe_to_delete(root, Path::new("a/../../escape")));
        assert!(!is_safe_to_delete(Path::new("/"), Path::new("/etc")));

        assert!(is_safe_to_delete(root, Path::new("a")));
        assert!(is_safe_to_delete(root, Path::new("a/b/c")));
        assert!(is_safe_to_delete(root, Path::new("/work/tree/a")));
        assert!(is_safe_to_delete(root, Path::new("a/./b/../c")));
    }

    #[test]
    fn test_prune_removes_children_first_and_cleans_parents() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::new(temp.path());
        for path in ["vendor/x", "vendor/x/y", "keep"] {
            Repository::init(ws.worktree(path)).unwrap();
        }

        let report = prune_projects(
            &ws,
            &set(&["vendor/x", "vendor/x/y", "keep"]),
            &set(&["keep"]),
            false,
        )
        .unwrap();

        assert_eq!(report.removed, vec!["vendor/x/y", "vendor/x"]);
        assert!(report.skipped.is_empty());
        assert!(!temp.path().join("vendor").exists());
        assert!(ws.worktree("keep").exists());
    }

    #[test]
    fn test_prune_refuses_dirty_and_unmanaged() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::new(temp.path());
        Repository::init(ws.worktree("dirty")).unwrap();
        fs::write(ws.worktree("dirty").join("notes.txt"), "wip").unwrap();
        fs::create_dir_all(ws.worktree("plain")).unwrap();

        let previous = set(&["dirty", "plain", "gone"]);
        let report = prune_projects(&ws, &previous, &BTreeSet::new(), false).unwrap();

        assert_eq!(report.removed, vec!["gone"]);
        let kept: Vec<&String> = report.kept().collect();
        assert_eq!(kept, vec!["plain", "dirty"]);
        assert!(ws.worktree("dirty").exists());
        assert!(ws.worktree("plain").exists());

        let report = prune_projects(&ws, &set(&["dirty"]), &BTreeSet::new(), true).unwrap();
        assert_eq!(report.removed, vec!["dirty"]);
        assert!(!ws.worktree("dirty").exists());
    }

    #[test]
    fn test_prune_keeps_parent_of_active_project() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::new(temp.path());
        Repository::init(ws.worktree("outer")).unwrap();

        let report =
            prune_projects(&ws, &set(&["outer"]), &set(&["outer/inner"]), false).unwrap();
        assert!(report.removed.is_empty());
        assert_eq!(report.skipped[0].1, "contains an active project");
    }
}
