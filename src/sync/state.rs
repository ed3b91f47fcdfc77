//! Sync state: shared in-memory bookkeeping for one pass, and the files
//! persisted between passes under `.repo/manifests/`

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

/// Key under which the manifest repository's own fetch time is stored
pub const MANIFEST_REPO_KEY: &str = "repo";

/// Where one project stands in the current pass
///
/// `Missing -> Cloning -> Fetched -> CheckedOut -> Synced`, with `Failed`
/// reachable from any step. A checkout already on disk enters the pass as
/// `CheckedOut` and goes straight to `Fetched` when its fetch succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectState {
    Missing,
    Cloning,
    Fetched,
    CheckedOut,
    Synced,
    Failed,
}

impl ProjectState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectState::Missing => "missing",
            ProjectState::Cloning => "cloning",
            ProjectState::Fetched => "fetched",
            ProjectState::CheckedOut => "checked_out",
            ProjectState::Synced => "synced",
            ProjectState::Failed => "failed",
        }
    }
}

impl fmt::Display for ProjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared between pool tasks; locks are never held across an await
#[derive(Debug, Default)]
pub struct SyncState {
    errors: Mutex<Vec<String>>,
    fetch_times: Mutex<BTreeMap<String, DateTime<Utc>>>,
    /// Keyed by project path, since one name can be checked out twice
    projects: Mutex<BTreeMap<String, ProjectState>>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the previous pass's errors and project states
    pub fn reset(&self) {
        self.clear_errors();
        self.projects.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn set_state(&self, relpath: &str, state: ProjectState) {
        let mut projects = self.projects.lock().unwrap_or_else(|e| e.into_inner());
        projects.insert(relpath.to_string(), state);
    }

    pub fn state(&self, relpath: &str) -> Option<ProjectState> {
        self.projects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(relpath)
            .copied()
    }

    /// Every project touched this pass, by path
    pub fn project_states(&self) -> BTreeMap<String, ProjectState> {
        self.projects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn record_error(&self, message: String) {
        let mut errors = self.errors.lock().unwrap_or_else(|e| e.into_inner());
        errors.push(message);
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn clear_errors(&self) {
        self.errors.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn record_fetch(&self, name: &str, at: DateTime<Utc>) {
        let mut times = self.fetch_times.lock().unwrap_or_else(|e| e.into_inner());
        times.insert(name.to_string(), at);
    }

    pub fn last_fetch(&self, name: &str) -> Option<DateTime<Utc>> {
        self.fetch_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .copied()
    }
}

/// `project.list`: sorted relative project paths, one per line
pub fn read_project_list(path: &Path) -> Result<BTreeSet<String>> {
    if !path.exists() {
        return Ok(BTreeSet::new());
    }
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

pub fn write_project_list(path: &Path, paths: &BTreeSet<String>) -> Result<()> {
    ensure_parent(path)?;
    let mut content = paths.iter().cloned().collect::<Vec<_>>().join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    fs::write(path, content)?;
    Ok(())
}

/// `copy-link-files.json`: destinations generated by `<linkfile>` and `<copyfile>`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyLinkFiles {
    #[serde(default)]
    pub linkfile: Vec<String>,
    #[serde(default)]
    pub copyfile: Vec<String>,
}

impl CopyLinkFiles {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        ensure_parent(path)?;
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Entries of `self` that `current` no longer generates
    pub fn stale(&self, current: &CopyLinkFiles) -> CopyLinkFiles {
        let keep_links: BTreeSet<&String> = current.linkfile.iter().collect();
        let keep_copies: BTreeSet<&String> = current.copyfile.iter().collect();
        CopyLinkFiles {
            linkfile: self
                .linkfile
                .iter()
                .filter(|d| !keep_links.contains(d))
                .cloned()
                .collect(),
            copyfile: self
                .copyfile
                .iter()
                .filter(|d| !keep_copies.contains(d))
                .cloned()
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.linkfile.is_empty() && self.copyfile.is_empty()
    }
}

/// `.repo_fetchtimes.json`: `{"repo": <RFC3339>}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FetchTimes(BTreeMap<String, DateTime<Utc>>);

impl FetchTimes {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        ensure_parent(path)?;
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<DateTime<Utc>> {
        self.0.get(key).copied()
    }

    pub fn set(&mut self, key: &str, at: DateTime<Utc>) {
        self.0.insert(key.to_string(), at);
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_project_list_sorted_lines() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("manifests/project.list");
        assert!(read_project_list(&path).unwrap().is_empty());

        let paths: BTreeSet<String> = ["src/b", "a", "src/a"].iter().map(|s| s.to_string()).collect();
        write_project_list(&path, &paths).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "a\nsrc/a\nsrc/b\n");
        assert_eq!(read_project_list(&path).unwrap(), paths);
    }

    #[test]
    fn test_copy_link_files_format_and_stale() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("copy-link-files.json");

        let previous = CopyLinkFiles {
            linkfile: vec!["tools".into(), "old-link".into()],
            copyfile: vec!["Makefile".into()],
        };
        previous.save(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["linkfile"][1], "old-link");
        assert_eq!(raw["copyfile"][0], "Makefile");

        let current = CopyLinkFiles {
            linkfile: vec!["tools".into()],
            copyfile: vec![],
        };
        let stale = CopyLinkFiles::load(&path).unwrap().stale(&current);
        assert_eq!(stale.linkfile, vec!["old-link".to_string()]);
        assert_eq!(stale.copyfile, vec!["Makefile".to_string()]);
        assert!(current.stale(&current).is_empty());
    }

    #[test]
    fn test_fetch_times_rfc3339() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".repo_fetchtimes.json");
        let at = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);

        let mut times = FetchTimes::default();
        times.set(MANIFEST_REPO_KEY, at);
        times.save(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw["repo"].as_str().unwrap().starts_with("2026-01-02T03:04:05"));
        assert_eq!(FetchTimes::load(&path).unwrap().get("repo"), Some(at));
    }

    #[test]
    fn test_sync_state() {
        let state = SyncState::new();
        state.record_error("a: failed".into());
        assert_eq!(state.errors(), vec!["a: failed".to_string()]);
        state.clear_errors();
        assert!(state.errors().is_empty());

        let now = Utc::now();
        state.record_fetch("a", now);
        assert_eq!(state.last_fetch("a"), Some(now));
        assert_eq!(state.last_fetch("b"), None);
    }

    #[test]
    fn test_project_states_reset_between_passes() {
        let state = SyncState::new();
        state.set_state("art", ProjectState::Missing);
        state.set_state("art", ProjectState::Cloning);
        state.set_state("art-mirror", ProjectState::Failed);
        state.record_error("art-mirror: failed".into());

        assert_eq!(state.state("art"), Some(ProjectState::Cloning));
        assert_eq!(state.project_states().len(), 2);

        state.reset();
        assert!(state.project_states().is_empty());
        assert!(state.errors().is_empty());
    }

    #[test]
    fn test_project_state_names() {
        assert_eq!(ProjectState::CheckedOut.to_string(), "checked_out");
        assert_eq!(
            serde_json::to_string(&ProjectState::Synced).unwrap(),
            "\"synced\""
        );
    }
}
