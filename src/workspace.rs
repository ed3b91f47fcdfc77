//! On-disk workspace layout
//!
//! ```text
//! <root>/
//!   .repo/
//!     manifest.xml              active manifest (file or symlink)
//!     manifests/                manifest repository checkout
//!       project.list            persisted project paths
//!       copy-link-files.json    persisted copyfile/linkfile destinations
//!       .repo_fetchtimes.json   manifest repository fetch time
//!     hooks/                    hook scripts installed into every project
//!     project-objects/<name>.git
//!     superproject/             superproject working copy
//!     reposync.yaml             optional workspace config
//!   <project paths...>
//! ```

use std::path::{Path, PathBuf};

/// Name of the workspace metadata directory
pub const REPO_DIR: &str = ".repo";

/// Paths of one workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Workspace rooted at `root` (which need not be initialized yet)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Walk up from `start` looking for a directory containing `.repo/`
    pub fn find(start: &Path) -> Option<Self> {
        start
            .ancestors()
            .find(|dir| dir.join(REPO_DIR).is_dir())
            .map(Self::new)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_initialized(&self) -> bool {
        self.repo_dir().is_dir()
    }

    pub fn repo_dir(&self) -> PathBuf {
        self.root.join(REPO_DIR)
    }

    pub fn manifests_dir(&self) -> PathBuf {
        self.repo_dir().join("manifests")
    }

    /// Manifest to load: a named file in the manifests repo, or `.repo/manifest.xml`
    pub fn manifest_path(&self, name: Option<&str>) -> PathBuf {
        match name {
            Some(name) => self.manifests_dir().join(name),
            None => self.repo_dir().join("manifest.xml"),
        }
    }

    pub fn hooks_dir(&self) -> PathBuf {
        self.repo_dir().join("hooks")
    }

    pub fn config_path(&self) -> PathBuf {
        self.repo_dir().join("reposync.yaml")
    }

    pub fn project_list_path(&self) -> PathBuf {
        self.manifests_dir().join("project.list")
    }

    pub fn copy_link_files_path(&self) -> PathBuf {
        self.manifests_dir().join("copy-link-files.json")
    }

    pub fn fetch_times_path(&self) -> PathBuf {
        self.manifests_dir().join(".repo_fetchtimes.json")
    }

    pub fn smart_sync_manifest_path(&self) -> PathBuf {
        self.repo_dir().join("smart_sync_override.xml")
    }

    pub fn superproject_dir(&self) -> PathBuf {
        self.repo_dir().join("superproject")
    }

    pub fn superproject_manifest_path(&self) -> PathBuf {
        self.superproject_dir().join("superproject_override.xml")
    }

    /// Shared object store for every checkout of project `name`
    pub fn objdir(&self, name: &str) -> PathBuf {
        self.repo_dir()
            .join("project-objects")
            .join(format!("{}.git", name.trim_matches('/')))
    }

    /// Absolute working tree for a manifest-relative project path
    pub fn worktree(&self, relpath: &str) -> PathBuf {
        self.root.join(relpath)
    }
}
