//! Loading manifests from disk and following `<include>` chains

use super::groups::filter_projects;
use super::merge::merge;
use super::model::Manifest;
use crate::workspace::Workspace;
use crate::{ReposyncError, Result};
use std::path::{Path, PathBuf};

impl Manifest {
    /// Load a manifest file, resolve its includes, and filter by `groups`
    ///
    /// A missing file is reported as [`ReposyncError::NotInitialized`] when
    /// there is no workspace around it, and as
    /// [`ReposyncError::ManifestNotFound`] when there is.
    pub fn from_file(path: &Path, groups: &[String]) -> Result<Self> {
        if !path.is_file() {
            let workspace = path.parent().and_then(Workspace::find);
            return Err(match workspace {
                Some(_) => ReposyncError::ManifestNotFound(path.to_path_buf()),
                None => ReposyncError::NotInitialized(path.to_path_buf()),
            });
        }

        let mut loader = IncludeLoader::new(path);
        let mut manifest = loader.load(path)?;
        manifest.resolve();
        manifest.projects = filter_projects(manifest.projects, groups);
        Ok(manifest)
    }
}

/// Recursive include resolution with cycle detection
struct IncludeLoader {
    search_dirs: Vec<PathBuf>,
    stack: Vec<PathBuf>,
}

impl IncludeLoader {
    fn new(top: &Path) -> Self {
        let mut search_dirs = Vec::new();
        let cwd = std::env::current_dir().ok();

        let workspace = top
            .parent()
            .and_then(Workspace::find)
            .or_else(|| cwd.as_deref().and_then(Workspace::find));
        if let Some(ref ws) = workspace {
            search_dirs.push(ws.manifests_dir());
        }
        if let Some(cwd) = cwd {
            search_dirs.push(cwd);
        }
        if let Some(ws) = workspace {
            search_dirs.push(ws.root().to_path_buf());
        }

        Self {
            search_dirs,
            stack: Vec::new(),
        }
    }

    /// Candidate locations: next to the including file first, then the search dirs
    fn find(&self, name: &str, including: &Path) -> Option<PathBuf> {
        let local = including.parent().map(|dir| dir.join(name));
        local
            .into_iter()
            .chain(self.search_dirs.iter().map(|dir| dir.join(name)))
            .find(|candidate| candidate.is_file())
    }

    fn load(&mut self, path: &Path) -> Result<Manifest> {
        let content = std::fs::read(path)?;
        let mut manifest = Manifest::parse_document(&content)?;
        manifest.source = Some(path.to_path_buf());

        let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.stack.push(key);

        let mut parts = Vec::with_capacity(manifest.includes.len() + 1);
        for include in &mut manifest.includes {
            include.included_from = Some(path.to_path_buf());

            let resolved =
                self.find(&include.name, path)
                    .ok_or_else(|| ReposyncError::IncludeResolution {
                        name: include.name.clone(),
                        reason: format!("not found (included from {})", path.display()),
                    })?;

            let resolved_key = resolved.canonicalize().unwrap_or_else(|_| resolved.clone());
            if self.stack.contains(&resolved_key) {
                return Err(ReposyncError::IncludeResolution {
                    name: include.name.clone(),
                    reason: "include cycle".to_string(),
                });
            }

            tracing::debug!(
                include = %include.name,
                path = %resolved.display(),
                "Resolving manifest include"
            );
            let child = self.load(&resolved).map_err(|e| match e {
                e @ ReposyncError::IncludeResolution { .. } => e,
                other => ReposyncError::IncludeResolution {
                    name: include.name.clone(),
                    reason: other.to_string(),
                },
            })?;
            include.resolved_path = Some(resolved);
            parts.push(child);
        }

        self.stack.pop();

        let mut all = Vec::with_capacity(parts.len() + 1);
        all.push(manifest);
        all.extend(parts);
        merge(all)
    }
}
