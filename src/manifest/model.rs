//! In-memory manifest model

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Attributes not part of the known schema, keyed by attribute name
pub type CustomAttrs = BTreeMap<String, String>;

/// A parsed manifest
///
/// Treated as an immutable snapshot once resolved: reloading produces a new
/// `Manifest` rather than editing this one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Remote repositories
    pub remotes: Vec<Remote>,

    /// Default settings for projects
    pub default: Option<ManifestDefault>,

    /// Projects in this manifest
    pub projects: Vec<ManifestProject>,

    /// Sub-manifest references
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub includes: Vec<Include>,

    /// Projects to drop during merge
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_projects: Vec<RemoveProject>,

    /// Unknown attributes on the root `<manifest>` element
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: CustomAttrs,

    /// File this manifest was read from, if any
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// Remote repository definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    /// Remote name (e.g., "origin")
    pub name: String,

    /// Fetch URL base (e.g., "https://github.com/org")
    pub fetch: String,

    /// Review URL for code review (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<String>,

    /// Default revision for projects on this remote
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    /// Name to use for the git remote instead of `name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: CustomAttrs,
}

impl Remote {
    /// Name of the git remote configured in each checkout
    pub fn git_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Default settings for projects
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDefault {
    /// Default remote name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,

    /// Default revision/branch (e.g., "main")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    /// Default sync behavior
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: CustomAttrs,
}

/// A `<project>` entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestProject {
    /// Repository name (relative to remote fetch URL)
    pub name: String,

    /// Local path for the project (defaults to `name`)
    pub path: String,

    /// Remote name; filled from the default when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,

    /// Revision; filled from the default when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    /// Comma-separated group labels
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub groups: String,

    /// Fetch only the project's revision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_c: Option<bool>,

    /// Sync submodules after checkout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_s: Option<bool>,

    /// Shallow clone depth
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_depth: Option<u32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub copyfiles: Vec<CopyFile>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub linkfiles: Vec<LinkFile>,

    /// `<remote fetch>` + "/" + `name`, once the remote is known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: CustomAttrs,
}

impl ManifestProject {
    /// Trimmed, non-empty group tokens
    pub fn group_list(&self) -> Vec<&str> {
        self.groups
            .split(',')
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .collect()
    }

    /// Get a custom attribute by name
    pub fn custom_attr(&self, key: &str) -> Option<&str> {
        self.custom.get(key).map(String::as_str)
    }
}

/// `<copyfile src dest/>`: copy a file out of the project into the workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyFile {
    pub src: String,
    pub dest: String,
}

/// `<linkfile src dest/>`: symlink from the workspace into the project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkFile {
    pub src: String,
    pub dest: String,
}

/// `<include name/>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Include {
    pub name: String,

    /// The manifest file that declared this include
    #[serde(skip)]
    pub included_from: Option<PathBuf>,

    /// The file the include resolved to
    #[serde(skip)]
    pub resolved_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: CustomAttrs,
}

/// `<remove-project name/>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveProject {
    pub name: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: CustomAttrs,
}

impl Manifest {
    /// Get a remote by name
    pub fn get_remote(&self, name: &str) -> Option<&Remote> {
        self.remotes.iter().find(|r| r.name == name)
    }

    /// Get the default remote
    pub fn default_remote(&self) -> Option<&Remote> {
        let remote_name = self.default.as_ref()?.remote.as_deref()?;
        self.get_remote(remote_name)
    }

    /// Get the effective remote for a project
    pub fn project_remote(&self, project: &ManifestProject) -> Option<&Remote> {
        match project.remote {
            Some(ref remote_name) => self.get_remote(remote_name),
            None => self.default_remote(),
        }
    }

    /// First project with this name (a name can be checked out at several paths)
    pub fn project(&self, name: &str) -> Option<&ManifestProject> {
        self.projects.iter().find(|p| p.name == name)
    }

    /// Whether `name` has been marked for removal
    pub fn is_removed(&self, name: &str) -> bool {
        self.remove_projects.iter().any(|r| r.name == name)
    }

    /// Custom attribute lookup: `<default>` first, then the root `<manifest>`
    pub fn custom_attr(&self, key: &str) -> Option<&str> {
        self.default
            .as_ref()
            .and_then(|d| d.custom.get(key))
            .or_else(|| self.custom.get(key))
            .map(String::as_str)
    }

    /// Names of projects whose remote does not exist in `remotes`
    pub fn unresolved_remotes(&self) -> Vec<&str> {
        self.projects
            .iter()
            .filter(|p| self.project_remote(p).is_none())
            .map(|p| p.name.as_str())
            .collect()
    }

    /// Fill in omitted project fields from `<default>` and compute remote URLs
    ///
    /// Unresolvable remotes are tolerated: the project keeps `remote_url = None`.
    pub fn resolve(&mut self) {
        let default_remote = self.default.as_ref().and_then(|d| d.remote.clone());
        let default_revision = self.default.as_ref().and_then(|d| d.revision.clone());

        for project in &mut self.projects {
            if project.path.is_empty() {
                project.path = project.name.clone();
            }
            if project.remote.is_none() {
                project.remote = default_remote.clone();
            }
            if project.revision.is_none() {
                project.revision = default_revision.clone();
            }

            let remote = project
                .remote
                .as_deref()
                .and_then(|name| self.remotes.iter().find(|r| r.name == name));
            project.remote_url = match remote {
                Some(remote) => Some(join_url(&remote.fetch, &project.name)),
                None => {
                    tracing::warn!(
                        project = %project.name,
                        remote = project.remote.as_deref().unwrap_or("<none>"),
                        "Project references an unknown remote"
                    );
                    None
                }
            };
        }
    }
}

/// Join a fetch base and a project name with exactly one slash
pub(crate) fn join_url(base: &str, name: &str) -> String {
    if name.starts_with("http://") || name.starts_with("https://") || name.starts_with("git@") {
        return name.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        name.trim_start_matches('/')
    )
}
