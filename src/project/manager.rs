//! Project list derived from one manifest snapshot

use super::Project;
use crate::manifest::{matches_groups, Manifest};
use crate::workspace::Workspace;
use crate::{ReposyncError, Result};
use gitcmd::GitRunner;
use std::sync::Arc;

/// Concrete projects for one manifest snapshot
///
/// A reloaded manifest gets a new `ProjectManager`; projects are never
/// carried over from an older snapshot.
pub struct ProjectManager {
    projects: Vec<Project>,
}

impl ProjectManager {
    pub fn new(manifest: Arc<Manifest>, workspace: Workspace, runner: Arc<dyn GitRunner>) -> Self {
        let projects = manifest
            .projects
            .iter()
            .map(|entry| Project::from_manifest(entry, &manifest, &workspace, runner.clone()))
            .collect();

        Self { projects }
    }

    /// All projects in manifest order
    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    /// Projects passing the group filter
    pub fn get_projects(&self, groups: &[String]) -> Vec<Project> {
        self.projects
            .iter()
            .filter(|p| matches_groups(&p.groups, groups))
            .cloned()
            .collect()
    }

    /// Projects named on the command line, by manifest name or path
    ///
    /// A name selects every checkout of that repository. Every argument must
    /// match something; an unknown one is an error.
    pub fn get_projects_by_names(&self, names: &[String]) -> Result<Vec<Project>> {
        let mut selected: Vec<Project> = Vec::with_capacity(names.len());
        for name in names {
            let wanted = name.trim_end_matches('/');
            let mut matched = false;
            for project in self
                .projects
                .iter()
                .filter(|p| p.name == wanted || p.relpath == wanted)
            {
                matched = true;
                if !selected.iter().any(|p| p.relpath == project.relpath) {
                    selected.push(project.clone());
                }
            }
            if !matched {
                return Err(ReposyncError::ProjectNotFound(name.clone()));
            }
        }
        Ok(selected)
    }
}
