//! Manifest merging with `<remove-project>` semantics

use super::model::Manifest;
use crate::{ReposyncError, Result};

/// Merge manifests in order, the first acting as the destination
///
/// - remotes: an existing name wins
/// - projects: skipped if already marked removed, replaced in place if the
///   same name is already checked out at the same path, appended otherwise
/// - remove-projects: appended once, and each new one drops any project of
///   that name already merged
///
/// Later manifests can therefore retract projects added by earlier ones.
/// Defaults are not re-applied; call [`Manifest::resolve`] afterwards.
pub fn merge(manifests: Vec<Manifest>) -> Result<Manifest> {
    let mut iter = manifests.into_iter();
    let mut dest = iter
        .next()
        .ok_or_else(|| ReposyncError::Merge("No manifests to merge".to_string()))?;

    for manifest in iter {
        for remote in manifest.remotes {
            if dest.get_remote(&remote.name).is_none() {
                dest.remotes.push(remote);
            }
        }

        for project in manifest.projects {
            if dest.is_removed(&project.name) {
                tracing::debug!(project = %project.name, "Skipping removed project");
                continue;
            }
            match dest
                .projects
                .iter_mut()
                .find(|p| p.name == project.name && p.path == project.path)
            {
                Some(existing) => *existing = project,
                None => dest.projects.push(project),
            }
        }

        for remove in manifest.remove_projects {
            if dest.is_removed(&remove.name) {
                continue;
            }
            dest.projects.retain(|p| p.name != remove.name);
            dest.remove_projects.push(remove);
        }

        if dest.default.is_none() {
            dest.default = manifest.default;
        }
        dest.includes.extend(manifest.includes);
        for (key, value) in manifest.custom {
            dest.custom.entry(key).or_insert(value);
        }
    }

    Ok(dest)
}
