//! Group filtering
//!
//! An empty request, or one containing `all`, keeps every project. Otherwise a
//! project is kept if it declares no groups at all, or if any of its groups
//! exactly matches a requested one.

use super::model::ManifestProject;

/// Split requested group arguments on commas and drop blanks
pub fn normalize_groups(requested: &[String]) -> Vec<String> {
    requested
        .iter()
        .flat_map(|g| g.split(','))
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether a project carrying `project_groups` passes the `requested` filter
pub fn matches_groups(project_groups: &str, requested: &[String]) -> bool {
    let requested = normalize_groups(requested);
    if requested.is_empty() || requested.iter().any(|g| g == "all") {
        return true;
    }

    let mut declared = project_groups
        .split(',')
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .peekable();

    if declared.peek().is_none() {
        return true;
    }
    declared.any(|g| requested.iter().any(|r| r == g))
}

/// Keep the projects that pass the group filter, preserving order
pub fn filter_projects(projects: Vec<ManifestProject>, requested: &[String]) -> Vec<ManifestProject> {
    projects
        .into_iter()
        .filter(|p| matches_groups(&p.groups, requested))
        .collect()
}
