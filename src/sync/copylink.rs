//! `<copyfile>` and `<linkfile>` handling

use super::prune::{is_safe_to_delete, remove_empty_parents};
use super::state::CopyLinkFiles;
use crate::project::Project;
use crate::workspace::Workspace;
use crate::{ReposyncError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Destinations the given projects generate, relative to the workspace root
pub fn generated_files(projects: &[Project]) -> CopyLinkFiles {
    let mut files = CopyLinkFiles::default();
    for project in projects {
        files
            .linkfile
            .extend(project.linkfiles.iter().map(|l| l.dest.clone()));
        files
            .copyfile
            .extend(project.copyfiles.iter().map(|c| c.dest.clone()));
    }
    files.linkfile.sort();
    files.linkfile.dedup();
    files.copyfile.sort();
    files.copyfile.dedup();
    files
}

/// Delete generated files that are no longer declared, returning how many went away
pub fn remove_stale(workspace: &Workspace, stale: &CopyLinkFiles) -> Result<usize> {
    let root = workspace.root();
    let mut removed = 0;

    for dest in stale.linkfile.iter().chain(stale.copyfile.iter()) {
        let path = root.join(dest);
        if !is_safe_to_delete(root, Path::new(dest)) {
            return Err(ReposyncError::UnsafePath(path));
        }
        let Ok(meta) = fs::symlink_metadata(&path) else {
            continue;
        };

        if meta.is_dir() {
            // Glob linkfile destination: drop our links, then the directory if empty
            for entry in fs::read_dir(&path)? {
                let entry = entry?;
                if entry.file_type()?.is_symlink() {
                    fs::remove_file(entry.path())?;
                }
            }
            if fs::remove_dir(&path).is_err() {
                continue;
            }
        } else {
            fs::remove_file(&path)?;
        }

        tracing::debug!(dest = %dest, "Removed stale generated file");
        remove_empty_parents(root, &path);
        removed += 1;
    }
    Ok(removed)
}

/// Apply a project's copyfile and linkfile entries after checkout
pub fn apply(project: &Project, root: &Path) -> Result<()> {
    for copy in &project.copyfiles {
        let src = checked_src(project, &copy.src)?;
        let dest = checked_dest(root, &copy.dest)?;
        if !src.is_file() {
            return Err(ReposyncError::Checkout {
                project: project.name.clone(),
                message: format!("copyfile source {} is not a file", copy.src),
            });
        }
        if dest.is_file() && fs::read(&src)? == fs::read(&dest)? {
            continue;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&src, &dest)?;
    }

    for link in &project.linkfiles {
        let dest = checked_dest(root, &link.dest)?;
        if is_glob(&link.src) {
            let pattern = project.worktree.join(&link.src);
            let matches = glob::glob(&pattern.to_string_lossy())
                .map_err(|e| ReposyncError::Checkout {
                    project: project.name.clone(),
                    message: format!("invalid linkfile pattern {}: {}", link.src, e),
                })?;
            fs::create_dir_all(&dest)?;
            for target in matches.flatten() {
                let Some(file_name) = target.file_name() else {
                    continue;
                };
                symlink(&target, &dest.join(file_name))?;
            }
        } else {
            let src = checked_src(project, &link.src)?;
            symlink(&src, &dest)?;
        }
    }
    Ok(())
}

fn is_glob(src: &str) -> bool {
    src.contains(['*', '?', '['])
}

fn checked_src(project: &Project, src: &str) -> Result<PathBuf> {
    if !is_safe_to_delete(&project.worktree, Path::new(src)) {
        return Err(ReposyncError::UnsafePath(project.worktree.join(src)));
    }
    Ok(project.worktree.join(src))
}

fn checked_dest(root: &Path, dest: &str) -> Result<PathBuf> {
    if !is_safe_to_delete(root, Path::new(dest)) {
        return Err(ReposyncError::UnsafePath(root.join(dest)));
    }
    Ok(root.join(dest))
}

/// Point `link` at `target`, replacing an existing symlink but nothing else
fn symlink(target: &Path, link: &Path) -> Result<()> {
    if let Ok(meta) = fs::symlink_metadata(link) {
        if !meta.file_type().is_symlink() {
            return Err(ReposyncError::Other(format!(
                "{} exists and is not a symlink",
                link.display()
            )));
        }
        if fs::read_link(link).ok().as_deref() == Some(target) {
            return Ok(());
        }
        fs::remove_file(link)?;
    }
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)?;
    }
    create_symlink(target, link)?;
    Ok(())
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    if target.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;
    use gitcmd::fake::FakeGit;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn project(root: &Path) -> Project {
        let manifest = Manifest::parse(
            r#"<manifest>
                <remote name="origin" fetch="https://example.com"/>
                <default remote="origin" revision="main"/>
                <project name="build" path="build/make">
                    <copyfile src="core/root.mk" dest="Makefile"/>
                    <linkfile src="tools" dest="tools"/>
                    <linkfile src="envs/*.sh" dest="env"/>
                </project>
            </manifest>"#,
            &[],
        )
        .unwrap();
        Project::from_manifest(
            &manifest.projects[0],
            &manifest,
            &Workspace::new(root),
            Arc::new(FakeGit::new()),
        )
    }

    #[test]
    fn test_generated_files() {
        let p = project(Path::new("/work"));
        let files = generated_files(&[p.clone(), p]);
        assert_eq!(files.copyfile, vec!["Makefile"]);
        assert_eq!(files.linkfile, vec!["env", "tools"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_apply_copies_and_links() {
        let temp = TempDir::new().unwrap();
        let p = project(temp.path());
        fs::create_dir_all(p.worktree.join("core")).unwrap();
        fs::create_dir_all(p.worktree.join("tools")).unwrap();
        fs::create_dir_all(p.worktree.join("envs")).unwrap();
        fs::write(p.worktree.join("core/root.mk"), "include build/make/core/main.mk\n").unwrap();
        fs::write(p.worktree.join("envs/setup.sh"), "").unwrap();
        fs::write(p.worktree.join("envs/lunch.sh"), "").unwrap();

        apply(&p, temp.path()).unwrap();
        // Idempotent
        apply(&p, temp.path()).unwrap();

        assert_eq!(
            fs::read_to_string(temp.path().join("Makefile")).unwrap(),
            "include build/make/core/main.mk\n"
        );
        assert_eq!(
            fs::read_link(temp.path().join("tools")).unwrap(),
            p.worktree.join("tools")
        );
        assert!(fs::symlink_metadata(temp.path().join("env/setup.sh"))
            .unwrap()
            .file_type()
            .is_symlink());
        assert!(temp.path().join("env/lunch.sh").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_remove_stale() {
        let temp = TempDir::new().unwrap();
        let p = project(temp.path());
        fs::create_dir_all(p.worktree.join("tools")).unwrap();
        fs::create_dir_all(p.worktree.join("envs")).unwrap();
        fs::create_dir_all(p.worktree.join("core")).unwrap();
        fs::write(p.worktree.join("core/root.mk"), "x").unwrap();
        fs::write(p.worktree.join("envs/a.sh"), "").unwrap();
        apply(&p, temp.path()).unwrap();

        let ws = Workspace::new(temp.path());
        let stale = CopyLinkFiles {
            linkfile: vec!["tools".into(), "env".into(), "never-created".into()],
            copyfile: vec!["Makefile".into()],
        };
        assert_eq!(remove_stale(&ws, &stale).unwrap(), 3);
        assert!(fs::symlink_metadata(temp.path().join("tools")).is_err());
        assert!(!temp.path().join("env").exists());
        assert!(!temp.path().join("Makefile").exists());
        assert!(p.worktree.join("tools").is_dir());
    }

    #[test]
    fn test_unsafe_destinations_rejected() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::new(temp.path());
        let stale = CopyLinkFiles {
            linkfile: vec!["../outside".into()],
            copyfile: vec![],
        };
        assert!(matches!(
            remove_stale(&ws, &stale),
            Err(ReposyncError::UnsafePath(_))
        ));
    }
}
