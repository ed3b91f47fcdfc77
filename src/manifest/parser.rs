//! XML manifest parser for git-repo compatible manifests

use super::groups::filter_projects;
use super::model::{
    CopyFile, CustomAttrs, Include, LinkFile, Manifest, ManifestDefault, ManifestProject, Remote,
    RemoveProject,
};
use crate::{ReposyncError, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashSet;
use std::path::{Component, Path};

impl Manifest {
    /// Parse a manifest from XML bytes and keep only projects in `groups`
    ///
    /// Pure: `<include>` elements are recorded but not followed. Use
    /// [`Manifest::from_file`] to resolve them.
    pub fn parse(xml: impl AsRef<[u8]>, groups: &[String]) -> Result<Self> {
        let mut manifest = Self::parse_document(xml.as_ref())?;
        manifest.resolve();
        manifest.projects = filter_projects(manifest.projects, groups);
        Ok(manifest)
    }

    /// Parse one XML document without resolving defaults or filtering
    pub(crate) fn parse_document(xml: &[u8]) -> Result<Self> {
        let xml = std::str::from_utf8(xml)
            .map_err(|e| ReposyncError::Parse(format!("Manifest is not valid UTF-8: {}", e)))?;

        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut manifest = Manifest::default();
        let mut current_project: Option<ManifestProject> = None;
        let mut seen_root = false;
        let mut paths = HashSet::new();

        loop {
            let (element, has_children) = match reader.read_event() {
                // Self-closing tags like <remote ... /> or <project ... />
                Ok(Event::Empty(e)) => (e, false),
                // Opening tags like <project>
                Ok(Event::Start(e)) => (e, true),
                Ok(Event::End(ref e)) => {
                    if e.name().as_ref() == b"project" {
                        if let Some(project) = current_project.take() {
                            push_project(&mut manifest, &mut paths, project)?;
                        }
                    }
                    continue;
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(ReposyncError::Parse(format!(
                        "Error parsing manifest XML at position {}: {}",
                        reader.error_position(),
                        e
                    )));
                }
                _ => continue,
            };

            match element.name().as_ref() {
                b"manifest" => {
                    seen_root = true;
                    manifest.custom = Attrs::read(&element, "manifest")?.into_custom();
                }
                b"remote" => manifest.remotes.push(parse_remote(&element)?),
                b"default" => {
                    if manifest.default.is_some() {
                        return Err(ReposyncError::Parse(
                            "Duplicate <default> element".to_string(),
                        ));
                    }
                    manifest.default = Some(parse_default(&element)?);
                }
                b"project" => {
                    let project = parse_project(&element)?;
                    if has_children {
                        current_project = Some(project);
                    } else {
                        push_project(&mut manifest, &mut paths, project)?;
                    }
                }
                b"copyfile" => {
                    if let Some(ref mut project) = current_project {
                        project.copyfiles.push(parse_copyfile(&element)?);
                    }
                }
                b"linkfile" => {
                    if let Some(ref mut project) = current_project {
                        project.linkfiles.push(parse_linkfile(&element)?);
                    }
                }
                b"include" => manifest.includes.push(parse_include(&element)?),
                b"remove-project" => manifest.remove_projects.push(parse_remove_project(&element)?),
                // Unknown elements are ignored for forward compatibility
                _ => {}
            }
        }

        if !seen_root {
            return Err(ReposyncError::Parse(
                "Missing <manifest> root element".to_string(),
            ));
        }

        Ok(manifest)
    }
}

/// A name may appear more than once (each checkout then shares one object
/// directory), but no two projects may claim the same path.
fn push_project(
    manifest: &mut Manifest,
    paths: &mut HashSet<String>,
    project: ManifestProject,
) -> Result<()> {
    if !paths.insert(project.path.clone()) {
        return Err(ReposyncError::Parse(format!(
            "Duplicate project path: {} (project {})",
            project.path, project.name
        )));
    }
    manifest.projects.push(project);
    Ok(())
}

/// Attributes of one element, consumed as known names are read
///
/// Whatever is left once every known attribute has been taken becomes the
/// element's custom-attribute map.
struct Attrs {
    element: &'static str,
    values: Vec<(String, String)>,
}

impl Attrs {
    fn read(e: &BytesStart, element: &'static str) -> Result<Self> {
        let mut values = Vec::new();
        for attr in e.attributes() {
            let attr =
                attr.map_err(|e| ReposyncError::Parse(format!("Invalid attribute: {}", e)))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
            let value = attr
                .unescape_value()
                .map_err(|e| ReposyncError::Parse(format!("Invalid attribute value: {}", e)))?;
            values.push((key, value.to_string()));
        }
        Ok(Self { element, values })
    }

    fn take(&mut self, name: &str) -> Option<String> {
        let idx = self.values.iter().position(|(k, _)| k == name)?;
        Some(self.values.remove(idx).1)
    }

    fn require(&mut self, name: &str) -> Result<String> {
        match self.take(name) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(ReposyncError::Parse(format!(
                "<{}> is missing required attribute: {}",
                self.element, name
            ))),
        }
    }

    fn take_bool(&mut self, name: &str) -> Result<Option<bool>> {
        match self.take(name).as_deref() {
            None => Ok(None),
            Some("true") | Some("yes") | Some("1") => Ok(Some(true)),
            Some("false") | Some("no") | Some("0") => Ok(Some(false)),
            Some(other) => Err(ReposyncError::Parse(format!(
                "<{}> attribute {} must be a boolean, got '{}'",
                self.element, name, other
            ))),
        }
    }

    fn take_u32(&mut self, name: &str) -> Result<Option<u32>> {
        self.take(name)
            .map(|v| {
                v.parse().map_err(|_| {
                    ReposyncError::Parse(format!(
                        "<{}> attribute {} must be a number, got '{}'",
                        self.element, name, v
                    ))
                })
            })
            .transpose()
    }

    fn into_custom(self) -> CustomAttrs {
        self.values.into_iter().collect()
    }
}

/// Reject absolute paths and `..` components in workspace-relative paths
fn check_relative(element: &str, path: &str) -> Result<()> {
    let p = Path::new(path);
    let escapes = p
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if path.is_empty() || escapes {
        return Err(ReposyncError::Parse(format!(
            "<{}> has an invalid relative path: '{}'",
            element, path
        )));
    }
    Ok(())
}

fn parse_remote(e: &BytesStart) -> Result<Remote> {
    let mut attrs = Attrs::read(e, "remote")?;
    Ok(Remote {
        name: attrs.require("name")?,
        fetch: attrs.require("fetch")?,
        review: attrs.take("review"),
        revision: attrs.take("revision"),
        alias: attrs.take("alias"),
        custom: attrs.into_custom(),
    })
}

fn parse_default(e: &BytesStart) -> Result<ManifestDefault> {
    let mut attrs = Attrs::read(e, "default")?;
    Ok(ManifestDefault {
        remote: attrs.take("remote"),
        revision: attrs.take("revision"),
        sync: attrs.take("sync"),
        custom: attrs.into_custom(),
    })
}

fn parse_project(e: &BytesStart) -> Result<ManifestProject> {
    let mut attrs = Attrs::read(e, "project")?;
    let name = attrs.require("name")?;
    let path = attrs.take("path").unwrap_or_else(|| name.clone());
    check_relative("project", &path)?;

    Ok(ManifestProject {
        name,
        path,
        remote: attrs.take("remote"),
        revision: attrs.take("revision"),
        groups: attrs.take("groups").unwrap_or_default(),
        sync_c: attrs.take_bool("sync-c")?,
        sync_s: attrs.take_bool("sync-s")?,
        clone_depth: attrs.take_u32("clone-depth")?,
        copyfiles: Vec::new(),
        linkfiles: Vec::new(),
        remote_url: None,
        custom: attrs.into_custom(),
    })
}

fn parse_copyfile(e: &BytesStart) -> Result<CopyFile> {
    let mut attrs = Attrs::read(e, "copyfile")?;
    let copy = CopyFile {
        src: attrs.require("src")?,
        dest: attrs.require("dest")?,
    };
    check_relative("copyfile", &copy.src)?;
    check_relative("copyfile", &copy.dest)?;
    Ok(copy)
}

fn parse_linkfile(e: &BytesStart) -> Result<LinkFile> {
    let mut attrs = Attrs::read(e, "linkfile")?;
    let link = LinkFile {
        src: attrs.require("src")?,
        dest: attrs.require("dest")?,
    };
    check_relative("linkfile", &link.src)?;
    check_relative("linkfile", &link.dest)?;
    Ok(link)
}

fn parse_include(e: &BytesStart) -> Result<Include> {
    let mut attrs = Attrs::read(e, "include")?;
    Ok(Include {
        name: attrs.require("name")?,
        included_from: None,
        resolved_path: None,
        custom: attrs.into_custom(),
    })
}

fn parse_remove_project(e: &BytesStart) -> Result<RemoveProject> {
    let mut attrs = Attrs::read(e, "remove-project")?;
    Ok(RemoveProject {
        name: attrs.require("name")?,
        custom: attrs.into_custom(),
    })
}
