//! Manifest serialization (XML and JSON)

use super::model::{CustomAttrs, Manifest};
use crate::{ReposyncError, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::Writer;

impl Manifest {
    /// Render as manifest XML
    ///
    /// Includes that were already resolved are not emitted since their
    /// content is inlined. Output is semantically, not byte-for-byte, stable.
    pub fn to_xml(&self) -> Result<String> {
        let mut xml = Writer::new_with_indent(Vec::new(), b' ', 2);

        write(&mut xml, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let mut root = BytesStart::new("manifest");
        push_custom(&mut root, &self.custom);
        write(&mut xml, Event::Start(root))?;

        for remote in &self.remotes {
            let mut el = BytesStart::new("remote");
            el.push_attribute(("name", remote.name.as_str()));
            el.push_attribute(("fetch", remote.fetch.as_str()));
            push_opt(&mut el, "review", &remote.review);
            push_opt(&mut el, "revision", &remote.revision);
            push_opt(&mut el, "alias", &remote.alias);
            push_custom(&mut el, &remote.custom);
            write(&mut xml, Event::Empty(el))?;
        }

        if let Some(ref default) = self.default {
            let mut el = BytesStart::new("default");
            push_opt(&mut el, "remote", &default.remote);
            push_opt(&mut el, "revision", &default.revision);
            push_opt(&mut el, "sync", &default.sync);
            push_custom(&mut el, &default.custom);
            write(&mut xml, Event::Empty(el))?;
        }

        for project in &self.projects {
            let mut el = BytesStart::new("project");
            el.push_attribute(("name", project.name.as_str()));
            if project.path != project.name {
                el.push_attribute(("path", project.path.as_str()));
            }
            push_opt(&mut el, "remote", &project.remote);
            push_opt(&mut el, "revision", &project.revision);
            if !project.groups.is_empty() {
                el.push_attribute(("groups", project.groups.as_str()));
            }
            push_bool(&mut el, "sync-c", project.sync_c);
            push_bool(&mut el, "sync-s", project.sync_s);
            if let Some(depth) = project.clone_depth {
                el.push_attribute(("clone-depth", depth.to_string().as_str()));
            }
            push_custom(&mut el, &project.custom);

            if project.copyfiles.is_empty() && project.linkfiles.is_empty() {
                write(&mut xml, Event::Empty(el))?;
                continue;
            }

            write(&mut xml, Event::Start(el))?;
            for copy in &project.copyfiles {
                let mut child = BytesStart::new("copyfile");
                child.push_attribute(("src", copy.src.as_str()));
                child.push_attribute(("dest", copy.dest.as_str()));
                write(&mut xml, Event::Empty(child))?;
            }
            for link in &project.linkfiles {
                let mut child = BytesStart::new("linkfile");
                child.push_attribute(("src", link.src.as_str()));
                child.push_attribute(("dest", link.dest.as_str()));
                write(&mut xml, Event::Empty(child))?;
            }
            write(&mut xml, Event::End(BytesEnd::new("project")))?;
        }

        for include in self.includes.iter().filter(|i| i.resolved_path.is_none()) {
            let mut el = BytesStart::new("include");
            el.push_attribute(("name", include.name.as_str()));
            push_custom(&mut el, &include.custom);
            write(&mut xml, Event::Empty(el))?;
        }

        for remove in &self.remove_projects {
            let mut el = BytesStart::new("remove-project");
            el.push_attribute(("name", remove.name.as_str()));
            push_custom(&mut el, &remove.custom);
            write(&mut xml, Event::Empty(el))?;
        }

        write(&mut xml, Event::End(BytesEnd::new("manifest")))?;

        let mut out = String::from_utf8(xml.into_inner())
            .map_err(|e| ReposyncError::Other(format!("Manifest XML is not UTF-8: {}", e)))?;
        out.push('\n');
        Ok(out)
    }

    /// Render as pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn write(xml: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    xml.write_event(event)
        .map_err(|e| ReposyncError::Other(format!("Failed to write manifest XML: {}", e)))
}

fn push_opt(el: &mut BytesStart, key: &str, value: &Option<String>) {
    if let Some(value) = value {
        el.push_attribute((key, value.as_str()));
    }
}

fn push_bool(el: &mut BytesStart, key: &str, value: Option<bool>) {
    if let Some(value) = value {
        el.push_attribute((key, if value { "true" } else { "false" }));
    }
}

fn push_custom(el: &mut BytesStart, custom: &CustomAttrs) {
    for (key, value) in custom {
        el.push_attribute((key.as_str(), value.as_str()));
    }
}
