//! Manifest resolution
//!
//! Parses XML manifests compatible with Google's git-repo tool, resolves
//! `<include>` chains, merges manifests with `<remove-project>` semantics and
//! filters projects by group. Attributes outside the known schema are kept in
//! per-element custom maps so newer manifests survive a round trip.
//!
//! # Example Manifest
//!
//! ```xml
//! <manifest>
//!   <remote name="origin" fetch="https://android.googlesource.com" />
//!   <default revision="main" remote="origin" />
//!
//!   <project path="build/make" name="platform/build" groups="pdk">
//!     <copyfile src="core/root.mk" dest="Makefile" />
//!   </project>
//!   <project name="platform/art" x-owner="runtime-team" />
//!
//!   <include name="extras.xml" />
//!   <remove-project name="platform/legacy" />
//! </manifest>
//! ```

mod groups;
mod include;
mod merge;
mod model;
mod parser;
mod serialize;

pub use groups::{filter_projects, matches_groups, normalize_groups};
pub use merge::merge;
pub use model::{
    CopyFile, CustomAttrs, Include, LinkFile, Manifest, ManifestDefault, ManifestProject, Remote,
    RemoveProject,
};
