//! reposync - manifest-driven multi-repository synchronization
//!
//! A workspace is a directory containing `.repo/` plus one git checkout per
//! project named in an XML manifest. reposync resolves the manifest
//! (includes, local overrides, group filters), then brings every checkout to
//! the revision the manifest asks for.
//!
//! # Architecture
//!
//! - **manifest**: XML model, parser, include resolution, merge and group filtering
//! - **project**: Runtime projects bound to a git runner
//! - **sync**: The sync engine, its phases and remote-resolution strategies
//! - **retry**: Exponential backoff and git failure classification
//! - **config**: YAML configuration and validation
//! - **report**: User-visible output sinks
//! - **workspace**: Paths inside a workspace

pub mod config;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod project;
pub mod report;
pub mod retry;
pub mod sync;
pub mod workspace;

// Re-exports
pub use error::{ReposyncError, Result};
