//! realname-core - Local side of realname-diff
//!
//! This crate knows nothing about clusters. It provides:
//! - `identity`: the `realname-diff/realname` label and its extraction
//! - `manifest`: parsing of local manifest streams
//! - `selector`: equality-based label selectors for `-l`
//! - `source`: file, stdin and kustomize manifest sources

pub mod error;
pub mod identity;
pub mod manifest;
pub mod selector;
pub mod source;

pub use error::{CoreError, Result};
pub use identity::{LAST_APPLIED_ANNOTATION, REALNAME_LABEL, identity_selector, real_name};
pub use manifest::{Manifest, filter_by_selector, parse_documents};
pub use selector::{LabelSelector, Requirement};
pub use source::{FilenameOptions, ManifestSource};
