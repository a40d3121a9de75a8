//! Local manifest documents
//!
//! A manifest stream is one or more YAML (or JSON) documents. Empty and
//! comment-only documents are skipped, `*List` documents are expanded into
//! their items, and every remaining document must name its `apiVersion`,
//! `kind` and `metadata.name`.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::identity;
use crate::selector::LabelSelector;

/// A single local object together with where it was read from
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    /// Object body as loaded
    pub value: Value,
    /// Human readable source (file path, `<stdin>`, kustomize dir)
    pub origin: String,
    /// Zero-based document index within the source
    pub index: usize,
}

impl Manifest {
    fn new(value: Value, origin: &str, index: usize) -> Result<Self> {
        let manifest = Self {
            value,
            origin: origin.to_string(),
            index,
        };
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        if !self.value.is_object() {
            return Err(self.invalid("document is not a mapping"));
        }
        if self.api_version().is_empty() {
            return Err(self.invalid("missing apiVersion"));
        }
        if self.kind().is_empty() {
            return Err(self.invalid("missing kind"));
        }
        if self.name().is_empty() {
            return Err(self.invalid("missing metadata.name"));
        }
        Ok(())
    }

    fn invalid(&self, message: &str) -> CoreError {
        CoreError::InvalidObject {
            origin: self.origin.clone(),
            index: self.index,
            message: message.to_string(),
        }
    }

    fn str_at(&self, pointer: &str) -> &str {
        self.value
            .pointer(pointer)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn api_version(&self) -> &str {
        self.str_at("/apiVersion")
    }

    pub fn kind(&self) -> &str {
        self.str_at("/kind")
    }

    pub fn name(&self) -> &str {
        self.str_at("/metadata/name")
    }

    /// Namespace declared in the document, if any
    pub fn namespace(&self) -> Option<&str> {
        self.value
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .filter(|ns| !ns.is_empty())
    }

    /// String-valued labels; non-string values are ignored
    pub fn labels(&self) -> BTreeMap<String, String> {
        string_map(self.value.pointer("/metadata/labels"))
    }

    pub fn annotations(&self) -> BTreeMap<String, String> {
        string_map(self.value.pointer("/metadata/annotations"))
    }

    /// Stable identity declared through the real-name label
    pub fn real_name(&self) -> Option<String> {
        identity::real_name(&self.labels()).map(str::to_string)
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind(), self.name())
    }
}

fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Parse every document in `text`
///
/// `origin` only feeds error messages and [`Manifest::origin`].
pub fn parse_documents(text: &str, origin: &str) -> Result<Vec<Manifest>> {
    let mut manifests = Vec::new();

    for (index, document) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let value = Value::deserialize(document).map_err(|source| CoreError::YamlParse {
            origin: origin.to_string(),
            source,
        })?;

        // Empty and comment-only documents
        if value.is_null() {
            continue;
        }

        expand(value, origin, index, &mut manifests)?;
    }

    Ok(manifests)
}

fn expand(value: Value, origin: &str, index: usize, out: &mut Vec<Manifest>) -> Result<()> {
    let is_list = value
        .get("kind")
        .and_then(Value::as_str)
        .is_some_and(|kind| kind.ends_with("List"))
        && value.get("items").is_some();

    if !is_list {
        out.push(Manifest::new(value, origin, index)?);
        return Ok(());
    }

    let Some(items) = value.get("items").and_then(Value::as_array) else {
        return Err(CoreError::InvalidObject {
            origin: origin.to_string(),
            index,
            message: "list items is not a sequence".to_string(),
        });
    };

    for item in items {
        if item.is_null() {
            continue;
        }
        expand(item.clone(), origin, index, out)?;
    }
    Ok(())
}

/// Keep only manifests whose labels satisfy `selector`
pub fn filter_by_selector(manifests: Vec<Manifest>, selector: &LabelSelector) -> Vec<Manifest> {
    if selector.is_empty() {
        return manifests;
    }
    manifests
        .into_iter()
        .filter(|m| selector.matches(&m.labels()))
        .collect()
}
