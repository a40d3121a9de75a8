//! Equality-based label selectors
//!
//! Supports the subset of the Kubernetes selector grammar accepted by
//! `kubectl -l`: `key=value`, `key==value`, `key!=value`, `key` and `!key`,
//! joined by commas. Every requirement must hold for a match.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// A single selector requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Equals { key: String, value: String },
    NotEquals { key: String, value: String },
    Exists { key: String },
    DoesNotExist { key: String },
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals { key, value } => labels.get(key) == Some(value),
            // A missing key satisfies `!=`, as in Kubernetes
            Requirement::NotEquals { key, value } => labels.get(key) != Some(value),
            Requirement::Exists { key } => labels.contains_key(key),
            Requirement::DoesNotExist { key } => !labels.contains_key(key),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Equals { key, value } => write!(f, "{}={}", key, value),
            Requirement::NotEquals { key, value } => write!(f, "{}!={}", key, value),
            Requirement::Exists { key } => write!(f, "{}", key),
            Requirement::DoesNotExist { key } => write!(f, "!{}", key),
        }
    }
}

/// Parsed label selector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Selector that matches everything
    pub fn everything() -> Self {
        Self::default()
    }

    /// Parse a selector expression
    pub fn parse(expr: &str) -> Result<Self> {
        let mut requirements = Vec::new();

        for term in expr.split(',') {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            requirements.push(parse_requirement(expr, term)?);
        }

        Ok(Self { requirements })
    }

    /// Check whether the selector has no requirements
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Requirements in declaration order
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Test a label set against every requirement
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl FromStr for LabelSelector {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.requirements.iter().map(|r| r.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

fn parse_requirement(expr: &str, term: &str) -> Result<Requirement> {
    let invalid = |message: &str| CoreError::InvalidSelector {
        selector: expr.to_string(),
        message: message.to_string(),
    };

    if let Some((key, value)) = term.split_once("!=") {
        let key = validate_key(key.trim()).map_err(|m| invalid(&m))?;
        return Ok(Requirement::NotEquals {
            key,
            value: value.trim().to_string(),
        });
    }

    if let Some((key, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
        let key = validate_key(key.trim()).map_err(|m| invalid(&m))?;
        return Ok(Requirement::Equals {
            key,
            value: value.trim().to_string(),
        });
    }

    if let Some(key) = term.strip_prefix('!') {
        let key = validate_key(key.trim()).map_err(|m| invalid(&m))?;
        return Ok(Requirement::DoesNotExist { key });
    }

    let key = validate_key(term).map_err(|m| invalid(&m))?;
    Ok(Requirement::Exists { key })
}

fn validate_key(key: &str) -> std::result::Result<String, String> {
    if key.is_empty() {
        return Err("empty label key".to_string());
    }
    if key
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '=' | '!' | '(' | ')'))
    {
        return Err(format!("invalid label key \"{}\"", key));
    }
    Ok(key.to_string())
}
