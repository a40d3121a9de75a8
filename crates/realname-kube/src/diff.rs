//! Recording and rendering live/merged diffs
//!
//! Key features:
//! - Views rendered as YAML, managedFields hidden unless asked for
//! - Secret values masked so only changed keys are recognisable
//! - Built-in coloured unified diff, or an external program from
//!   `KUBECTL_EXTERNAL_DIFF` run against `LIVE/` and `MERGED/` directories

use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::Command;

use console::Style;
use kube::api::DynamicObject;
use serde_json::{Map, Value};
use similar::{ChangeTag, TextDiff};
use tracing::{debug, instrument};

use crate::error::{KubeError, Result};
use crate::pair::{DiffPair, MergeOptions};
use crate::store::LiveStore;

/// Environment variable naming an external diff program
pub const EXTERNAL_DIFF_ENV: &str = "KUBECTL_EXTERNAL_DIFF";

const LIVE_DIR: &str = "LIVE";
const MERGED_DIR: &str = "MERGED";

const SECRET_MASK: &str = "***";
const SECRET_MASK_BEFORE: &str = "*** (before)";
const SECRET_MASK_AFTER: &str = "*** (after)";

/// One recorded live/merged pair
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDiff {
    /// `[group.]version.kind.namespace.name`
    pub name: String,
    /// Live side, absent for objects that do not exist yet
    pub live: Option<Value>,
    /// Merged side
    pub merged: Option<Value>,
}

impl ResourceDiff {
    /// Render both sides as YAML, after masking and field filtering
    pub fn render(&self, show_managed_fields: bool) -> Result<(String, String)> {
        let mut live = self.live.clone();
        let mut merged = self.merged.clone();

        if !show_managed_fields {
            live.iter_mut().for_each(omit_managed_fields);
            merged.iter_mut().for_each(omit_managed_fields);
        }
        if is_secret(live.as_ref()) || is_secret(merged.as_ref()) {
            mask_secret_data(&mut live, &mut merged);
        }

        Ok((to_yaml(live.as_ref())?, to_yaml(merged.as_ref())?))
    }
}

fn to_yaml(value: Option<&Value>) -> Result<String> {
    match value {
        Some(v) => Ok(serde_yaml::to_string(&sort_keys(v))?),
        None => Ok(String::new()),
    }
}

/// Copy of `value` with every mapping in key order
fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sort_keys(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

fn omit_managed_fields(value: &mut Value) {
    if let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        metadata.remove("managedFields");
    }
}

fn is_secret(value: Option<&Value>) -> bool {
    value
        .and_then(|v| v.get("kind"))
        .and_then(Value::as_str)
        .is_some_and(|kind| kind == "Secret")
}

fn data_map<'a>(value: &'a mut Option<Value>, field: &str) -> Option<&'a mut Map<String, Value>> {
    value
        .as_mut()
        .and_then(|v| v.get_mut(field))
        .and_then(Value::as_object_mut)
}

/// Replace Secret values by markers
///
/// Keys whose value differs between the sides become `*** (before)` and
/// `*** (after)`; everything else becomes `***`.
fn mask_secret_data(live: &mut Option<Value>, merged: &mut Option<Value>) {
    for field in ["data", "stringData"] {
        let before = data_map(live, field).map(|m| m.clone()).unwrap_or_default();
        let after = data_map(merged, field).map(|m| m.clone()).unwrap_or_default();

        if let Some(map) = data_map(live, field) {
            for (key, value) in map.iter_mut() {
                let changed = after.get(key).is_some_and(|a| Some(a) != before.get(key));
                let mask = if changed { SECRET_MASK_BEFORE } else { SECRET_MASK };
                *value = Value::String(mask.to_string());
            }
        }
        if let Some(map) = data_map(merged, field) {
            for (key, value) in map.iter_mut() {
                let changed = before.get(key).is_some_and(|b| Some(b) != after.get(key));
                let mask = if changed { SECRET_MASK_AFTER } else { SECRET_MASK };
                *value = Value::String(mask.to_string());
            }
        }
    }
}

/// Outcome of a diff run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffReport {
    /// Objects whose live and merged views differ
    pub changed: usize,
    /// Objects without differences
    pub unchanged: usize,
}

impl DiffReport {
    pub fn has_differences(&self) -> bool {
        self.changed > 0
    }
}

/// Collects diffs for every object, then renders them in one go
pub struct Differ {
    diffs: Vec<ResourceDiff>,
    /// Keep metadata.managedFields in rendered views
    pub show_managed_fields: bool,
    /// Show context lines around changes
    pub context_lines: usize,
}

impl Differ {
    /// Create a new differ
    pub fn new() -> Self {
        Self {
            diffs: Vec::new(),
            show_managed_fields: false,
            context_lines: 3,
        }
    }

    pub fn with_managed_fields(mut self, show: bool) -> Self {
        self.show_managed_fields = show;
        self
    }

    /// Compute both views of `pair` and record them
    ///
    /// Store errors, `Conflict` included, are returned untouched so the
    /// caller can retry.
    #[instrument(skip_all, fields(name = %pair.name(), force = pair.force()))]
    pub async fn diff(
        &mut self,
        store: &dyn LiveStore,
        pair: &DiffPair<'_>,
        merge: &MergeOptions,
    ) -> Result<()> {
        let merged = pair.merged_view(store, merge).await?;
        self.record(pair.name(), pair.live_view(), Some(merged))
    }

    /// Record an already computed pair of views
    pub fn record(
        &mut self,
        name: String,
        live: Option<DynamicObject>,
        merged: Option<DynamicObject>,
    ) -> Result<()> {
        let live = live.map(serde_json::to_value).transpose()?;
        let merged = merged.map(serde_json::to_value).transpose()?;
        self.diffs.push(ResourceDiff { name, live, merged });
        Ok(())
    }

    /// Recorded diffs, in recording order
    pub fn diffs(&self) -> &[ResourceDiff] {
        &self.diffs
    }

    /// Render everything, through `external` when given
    pub fn run(&self, external: Option<&str>, out: &mut dyn Write) -> Result<DiffReport> {
        match external.map(str::trim).filter(|p| !p.is_empty()) {
            Some(program) => self.run_external(program, out),
            None => self.print(out),
        }
    }

    fn rendered(&self) -> Result<Vec<(&ResourceDiff, String, String)>> {
        self.diffs
            .iter()
            .map(|d| -> Result<_> {
                let (live, merged) = d.render(self.show_managed_fields)?;
                Ok((d, live, merged))
            })
            .collect()
    }

    /// Print a coloured unified diff per changed object
    pub fn print(&self, out: &mut dyn Write) -> Result<DiffReport> {
        let mut report = DiffReport::default();

        for (diff, live, merged) in self.rendered()? {
            if live == merged {
                report.unchanged += 1;
                continue;
            }
            report.changed += 1;
            self.write_unified(out, &diff.name, &live, &merged)?;
        }

        Ok(report)
    }

    fn write_unified(&self, out: &mut dyn Write, name: &str, live: &str, merged: &str) -> Result<()> {
        let header = Style::new().bold();
        let hunk_style = Style::new().cyan();
        let removed = Style::new().red();
        let added = Style::new().green();

        let old = format!("{}/{}", LIVE_DIR, name);
        let new = format!("{}/{}", MERGED_DIR, name);
        writeln!(out, "{}", header.apply_to(format!("diff -u -N {} {}", old, new)))?;
        writeln!(out, "{}", header.apply_to(format!("--- {}", old)))?;
        writeln!(out, "{}", header.apply_to(format!("+++ {}", new)))?;

        let text_diff = TextDiff::from_lines(live, merged);
        let mut unified = text_diff.unified_diff();
        unified.context_radius(self.context_lines);

        for hunk in unified.iter_hunks() {
            writeln!(out, "{}", hunk_style.apply_to(hunk.header()))?;
            for change in hunk.iter_changes() {
                let line = change.value().trim_end_matches('\n');
                match change.tag() {
                    ChangeTag::Delete => writeln!(out, "{}", removed.apply_to(format!("-{}", line)))?,
                    ChangeTag::Insert => writeln!(out, "{}", added.apply_to(format!("+{}", line)))?,
                    ChangeTag::Equal => writeln!(out, " {}", line)?,
                }
            }
        }
        Ok(())
    }

    /// Write `LIVE/` and `MERGED/` trees and run an external program on them
    ///
    /// The program exits 0 without differences and 1 with differences; any
    /// other status is an error.
    #[instrument(skip(self, out))]
    pub fn run_external(&self, program: &str, out: &mut dyn Write) -> Result<DiffReport> {
        let mut parts = program.split_whitespace();
        let Some(binary) = parts.next() else {
            return Err(KubeError::DiffProgram("empty diff command".to_string()));
        };

        let workdir = tempfile::Builder::new().prefix("realname-diff-").tempdir()?;
        let live_dir = workdir.path().join(LIVE_DIR);
        let merged_dir = workdir.path().join(MERGED_DIR);
        fs::create_dir_all(&live_dir)?;
        fs::create_dir_all(&merged_dir)?;

        let mut report = DiffReport::default();
        for (diff, live, merged) in self.rendered()? {
            if live == merged {
                report.unchanged += 1;
            } else {
                report.changed += 1;
            }
            write_side(&live_dir, &diff.name, diff.live.is_some(), &live)?;
            write_side(&merged_dir, &diff.name, diff.merged.is_some(), &merged)?;
        }

        debug!(binary, "running external diff");
        let output = Command::new(binary)
            .args(parts)
            .arg(&live_dir)
            .arg(&merged_dir)
            .output()
            .map_err(|e| KubeError::DiffProgram(format!("failed to run {}: {}", binary, e)))?;
        out.write_all(&output.stdout)?;

        match output.status.code() {
            Some(0) | Some(1) => Ok(report),
            code => Err(KubeError::DiffProgram(format!(
                "{} exited with {}: {}",
                binary,
                code.map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }
}

impl Default for Differ {
    fn default() -> Self {
        Self::new()
    }
}

fn write_side(dir: &Path, name: &str, present: bool, content: &str) -> Result<()> {
    if present {
        fs::write(dir.join(name), content)?;
    }
    Ok(())
}
