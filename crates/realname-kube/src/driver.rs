//! Per-object driver for a whole diff run

use std::io::Write;

use tracing::{info, instrument};

use crate::actions::DiffOptions;
use crate::diff::{DiffReport, Differ};
use crate::error::Result;
use crate::resources::LocalObject;
use crate::retry::fetch_with_retry;
use crate::store::LiveStore;

/// Diff every object in order, then render the result once
///
/// Objects are processed one at a time. The first error aborts the run
/// and is attributed to the object that caused it; nothing is rendered in
/// that case.
#[instrument(skip_all, fields(objects = objects.len()))]
pub async fn run(
    store: &dyn LiveStore,
    objects: &[LocalObject],
    options: &DiffOptions,
    out: &mut dyn Write,
    warnings: &mut dyn Write,
) -> Result<DiffReport> {
    options.validate()?;

    let mut differ = Differ::new().with_managed_fields(options.show_managed_fields);

    for local in objects {
        fetch_with_retry(store, local, options, &mut differ, warnings)
            .await
            .map_err(|e| e.for_object(local.kind(), local.namespace(), &local.name()))?;
    }

    let report = differ.run(options.external_diff.as_deref(), out)?;
    info!(
        changed = report.changed,
        unchanged = report.unchanged,
        "diff complete"
    );
    Ok(report)
}
