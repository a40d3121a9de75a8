//! Informational notices about the resolved live object

use std::io::{self, Write};

use kube::api::{DynamicObject, ResourceExt};
use realname_core::real_name;
use tracing::warn;

use crate::resources::LocalObject;

/// Warn when the live object is already being deleted
///
/// Returns whether a notice was written.
pub fn warn_if_deleting(live: Option<&DynamicObject>, out: &mut dyn Write) -> io::Result<bool> {
    let Some(live) = live.filter(|o| o.metadata.deletion_timestamp.is_some()) else {
        return Ok(false);
    };
    let name = live.name_any();
    warn!(%name, "live object is being deleted");
    writeln!(
        out,
        "Warning: Detected changes to resource {} which is currently being deleted.",
        name
    )?;
    Ok(true)
}

/// Warn when the local object replaces a live object of another name
///
/// Returns whether a notice was written.
pub fn warn_if_superseded(
    local: &LocalObject,
    live: Option<&DynamicObject>,
    out: &mut dyn Write,
) -> io::Result<bool> {
    let Some(live) = live else {
        return Ok(false);
    };
    let (old, new) = (live.name_any(), local.name());
    if old == new {
        return Ok(false);
    }

    let identity = real_name(local.object.labels()).unwrap_or(old.as_str());
    warn!(%old, %new, identity, "live object superseded");
    writeln!(
        out,
        "Warning: {} {} (realname={}) is superseded by {}; it will no longer be a diff target and {} will be created.",
        local.kind(),
        old,
        identity,
        new,
        new
    )?;
    Ok(true)
}
