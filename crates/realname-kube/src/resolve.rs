//! Finding the live counterpart of a local object
//!
//! With a real name, the live object is whichever object in the target
//! namespace carries the same `realname-diff/realname` label, whatever its
//! literal name. Without one, the literal name is used.

use std::fmt;
use std::str::FromStr;

use kube::api::{DynamicObject, ResourceExt};
use realname_core::{identity_selector, real_name};
use tracing::{debug, instrument};

use crate::error::{KubeError, Result};
use crate::store::{LiveStore, Target};

/// What to do when several live objects share one real name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TargetSelection {
    /// Refuse to diff
    #[default]
    Error,
    /// Use the most recently created object
    Latest,
}

impl fmt::Display for TargetSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetSelection::Error => write!(f, "error"),
            TargetSelection::Latest => write!(f, "latest"),
        }
    }
}

impl FromStr for TargetSelection {
    type Err = KubeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "error" => Ok(TargetSelection::Error),
            "latest" => Ok(TargetSelection::Latest),
            other => Err(KubeError::Validation(format!(
                "invalid target selection '{}': expected 'error' or 'latest'",
                other
            ))),
        }
    }
}

/// A single resolved live object
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Owned copy of the live object
    pub object: DynamicObject,
    /// resourceVersion observed when the object was read
    pub resource_version: Option<String>,
}

impl Resolution {
    fn new(object: DynamicObject) -> Self {
        let resource_version = object.resource_version();
        Self {
            object,
            resource_version,
        }
    }
}

/// Resolve the live counterpart of `local`
///
/// Returns `NotFound` when nothing corresponds and `Ambiguous` when several
/// objects share the real name under [`TargetSelection::Error`].
#[instrument(skip_all, fields(kind = %target.kind(), name = %local.name_any()))]
pub async fn resolve(
    store: &dyn LiveStore,
    target: &Target,
    local: &DynamicObject,
    selection: TargetSelection,
) -> Result<Resolution> {
    let Some(identity) = real_name(local.labels()) else {
        debug!("no real name, resolving by literal name");
        return store.get(target, &local.name_any()).await.map(Resolution::new);
    };

    let mut candidates = store.list(target, &identity_selector(identity)).await?;
    debug!(identity, candidates = candidates.len(), "listed by real name");

    match candidates.len() {
        0 => {
            // Objects created before they were labelled keep the real name
            // as their literal name.
            store.get(target, identity).await.map(Resolution::new)
        }
        1 => Ok(Resolution::new(candidates.remove(0))),
        _ => match selection {
            TargetSelection::Error => Err(KubeError::Ambiguous {
                identity: identity.to_string(),
            }),
            TargetSelection::Latest => {
                let newest = pick_latest(candidates).ok_or_else(|| KubeError::Ambiguous {
                    identity: identity.to_string(),
                })?;
                debug!(picked = %newest.name_any(), "picked newest of duplicates");
                Ok(Resolution::new(newest))
            }
        },
    }
}

/// Newest object by creationTimestamp, ties going to the greatest name
fn pick_latest(candidates: Vec<DynamicObject>) -> Option<DynamicObject> {
    candidates.into_iter().max_by(|a, b| {
        let key = |o: &DynamicObject| {
            (
                o.metadata.creation_timestamp.as_ref().map(|t| t.0),
                o.name_any(),
            )
        };
        key(a).cmp(&key(b))
    })
}
