//! Conflict-aware fetch loop
//!
//! The live object can change between being read and the dry-run write that
//! produces the merged view. The write carries the resourceVersion that was
//! read, so the server answers 409 and the object is read again. Once the
//! retry budget is spent the last attempt runs without the precondition.

use std::io::Write;

use kube::api::DynamicObject;
use tracing::{debug, warn};

use crate::actions::DiffOptions;
use crate::diff::Differ;
use crate::error::Result;
use crate::notices;
use crate::pair::DiffPair;
use crate::resolve::resolve;
use crate::resources::LocalObject;
use crate::store::LiveStore;

/// Default number of attempts per object
pub const DEFAULT_MAX_RETRIES: u32 = 4;

/// Bound on attempts per object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the final forced one; at least 1
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries: max_retries.max(1),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

/// What happened while fetching and diffing one object
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// Attempts made, 1-based
    pub attempts: u32,
    /// Whether the final attempt ran without the resourceVersion lock
    pub forced: bool,
    /// Live object used by the successful attempt
    pub live: Option<DynamicObject>,
}

/// Resolve, pair and diff one object, retrying on conflicts
///
/// The warning for a forced attempt and the deletion and replacement
/// notices are written to `warnings`.
pub async fn fetch_with_retry(
    store: &dyn LiveStore,
    local: &LocalObject,
    options: &DiffOptions,
    differ: &mut Differ,
    warnings: &mut dyn Write,
) -> Result<FetchOutcome> {
    let snapshot = local.clone();
    let max_retries = options.retry.max_retries.max(1);

    let mut outcome = FetchOutcome {
        attempts: 0,
        forced: false,
        live: None,
    };

    for attempt in 1..=max_retries {
        outcome.attempts = attempt;
        outcome.live = match resolve(
            store,
            &snapshot.target,
            &snapshot.object,
            options.target_selection,
        )
        .await
        {
            Ok(resolution) => Some(resolution.object),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        let force = attempt == max_retries;
        if force {
            outcome.forced = true;
            warn!(name = %snapshot.name(), attempt, "object keeps changing, diffing without lock");
            writeln!(
                warnings,
                "Object ({}, Kind={}: {}) keeps changing, diffing without lock",
                snapshot.api_version(),
                snapshot.kind(),
                snapshot.name()
            )?;
        }

        let pair = DiffPair::new(&snapshot, outcome.live.as_ref(), force);
        match differ.diff(store, &pair, &options.merge).await {
            Err(e) if e.is_conflict() && !force => {
                debug!(attempt, "live object changed during diff, retrying");
            }
            Err(e) => return Err(e),
            Ok(()) => break,
        }
    }

    notices::warn_if_deleting(outcome.live.as_ref(), warnings)?;
    notices::warn_if_superseded(&snapshot, outcome.live.as_ref(), warnings)?;

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KubeError;
    use crate::resources::NamespaceOptions;
    use crate::store::MockLiveStore;
    use kube::api::ResourceExt;
    use kube::core::GroupVersionKind;
    use kube::discovery::ApiResource;
    use realname_core::{LAST_APPLIED_ANNOTATION, parse_documents};
    use serde_json::json;

    fn local(text: &str) -> LocalObject {
        let manifest = parse_documents(text, "t.yaml").unwrap().remove(0);
        let gvk = GroupVersionKind::gvk("", "v1", manifest.kind());
        LocalObject::new(
            &manifest,
            ApiResource::from_gvk(&gvk),
            true,
            &NamespaceOptions::default(),
        )
        .unwrap()
    }

    fn seed(store: &MockLiveStore, local: &LocalObject, value: serde_json::Value) -> DynamicObject {
        store
            .insert(&local.target, serde_json::from_value(value).unwrap())
            .unwrap()
    }

    const CFG: &str = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\ndata:\n  key: new\n";

    #[tokio::test]
    async fn test_single_attempt_without_conflict() {
        let store = MockLiveStore::new();
        let local = local(CFG);
        seed(
            &store,
            &local,
            json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "cfg" }, "data": { "key": "old" } }),
        );

        let mut differ = Differ::new();
        let mut warnings = Vec::new();
        let outcome = fetch_with_retry(&store, &local, &DiffOptions::new(), &mut differ, &mut warnings)
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 1);
        assert!(!outcome.forced);
        assert_eq!(outcome.live.unwrap().name_any(), "cfg");
        assert_eq!(differ.diffs().len(), 1);
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn test_conflicts_then_forced_attempt() {
        let store = MockLiveStore::new();
        let local = local(CFG);
        let original = seed(
            &store,
            &local,
            json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "cfg" }, "data": { "key": "old" } }),
        );
        store.inject_conflicts(3);

        let mut differ = Differ::new();
        let mut warnings = Vec::new();
        let outcome = fetch_with_retry(&store, &local, &DiffOptions::new(), &mut differ, &mut warnings)
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 4);
        assert!(outcome.forced);

        let counts = store.operation_counts();
        assert_eq!(counts.patches, 4);
        assert_eq!(counts.conflicts, 3);

        let text = String::from_utf8(warnings).unwrap();
        assert_eq!(
            text.matches("keeps changing, diffing without lock").count(),
            1
        );
        assert!(text.starts_with("Object (v1, Kind=ConfigMap: cfg)"));

        // The final attempt used the object as it was after the three writers
        let live = outcome.live.unwrap();
        assert_ne!(live.resource_version(), original.resource_version());
        assert_eq!(
            live.resource_version(),
            store.object(&local.target, "cfg").unwrap().resource_version()
        );
        assert_eq!(differ.diffs().len(), 1);
    }

    #[tokio::test]
    async fn test_conflict_on_forced_attempt_is_returned() {
        let store = MockLiveStore::new();
        let local = local(CFG);
        seed(
            &store,
            &local,
            json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "cfg" }, "data": { "key": "old" } }),
        );
        store.reject_patches_with_conflict(4);

        let mut differ = Differ::new();
        let mut warnings = Vec::new();
        let err = fetch_with_retry(&store, &local, &DiffOptions::new(), &mut differ, &mut warnings)
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        let counts = store.operation_counts();
        assert_eq!(counts.patches, 4);
        assert_eq!(counts.conflicts, 4);
        assert!(differ.diffs().is_empty());

        let text = String::from_utf8(warnings).unwrap();
        assert_eq!(
            text.matches("keeps changing, diffing without lock").count(),
            1
        );
    }

    #[tokio::test]
    async fn test_conflict_resolved_by_retry() {
        let store = MockLiveStore::new();
        let local = local(CFG);
        seed(
            &store,
            &local,
            json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "cfg" } }),
        );
        store.inject_conflicts(1);

        let mut differ = Differ::new();
        let mut warnings = Vec::new();
        let outcome = fetch_with_retry(&store, &local, &DiffOptions::new(), &mut differ, &mut warnings)
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 2);
        assert!(!outcome.forced);
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn test_single_attempt_policy_is_forced() {
        let store = MockLiveStore::new();
        let local = local(CFG);

        let mut differ = Differ::new();
        let mut warnings = Vec::new();
        let options = DiffOptions::new().with_retry(RetryPolicy::new(1));
        let outcome = fetch_with_retry(&store, &local, &options, &mut differ, &mut warnings)
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 1);
        assert!(outcome.forced);
        assert!(!warnings.is_empty());
    }

    #[tokio::test]
    async fn test_absent_object_diffs_against_dry_run_create() {
        let store = MockLiveStore::new();
        let local = local(CFG);

        let mut differ = Differ::new();
        let mut warnings = Vec::new();
        let outcome = fetch_with_retry(&store, &local, &DiffOptions::new(), &mut differ, &mut warnings)
            .await
            .unwrap();

        assert!(outcome.live.is_none());
        let diff = &differ.diffs()[0];
        assert!(diff.live.is_none());
        let merged = diff.merged.as_ref().unwrap();
        assert_eq!(merged["metadata"]["name"], "cfg");
        assert_eq!(merged["data"]["key"], "new");
        assert_eq!(store.operation_counts().creates, 1);
    }

    #[tokio::test]
    async fn test_renamed_secret_never_leaks_last_applied() {
        let store = MockLiveStore::new();
        let local = local(
            "apiVersion: v1\nkind: Secret\nmetadata:\n  name: sec-v2\n  labels:\n    realname-diff/realname: sec\ndata:\n  password: bmV3\n",
        );
        let blob = r#"{"apiVersion":"v1","kind":"Secret","data":{"password":"aHVudGVyMg=="}}"#;
        seed(
            &store,
            &local,
            json!({
                "apiVersion": "v1",
                "kind": "Secret",
                "metadata": {
                    "name": "sec-v1",
                    "labels": { "realname-diff/realname": "sec" },
                    "annotations": { LAST_APPLIED_ANNOTATION: blob }
                },
                "data": { "password": "aHVudGVyMg==" }
            }),
        );

        let mut differ = Differ::new();
        let mut warnings = Vec::new();
        let outcome = fetch_with_retry(&store, &local, &DiffOptions::new(), &mut differ, &mut warnings)
            .await
            .unwrap();
        assert_eq!(outcome.live.as_ref().unwrap().name_any(), "sec-v1");

        let diff = &differ.diffs()[0];
        assert_eq!(diff.name, "v1.Secret.default.sec-v2");
        let live = serde_json::to_string(diff.live.as_ref().unwrap()).unwrap();
        assert!(!live.contains(LAST_APPLIED_ANNOTATION));
        assert!(!live.contains(blob));

        let merged = diff.merged.as_ref().unwrap();
        assert_eq!(merged["metadata"]["name"], "sec-v2");

        let text = String::from_utf8(warnings).unwrap();
        assert!(text.contains("superseded by sec-v2"));
    }

    #[tokio::test]
    async fn test_ambiguous_identity_aborts() {
        let store = MockLiveStore::new();
        let local = local(
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg-v3\n  labels:\n    realname-diff/realname: cfg\n",
        );
        for name in ["cfg-v1", "cfg-v2"] {
            seed(
                &store,
                &local,
                json!({
                    "apiVersion": "v1",
                    "kind": "ConfigMap",
                    "metadata": { "name": name, "labels": { "realname-diff/realname": "cfg" } }
                }),
            );
        }

        let mut differ = Differ::new();
        let mut warnings = Vec::new();
        let err = fetch_with_retry(&store, &local, &DiffOptions::new(), &mut differ, &mut warnings)
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::Ambiguous { .. }));
        assert!(differ.diffs().is_empty());
    }

    #[tokio::test]
    async fn test_deleting_object_noticed() {
        let store = MockLiveStore::new();
        let local = local(CFG);
        seed(
            &store,
            &local,
            json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": { "name": "cfg", "deletionTimestamp": "2024-01-01T00:00:00Z" }
            }),
        );

        let mut differ = Differ::new();
        let mut warnings = Vec::new();
        fetch_with_retry(&store, &local, &DiffOptions::new(), &mut differ, &mut warnings)
            .await
            .unwrap();
        let text = String::from_utf8(warnings).unwrap();
        assert!(text.contains("Detected changes to resource cfg which is currently being deleted."));
    }
}
