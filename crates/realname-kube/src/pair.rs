//! Live and merged views of a local/live pair
//!
//! When the local object keeps the live object's name, the merged view is
//! what applying the manifest would produce. When the name changes, applying
//! creates a new object, so the merged view is a dry-run create and the live
//! view loses its last-applied-configuration annotation: it holds the full
//! previous manifest, Secret data included.

use kube::api::{DynamicObject, ResourceExt};
use realname_core::LAST_APPLIED_ANNOTATION;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{KubeError, Result};
use crate::resources::LocalObject;
use crate::store::{LiveStore, PatchRequest, WriteParams};

/// Field manager used by client-side apply
pub const CLIENT_SIDE_FIELD_MANAGER: &str = "kubectl-client-side-apply";

/// Field manager used by server-side apply
pub const SERVER_SIDE_FIELD_MANAGER: &str = "kubectl";

/// How the merged view is computed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOptions {
    /// Use server-side apply instead of a client-side patch
    pub server_side: bool,
    /// Take over conflicting fields (server-side apply only)
    pub force_conflicts: bool,
    /// Field manager recorded for dry-run writes
    pub field_manager: String,
}

impl MergeOptions {
    /// Options with the default field manager for the apply mode
    pub fn new(server_side: bool) -> Self {
        Self {
            server_side,
            force_conflicts: false,
            field_manager: default_field_manager(server_side).to_string(),
        }
    }

    pub fn with_force_conflicts(mut self, force: bool) -> Self {
        self.force_conflicts = force;
        self
    }

    pub fn with_field_manager(mut self, manager: impl Into<String>) -> Self {
        self.field_manager = manager.into();
        self
    }

    /// Reject option combinations the server would refuse
    pub fn validate(&self) -> Result<()> {
        if self.force_conflicts && !self.server_side {
            return Err(KubeError::Validation(
                "--force-conflicts only works with --server-side".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Default field manager for client-side or server-side apply
pub fn default_field_manager(server_side: bool) -> &'static str {
    if server_side {
        SERVER_SIDE_FIELD_MANAGER
    } else {
        CLIENT_SIDE_FIELD_MANAGER
    }
}

/// Whether the local object keeps the live object's name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairMode {
    NameUnchanged,
    NameChanged,
}

impl PairMode {
    /// Name changed only if a live object exists under another name
    pub fn of(local: &DynamicObject, live: Option<&DynamicObject>) -> Self {
        match live {
            Some(live) if live.name_any() != local.name_any() => PairMode::NameChanged,
            _ => PairMode::NameUnchanged,
        }
    }
}

/// One attempt at pairing a local snapshot with its live object
#[derive(Debug)]
pub struct DiffPair<'a> {
    local: &'a LocalObject,
    live: Option<&'a DynamicObject>,
    force: bool,
    mode: PairMode,
}

impl<'a> DiffPair<'a> {
    pub fn new(local: &'a LocalObject, live: Option<&'a DynamicObject>, force: bool) -> Self {
        Self {
            local,
            live,
            force,
            mode: PairMode::of(&local.object, live),
        }
    }

    pub fn mode(&self) -> PairMode {
        self.mode
    }

    pub fn local(&self) -> &LocalObject {
        self.local
    }

    pub fn live(&self) -> Option<&DynamicObject> {
        self.live
    }

    pub fn force(&self) -> bool {
        self.force
    }

    /// Name of the diff entry: `[group.]version.kind.namespace.name`
    ///
    /// Always the local name, so renamed objects show up under their new name.
    pub fn name(&self) -> String {
        let resource = &self.local.target.resource;
        let group = if resource.group.is_empty() {
            String::new()
        } else {
            format!("{}.", resource.group)
        };
        format!(
            "{}{}.{}.{}.{}",
            group,
            resource.version,
            resource.kind,
            self.local.namespace().unwrap_or_default(),
            self.local.name()
        )
    }

    /// The live side of the diff
    pub fn live_view(&self) -> Option<DynamicObject> {
        let live = self.live?.clone();
        Some(match self.mode {
            PairMode::NameUnchanged => live,
            PairMode::NameChanged => strip_last_applied(live),
        })
    }

    /// The merged side of the diff, computed by dry-run writes
    pub async fn merged_view(
        &self,
        store: &dyn LiveStore,
        options: &MergeOptions,
    ) -> Result<DynamicObject> {
        let target = &self.local.target;
        let params = WriteParams::dry_run(options.field_manager.clone());

        let live = match (self.mode, self.live) {
            (PairMode::NameChanged, _) | (_, None) => {
                debug!(name = %self.local.name(), "merged view from dry-run create");
                return store.create(target, &self.local.object, &params).await;
            }
            (PairMode::NameUnchanged, Some(live)) => live,
        };

        let name = self.local.name();
        let local = serde_json::to_value(&self.local.object)?;
        let precondition = if self.force {
            None
        } else {
            live.resource_version()
        };

        if options.server_side {
            let body = with_resource_version(local, precondition);
            let params = params.with_force(options.force_conflicts);
            return store
                .patch(target, &name, &PatchRequest::Apply(body), &params)
                .await;
        }

        let live_value = serde_json::to_value(live)?;
        let body = with_resource_version(client_side_patch(&local, &live_value)?, precondition);

        match store
            .patch(target, &name, &PatchRequest::Strategic(body.clone()), &params)
            .await
        {
            Err(e) if e.is_unsupported_media_type() => {
                debug!(%name, "strategic merge unsupported, using merge patch");
                store
                    .patch(target, &name, &PatchRequest::Merge(body), &params)
                    .await
            }
            other => other,
        }
    }
}

/// Drop the last-applied-configuration annotation
///
/// The annotation map itself goes when nothing else is left in it.
pub fn strip_last_applied(mut obj: DynamicObject) -> DynamicObject {
    if let Some(annotations) = obj.metadata.annotations.as_mut() {
        annotations.remove(LAST_APPLIED_ANNOTATION);
        if annotations.is_empty() {
            obj.metadata.annotations = None;
        }
    }
    obj
}

fn with_resource_version(mut body: Value, resource_version: Option<String>) -> Value {
    if let Some(metadata) = body.get_mut("metadata").and_then(Value::as_object_mut) {
        match resource_version {
            Some(rv) => {
                metadata.insert("resourceVersion".to_string(), Value::String(rv));
            }
            None => {
                metadata.remove("resourceVersion");
            }
        }
    }
    body
}

/// Patch body a client-side apply would send
///
/// The local object with its last-applied-configuration refreshed, plus
/// explicit deletions for fields present in the live object's previous
/// last-applied-configuration but no longer in the local object.
pub fn client_side_patch(local: &Value, live: &Value) -> Result<Value> {
    let mut modified = local.clone();
    if let Some(metadata) = modified.get_mut("metadata").and_then(Value::as_object_mut) {
        metadata.remove("resourceVersion");
        if let Some(annotations) = metadata.get_mut("annotations").and_then(Value::as_object_mut)
        {
            annotations.remove(LAST_APPLIED_ANNOTATION);
        }
    }
    let applied = serde_json::to_string(&modified)?;

    let original = live
        .pointer("/metadata/annotations")
        .and_then(|a| a.get(LAST_APPLIED_ANNOTATION))
        .and_then(Value::as_str)
        .and_then(|s| serde_json::from_str::<Value>(s).ok());

    if let Some(original) = &original {
        add_deletions(&mut modified, original);
    }

    if let Some(metadata) = modified.get_mut("metadata").and_then(Value::as_object_mut) {
        let annotations = metadata
            .entry("annotations")
            .or_insert_with(|| Value::Object(Map::new()));
        // Annotations removed locally arrive here as null; keep the
        // per-key deletions so the refreshed annotation survives
        if !annotations.is_object() {
            *annotations = Value::Object(Map::new());
            if let Some(previous) = original
                .as_ref()
                .and_then(|o| o.pointer("/metadata/annotations"))
            {
                add_deletions(annotations, previous);
            }
        }
        if let Some(annotations) = annotations.as_object_mut() {
            annotations.insert(LAST_APPLIED_ANNOTATION.to_string(), Value::String(applied));
        }
    }
    Ok(modified)
}

/// Null out keys that were applied before and have since been removed
fn add_deletions(patch: &mut Value, original: &Value) {
    let (Some(patch), Some(original)) = (patch.as_object_mut(), original.as_object()) else {
        return;
    };
    for (key, previous) in original {
        match patch.get_mut(key) {
            None => {
                patch.insert(key.clone(), Value::Null);
            }
            Some(current) if current.is_object() && previous.is_object() => {
                add_deletions(current, previous);
            }
            Some(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::NamespaceOptions;
    use crate::store::MockLiveStore;
    use kube::core::GroupVersionKind;
    use kube::discovery::ApiResource;
    use realname_core::parse_documents;
    use serde_json::json;

    fn resource(api_version: &str, kind: &str) -> ApiResource {
        let (group, version) = api_version.rsplit_once('/').unwrap_or(("", api_version));
        ApiResource::from_gvk(&GroupVersionKind::gvk(group, version, kind))
    }

    fn local(text: &str) -> LocalObject {
        let manifest = parse_documents(text, "test.yaml").unwrap().remove(0);
        let res = resource(manifest.api_version(), manifest.kind());
        LocalObject::new(&manifest, res, true, &NamespaceOptions::default()).unwrap()
    }

    fn live(value: Value) -> DynamicObject {
        serde_json::from_value(value).unwrap()
    }

    const LOCAL_CFG_V2: &str = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: cfg-v2
  labels:
    realname-diff/realname: cfg
data:
  key: new
"#;

    fn live_cfg_v1() -> DynamicObject {
        live(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "cfg-v1",
                "namespace": "default",
                "labels": { "realname-diff/realname": "cfg" },
                "annotations": {
                    LAST_APPLIED_ANNOTATION: "{\"data\":{\"key\":\"old\"}}"
                }
            },
            "data": { "key": "old" }
        }))
    }

    #[test]
    fn test_pair_mode() {
        let local = local(LOCAL_CFG_V2);
        let renamed = live_cfg_v1();
        assert_eq!(PairMode::of(&local.object, None), PairMode::NameUnchanged);
        assert_eq!(
            PairMode::of(&local.object, Some(&renamed)),
            PairMode::NameChanged
        );
        assert_eq!(
            PairMode::of(&local.object, Some(&local.object)),
            PairMode::NameUnchanged
        );
    }

    #[test]
    fn test_live_view_strips_annotation_when_renamed() {
        let local = local(LOCAL_CFG_V2);
        let live = live_cfg_v1();
        let pair = DiffPair::new(&local, Some(&live), false);

        let view = pair.live_view().unwrap();
        assert_eq!(view.name_any(), "cfg-v1");
        assert!(view.metadata.annotations.is_none());
        // The original is untouched
        assert!(live.annotations().contains_key(LAST_APPLIED_ANNOTATION));
    }

    #[test]
    fn test_live_view_keeps_annotation_when_name_unchanged() {
        let local = local(LOCAL_CFG_V2);
        let mut same = live_cfg_v1();
        same.metadata.name = Some("cfg-v2".to_string());
        let pair = DiffPair::new(&local, Some(&same), false);

        let view = pair.live_view().unwrap();
        assert!(view.annotations().contains_key(LAST_APPLIED_ANNOTATION));
    }

    #[test]
    fn test_strip_keeps_other_annotations() {
        let obj = live(json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {
                "name": "s",
                "annotations": {
                    LAST_APPLIED_ANNOTATION: "{\"data\":{\"password\":\"aHVudGVyMg==\"}}",
                    "team": "core"
                }
            }
        }));
        let stripped = strip_last_applied(obj);
        let annotations = stripped.annotations();
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations["team"], "core");
    }

    #[test]
    fn test_live_view_absent() {
        let local = local(LOCAL_CFG_V2);
        let pair = DiffPair::new(&local, None, false);
        assert!(pair.live_view().is_none());
    }

    #[test]
    fn test_diff_name() {
        let local_cm = local(LOCAL_CFG_V2);
        let pair = DiffPair::new(&local_cm, None, false);
        assert_eq!(pair.name(), "v1.ConfigMap.default.cfg-v2");

        let deploy = local("apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\n");
        let pair = DiffPair::new(&deploy, None, false);
        assert_eq!(pair.name(), "apps.v1.Deployment.default.web");
    }

    #[test]
    fn test_merge_options() {
        let opts = MergeOptions::new(false);
        assert_eq!(opts.field_manager, "kubectl-client-side-apply");
        assert!(opts.validate().is_ok());

        let opts = MergeOptions::new(true).with_force_conflicts(true);
        assert_eq!(opts.field_manager, "kubectl");
        assert!(opts.validate().is_ok());

        let err = MergeOptions::new(false)
            .with_force_conflicts(true)
            .validate()
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "--force-conflicts only works with --server-side"
        );
    }

    #[test]
    fn test_client_side_patch_deletes_removed_fields() {
        let local = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "cfg" },
            "data": { "kept": "1" }
        });
        let live = json!({
            "metadata": {
                "annotations": {
                    LAST_APPLIED_ANNOTATION:
                        "{\"data\":{\"kept\":\"1\",\"dropped\":\"2\"},\"binaryData\":{}}"
                }
            },
            "data": { "kept": "1", "dropped": "2", "manual": "3" }
        });

        let patch = client_side_patch(&local, &live).unwrap();
        assert_eq!(patch["data"]["dropped"], Value::Null);
        assert_eq!(patch["binaryData"], Value::Null);
        assert!(patch["data"].get("manual").is_none());

        let applied = patch["metadata"]["annotations"][LAST_APPLIED_ANNOTATION]
            .as_str()
            .unwrap();
        let applied: Value = serde_json::from_str(applied).unwrap();
        assert_eq!(applied, local);
    }

    #[test]
    fn test_client_side_patch_refreshes_annotation_when_annotations_removed() {
        let local = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "cfg" },
            "data": { "key": "value" }
        });
        let live = json!({
            "metadata": {
                "name": "cfg",
                "annotations": {
                    "team": "a",
                    LAST_APPLIED_ANNOTATION:
                        "{\"metadata\":{\"name\":\"cfg\",\"annotations\":{\"team\":\"a\"}},\"data\":{\"key\":\"old\"}}"
                }
            },
            "data": { "key": "old" }
        });

        let patch = client_side_patch(&local, &live).unwrap();
        let annotations = patch["metadata"]["annotations"].as_object().unwrap();
        assert_eq!(annotations["team"], Value::Null);

        let applied = annotations[LAST_APPLIED_ANNOTATION].as_str().unwrap();
        let applied: Value = serde_json::from_str(applied).unwrap();
        assert_eq!(applied, local);
    }

    #[tokio::test]
    async fn test_merged_view_dry_run_create_when_renamed() {
        let store = MockLiveStore::new();
        let local = local(LOCAL_CFG_V2);
        let live = store.insert(&local.target, live_cfg_v1()).unwrap();
        let pair = DiffPair::new(&local, Some(&live), false);

        let merged = pair
            .merged_view(&store, &MergeOptions::default())
            .await
            .unwrap();
        assert_eq!(merged.name_any(), "cfg-v2");
        assert_eq!(merged.data["data"]["key"], "new");

        let counts = store.operation_counts();
        assert_eq!(counts.creates, 1);
        assert_eq!(counts.patches, 0);
        // dry run only
        assert!(store.object(&local.target, "cfg-v2").is_none());
    }

    #[tokio::test]
    async fn test_merged_view_dry_run_create_when_absent() {
        let store = MockLiveStore::new();
        let local = local(LOCAL_CFG_V2);
        let pair = DiffPair::new(&local, None, false);

        let merged = pair
            .merged_view(&store, &MergeOptions::default())
            .await
            .unwrap();
        assert_eq!(merged.name_any(), "cfg-v2");
        assert_eq!(store.operation_counts().creates, 1);
    }

    #[tokio::test]
    async fn test_merged_view_patch_carries_precondition() {
        let store = MockLiveStore::new();
        let local = local(LOCAL_CFG_V2);
        let mut same = live_cfg_v1();
        same.metadata.name = Some("cfg-v2".to_string());
        let live = store.insert(&local.target, same).unwrap();

        // A concurrent writer makes the held copy stale
        store.inject_conflicts(1);
        let pair = DiffPair::new(&local, Some(&live), false);
        let err = pair
            .merged_view(&store, &MergeOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        // Forced attempts skip the precondition
        let pair = DiffPair::new(&local, Some(&live), true);
        let merged = pair
            .merged_view(&store, &MergeOptions::default())
            .await
            .unwrap();
        assert_eq!(merged.data["data"]["key"], "new");
    }

    #[tokio::test]
    async fn test_merged_view_falls_back_to_merge_patch() {
        let store = MockLiveStore::new();
        let local = local(
            "apiVersion: example.com/v1\nkind: Widget\nmetadata:\n  name: w\nspec:\n  size: 2\n",
        );
        let live = store
            .insert(
                &local.target,
                live(json!({
                    "apiVersion": "example.com/v1",
                    "kind": "Widget",
                    "metadata": { "name": "w" },
                    "spec": { "size": 1 }
                })),
            )
            .unwrap();
        store.reject_strategic_merge("Widget");

        let pair = DiffPair::new(&local, Some(&live), false);
        let merged = pair
            .merged_view(&store, &MergeOptions::default())
            .await
            .unwrap();
        assert_eq!(merged.data["spec"]["size"], 2);
        assert_eq!(store.operation_counts().patches, 2);
    }

    #[tokio::test]
    async fn test_merged_view_server_side_apply() {
        let store = MockLiveStore::new();
        let local = local(LOCAL_CFG_V2);
        let mut same = live_cfg_v1();
        same.metadata.name = Some("cfg-v2".to_string());
        let live = store.insert(&local.target, same).unwrap();

        let pair = DiffPair::new(&local, Some(&live), false);
        let merged = pair
            .merged_view(&store, &MergeOptions::new(true))
            .await
            .unwrap();
        assert_eq!(merged.data["data"]["key"], "new");
        let managers: Vec<_> = merged
            .metadata
            .managed_fields
            .unwrap_or_default()
            .into_iter()
            .filter_map(|f| f.manager)
            .collect();
        assert_eq!(managers, vec!["kubectl".to_string()]);
    }
}
