//! In-memory live store for testing
//!
//! Objects are kept as JSON keyed by namespace, resource and name. Every
//! persisted write gets a fresh resourceVersion, patches honour a
//! `metadata.resourceVersion` precondition, and concurrent writers can be
//! simulated with [`MockLiveStore::inject_conflicts`].

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use kube::api::DynamicObject;
use realname_core::LabelSelector;
use serde_json::{Map, Value, json};

use super::{LiveStore, PatchRequest, Target, WriteParams};
use crate::error::{KubeError, Result};

/// 2024-01-01T00:00:00Z
const EPOCH_OFFSET_SECS: i64 = 1_704_067_200;

/// namespace ("" when cluster-scoped), apiVersion/kind, name
type ObjectKey = (String, String, String);

/// In-memory live store for testing
#[derive(Clone, Default)]
pub struct MockLiveStore {
    /// Storage: (namespace, resource, name) -> object
    store: Arc<RwLock<BTreeMap<ObjectKey, Value>>>,
    /// Track operation counts for assertions
    operations: Arc<RwLock<OperationCounts>>,
    /// Scripted failures
    faults: Arc<RwLock<Faults>>,
    /// Source of resourceVersions, uids and creation times
    sequence: Arc<AtomicU64>,
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub lists: usize,
    pub gets: usize,
    pub creates: usize,
    pub patches: usize,
    /// Patches rejected because of a stale resourceVersion
    pub conflicts: usize,
}

#[derive(Debug, Default)]
struct Faults {
    pending_conflicts: usize,
    rejected_patches: usize,
    strategic_unsupported: HashSet<String>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn resource_key(target: &Target) -> String {
    format!("{}/{}", target.resource.api_version, target.resource.kind)
}

fn object_key(target: &Target, name: &str) -> ObjectKey {
    (
        target.namespace.clone().unwrap_or_default(),
        resource_key(target),
        name.to_string(),
    )
}

impl MockLiveStore {
    /// Create a new empty mock store
    pub fn new() -> Self {
        Self::default()
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn timestamp(seq: u64) -> String {
        let seconds = EPOCH_OFFSET_SECS.saturating_add(i64::try_from(seq).unwrap_or(i64::MAX));
        DateTime::<Utc>::from_timestamp(seconds, 0)
            .unwrap_or_default()
            .to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Seed an object as if it had been created in the cluster
    ///
    /// Missing uid and creationTimestamp are filled in; an explicit
    /// creationTimestamp is kept so tests can order objects by age.
    pub fn insert(&self, target: &Target, obj: DynamicObject) -> Result<DynamicObject> {
        let name = obj
            .metadata
            .name
            .clone()
            .ok_or_else(|| KubeError::InvalidManifest("object has no name".to_string()))?;
        let mut value = serde_json::to_value(&obj)?;
        self.stamp_new(target, &mut value);
        set_meta(&mut value, "resourceVersion", json!(self.next_sequence().to_string()));

        write(&self.store).insert(object_key(target, &name), value.clone());
        Ok(serde_json::from_value(value)?)
    }

    /// Current stored copy of an object
    pub fn object(&self, target: &Target, name: &str) -> Option<DynamicObject> {
        read(&self.store)
            .get(&object_key(target, name))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Make the next `count` preconditioned patches lose a race
    ///
    /// Before each of them a concurrent writer bumps the stored
    /// resourceVersion, so the precondition no longer holds.
    pub fn inject_conflicts(&self, count: usize) {
        write(&self.faults).pending_conflicts = count;
    }

    /// Make the next `count` patches fail with a conflict, preconditioned or not
    pub fn reject_patches_with_conflict(&self, count: usize) {
        write(&self.faults).rejected_patches = count;
    }

    /// Reject strategic merge patches for `kind`, like custom resources
    pub fn reject_strategic_merge(&self, kind: &str) {
        write(&self.faults)
            .strategic_unsupported
            .insert(kind.to_string());
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        read(&self.operations).clone()
    }

    /// Count stored objects
    pub fn object_count(&self) -> usize {
        read(&self.store).len()
    }

    fn stamp_new(&self, target: &Target, value: &mut Value) {
        if let Some(ns) = &target.namespace {
            set_meta(value, "namespace", json!(ns));
        }
        let seq = self.next_sequence();
        if meta(value, "uid").is_none() {
            set_meta(value, "uid", json!(format!("mock-uid-{}", seq)));
        }
        if meta(value, "creationTimestamp").is_none() {
            set_meta(value, "creationTimestamp", json!(Self::timestamp(seq)));
        }
    }
}

fn meta<'a>(value: &'a Value, field: &str) -> Option<&'a Value> {
    value.get("metadata").and_then(|m| m.get(field)).filter(|v| !v.is_null())
}

fn set_meta(value: &mut Value, field: &str, new: Value) {
    if let Some(obj) = value.as_object_mut() {
        let metadata = obj
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(metadata) = metadata.as_object_mut() {
            metadata.insert(field.to_string(), new);
        }
    }
}

fn remove_meta(value: &mut Value, field: &str) -> Option<Value> {
    value
        .get_mut("metadata")
        .and_then(Value::as_object_mut)
        .and_then(|m| m.remove(field))
}

fn labels_of(value: &Value) -> BTreeMap<String, String> {
    meta(value, "labels")
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Apply a JSON merge patch in place
fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

#[async_trait]
impl LiveStore for MockLiveStore {
    async fn list(&self, target: &Target, selector: &str) -> Result<Vec<DynamicObject>> {
        write(&self.operations).lists += 1;

        let selector = LabelSelector::parse(selector)?;
        let resource = resource_key(target);
        let store = read(&self.store);

        store
            .iter()
            .filter(|((ns, res, _), _)| {
                *res == resource && target.namespace.as_ref().is_none_or(|t| t == ns)
            })
            .filter(|(_, value)| selector.matches(&labels_of(value)))
            .map(|(_, value)| serde_json::from_value(value.clone()).map_err(KubeError::from))
            .collect()
    }

    async fn get(&self, target: &Target, name: &str) -> Result<DynamicObject> {
        write(&self.operations).gets += 1;

        let store = read(&self.store);
        let value = store
            .get(&object_key(target, name))
            .ok_or_else(|| KubeError::NotFound {
                kind: target.kind().to_string(),
                name: name.to_string(),
            })?;
        Ok(serde_json::from_value(value.clone())?)
    }

    async fn create(
        &self,
        target: &Target,
        obj: &DynamicObject,
        params: &WriteParams,
    ) -> Result<DynamicObject> {
        write(&self.operations).creates += 1;

        let name = obj
            .metadata
            .name
            .clone()
            .ok_or_else(|| KubeError::InvalidManifest("object has no name".to_string()))?;
        let key = object_key(target, &name);

        if read(&self.store).contains_key(&key) {
            return Err(KubeError::AlreadyExists {
                kind: target.kind().to_string(),
                name,
            });
        }

        let mut value = serde_json::to_value(obj)?;
        remove_meta(&mut value, "resourceVersion");
        remove_meta(&mut value, "uid");
        self.stamp_new(target, &mut value);
        if let Some(manager) = &params.field_manager {
            set_meta(
                &mut value,
                "managedFields",
                json!([{ "manager": manager, "operation": "Update" }]),
            );
        }

        if !params.dry_run {
            set_meta(&mut value, "resourceVersion", json!(self.next_sequence().to_string()));
            write(&self.store).insert(key, value.clone());
        }
        Ok(serde_json::from_value(value)?)
    }

    async fn patch(
        &self,
        target: &Target,
        name: &str,
        patch: &PatchRequest,
        params: &WriteParams,
    ) -> Result<DynamicObject> {
        write(&self.operations).patches += 1;

        if matches!(patch, PatchRequest::Strategic(_))
            && read(&self.faults)
                .strategic_unsupported
                .contains(target.kind())
        {
            return Err(KubeError::UnsupportedMediaType {
                kind: target.kind().to_string(),
                name: name.to_string(),
            });
        }

        {
            let mut faults = write(&self.faults);
            if faults.rejected_patches > 0 {
                faults.rejected_patches -= 1;
                write(&self.operations).conflicts += 1;
                return Err(KubeError::Conflict {
                    kind: target.kind().to_string(),
                    name: name.to_string(),
                });
            }
        }

        let key = object_key(target, name);
        let mut store = write(&self.store);
        let current = store.get_mut(&key).ok_or_else(|| KubeError::NotFound {
            kind: target.kind().to_string(),
            name: name.to_string(),
        })?;

        let mut body = patch.body().clone();
        let precondition = remove_meta(&mut body, "resourceVersion")
            .and_then(|v| v.as_str().map(str::to_string));

        if let Some(expected) = precondition {
            {
                let mut faults = write(&self.faults);
                if faults.pending_conflicts > 0 {
                    faults.pending_conflicts -= 1;
                    set_meta(current, "resourceVersion", json!(self.next_sequence().to_string()));
                }
            }
            let actual = meta(current, "resourceVersion").and_then(Value::as_str);
            if actual != Some(expected.as_str()) {
                write(&self.operations).conflicts += 1;
                return Err(KubeError::Conflict {
                    kind: target.kind().to_string(),
                    name: name.to_string(),
                });
            }
        }

        let mut merged = current.clone();
        merge_patch(&mut merged, &body);
        if let Some(manager) = &params.field_manager {
            let operation = match patch {
                PatchRequest::Apply(_) => "Apply",
                _ => "Update",
            };
            set_meta(
                &mut merged,
                "managedFields",
                json!([{ "manager": manager, "operation": operation }]),
            );
        }

        if !params.dry_run {
            set_meta(&mut merged, "resourceVersion", json!(self.next_sequence().to_string()));
            *current = merged.clone();
        }
        Ok(serde_json::from_value(merged)?)
    }
}
