//! Access to live objects
//!
//! The resolver, retry loop and diff pair only ever talk to the cluster
//! through [`LiveStore`]. [`KubeStore`] is backed by the Kubernetes API;
//! [`MockLiveStore`] keeps objects in memory for tests.

mod api;
mod mock;

pub use api::KubeStore;
pub use mock::{MockLiveStore, OperationCounts};

use async_trait::async_trait;
use kube::api::{DynamicObject, Patch};
use kube::discovery::ApiResource;
use serde_json::Value;

use crate::error::Result;

/// Resource type and namespace an object lives in
#[derive(Debug, Clone)]
pub struct Target {
    /// Resolved API resource (group, version, kind, plural)
    pub resource: ApiResource,
    /// Namespace for namespaced resources, `None` for cluster-scoped ones
    pub namespace: Option<String>,
}

impl Target {
    pub fn new(resource: ApiResource, namespace: Option<String>) -> Self {
        Self {
            resource,
            namespace,
        }
    }

    pub fn kind(&self) -> &str {
        &self.resource.kind
    }
}

/// Options shared by create and patch calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteParams {
    /// Ask the server to validate without persisting
    pub dry_run: bool,
    /// Field manager recorded for the write
    pub field_manager: Option<String>,
    /// Take ownership of conflicting fields (server-side apply only)
    pub force: bool,
}

impl WriteParams {
    /// Dry-run write on behalf of `field_manager`
    pub fn dry_run(field_manager: impl Into<String>) -> Self {
        Self {
            dry_run: true,
            field_manager: Some(field_manager.into()),
            force: false,
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Patch body together with its patch type
#[derive(Debug, Clone, PartialEq)]
pub enum PatchRequest {
    /// Server-side apply
    Apply(Value),
    /// Strategic merge patch (built-in kinds only)
    Strategic(Value),
    /// JSON merge patch
    Merge(Value),
}

impl PatchRequest {
    pub fn body(&self) -> &Value {
        match self {
            PatchRequest::Apply(v) | PatchRequest::Strategic(v) | PatchRequest::Merge(v) => v,
        }
    }

    pub(crate) fn to_kube(&self) -> Patch<&Value> {
        match self {
            PatchRequest::Apply(v) => Patch::Apply(v),
            PatchRequest::Strategic(v) => Patch::Strategic(v),
            PatchRequest::Merge(v) => Patch::Merge(v),
        }
    }
}

/// Live object store
///
/// Implementations classify failures into the typed `NotFound`, `Conflict`,
/// `AlreadyExists` and `UnsupportedMediaType` errors.
#[async_trait]
pub trait LiveStore: Send + Sync {
    /// List objects of `target` matching a label selector
    async fn list(&self, target: &Target, selector: &str) -> Result<Vec<DynamicObject>>;

    /// Get an object by name
    async fn get(&self, target: &Target, name: &str) -> Result<DynamicObject>;

    /// Create an object
    async fn create(
        &self,
        target: &Target,
        obj: &DynamicObject,
        params: &WriteParams,
    ) -> Result<DynamicObject>;

    /// Patch an existing object
    async fn patch(
        &self,
        target: &Target,
        name: &str,
        patch: &PatchRequest,
        params: &WriteParams,
    ) -> Result<DynamicObject>;
}
