//! Mapping local manifests onto cluster resources
//!
//! Every manifest is resolved through API discovery into a [`Target`]:
//! - the served `ApiResource` for its apiVersion and kind
//! - the namespace it will be looked up in, defaulted for namespaced
//!   resources and checked against an enforced `--namespace`

use kube::{
    Client,
    api::{DynamicObject, ResourceExt},
    core::GroupVersionKind,
    discovery::{ApiResource, Discovery, Scope},
};
use realname_core::Manifest;
use tracing::instrument;

use crate::error::{KubeError, Result};
use crate::store::Target;

/// Namespace handling for manifests without an explicit namespace
#[derive(Debug, Clone)]
pub struct NamespaceOptions {
    /// Namespace applied to namespaced objects that declare none
    pub default_namespace: String,
    /// Reject objects declaring a different namespace
    pub enforce: bool,
}

impl NamespaceOptions {
    pub fn new(default_namespace: impl Into<String>) -> Self {
        Self {
            default_namespace: default_namespace.into(),
            enforce: false,
        }
    }

    /// Enforce the namespace, as an explicit `-n` does
    pub fn enforced(mut self) -> Self {
        self.enforce = true;
        self
    }
}

impl Default for NamespaceOptions {
    fn default() -> Self {
        Self::new("default")
    }
}

/// A local object ready to be diffed
#[derive(Debug, Clone)]
pub struct LocalObject {
    /// The manifest as a dynamic object, namespace filled in
    pub object: DynamicObject,
    /// Where the live counterpart is looked up
    pub target: Target,
    /// Source the manifest was read from
    pub origin: String,
}

impl LocalObject {
    /// Build from a manifest and its resolved resource
    pub fn new(
        manifest: &Manifest,
        resource: ApiResource,
        namespaced: bool,
        namespaces: &NamespaceOptions,
    ) -> Result<Self> {
        let mut object: DynamicObject = serde_json::from_value(manifest.value.clone())?;

        let namespace = if namespaced {
            let ns = match manifest.namespace() {
                Some(ns) if namespaces.enforce && ns != namespaces.default_namespace => {
                    return Err(KubeError::NamespaceMismatch {
                        object: ns.to_string(),
                        enforced: namespaces.default_namespace.clone(),
                    });
                }
                Some(ns) => ns.to_string(),
                None => namespaces.default_namespace.clone(),
            };
            object.metadata.namespace = Some(ns.clone());
            Some(ns)
        } else {
            object.metadata.namespace = None;
            None
        };

        Ok(Self {
            object,
            target: Target::new(resource, namespace),
            origin: manifest.origin.clone(),
        })
    }

    pub fn name(&self) -> String {
        self.object.name_any()
    }

    pub fn kind(&self) -> &str {
        self.target.kind()
    }

    pub fn api_version(&self) -> &str {
        &self.target.resource.api_version
    }

    pub fn namespace(&self) -> Option<&str> {
        self.target.namespace.as_deref()
    }
}

/// Resolves manifests to served resources using cached discovery
pub struct ResourceMapper {
    /// Cached discovery information
    discovery: Discovery,
}

impl ResourceMapper {
    /// Run discovery against the cluster
    #[instrument(skip_all)]
    pub async fn new(client: Client) -> Result<Self> {
        let discovery = Discovery::new(client).run().await?;
        Ok(Self { discovery })
    }

    /// Resolve one manifest
    pub fn map(&self, manifest: &Manifest, namespaces: &NamespaceOptions) -> Result<LocalObject> {
        let gvk = gvk_from_api_version(manifest.api_version(), manifest.kind());

        let (resource, capabilities) =
            self.discovery
                .resolve_gvk(&gvk)
                .ok_or_else(|| KubeError::UnknownResource {
                    api_version: manifest.api_version().to_string(),
                    kind: manifest.kind().to_string(),
                })?;

        LocalObject::new(
            manifest,
            resource,
            capabilities.scope == Scope::Namespaced,
            namespaces,
        )
    }

    /// Resolve every manifest, failing on the first unmappable one
    pub fn map_all(
        &self,
        manifests: &[Manifest],
        namespaces: &NamespaceOptions,
    ) -> Result<Vec<LocalObject>> {
        manifests
            .iter()
            .map(|m| {
                self.map(m, namespaces).map_err(|e| {
                    e.for_object(m.kind(), m.namespace(), m.name())
                })
            })
            .collect()
    }
}

/// Split an apiVersion into group and version
///
/// - "apps/v1" -> group="apps", version="v1"
/// - "v1" -> group="", version="v1" (core API)
pub fn gvk_from_api_version(api_version: &str, kind: &str) -> GroupVersionKind {
    let (group, version) = match api_version.rsplit_once('/') {
        Some((g, v)) => (g, v),
        None => ("", api_version),
    };
    GroupVersionKind::gvk(group, version, kind)
}
