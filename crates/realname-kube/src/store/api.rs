//! Live store backed by the Kubernetes API

use async_trait::async_trait;
use kube::{
    Client,
    api::{Api, DynamicObject, ListParams, PatchParams, PostParams},
};
use tracing::instrument;

use super::{LiveStore, PatchRequest, Target, WriteParams};
use crate::error::{KubeError, Result};

/// [`LiveStore`] talking to a cluster through dynamic `Api` handles
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, target: &Target) -> Api<DynamicObject> {
        match &target.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &target.resource),
            None => Api::all_with(self.client.clone(), &target.resource),
        }
    }
}

#[async_trait]
impl LiveStore for KubeStore {
    #[instrument(skip(self, target), fields(kind = %target.kind(), namespace = ?target.namespace))]
    async fn list(&self, target: &Target, selector: &str) -> Result<Vec<DynamicObject>> {
        let params = ListParams::default().labels(selector);
        let list = self
            .api(target)
            .list(&params)
            .await
            .map_err(|e| KubeError::from_api(e, target.kind(), selector))?;
        Ok(list.items)
    }

    #[instrument(skip(self, target), fields(kind = %target.kind(), namespace = ?target.namespace))]
    async fn get(&self, target: &Target, name: &str) -> Result<DynamicObject> {
        self.api(target)
            .get(name)
            .await
            .map_err(|e| KubeError::from_api(e, target.kind(), name))
    }

    #[instrument(skip_all, fields(kind = %target.kind(), dry_run = params.dry_run))]
    async fn create(
        &self,
        target: &Target,
        obj: &DynamicObject,
        params: &WriteParams,
    ) -> Result<DynamicObject> {
        let post = PostParams {
            dry_run: params.dry_run,
            field_manager: params.field_manager.clone(),
        };
        let name = obj.metadata.name.clone().unwrap_or_default();
        self.api(target)
            .create(&post, obj)
            .await
            .map_err(|e| KubeError::from_api(e, target.kind(), &name))
    }

    #[instrument(skip(self, target, patch), fields(kind = %target.kind(), dry_run = params.dry_run))]
    async fn patch(
        &self,
        target: &Target,
        name: &str,
        patch: &PatchRequest,
        params: &WriteParams,
    ) -> Result<DynamicObject> {
        let patch_params = PatchParams {
            dry_run: params.dry_run,
            force: params.force,
            field_manager: params.field_manager.clone(),
            ..Default::default()
        };

        self.api(target)
            .patch(name, &patch_params, &patch.to_kube())
            .await
            .map_err(|e| KubeError::from_api(e, target.kind(), name))
    }
}
