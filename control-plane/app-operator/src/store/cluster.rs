use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use super::{ObjectStore, StoreError, StoreResult};

/// [`ObjectStore`] backed by the API server through `kube::Api`.
pub struct KubeStore<K> {
    client: Client,
    field_manager: String,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
            _kind: PhantomData,
        }
    }
}

impl<K> KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }
}

fn map_err(kind: &str, namespace: &str, name: &str, e: kube::Error) -> StoreError {
    let key = format!("{kind} {namespace}/{name}");
    match e {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound(key),
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            StoreError::AlreadyExists(key)
        }
        kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict(key),
        kube::Error::SerdeError(e) => StoreError::Serialization(e),
        other => StoreError::Api(other.to_string()),
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> StoreResult<Option<K>> {
        self.api(namespace)
            .get_opt(name)
            .await
            .map_err(|e| map_err(&K::kind(&()), namespace, name, e))
    }

    async fn create(&self, namespace: &str, obj: &K) -> StoreResult<K> {
        let name = obj.name_any();
        self.api(namespace)
            .create(&self.post_params(), obj)
            .await
            .map_err(|e| map_err(&K::kind(&()), namespace, &name, e))
    }

    async fn replace(&self, namespace: &str, obj: &K) -> StoreResult<K> {
        let name = obj.name_any();
        self.api(namespace)
            .replace(&name, &self.post_params(), obj)
            .await
            .map_err(|e| map_err(&K::kind(&()), namespace, &name, e))
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &serde_json::Value,
    ) -> StoreResult<K> {
        let pp = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        let patch = json!({ "status": status });
        self.api(namespace)
            .patch_status(name, &pp, &Patch::Merge(&patch))
            .await
            .map_err(|e| map_err(&K::kind(&()), namespace, name, e))
    }
}
