use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{ObjectStore, StoreError, StoreResult};

type Key = (String, String);

struct State<K> {
    objects: HashMap<Key, K>,
    version: u64,
}

impl<K> State<K> {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

/// In-process [`ObjectStore`] with API-server write semantics: assigned uids,
/// monotonically increasing `resourceVersion`, stale-version conflicts, a
/// status subresource and owner-reference garbage collection on request.
pub struct MemoryStore<K> {
    state: Arc<RwLock<State<K>>>,
}

impl<K> Clone for MemoryStore<K> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<K> Default for MemoryStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> MemoryStore<K> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State {
                objects: HashMap::new(),
                version: 0,
            })),
        }
    }
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn label<K: Resource<DynamicType = ()>>(namespace: &str, name: &str) -> String {
    format!("{} {namespace}/{name}", K::kind(&()))
}

/// `next` with the status of `current`; writes through the main resource
/// never touch status.
fn with_status_of<K>(next: &K, current: &K) -> StoreResult<K>
where
    K: Serialize + DeserializeOwned,
{
    let mut value = serde_json::to_value(next)?;
    let status = serde_json::to_value(current)?
        .get("status")
        .cloned()
        .filter(|s| !s.is_null());
    if let Some(obj) = value.as_object_mut() {
        match status {
            Some(s) => {
                obj.insert("status".into(), s);
            }
            None => {
                obj.remove("status");
            }
        }
    }
    Ok(serde_json::from_value(value)?)
}

/// JSON merge patch: objects merge recursively, `null` deletes, anything else
/// replaces.
fn merge_patch(target: &mut Value, patch: &Value) {
    match (target.as_object_mut(), patch.as_object()) {
        (Some(t), Some(p)) => {
            for (k, v) in p {
                if v.is_null() {
                    t.remove(k);
                } else {
                    merge_patch(t.entry(k.clone()).or_insert(Value::Null), v);
                }
            }
        }
        _ => *target = patch.clone(),
    }
}

impl<K> MemoryStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync,
{
    /// Snapshot of every stored object.
    pub async fn list(&self) -> Vec<K> {
        self.state.read().await.objects.values().cloned().collect()
    }

    /// Write made by someone other than the controller: applies `f` and bumps
    /// the version unconditionally.
    pub async fn modify<F>(&self, namespace: &str, name: &str, f: F) -> StoreResult<K>
    where
        F: FnOnce(&mut K),
    {
        let mut state = self.state.write().await;
        let version = state.next_version();
        let obj = state
            .objects
            .get_mut(&key(namespace, name))
            .ok_or_else(|| StoreError::NotFound(label::<K>(namespace, name)))?;
        f(obj);
        obj.meta_mut().resource_version = Some(version);
        Ok(obj.clone())
    }

    pub async fn delete(&self, namespace: &str, name: &str) -> Option<K> {
        self.state
            .write()
            .await
            .objects
            .remove(&key(namespace, name))
    }

    /// Remove every object holding an owner reference to `uid`, the way the
    /// garbage collector does once an owner is gone.
    pub async fn delete_owned_by(&self, uid: &str) -> Vec<K> {
        let mut state = self.state.write().await;
        let owned: Vec<Key> = state
            .objects
            .iter()
            .filter(|(_, obj)| obj.owner_references().iter().any(|r| r.uid == uid))
            .map(|(k, _)| k.clone())
            .collect();
        owned
            .into_iter()
            .filter_map(|k| state.objects.remove(&k))
            .collect()
    }
}

#[async_trait]
impl<K> ObjectStore<K> for MemoryStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync,
{
    async fn get(&self, namespace: &str, name: &str) -> StoreResult<Option<K>> {
        let state = self.state.read().await;
        Ok(state.objects.get(&key(namespace, name)).cloned())
    }

    async fn create(&self, namespace: &str, obj: &K) -> StoreResult<K> {
        let name = obj.name_any();
        let mut state = self.state.write().await;
        let k = key(namespace, &name);
        if state.objects.contains_key(&k) {
            return Err(StoreError::AlreadyExists(label::<K>(namespace, &name)));
        }
        let version = state.next_version();
        let mut stored = obj.clone();
        let meta = stored.meta_mut();
        meta.namespace = Some(namespace.to_string());
        meta.uid = Some(format!("uid-{version}"));
        meta.resource_version = Some(version);
        meta.generation = Some(1);
        state.objects.insert(k, stored.clone());
        Ok(stored)
    }

    async fn replace(&self, namespace: &str, obj: &K) -> StoreResult<K> {
        let name = obj.name_any();
        let mut state = self.state.write().await;
        let k = key(namespace, &name);
        let current = state
            .objects
            .get(&k)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(label::<K>(namespace, &name)))?;
        if let Some(rv) = obj.resource_version() {
            if current.resource_version().as_deref() != Some(rv.as_str()) {
                return Err(StoreError::Conflict(label::<K>(namespace, &name)));
            }
        }

        let mut next = with_status_of(obj, &current)?;
        {
            let cur = current.meta();
            let meta = next.meta_mut();
            meta.namespace = Some(namespace.to_string());
            meta.uid = cur.uid.clone();
            meta.generation = cur.generation;
            meta.resource_version = cur.resource_version.clone();
            meta.deletion_timestamp = cur.deletion_timestamp.clone();
        }
        if serde_json::to_value(&next)? == serde_json::to_value(&current)? {
            return Ok(current);
        }
        next.meta_mut().resource_version = Some(state.next_version());
        state.objects.insert(k, next.clone());
        Ok(next)
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &Value,
    ) -> StoreResult<K> {
        let mut state = self.state.write().await;
        let k = key(namespace, name);
        let current = state
            .objects
            .get(&k)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(label::<K>(namespace, name)))?;

        let before = serde_json::to_value(&current)?;
        let mut value = before.clone();
        if let Some(obj) = value.as_object_mut() {
            merge_patch(obj.entry("status").or_insert(Value::Null), status);
        }
        if value == before {
            return Ok(current);
        }
        let mut next: K = serde_json::from_value(value)?;
        next.meta_mut().resource_version = Some(state.next_version());
        state.objects.insert(k, next.clone());
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
    use serde_json::json;
    use std::collections::BTreeMap;

    use crate::crd::app::{App, AppStatus};
    use crate::templates::manager::demo_app;

    fn cm(name: &str, value: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.into()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("k".to_string(), value.to_string())])),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_assigns_identity_and_rejects_duplicates() {
        let store = MemoryStore::<ConfigMap>::new();
        let created = store.create("ns", &cm("a", "1")).await.unwrap();
        assert!(created.metadata.uid.is_some());
        assert_eq!(created.metadata.namespace.as_deref(), Some("ns"));
        assert!(created.resource_version().is_some());

        let err = store.create("ns", &cm("a", "2")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert!(err.is_conflict());

        // same name in another namespace is a different object
        store.create("other", &cm("a", "1")).await.unwrap();
    }

    #[tokio::test]
    async fn replace_with_stale_version_conflicts() {
        let store = MemoryStore::<ConfigMap>::new();
        let created = store.create("ns", &cm("a", "1")).await.unwrap();
        store
            .modify("ns", "a", |c| c.data = Some(BTreeMap::new()))
            .await
            .unwrap();

        let mut stale = created.clone();
        stale.data = Some(BTreeMap::from([("k".to_string(), "3".to_string())]));
        let err = store.replace("ns", &stale).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn unchanged_replace_keeps_version() {
        let store = MemoryStore::<ConfigMap>::new();
        let created = store.create("ns", &cm("a", "1")).await.unwrap();
        let same = store.replace("ns", &created).await.unwrap();
        assert_eq!(same.resource_version(), created.resource_version());

        let mut changed = created.clone();
        changed.data = Some(BTreeMap::from([("k".to_string(), "2".to_string())]));
        let updated = store.replace("ns", &changed).await.unwrap();
        assert_ne!(updated.resource_version(), created.resource_version());
        assert_eq!(updated.metadata.uid, created.metadata.uid);
    }

    #[tokio::test]
    async fn replace_of_missing_object_is_not_found() {
        let store = MemoryStore::<ConfigMap>::new();
        let err = store.replace("ns", &cm("ghost", "1")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn status_lives_in_its_own_subresource() {
        let store = MemoryStore::<App>::new();
        let mut app = demo_app();
        app.metadata.uid = None;
        let created = store.create("app", &app).await.unwrap();

        let patched = store
            .patch_status("app", "demo", &json!({ "phase": "Available", "replicas": 2 }))
            .await
            .unwrap();
        assert_eq!(
            patched.status.as_ref().and_then(|s| s.phase.as_deref()),
            Some("Available")
        );

        // a spec write built from a status-less copy keeps the stored status
        let mut spec_write = created.clone();
        spec_write.metadata.resource_version = patched.metadata.resource_version.clone();
        spec_write.spec.size = Some(3);
        spec_write.status = Some(AppStatus::default());
        let updated = store.replace("app", &spec_write).await.unwrap();
        assert_eq!(updated.spec.size, Some(3));
        assert_eq!(updated.status.and_then(|s| s.replicas), Some(2));

        // identical status patch is a no-op
        let again = store
            .patch_status("app", "demo", &json!({ "phase": "Available" }))
            .await
            .unwrap();
        let stored = store.get("app", "demo").await.unwrap().unwrap();
        assert_eq!(again.resource_version(), stored.resource_version());
    }

    #[tokio::test]
    async fn owned_objects_are_collected_with_their_owner() {
        let store = MemoryStore::<ConfigMap>::new();
        let mut owned = cm("child", "1");
        owned.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "app.uisee.com/v1beta1".into(),
            kind: "App".into(),
            name: "demo".into(),
            uid: "uid-demo".into(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }]);
        store.create("ns", &owned).await.unwrap();
        store.create("ns", &cm("bystander", "1")).await.unwrap();

        let removed = store.delete_owned_by("uid-demo").await;
        assert_eq!(removed.len(), 1);
        assert!(store.get("ns", "child").await.unwrap().is_none());
        assert!(store.get("ns", "bystander").await.unwrap().is_some());
    }

    #[test]
    fn merge_patch_deletes_nulls_and_replaces_scalars() {
        let mut target = json!({ "a": 1, "b": { "c": 2, "d": 3 } });
        merge_patch(&mut target, &json!({ "a": null, "b": { "c": 5 }, "e": [1] }));
        assert_eq!(target, json!({ "b": { "c": 5, "d": 3 }, "e": [1] }));
    }
}
