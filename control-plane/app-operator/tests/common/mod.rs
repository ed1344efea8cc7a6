#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use app_operator::config::OperatorConfig;
use app_operator::controller::events::EventPublisher;
use app_operator::controller::{ControllerContext, Stores};
use app_operator::crd::app::{App, AppSpec};
use app_operator::store::{MemoryStore, ObjectStore, StoreError, StoreResult};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    ObjectReference, ResourceRequirements, Service, ServicePort,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

const NAME_ALPHABET: [char; 16] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f',
];

/// `prefix` plus a random lowercase suffix, valid as an object name.
pub fn unique_name(prefix: &str) -> String {
    format!("{prefix}-{}", nanoid::nanoid!(8, &NAME_ALPHABET))
}

/// Sets environment variables for the life of the value and restores the
/// previous values on drop.
pub struct ScopedEnv {
    saved: Vec<(&'static str, Option<String>)>,
}

impl ScopedEnv {
    pub fn set(vars: &[(&'static str, &str)]) -> Self {
        let saved = vars
            .iter()
            .map(|(key, value)| {
                let old = std::env::var(key).ok();
                // SAFETY: only the single live-cluster test sets variables
                unsafe { std::env::set_var(key, value) };
                (*key, old)
            })
            .collect();
        Self { saved }
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        for (key, old) in self.saved.drain(..).rev() {
            unsafe {
                match old {
                    Some(v) => std::env::set_var(key, v),
                    None => std::env::remove_var(key),
                }
            }
        }
    }
}

pub const NS: &str = "app";
pub const NAME: &str = "demo";

/// app/demo: size 2, nginx:1.25, port 8080 -> 80.
pub fn demo_spec() -> AppSpec {
    AppSpec {
        size: Some(2),
        image: "nginx:1.25".into(),
        ports: vec![ServicePort {
            port: 8080,
            target_port: Some(IntOrString::Int(80)),
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// What the API server adds to a stored Deployment that the controller never
/// renders: an explicit empty `resources`, pull/termination defaults, strategy.
pub fn apply_server_defaults(dep: &mut Deployment) {
    let Some(spec) = dep.spec.as_mut() else {
        return;
    };
    spec.revision_history_limit.get_or_insert(10);
    spec.progress_deadline_seconds.get_or_insert(600);
    spec.strategy.get_or_insert_with(|| DeploymentStrategy {
        type_: Some("RollingUpdate".into()),
        ..Default::default()
    });
    let Some(pod) = spec.template.spec.as_mut() else {
        return;
    };
    pod.restart_policy.get_or_insert_with(|| "Always".into());
    pod.dns_policy.get_or_insert_with(|| "ClusterFirst".into());
    for c in &mut pod.containers {
        c.resources.get_or_insert_with(ResourceRequirements::default);
        c.image_pull_policy.get_or_insert_with(|| "IfNotPresent".into());
        c.termination_message_path
            .get_or_insert_with(|| "/dev/termination-log".into());
        c.termination_message_policy
            .get_or_insert_with(|| "File".into());
        for var in c.env.iter_mut().flatten() {
            if let Some(field_ref) =
                var.value_from.as_mut().and_then(|v| v.field_ref.as_mut())
            {
                field_ref.api_version.get_or_insert_with(|| "v1".into());
            }
        }
    }
}

/// Retries fast enough for tests.
pub fn test_config(policy: &str) -> OperatorConfig {
    let mut cfg = OperatorConfig {
        merge_policy: policy.into(),
        ..Default::default()
    };
    cfg.retry.base_delay_ms = 1;
    cfg.retry.max_delay_ms = 2;
    cfg
}

/// API server stand-in: one in-memory store per kind.
#[derive(Clone, Default)]
pub struct MemoryCluster {
    pub apps: MemoryStore<App>,
    pub workloads: MemoryStore<Deployment>,
    pub endpoints: MemoryStore<Service>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stores(&self) -> Stores {
        Stores {
            apps: Arc::new(self.apps.clone()),
            workloads: Arc::new(self.workloads.clone()),
            endpoints: Arc::new(self.endpoints.clone()),
        }
    }

    pub fn context(&self, cfg: OperatorConfig) -> ControllerContext {
        ControllerContext::new(self.stores(), cfg)
    }

    pub async fn create_app(&self, name: &str, spec: AppSpec) -> App {
        self.apps
            .create(NS, &App::new(name, spec))
            .await
            .expect("create app")
    }

    pub async fn workload(&self, name: &str) -> Option<Deployment> {
        self.workloads.get(NS, name).await.expect("get deployment")
    }

    pub async fn endpoint(&self, name: &str) -> Option<Service> {
        self.endpoints.get(NS, name).await.expect("get service")
    }

    pub async fn app(&self, name: &str) -> Option<App> {
        self.apps.get(NS, name).await.expect("get app")
    }

    /// Delete an App and let the garbage collector follow its owner references.
    pub async fn delete_app(&self, name: &str) {
        let Some(app) = self.apps.delete(NS, name).await else {
            return;
        };
        let uid = app.uid().expect("stored app has uid");
        self.workloads.delete_owned_by(&uid).await;
        self.endpoints.delete_owned_by(&uid).await;
    }
}

/// Store wrapper simulating another writer: before each of the next
/// `interferences` replaces it edits the stored object, so the replace
/// carries a stale resourceVersion.
pub struct InterferingStore<K> {
    inner: MemoryStore<K>,
    remaining: AtomicU32,
    edit: fn(&mut K),
    pub replaces: AtomicU32,
}

impl<K> InterferingStore<K> {
    pub fn new(inner: MemoryStore<K>, interferences: u32, edit: fn(&mut K)) -> Self {
        Self {
            inner,
            remaining: AtomicU32::new(interferences),
            edit,
            replaces: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl<K> ObjectStore<K> for InterferingStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync,
{
    async fn get(&self, namespace: &str, name: &str) -> StoreResult<Option<K>> {
        self.inner.get(namespace, name).await
    }

    async fn create(&self, namespace: &str, obj: &K) -> StoreResult<K> {
        self.inner.create(namespace, obj).await
    }

    async fn replace(&self, namespace: &str, obj: &K) -> StoreResult<K> {
        self.replaces.fetch_add(1, Ordering::SeqCst);
        let interfere = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if interfere {
            self.inner
                .modify(namespace, &obj.name_any(), self.edit)
                .await?;
        }
        self.inner.replace(namespace, obj).await
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &serde_json::Value,
    ) -> StoreResult<K> {
        self.inner.patch_status(namespace, name, status).await
    }
}

/// Reads work, every write fails with an API error.
pub struct ReadOnlyStore<K> {
    inner: MemoryStore<K>,
}

impl<K> ReadOnlyStore<K> {
    pub fn new(inner: MemoryStore<K>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<K> ObjectStore<K> for ReadOnlyStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync,
{
    async fn get(&self, namespace: &str, name: &str) -> StoreResult<Option<K>> {
        self.inner.get(namespace, name).await
    }

    async fn create(&self, _namespace: &str, _obj: &K) -> StoreResult<K> {
        Err(StoreError::Api("admission webhook denied the request".into()))
    }

    async fn replace(&self, _namespace: &str, _obj: &K) -> StoreResult<K> {
        Err(StoreError::Api("admission webhook denied the request".into()))
    }

    async fn patch_status(
        &self,
        _namespace: &str,
        _name: &str,
        _status: &serde_json::Value,
    ) -> StoreResult<K> {
        Err(StoreError::Api("admission webhook denied the request".into()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub regarding: Option<String>,
    pub reason: String,
    pub note: Option<String>,
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub events: Mutex<Vec<RecordedEvent>>,
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(
        &self,
        regarding: &ObjectReference,
        _type_: EventType,
        reason: &str,
        _action: &str,
        note: Option<String>,
    ) {
        self.events.lock().await.push(RecordedEvent {
            regarding: regarding.name.clone(),
            reason: reason.to_string(),
            note,
        });
    }
}
