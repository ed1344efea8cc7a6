pub mod events;
pub mod reconcile;
pub mod retry;
pub mod status;

use std::sync::Arc;

use futures_util::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::{Controller, watcher::Config};
use kube::{Api, Client, Resource, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::OperatorConfig;
use crate::crd::app::App;
use crate::store::{KubeStore, ObjectStore, StoreError};
use crate::templates::TemplateError;
use events::{EventPublisher, KubeEventPublisher, NoopEventPublisher};
use retry::{Conflict, RetryError};

pub use reconcile::{Outcome, ReconcileReport, reconcile, reconcile_app};

/// Field manager and Event reporting component.
pub const CONTROLLER_NAME: &str = "app-operator";

#[derive(thiserror::Error, Debug)]
pub enum ReconcileErr {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("{kind} {name}: still conflicting after {attempts} attempts")]
    ConflictRetriesExhausted {
        kind: String,
        name: String,
        attempts: u32,
    },
    #[error("template error: {0}")]
    Template(#[from] TemplateError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("reconcile cancelled")]
    Cancelled,
}

impl Conflict for ReconcileErr {
    fn is_conflict(&self) -> bool {
        matches!(self, ReconcileErr::Store(e) if e.is_conflict())
    }
}

impl ReconcileErr {
    pub(crate) fn from_retry(e: RetryError<ReconcileErr>, kind: &str, name: &str) -> Self {
        match e {
            RetryError::Exhausted { attempts, last } => {
                warn!(kind, name, attempts, error = %last, "giving up on conflicting writes");
                ReconcileErr::ConflictRetriesExhausted {
                    kind: kind.to_string(),
                    name: name.to_string(),
                    attempts,
                }
            }
            RetryError::Failed(e) => e,
            RetryError::Cancelled => ReconcileErr::Cancelled,
        }
    }
}

/// Stores for the owner kind and both managed kinds.
#[derive(Clone)]
pub struct Stores {
    pub apps: Arc<dyn ObjectStore<App>>,
    pub workloads: Arc<dyn ObjectStore<Deployment>>,
    pub endpoints: Arc<dyn ObjectStore<Service>>,
}

impl Stores {
    pub fn kube(client: Client) -> Self {
        Self {
            apps: Arc::new(KubeStore::<App>::new(client.clone(), CONTROLLER_NAME)),
            workloads: Arc::new(KubeStore::<Deployment>::new(
                client.clone(),
                CONTROLLER_NAME,
            )),
            endpoints: Arc::new(KubeStore::<Service>::new(client, CONTROLLER_NAME)),
        }
    }
}

#[derive(Clone)]
pub struct ControllerContext {
    pub stores: Stores,
    pub cfg: OperatorConfig,
    pub events: Arc<dyn EventPublisher>,
    pub cancel: CancellationToken,
}

impl ControllerContext {
    pub fn new(stores: Stores, cfg: OperatorConfig) -> Self {
        Self {
            stores,
            cfg,
            events: Arc::new(NoopEventPublisher),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// The App controlling `obj`, if any. Only a controller owner reference of
/// this App kind and version counts.
pub fn owning_app<K: Resource>(obj: K) -> Option<ObjectRef<App>> {
    let namespace = obj.namespace()?;
    let kind = App::kind(&());
    let api_version = App::api_version(&());
    obj.owner_references()
        .iter()
        .find(|r| {
            r.controller == Some(true) && r.kind == kind && r.api_version == api_version
        })
        .map(|r| ObjectRef::new(&r.name).within(&namespace))
}

/// Register App with the controller runtime and map changes to owned
/// Deployments and Services back to their App. Runs until `cancel` fires.
pub async fn run_controller(
    client: Client,
    cfg: OperatorConfig,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let namespace = cfg.watch_namespace().map(str::to_string);
    let apps: Api<App> = scoped_api(&client, namespace.as_deref());
    let deployments: Api<Deployment> = scoped_api(&client, namespace.as_deref());
    let services: Api<Service> = scoped_api(&client, namespace.as_deref());

    let events: Arc<dyn EventPublisher> = if cfg.events {
        Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME))
    } else {
        Arc::new(NoopEventPublisher)
    };
    info!(
        policy = %cfg.policy(),
        namespace = namespace.as_deref().unwrap_or("<all>"),
        "starting app controller"
    );
    let ctx = Arc::new(
        ControllerContext::new(Stores::kube(client), cfg)
            .with_events(events)
            .with_cancel(cancel.clone()),
    );

    Controller::new(apps, Config::default())
        .watches(deployments, Config::default(), owning_app::<Deployment>)
        .watches(services, Config::default(), owning_app::<Service>)
        .graceful_shutdown_on(async move { cancel.cancelled().await })
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj_ref, action)) => {
                    info!(app = %obj_ref, ?action, "reconciled")
                }
                Err(e) => error!(error = ?e, "reconcile error"),
            }
        })
        .await;

    info!("app controller stopped");
    Ok(())
}

fn error_policy(
    obj: Arc<App>,
    error: &ReconcileErr,
    ctx: Arc<ControllerContext>,
) -> Action {
    if matches!(error, ReconcileErr::Cancelled) {
        return Action::await_change();
    }
    warn!(
        ns = %obj.namespace().unwrap_or_default(),
        name = %obj.name_any(),
        error = %error,
        "reconcile failed; requeueing"
    );
    Action::requeue(ctx.cfg.error_requeue())
}
