use std::fmt;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument};

use super::events::{REASON_CREATED, REASON_UPDATED};
use super::retry::{retry_on_conflict, with_cancel};
use super::status::{status_from_deployment, status_patch};
use super::{ControllerContext, ReconcileErr};
use crate::crd::app::{App, AppSpec};
use crate::diff::{
    MergePolicy, SpecChange, merge_service, merge_workload, record_snapshot,
    replace_workload_spec, snapshot,
};
use crate::store::{ObjectStore, StoreError};
use crate::templates::{RenderContext, TemplateError, render};

/// What a converge step did to one managed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    Unchanged,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Created => write!(f, "created"),
            Outcome::Updated => write!(f, "updated"),
            Outcome::Unchanged => write!(f, "unchanged"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileReport {
    /// The App no longer exists.
    Absent,
    /// The App is being deleted; owner references take care of the rest.
    Deleting,
    Converged {
        workload: Outcome,
        endpoint: Outcome,
        snapshot_recorded: bool,
        status_patched: bool,
    },
}

type MergeFn<K> = fn(&mut K, &K) -> Result<bool, TemplateError>;

/// Controller runtime entry point.
pub async fn reconcile(
    obj: Arc<App>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, ReconcileErr> {
    let ns = obj.namespace().unwrap_or_else(|| "default".to_string());
    let name = obj.name_any();
    match reconcile_app(&ctx, &ns, &name).await? {
        ReconcileReport::Absent | ReconcileReport::Deleting => Ok(Action::await_change()),
        ReconcileReport::Converged { .. } => Ok(Action::requeue(ctx.cfg.resync())),
    }
}

/// Drive the Deployment and Service of App `namespace/name` toward the App's
/// spec. Safe to call any number of times.
#[instrument(skip(ctx), fields(policy = %ctx.cfg.policy()))]
pub async fn reconcile_app(
    ctx: &ControllerContext,
    namespace: &str,
    name: &str,
) -> Result<ReconcileReport, ReconcileErr> {
    let fetched = with_cancel(&ctx.cancel, ctx.stores.apps.get(namespace, name))
        .await
        .ok_or(ReconcileErr::Cancelled)??;
    let Some(app) = fetched else {
        debug!("app not found; nothing to do");
        return Ok(ReconcileReport::Absent);
    };
    if app.meta().deletion_timestamp.is_some() {
        debug!("app is being deleted; skipping");
        return Ok(ReconcileReport::Deleting);
    }

    let desired = render(&RenderContext {
        app: &app,
        service_type: &ctx.cfg.service_type,
    })?;

    let policy = ctx.cfg.policy();
    let change = match policy {
        MergePolicy::MutateInPlace => None,
        MergePolicy::AnnotationDiff => Some(snapshot::detect(&app)),
    };
    // unchanged spec under the annotation policy: only create what is missing
    let refresh = change.is_none_or(SpecChange::needs_write);
    let workload_merge: MergeFn<Deployment> = match policy {
        MergePolicy::MutateInPlace => merge_workload,
        MergePolicy::AnnotationDiff => replace_workload_spec,
    };

    let (workload, live_workload) = converge(
        ctx,
        ctx.stores.workloads.as_ref(),
        namespace,
        &desired.workload,
        refresh,
        workload_merge,
    )
    .await?;
    announce(ctx, &app, "Deployment", workload).await;

    let (endpoint, _) = converge(
        ctx,
        ctx.stores.endpoints.as_ref(),
        namespace,
        &desired.endpoint,
        refresh,
        merge_service,
    )
    .await?;
    announce(ctx, &app, "Service", endpoint).await;

    let snapshot_recorded = match change {
        Some(c) if c.needs_write() => {
            record_spec_snapshot(ctx, namespace, name, &app.spec).await?
        }
        _ => false,
    };

    let status_patched = if ctx.cfg.mirror_status {
        mirror_status(ctx, &app, &live_workload).await?
    } else {
        false
    };

    info!(
        %workload,
        %endpoint,
        snapshot_recorded,
        status_patched,
        "app reconciled"
    );
    Ok(ReconcileReport::Converged {
        workload,
        endpoint,
        snapshot_recorded,
        status_patched,
    })
}

/// Create the object if it is missing; otherwise merge `desired` into a fresh
/// read and write back only when something changed. Conflicts re-read.
async fn converge<K>(
    ctx: &ControllerContext,
    store: &dyn ObjectStore<K>,
    namespace: &str,
    desired: &K,
    refresh: bool,
    merge: MergeFn<K>,
) -> Result<(Outcome, K), ReconcileErr>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync,
{
    let kind = K::kind(&()).to_string();
    let name = desired.name_any();
    let name_ref = name.as_str();

    retry_on_conflict(&ctx.cfg.retry_policy(), &ctx.cancel, |attempt| async move {
        if attempt > 1 {
            debug!(name = name_ref, attempt, "retrying after conflict");
        }
        let Some(mut live) = store.get(namespace, name_ref).await? else {
            let created = store.create(namespace, desired).await?;
            return Ok((Outcome::Created, created));
        };
        if !refresh || !merge(&mut live, desired)? {
            return Ok((Outcome::Unchanged, live));
        }
        let updated = store.replace(namespace, &live).await?;
        Ok::<_, ReconcileErr>((Outcome::Updated, updated))
    })
    .await
    .map_err(|e| ReconcileErr::from_retry(e, &kind, &name))
}

async fn announce(ctx: &ControllerContext, app: &App, kind: &str, outcome: Outcome) {
    info!(kind, action = %outcome, "managed object converged");
    let reason = match outcome {
        Outcome::Created => REASON_CREATED,
        Outcome::Updated => REASON_UPDATED,
        Outcome::Unchanged => return,
    };
    let note = format!("{kind} {} {outcome}", app.name_any());
    ctx.events
        .publish(&app.object_ref(&()), EventType::Normal, reason, "Reconcile", Some(note))
        .await;
}

/// Persist `converged` as the App's last-applied snapshot. Skipped when the
/// App was deleted or its spec moved on since this pass read it; the newer
/// spec gets its own reconcile.
async fn record_spec_snapshot(
    ctx: &ControllerContext,
    namespace: &str,
    name: &str,
    converged: &AppSpec,
) -> Result<bool, ReconcileErr> {
    let apps = ctx.stores.apps.as_ref();
    retry_on_conflict(&ctx.cfg.retry_policy(), &ctx.cancel, |_| async move {
        let Some(mut app) = apps.get(namespace, name).await? else {
            return Ok(false);
        };
        if app.spec != *converged {
            debug!("spec changed during reconcile; leaving snapshot for the next pass");
            return Ok(false);
        }
        if !record_snapshot(&mut app)? {
            return Ok(false);
        }
        apps.replace(namespace, &app).await?;
        Ok::<_, ReconcileErr>(true)
    })
    .await
    .map_err(|e| ReconcileErr::from_retry(e, "App", name))
}

async fn mirror_status(
    ctx: &ControllerContext,
    app: &App,
    workload: &Deployment,
) -> Result<bool, ReconcileErr> {
    let next = status_from_deployment(workload, app.spec.desired_replicas());
    let Some(patch) = status_patch(app.status.as_ref(), &next)? else {
        return Ok(false);
    };
    let namespace = app.namespace().unwrap_or_default();
    let name = app.name_any();
    let patched = with_cancel(
        &ctx.cancel,
        ctx.stores.apps.patch_status(&namespace, &name, &patch),
    )
    .await
    .ok_or(ReconcileErr::Cancelled)?;
    match patched {
        Ok(_) => Ok(true),
        Err(StoreError::NotFound(_)) => Ok(false),
        Err(e) => Err(e.into()),
    }
}
