use k8s_openapi::api::apps::v1::Deployment;
use serde_json::{Map, Value};

use crate::crd::app::AppStatus;

pub const PHASE_PENDING: &str = "Pending";
pub const PHASE_PROGRESSING: &str = "Progressing";
pub const PHASE_AVAILABLE: &str = "Available";

/// App status mirrored from its Deployment. `desired` is the replica count
/// the App asks for.
pub fn status_from_deployment(dep: &Deployment, desired: i32) -> AppStatus {
    let Some(s) = dep.status.as_ref() else {
        return AppStatus {
            phase: Some(PHASE_PENDING.into()),
            ..Default::default()
        };
    };
    let available = s.available_replicas.unwrap_or(0);
    let observed = match (s.observed_generation, dep.metadata.generation) {
        (Some(seen), Some(current)) => seen >= current,
        _ => true,
    };
    let phase = if observed && available >= desired {
        PHASE_AVAILABLE
    } else {
        PHASE_PROGRESSING
    };
    AppStatus {
        phase: Some(phase.into()),
        replicas: s.replicas,
        ready_replicas: s.ready_replicas,
        available_replicas: s.available_replicas,
        updated_replicas: s.updated_replicas,
        unavailable_replicas: s.unavailable_replicas,
        observed_generation: s.observed_generation,
        conditions: s.conditions.clone(),
    }
}

/// Merge patch turning `current` into `next`: fields that disappeared are
/// sent as `null` so the merge removes them. `None` when nothing differs.
pub fn status_patch(
    current: Option<&AppStatus>,
    next: &AppStatus,
) -> Result<Option<Value>, serde_json::Error> {
    if current == Some(next) {
        return Ok(None);
    }
    let mut patch = match serde_json::to_value(next)? {
        Value::Object(m) => m,
        _ => Map::new(),
    };
    if let Some(Value::Object(old)) = current.map(serde_json::to_value).transpose()? {
        for key in old.keys() {
            patch.entry(key.clone()).or_insert(Value::Null);
        }
    }
    Ok(Some(Value::Object(patch)))
}
