use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, Service, ServicePort};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use super::equivalence::{same_env, same_resources};
use crate::templates::{TemplateError, service_port_with_defaults, set_controller_reference};

/// Merge the controller-owned fields of `desired` into `live`.
///
/// Owned: selector labels on metadata and pod template, the controller owner
/// reference, `replicas`, the selector while it is still unset, and image,
/// ports, resources and env of the container named after the App. Everything
/// else on the live object (extra labels, annotations, sidecars, strategy,
/// server defaults) is left as found. Returns whether `live` changed.
pub fn merge_workload(
    live: &mut Deployment,
    desired: &Deployment,
) -> Result<bool, TemplateError> {
    let before = live.clone();
    merge_owned_meta("Deployment", &mut live.metadata, &desired.metadata)?;

    let Some(want) = desired.spec.as_ref() else {
        return Ok(*live != before);
    };
    let spec = live.spec.get_or_insert_with(Default::default);
    spec.replicas = want.replicas;
    // selector is immutable once the Deployment exists
    if spec.selector == LabelSelector::default() {
        spec.selector = want.selector.clone();
    }

    let want_labels = want
        .template
        .metadata
        .as_ref()
        .and_then(|m| m.labels.as_ref());
    if let Some(labels) = want_labels {
        let meta = spec.template.metadata.get_or_insert_with(Default::default);
        merge_labels(&mut meta.labels, labels);
    }

    if let Some(want_pod) = want.template.spec.as_ref() {
        let pod = spec.template.spec.get_or_insert_with(Default::default);
        for container in &want_pod.containers {
            match pod.containers.iter_mut().find(|c| c.name == container.name) {
                Some(existing) => merge_container(existing, container),
                None => pod.containers.push(container.clone()),
            }
        }
    }

    Ok(*live != before)
}

/// Full spec replacement used by the annotation-diff policy once the App spec
/// is known to have moved. The live selector is kept.
pub fn replace_workload_spec(
    live: &mut Deployment,
    desired: &Deployment,
) -> Result<bool, TemplateError> {
    let before = live.clone();
    merge_owned_meta("Deployment", &mut live.metadata, &desired.metadata)?;

    let mut spec = desired.spec.clone().unwrap_or_default();
    if let Some(current) = live.spec.as_ref() {
        if current.selector != LabelSelector::default() {
            spec.selector = current.selector.clone();
        }
    }
    live.spec = Some(spec);
    Ok(*live != before)
}

/// Merge the controller-owned fields of `desired` into a live Service:
/// selector labels, owner reference, `selector`, `type` and `ports`.
/// Node ports the cluster allocated are carried over for ports that still
/// exist while the type keeps exposing node ports; `clusterIP` and anything
/// else are left alone.
pub fn merge_service(
    live: &mut Service,
    desired: &Service,
) -> Result<bool, TemplateError> {
    let before = live.clone();
    merge_owned_meta("Service", &mut live.metadata, &desired.metadata)?;

    let Some(want) = desired.spec.as_ref() else {
        return Ok(*live != before);
    };
    let spec = live.spec.get_or_insert_with(Default::default);
    spec.selector = want.selector.clone();
    if want.type_.is_some() {
        spec.type_ = want.type_.clone();
    }

    let keeps_node_ports = matches!(
        spec.type_.as_deref(),
        Some("NodePort") | Some("LoadBalancer")
    );
    let live_ports = spec.ports.take().unwrap_or_default();
    let ports: Vec<ServicePort> = want
        .ports
        .iter()
        .flatten()
        .map(|p| {
            let mut port = service_port_with_defaults(p);
            if keeps_node_ports && port.node_port.is_none() {
                port.node_port = live_ports
                    .iter()
                    .find(|l| same_port(l, &port))
                    .and_then(|l| l.node_port);
            }
            port
        })
        .collect();
    spec.ports = (!ports.is_empty()).then_some(ports);

    Ok(*live != before)
}

fn same_port(a: &ServicePort, b: &ServicePort) -> bool {
    a.port == b.port
        && a.protocol.as_deref().unwrap_or("TCP")
            == b.protocol.as_deref().unwrap_or("TCP")
}

// resources and env are only rewritten when they differ in value, since the
// server stores them in canonical form
fn merge_container(live: &mut Container, want: &Container) {
    live.image = want.image.clone();
    live.ports = want.ports.clone();
    if !same_resources(live.resources.as_ref(), want.resources.as_ref()) {
        live.resources = want.resources.clone();
    }
    if !same_env(live.env.as_deref(), want.env.as_deref()) {
        live.env = want.env.clone();
    }
}

fn merge_owned_meta(
    kind: &str,
    live: &mut ObjectMeta,
    desired: &ObjectMeta,
) -> Result<(), TemplateError> {
    if let Some(labels) = desired.labels.as_ref() {
        merge_labels(&mut live.labels, labels);
    }
    for owner in desired
        .owner_references
        .iter()
        .flatten()
        .filter(|r| r.controller == Some(true))
    {
        set_controller_reference(kind, live, owner)?;
    }
    Ok(())
}

fn merge_labels(
    live: &mut Option<BTreeMap<String, String>>,
    want: &BTreeMap<String, String>,
) {
    let labels = live.get_or_insert_with(BTreeMap::new);
    for (k, v) in want {
        labels.insert(k.clone(), v.clone());
    }
}
