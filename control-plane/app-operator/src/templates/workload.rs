use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, ServicePort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, ObjectMeta, OwnerReference,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::crd::app::AppSpec;

pub const DEFAULT_PROTOCOL: &str = "TCP";
/// API version the server fills into a `fieldRef` that names none.
pub const DEFAULT_FIELD_REF_API_VERSION: &str = "v1";

pub fn render_deployment(
    name: &str,
    namespace: &str,
    spec: &AppSpec,
    labels: &BTreeMap<String, String>,
    owner: OwnerReference,
) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(spec.desired_replicas()),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![render_container(name, spec)],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The single container this controller manages, named after the App.
/// Resources and env are rendered the way the server stores them.
pub fn render_container(name: &str, spec: &AppSpec) -> Container {
    let ports: Vec<ContainerPort> =
        spec.ports.iter().map(container_port_for).collect();
    Container {
        name: name.to_string(),
        image: Some(spec.image.clone()),
        ports: (!ports.is_empty()).then_some(ports),
        resources: Some(spec.resources.clone().unwrap_or_default()),
        env: (!spec.envs.is_empty())
            .then(|| spec.envs.iter().map(env_var_with_defaults).collect()),
        ..Default::default()
    }
}

pub fn env_var_with_defaults(var: &EnvVar) -> EnvVar {
    let mut var = var.clone();
    if let Some(field_ref) = var
        .value_from
        .as_mut()
        .and_then(|source| source.field_ref.as_mut())
    {
        field_ref
            .api_version
            .get_or_insert_with(|| DEFAULT_FIELD_REF_API_VERSION.to_string());
    }
    var
}

/// Map a declared service port onto the container port it routes to.
/// A named target port refers to a container port by name, so the binding
/// takes that name and the service port number.
pub fn container_port_for(port: &ServicePort) -> ContainerPort {
    let (container_port, name) = match &port.target_port {
        Some(IntOrString::Int(n)) => (*n, port.name.clone()),
        Some(IntOrString::String(s)) => (port.port, Some(s.clone())),
        None => (port.port, port.name.clone()),
    };
    ContainerPort {
        container_port,
        name,
        protocol: Some(
            port.protocol
                .clone()
                .unwrap_or_else(|| DEFAULT_PROTOCOL.to_string()),
        ),
        ..Default::default()
    }
}
