use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::workload::DEFAULT_PROTOCOL;
use crate::crd::app::AppSpec;

pub fn render_service(
    name: &str,
    namespace: &str,
    spec: &AppSpec,
    labels: &BTreeMap<String, String>,
    owner: OwnerReference,
    service_type: &str,
) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(labels.clone()),
            ports: Some(
                spec.ports.iter().map(service_port_with_defaults).collect(),
            ),
            type_: Some(service_type.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Fill the values the API server would default (protocol, targetPort) so a
/// stored Service compares equal to a freshly rendered one.
pub fn service_port_with_defaults(port: &ServicePort) -> ServicePort {
    let mut port = port.clone();
    if port.protocol.is_none() {
        port.protocol = Some(DEFAULT_PROTOCOL.to_string());
    }
    if port.target_port.is_none() {
        port.target_port = Some(IntOrString::Int(port.port));
    }
    port
}
