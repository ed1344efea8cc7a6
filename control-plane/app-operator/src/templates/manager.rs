use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;

use super::{controller_owner_ref, render_deployment, render_service};
use crate::crd::app::App;

/// Pod label tying the workload's pods to the endpoint's selector.
pub const SELECTOR_LABEL: &str = "appname";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum TemplateError {
    #[error("App {0} has no uid yet; owner reference cannot be built")]
    MissingOwnerIdentity(String),
    #[error("App {0} has no namespace")]
    MissingNamespace(String),
    #[error("{kind} {name} is already controlled by {owner_kind} {owner_name}")]
    AlreadyControlled {
        kind: String,
        name: String,
        owner_kind: String,
        owner_name: String,
    },
}

#[derive(Clone, Debug)]
pub struct RenderContext<'a> {
    pub app: &'a App,
    /// Service type for the endpoint (NodePort, ClusterIP, LoadBalancer).
    pub service_type: &'a str,
}

/// Complete desired shape of every managed object for one App.
#[derive(Clone, Debug, PartialEq)]
pub struct DesiredState {
    pub workload: Deployment,
    pub endpoint: Service,
}

pub fn selector_labels(app_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(SELECTOR_LABEL.to_string(), app_name.to_string())])
}

/// Render the Deployment and Service for an App. Pure: no I/O, input untouched.
pub fn render(ctx: &RenderContext<'_>) -> Result<DesiredState, TemplateError> {
    let app = ctx.app;
    let name = app.name_any();
    let namespace = app
        .namespace()
        .ok_or_else(|| TemplateError::MissingNamespace(name.clone()))?;
    let owner = controller_owner_ref(app)?;
    let labels = selector_labels(&name);

    Ok(DesiredState {
        workload: render_deployment(
            &name,
            &namespace,
            &app.spec,
            &labels,
            owner.clone(),
        ),
        endpoint: render_service(
            &name,
            &namespace,
            &app.spec,
            &labels,
            owner,
            ctx.service_type,
        ),
    })
}

/// Owner used across unit tests: app/demo, size 2, nginx:1.25, 8080->80.
#[cfg(test)]
pub(crate) fn demo_app() -> App {
    use crate::crd::app::AppSpec;
    use k8s_openapi::api::core::v1::ServicePort;
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

    let mut app = App::new(
        "demo",
        AppSpec {
            size: Some(2),
            image: "nginx:1.25".into(),
            ports: vec![ServicePort {
                port: 8080,
                target_port: Some(IntOrString::Int(80)),
                ..Default::default()
            }],
            ..Default::default()
        },
    );
    app.metadata.namespace = Some("app".into());
    app.metadata.uid = Some("uid-demo".into());
    app
}
