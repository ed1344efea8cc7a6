use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

use super::TemplateError;
use crate::crd::app::App;

/// Controlling owner reference pointing at `app` (controller and
/// blockOwnerDeletion both set).
pub fn controller_owner_ref(app: &App) -> Result<OwnerReference, TemplateError> {
    app.controller_owner_ref(&())
        .ok_or_else(|| TemplateError::MissingOwnerIdentity(app.name_any()))
}

/// Make `owner` the controlling owner of the object described by `meta`.
///
/// A reference with the same uid is refreshed in place; other non-controller
/// owners are kept. Returns whether `meta` changed. An object that is already
/// controlled by a different owner is rejected: there is exactly one
/// controller per object.
pub fn set_controller_reference(
    kind: &str,
    meta: &mut ObjectMeta,
    owner: &OwnerReference,
) -> Result<bool, TemplateError> {
    let refs = meta.owner_references.get_or_insert_with(Vec::new);

    if let Some(other) = refs
        .iter()
        .find(|r| r.controller == Some(true) && r.uid != owner.uid)
    {
        return Err(TemplateError::AlreadyControlled {
            kind: kind.to_string(),
            name: meta.name.clone().unwrap_or_default(),
            owner_kind: other.kind.clone(),
            owner_name: other.name.clone(),
        });
    }

    match refs.iter_mut().find(|r| r.uid == owner.uid) {
        Some(existing) if existing == owner => Ok(false),
        Some(existing) => {
            *existing = owner.clone();
            Ok(true)
        }
        None => {
            refs.push(owner.clone());
            Ok(true)
        }
    }
}
