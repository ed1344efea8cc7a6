use kube::ResourceExt;
use tracing::debug;

use crate::crd::app::{App, AppSpec};

/// Owner annotation holding the JSON of the last successfully reconciled spec.
pub const LAST_APPLIED_SPEC_ANNOTATION: &str = "app.uisee.com/last-applied-spec";

#[derive(Debug, Clone, PartialEq)]
pub enum Baseline {
    Missing,
    Unparsable(String),
    Present(AppSpec),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecChange {
    Unchanged,
    Changed,
    /// No usable snapshot; always reconcile.
    NoBaseline,
}

impl SpecChange {
    pub fn needs_write(self) -> bool {
        !matches!(self, SpecChange::Unchanged)
    }
}

pub fn read_baseline(app: &App) -> Baseline {
    match app.annotations().get(LAST_APPLIED_SPEC_ANNOTATION) {
        None => Baseline::Missing,
        Some(raw) => match serde_json::from_str::<AppSpec>(raw) {
            Ok(spec) => Baseline::Present(spec),
            Err(e) => Baseline::Unparsable(e.to_string()),
        },
    }
}

pub fn detect(app: &App) -> SpecChange {
    match read_baseline(app) {
        Baseline::Present(prev) if prev == app.spec => SpecChange::Unchanged,
        Baseline::Present(_) => SpecChange::Changed,
        Baseline::Missing => SpecChange::NoBaseline,
        Baseline::Unparsable(reason) => {
            debug!(name = %app.name_any(), %reason, "last-applied snapshot unreadable; treating as absent");
            SpecChange::NoBaseline
        }
    }
}

/// Store the current spec as the baseline. Returns whether the annotation
/// value changed.
pub fn record_snapshot(app: &mut App) -> Result<bool, serde_json::Error> {
    let data = serde_json::to_string(&app.spec)?;
    let previous = app
        .annotations_mut()
        .insert(LAST_APPLIED_SPEC_ANNOTATION.to_string(), data.clone());
    Ok(previous.as_deref() != Some(data.as_str()))
}
