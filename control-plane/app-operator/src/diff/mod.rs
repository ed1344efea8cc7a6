//! Change detection for managed objects.
//!
//! Two policies decide whether a reconcile writes anything:
//! - [`MergePolicy::MutateInPlace`] recomputes the desired shape every time and
//!   merges only controller-owned fields into the live object ([`merge`]).
//! - [`MergePolicy::AnnotationDiff`] compares the App spec with the snapshot
//!   stored on the App itself ([`snapshot`]) and only touches managed objects
//!   when the spec moved.

pub mod equivalence;
pub mod merge;
pub mod snapshot;

pub use merge::{merge_service, merge_workload, replace_workload_spec};
pub use snapshot::{
    Baseline, LAST_APPLIED_SPEC_ANNOTATION, SpecChange, detect, read_baseline,
    record_snapshot,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    MutateInPlace,
    AnnotationDiff,
}

impl MergePolicy {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "annotation" | "annotation-diff" | "annotationdiff" => {
                MergePolicy::AnnotationDiff
            }
            _ => MergePolicy::MutateInPlace,
        }
    }
}

impl std::fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergePolicy::MutateInPlace => write!(f, "mutate"),
            MergePolicy::AnnotationDiff => write!(f, "annotation"),
        }
    }
}
