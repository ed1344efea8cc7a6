//! Object store seam between the reconcile engine and the API server.

mod cluster;
mod memory;

pub use cluster::KubeStore;
pub use memory::MemoryStore;

use async_trait::async_trait;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    /// resourceVersion on the write no longer matches the stored object.
    #[error("Conflict writing {0}")]
    Conflict(String),

    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Errors that clear up after re-reading the object and trying again.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::AlreadyExists(_))
    }
}

/// Namespaced get/create/replace over one object kind.
///
/// `replace` is optimistic: it carries the `resourceVersion` of the object it
/// was derived from and fails with [`StoreError::Conflict`] when that version
/// is stale. `patch_status` merges `status` into the status subresource only.
#[async_trait]
pub trait ObjectStore<K>: Send + Sync
where
    K: Send + Sync,
{
    async fn get(&self, namespace: &str, name: &str) -> StoreResult<Option<K>>;
    async fn create(&self, namespace: &str, obj: &K) -> StoreResult<K>;
    async fn replace(&self, namespace: &str, obj: &K) -> StoreResult<K>;
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &serde_json::Value,
    ) -> StoreResult<K>;
}
