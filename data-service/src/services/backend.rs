use crate::models::{InsertedId, JsonDocument};
use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by a backend, already stripped of driver types.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The store could not be reached, or the session is gone.
    #[error("store unreachable: {0}")]
    Connectivity(anyhow::Error),

    /// A document with the same identifier is already stored.
    #[error("duplicate key: {0}")]
    Duplicate(String),

    /// The store answered but refused or failed the operation.
    #[error("store operation failed: {0}")]
    Operation(anyhow::Error),
}

impl BackendError {
    pub fn connectivity(message: impl std::fmt::Display) -> Self {
        BackendError::Connectivity(anyhow::anyhow!("{}", message))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Connectivity(_))
    }
}

/// Raw I/O against a document store.
///
/// Implementations hold the session handle and perform single, unretried
/// calls. Connection state, timeouts and reconnect policy live in
/// [`StoreClient`](super::StoreClient).
#[async_trait]
pub trait StoreBackend: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Establish (or re-verify) a session.
    async fn open(&self) -> Result<(), BackendError>;

    async fn insert(&self, document: JsonDocument) -> Result<InsertedId, BackendError>;

    async fn list(&self) -> Result<Vec<JsonDocument>, BackendError>;

    /// Cheap round trip on the existing session. Must not open one.
    async fn ping(&self) -> Result<(), BackendError>;
}
