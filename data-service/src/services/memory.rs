use crate::models::{InsertedId, JsonDocument, ID_FIELD};
use crate::services::backend::{BackendError, StoreBackend};
use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Process-local document store.
///
/// Reachability can be switched off to simulate an outage or a restart of
/// the store; stored documents survive the switch the way a durable store's
/// data survives a restart.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    unreachable: AtomicBool,
    session_open: AtomicBool,
    documents: Mutex<Vec<JsonDocument>>,
    open_calls: AtomicUsize,
    insert_calls: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
        tracing::info!(reachable, "In-memory store reachability changed");
    }

    pub fn is_reachable(&self) -> bool {
        !self.unreachable.load(Ordering::SeqCst)
    }

    /// Number of `open` calls made, successful or not.
    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    /// Number of `insert` calls that reached the store.
    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    pub fn document_count(&self) -> usize {
        self.lock_documents().map(|docs| docs.len()).unwrap_or(0)
    }

    fn check_session(&self) -> Result<(), BackendError> {
        if !self.is_reachable() {
            return Err(BackendError::connectivity("in-memory store is unreachable"));
        }
        if !self.session_open.load(Ordering::SeqCst) {
            return Err(BackendError::connectivity("no session established"));
        }
        Ok(())
    }

    fn lock_documents(&self) -> Result<std::sync::MutexGuard<'_, Vec<JsonDocument>>, BackendError> {
        self.documents
            .lock()
            .map_err(|_| BackendError::Operation(anyhow::anyhow!("document list lock poisoned")))
    }
}

#[async_trait]
impl StoreBackend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn open(&self) -> Result<(), BackendError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        if !self.is_reachable() {
            return Err(BackendError::connectivity("in-memory store is unreachable"));
        }
        self.session_open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn insert(&self, mut document: JsonDocument) -> Result<InsertedId, BackendError> {
        self.check_session()?;
        self.insert_calls.fetch_add(1, Ordering::SeqCst);

        let id = document
            .entry(ID_FIELD)
            .or_insert_with(|| Value::String(ObjectId::new().to_hex()))
            .clone();

        let mut documents = self.lock_documents()?;
        if documents.iter().any(|existing| existing.get(ID_FIELD) == Some(&id)) {
            return Err(BackendError::Duplicate(format!("{} {}", ID_FIELD, id)));
        }
        documents.push(document);

        Ok(match id {
            Value::String(s) => InsertedId::new(s),
            other => InsertedId::new(other.to_string()),
        })
    }

    async fn list(&self) -> Result<Vec<JsonDocument>, BackendError> {
        self.check_session()?;
        Ok(self.lock_documents()?.clone())
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.check_session()
    }
}
