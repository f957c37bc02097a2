//! Backends with scripted timing, for unit tests.

use crate::models::{InsertedId, JsonDocument};
use crate::services::backend::{BackendError, StoreBackend};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

/// Opens fine, then never answers anything else.
pub struct HangingBackend;

#[async_trait]
impl StoreBackend for HangingBackend {
    fn name(&self) -> &'static str {
        "hanging"
    }

    async fn open(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn insert(&self, _document: JsonDocument) -> Result<InsertedId, BackendError> {
        std::future::pending().await
    }

    async fn list(&self) -> Result<Vec<JsonDocument>, BackendError> {
        std::future::pending().await
    }

    async fn ping(&self) -> Result<(), BackendError> {
        std::future::pending().await
    }
}

/// `open` blocks until [`GatedBackend::release`] is called.
#[derive(Default)]
pub struct GatedBackend {
    gate: Notify,
    open_calls: AtomicUsize,
}

impl GatedBackend {
    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreBackend for GatedBackend {
    fn name(&self) -> &'static str {
        "gated"
    }

    async fn open(&self) -> Result<(), BackendError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        Ok(())
    }

    async fn insert(&self, _document: JsonDocument) -> Result<InsertedId, BackendError> {
        Ok(InsertedId::new("gated"))
    }

    async fn list(&self) -> Result<Vec<JsonDocument>, BackendError> {
        Ok(Vec::new())
    }

    async fn ping(&self) -> Result<(), BackendError> {
        Ok(())
    }
}
