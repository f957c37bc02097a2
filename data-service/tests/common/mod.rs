#![allow(dead_code)]

use data_service::config::{DataConfig, MongoConfig, StoreBackendKind};
use data_service::services::{InMemoryBackend, StoreBackend, StoreClient, StoreSettings};
use data_service::startup::{build_router, AppState, Application};
use service_core::config::Config as CoreConfig;
use service_core::retry::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;

/// Store settings with small, jitter-free backoff so tests stay fast.
pub fn fast_store_settings() -> StoreSettings {
    StoreSettings {
        connect_policy: RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
            backoff_multiplier: 2.0,
            add_jitter: false,
            max_elapsed: None,
        },
        connect_timeout: Duration::from_millis(500),
        operation_timeout: Duration::from_secs(2),
        ping_timeout: Duration::from_millis(500),
        degraded_threshold: 1,
        reconnect_interval: Duration::ZERO,
    }
}

pub fn test_config() -> DataConfig {
    DataConfig {
        common: CoreConfig {
            port: 0, // Random port for testing
            ..CoreConfig::default()
        },
        backend: StoreBackendKind::Memory,
        mongodb: MongoConfig::default(),
        store: fast_store_settings(),
        request_timeout: Duration::from_secs(5),
    }
}

/// A connected store client over a fresh in-memory backend, plus the router.
pub async fn memory_router() -> (axum::Router, Arc<InMemoryBackend>, Arc<StoreClient>) {
    let backend = Arc::new(InMemoryBackend::new());
    let dyn_backend: Arc<dyn StoreBackend> = backend.clone();
    let store = Arc::new(StoreClient::new(dyn_backend, fast_store_settings()));
    store
        .connect()
        .await
        .expect("in-memory store should always connect");

    let router = build_router(AppState::new(store.clone()), Duration::from_secs(5));
    (router, backend, store)
}

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub backend: Arc<InMemoryBackend>,
    pub store: Arc<StoreClient>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(Arc::new(InMemoryBackend::new())).await
    }

    /// Spawn the full application (listener included) over `backend`.
    pub async fn spawn_with(backend: Arc<InMemoryBackend>) -> Self {
        let dyn_backend: Arc<dyn StoreBackend> = backend.clone();
        let app = Application::build_with_backend(test_config(), dyn_backend)
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let store = app.store().clone();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to accept connections
        let client = reqwest::Client::new();
        let liveness_url = format!("{}/healthz", address);
        for _ in 0..50 {
            if client.get(&liveness_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        TestApp {
            address,
            port,
            backend,
            store,
        }
    }

    /// Poll `/health` until it answers `expected` or the attempts run out.
    pub async fn wait_for_health(&self, expected: reqwest::StatusCode) -> bool {
        let client = reqwest::Client::new();
        for _ in 0..100 {
            if let Ok(response) = client
                .get(format!("{}/health", self.address))
                .send()
                .await
            {
                if response.status() == expected {
                    return true;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}
