//! Application startup and lifecycle management.
//!
//! Builds the store client, establishes the initial session, and serves the
//! HTTP router until a shutdown signal arrives.

use crate::config::{DataConfig, StoreBackendKind};
use crate::handlers;
use crate::services::{HealthEvaluator, InMemoryBackend, MongoBackend, StoreBackend, StoreClient};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::{routing::get, Router};
use service_core::error::AppError;
use service_core::middleware::{
    metrics_middleware, request_id_middleware, request_timeout_middleware, REQUEST_ID_HEADER,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<StoreClient>,
    pub health: HealthEvaluator,
}

impl AppState {
    pub fn new(store: Arc<StoreClient>) -> Self {
        let health = HealthEvaluator::new(store.clone());
        Self { store, health }
    }
}

pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/", get(handlers::welcome))
        .route(
            "/data",
            get(handlers::list_documents).post(handlers::insert_document),
        )
        .route("/health", get(handlers::health_check))
        .route("/healthz", get(handlers::liveness_check))
        .route("/readyz", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .method_not_allowed_fallback(handlers::method_not_allowed)
        .fallback(handlers::not_found)
        .layer(from_fn_with_state(request_timeout, request_timeout_middleware))
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

pub fn build_backend(config: &DataConfig) -> Arc<dyn StoreBackend> {
    match config.backend {
        StoreBackendKind::Mongodb => Arc::new(MongoBackend::new(
            config.mongodb.clone(),
            config.store.connect_timeout,
        )),
        StoreBackendKind::Memory => {
            tracing::warn!("Using in-memory store; documents are lost on restart");
            Arc::new(InMemoryBackend::new())
        }
    }
}

/// Keep re-running `connect` until a session exists. Used when the startup
/// connect gives up, so the process stays up and reports not-ready instead
/// of crash-looping.
pub fn spawn_connect_supervisor(store: Arc<StoreClient>, pause: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(pause).await;
            match store.connect().await {
                Ok(()) => {
                    tracing::info!("Document store session recovered by supervisor");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Document store still unreachable");
                }
            }
        }
    })
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    state: AppState,
}

impl Application {
    pub async fn build(config: DataConfig) -> Result<Self, AppError> {
        let backend = build_backend(&config);
        Self::build_with_backend(config, backend).await
    }

    /// Build with an explicit backend; tests use this to inject a fake store.
    pub async fn build_with_backend(
        config: DataConfig,
        backend: Arc<dyn StoreBackend>,
    ) -> Result<Self, AppError> {
        let store = Arc::new(StoreClient::new(backend, config.store.clone()));

        if let Err(e) = store.connect().await {
            tracing::error!(
                error = %e,
                "Failed to connect to the document store at startup; serving as not-ready"
            );
            spawn_connect_supervisor(store.clone(), config.store.connect_policy.max_backoff);
        }

        let state = AppState::new(store);
        let router = build_router(state.clone(), config.request_timeout);

        // Bind HTTP listener (port 0 = random port for testing)
        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port, backend = state.store.backend_name(), "data-service listening");

        Ok(Self {
            port,
            listener,
            router,
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn store(&self) -> &Arc<StoreClient> {
        &self.state.store
    }

    /// Serve until SIGINT/SIGTERM, letting in-flight requests finish.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
