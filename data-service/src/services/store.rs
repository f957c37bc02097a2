//! Store client: connection lifecycle, retry/backoff and bounded operations
//! on top of a [`StoreBackend`].
//!
//! # Connection states
//! ```text
//! Disconnected --connect success-------------> Connected
//! Connected    --operation failure-----------> Degraded
//! Degraded     --ping/operation success------> Connected
//! Connected/Degraded --ping failures >= N----> Disconnected
//! ```
//!
//! # Concurrency
//! - Data operations go straight to the backend; the driver pool handles
//!   concurrency.
//! - Reconnects are serialized by `reconnect_guard`. A request that finds a
//!   reconnect in flight, or arrives inside the rate-limit window, fails fast
//!   with [`StoreError::Unavailable`].
//! - Backend calls for insert/list run on a detached task, so dropping the
//!   request future never cancels a write half-way.
//! - `ping` never retries and never touches the reconnect path.

use crate::models::{InsertedId, JsonDocument};
use crate::services::backend::{BackendError, StoreBackend};
use serde::Serialize;
use service_core::error::AppError;
use service_core::retry::{retry_with_backoff, RetryError, RetryPolicy};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{timeout, Instant};

/// Upper bound on a health ping, whatever the configuration says.
pub const MAX_PING_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Connected, but the last operation or ping failed.
    Degraded,
}

impl ConnectionState {
    fn gauge_value(self) -> f64 {
        match self {
            ConnectionState::Disconnected => 0.0,
            ConnectionState::Connecting => 1.0,
            ConnectionState::Degraded => 2.0,
            ConnectionState::Connected => 3.0,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the document itself; resending it will not help.
    #[error("document rejected: {0}")]
    Rejected(String),

    #[error("document store error: {0}")]
    Internal(anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(reason) => AppError::ServiceUnavailable(reason),
            StoreError::Rejected(reason) => AppError::BadRequest(anyhow::anyhow!(reason)),
            StoreError::Internal(e) => AppError::DatabaseError(e),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("could not reach the document store after {attempts} attempt(s): {reason}")]
    Exhausted { attempts: u32, reason: String },

    #[error("document store rejected the connection: {0}")]
    Rejected(String),
}

/// Tuning for [`StoreClient`].
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub connect_policy: RetryPolicy,
    /// Bound on a single connect attempt.
    pub connect_timeout: Duration,
    /// Bound on a single insert/list.
    pub operation_timeout: Duration,
    /// Bound on a health ping; clamped to [`MAX_PING_TIMEOUT`].
    pub ping_timeout: Duration,
    /// Consecutive ping failures before the state drops to `Disconnected`.
    pub degraded_threshold: u32,
    /// Minimum gap between lazy reconnect attempts.
    pub reconnect_interval: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            connect_policy: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(2),
            operation_timeout: Duration::from_secs(5),
            ping_timeout: Duration::from_secs(1),
            degraded_threshold: 1,
            reconnect_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug)]
struct StatusCell {
    state: ConnectionState,
    consecutive_ping_failures: u32,
    last_reconnect: Option<Instant>,
}

pub struct StoreClient {
    backend: Arc<dyn StoreBackend>,
    settings: StoreSettings,
    status: Mutex<StatusCell>,
    reconnect_guard: tokio::sync::Mutex<()>,
}

impl StoreClient {
    pub fn new(backend: Arc<dyn StoreBackend>, mut settings: StoreSettings) -> Self {
        settings.ping_timeout = settings.ping_timeout.min(MAX_PING_TIMEOUT);
        settings.degraded_threshold = settings.degraded_threshold.max(1);

        metrics::gauge!("store_connection_state")
            .set(ConnectionState::Disconnected.gauge_value());

        Self {
            backend,
            settings,
            status: Mutex::new(StatusCell {
                state: ConnectionState::Disconnected,
                consecutive_ping_failures: 0,
                last_reconnect: None,
            }),
            reconnect_guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.status().state
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Establish a session, retrying transient failures per the connect
    /// policy. Waits for any in-flight reconnect to finish first.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        let _guard = self.reconnect_guard.lock().await;

        if self.state() == ConnectionState::Connected {
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting);
        tracing::info!(backend = self.backend.name(), "Connecting to document store");

        let result = retry_with_backoff(
            &self.settings.connect_policy,
            "store_connect",
            || self.open_once(),
            BackendError::is_transient,
        )
        .await;

        match result {
            Ok(()) => {
                self.mark_connected();
                tracing::info!(backend = self.backend.name(), "Document store session established");
                Ok(())
            }
            Err(err) => {
                self.set_state(ConnectionState::Disconnected);
                tracing::error!(
                    backend = self.backend.name(),
                    attempts = err.attempts(),
                    error = %err,
                    "Failed to establish document store session"
                );
                Err(match err {
                    RetryError::Exhausted {
                        attempts,
                        last_error,
                        ..
                    } => ConnectError::Exhausted {
                        attempts,
                        reason: last_error.to_string(),
                    },
                    RetryError::Permanent { last_error, .. } => {
                        ConnectError::Rejected(last_error.to_string())
                    }
                })
            }
        }
    }

    pub async fn insert(&self, document: JsonDocument) -> Result<InsertedId, StoreError> {
        self.ensure_session().await?;

        let backend = Arc::clone(&self.backend);
        self.run_detached("insert", async move { backend.insert(document).await })
            .await
    }

    pub async fn list(&self) -> Result<Vec<JsonDocument>, StoreError> {
        self.ensure_session().await?;

        let backend = Arc::clone(&self.backend);
        self.run_detached("list", async move { backend.list().await })
            .await
    }

    /// Single bounded round trip to the store. Never retries, never errors.
    pub async fn ping(&self) -> bool {
        let outcome = timeout(self.settings.ping_timeout, self.backend.ping()).await;

        match outcome {
            Ok(Ok(())) => {
                let mut status = self.status();
                status.consecutive_ping_failures = 0;
                if matches!(
                    status.state,
                    ConnectionState::Degraded | ConnectionState::Disconnected
                ) {
                    self.transition(&mut status, ConnectionState::Connected);
                }
                true
            }
            Ok(Err(err)) => {
                self.record_ping_failure(&err.to_string());
                false
            }
            Err(_) => {
                self.record_ping_failure("ping timed out");
                false
            }
        }
    }

    async fn open_once(&self) -> Result<(), BackendError> {
        match timeout(self.settings.connect_timeout, self.backend.open()).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::connectivity(format!(
                "connect attempt timed out after {}ms",
                self.settings.connect_timeout.as_millis()
            ))),
        }
    }

    /// Make sure there is a session to use, attempting one lazy reconnect if
    /// the client is disconnected.
    async fn ensure_session(&self) -> Result<(), StoreError> {
        match self.state() {
            ConnectionState::Connected | ConnectionState::Degraded => Ok(()),
            ConnectionState::Connecting => Err(StoreError::Unavailable(
                "reconnect in progress".to_string(),
            )),
            ConnectionState::Disconnected => self.lazy_reconnect().await,
        }
    }

    async fn lazy_reconnect(&self) -> Result<(), StoreError> {
        let Ok(_guard) = self.reconnect_guard.try_lock() else {
            return Err(StoreError::Unavailable(
                "reconnect in progress".to_string(),
            ));
        };

        {
            let mut status = self.status();
            if status.state != ConnectionState::Disconnected {
                // Another request reconnected while we waited for the guard.
                return Ok(());
            }
            if let Some(last) = status.last_reconnect {
                if last.elapsed() < self.settings.reconnect_interval {
                    return Err(StoreError::Unavailable(
                        "store disconnected; reconnect rate-limited".to_string(),
                    ));
                }
            }
            status.last_reconnect = Some(Instant::now());
        }

        metrics::counter!("store_reconnect_attempts_total").increment(1);
        tracing::info!(backend = self.backend.name(), "Attempting lazy reconnect");

        match self.open_once().await {
            Ok(()) => {
                self.mark_connected();
                tracing::info!(backend = self.backend.name(), "Lazy reconnect succeeded");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(
                    backend = self.backend.name(),
                    error = %err,
                    "Lazy reconnect failed"
                );
                Err(StoreError::Unavailable(err.to_string()))
            }
        }
    }

    async fn run_detached<T, F>(&self, operation: &'static str, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, BackendError>> + Send + 'static,
    {
        let handle = tokio::spawn(op);

        let result = match timeout(self.settings.operation_timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                metrics::counter!("store_operations_total", "operation" => operation, "outcome" => "error")
                    .increment(1);
                return Err(StoreError::Internal(anyhow::anyhow!(
                    "{} task failed: {}",
                    operation,
                    join_err
                )));
            }
            Err(_) => Err(BackendError::connectivity(format!(
                "{} timed out after {}ms",
                operation,
                self.settings.operation_timeout.as_millis()
            ))),
        };

        match result {
            Ok(value) => {
                metrics::counter!("store_operations_total", "operation" => operation, "outcome" => "ok")
                    .increment(1);
                self.mark_connected();
                Ok(value)
            }
            Err(BackendError::Connectivity(e)) => {
                metrics::counter!("store_operations_total", "operation" => operation, "outcome" => "unavailable")
                    .increment(1);
                tracing::warn!(operation, error = %e, "Store operation failed: store unreachable");
                self.record_operation_failure();
                Err(StoreError::Unavailable(e.to_string()))
            }
            Err(BackendError::Duplicate(reason)) => {
                metrics::counter!("store_operations_total", "operation" => operation, "outcome" => "rejected")
                    .increment(1);
                tracing::debug!(operation, reason = %reason, "Store rejected document");
                Err(StoreError::Rejected(reason))
            }
            Err(BackendError::Operation(e)) => {
                metrics::counter!("store_operations_total", "operation" => operation, "outcome" => "error")
                    .increment(1);
                Err(StoreError::Internal(e))
            }
        }
    }

    fn status(&self) -> MutexGuard<'_, StatusCell> {
        // The cell holds plain values, so a poisoned lock is still consistent.
        self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, next: ConnectionState) {
        let mut status = self.status();
        self.transition(&mut status, next);
    }

    fn mark_connected(&self) {
        let mut status = self.status();
        status.consecutive_ping_failures = 0;
        self.transition(&mut status, ConnectionState::Connected);
    }

    fn record_operation_failure(&self) {
        let mut status = self.status();
        if status.state == ConnectionState::Connected {
            self.transition(&mut status, ConnectionState::Degraded);
        }
    }

    fn record_ping_failure(&self, reason: &str) {
        let mut status = self.status();
        status.consecutive_ping_failures = status.consecutive_ping_failures.saturating_add(1);

        tracing::debug!(
            failures = status.consecutive_ping_failures,
            reason,
            "Store ping failed"
        );

        match status.state {
            ConnectionState::Connected | ConnectionState::Degraded => {
                let next = if status.consecutive_ping_failures >= self.settings.degraded_threshold {
                    ConnectionState::Disconnected
                } else {
                    ConnectionState::Degraded
                };
                self.transition(&mut status, next);
            }
            ConnectionState::Disconnected | ConnectionState::Connecting => {}
        }
    }

    fn transition(&self, status: &mut StatusCell, next: ConnectionState) {
        if status.state == next {
            return;
        }
        let previous = status.state;
        status.state = next;

        metrics::gauge!("store_connection_state").set(next.gauge_value());
        match next {
            ConnectionState::Disconnected | ConnectionState::Degraded => tracing::warn!(
                backend = self.backend.name(),
                from = %previous,
                to = %next,
                "Store connection state changed"
            ),
            _ => tracing::info!(
                backend = self.backend.name(),
                from = %previous,
                to = %next,
                "Store connection state changed"
            ),
        }
    }
}
