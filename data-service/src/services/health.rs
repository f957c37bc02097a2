use crate::services::store::StoreClient;
use serde::Serialize;
use std::sync::Arc;

/// Probe result, computed fresh for every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub live: bool,
    pub ready: bool,
}

/// Derives liveness and readiness from the store client.
///
/// Liveness only says the process is serving requests. Readiness is the
/// outcome of one bounded, non-retrying ping; nothing is cached between
/// probes.
#[derive(Clone)]
pub struct HealthEvaluator {
    store: Arc<StoreClient>,
}

impl HealthEvaluator {
    pub fn new(store: Arc<StoreClient>) -> Self {
        Self { store }
    }

    pub fn live(&self) -> bool {
        true
    }

    pub async fn evaluate(&self) -> HealthStatus {
        let ready = self.store.ping().await;
        if !ready {
            tracing::debug!(state = %self.store.state(), "Readiness check failed");
        }
        HealthStatus {
            live: self.live(),
            ready,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::backend::StoreBackend;
    use crate::services::memory::InMemoryBackend;
    use crate::services::store::StoreSettings;
    use crate::services::testing::HangingBackend;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn ready_tracks_store_reachability() {
        let backend = Arc::new(InMemoryBackend::new());
        let dyn_backend: Arc<dyn StoreBackend> = backend.clone();
        let store = Arc::new(StoreClient::new(dyn_backend, StoreSettings::default()));
        store.connect().await.unwrap();
        let health = HealthEvaluator::new(store);

        assert_eq!(
            health.evaluate().await,
            HealthStatus { live: true, ready: true }
        );

        backend.set_reachable(false);
        assert_eq!(
            health.evaluate().await,
            HealthStatus { live: true, ready: false }
        );

        backend.set_reachable(true);
        assert!(health.evaluate().await.ready);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_ping_counts_as_not_ready() {
        let store = Arc::new(StoreClient::new(
            Arc::new(HangingBackend),
            StoreSettings {
                ping_timeout: Duration::from_millis(500),
                ..StoreSettings::default()
            },
        ));
        store.connect().await.unwrap();
        let health = HealthEvaluator::new(store);

        let started = tokio::time::Instant::now();
        let status = health.evaluate().await;

        assert!(status.live);
        assert!(!status.ready);
        assert!(started.elapsed() <= Duration::from_millis(600));
    }
}
