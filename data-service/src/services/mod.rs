pub mod backend;
pub mod health;
pub mod memory;
pub mod metrics;
pub mod mongo;
pub mod store;
#[cfg(test)]
pub(crate) mod testing;

pub use backend::{BackendError, StoreBackend};
pub use health::{HealthEvaluator, HealthStatus};
pub use memory::InMemoryBackend;
pub use self::metrics::{get_metrics, init_metrics};
pub use mongo::MongoBackend;
pub use store::{ConnectError, ConnectionState, StoreClient, StoreError, StoreSettings};
