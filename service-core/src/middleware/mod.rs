pub mod metrics;
pub mod timeout;
pub mod tracing;

pub use self::metrics::metrics_middleware;
pub use self::timeout::request_timeout_middleware;
pub use self::tracing::{REQUEST_ID_HEADER, request_id_middleware};
