pub mod data;
pub mod health;
pub mod metrics;
pub mod welcome;

use axum::http::{Method, Uri};
use service_core::error::AppError;

pub use data::{insert_document, list_documents};
pub use health::{health_check, liveness_check};
pub use self::metrics::metrics_endpoint;
pub use welcome::welcome;

pub async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(anyhow::anyhow!("no route for {}", uri.path()))
}

pub async fn method_not_allowed(method: Method, uri: Uri) -> AppError {
    AppError::MethodNotAllowed(format!("{} is not supported on {}", method, uri.path()))
}
