use crate::error::AppError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Duration;

/// Bound the whole request. On expiry the handler future is dropped and the
/// client receives a JSON `408`.
pub async fn request_timeout_middleware(
    State(limit): State<Duration>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();

    match tokio::time::timeout(limit, next.run(req)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(
                method = %method,
                uri = %uri,
                timeout_ms = limit.as_millis() as u64,
                "Request exceeded timeout"
            );
            AppError::RequestTimeout.into_response()
        }
    }
}
