use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::services::HealthStatus;
use crate::startup::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    #[serde(flatten)]
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub live: bool,
}

fn readiness_response(status: HealthStatus) -> (StatusCode, Json<HealthResponse>) {
    if status.ready {
        (
            StatusCode::OK,
            Json(HealthResponse {
                status,
                error: None,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status,
                error: Some("Document store unreachable"),
            }),
        )
    }
}

/// Combined probe, also served as the readiness probe: `200` when ready,
/// `503` otherwise, `{live, ready}` either way.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    readiness_response(state.health.evaluate().await)
}

/// Liveness probe. Does not touch the store.
pub async fn liveness_check(State(state): State<AppState>) -> Json<LivenessResponse> {
    Json(LivenessResponse {
        live: state.health.live(),
    })
}
