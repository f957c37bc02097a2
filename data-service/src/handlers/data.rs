//! Document endpoints: thin translation between HTTP payloads and the store client.

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use service_core::error::AppError;

use crate::models::{parse_document, InsertedId, JsonDocument};
use crate::startup::AppState;

#[derive(Debug, Serialize)]
pub struct InsertResponse {
    pub id: InsertedId,
}

/// Store one JSON object. The body is read raw so any content type is
/// accepted and every parse failure maps to `400`.
pub async fn insert_document(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<(StatusCode, Json<InsertResponse>), AppError> {
    let body = body.map_err(body_rejection)?;
    let document = parse_document(&body).map_err(|e| {
        tracing::debug!(error = %e, "Rejected document");
        AppError::BadRequest(anyhow::Error::new(e))
    })?;

    let id = state.store.insert(document).await?;

    tracing::info!(id = %id, "Document stored");

    Ok((StatusCode::CREATED, Json(InsertResponse { id })))
}

fn body_rejection(rejection: BytesRejection) -> AppError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(rejection.body_text())
    } else {
        AppError::BadRequest(anyhow::anyhow!(rejection.body_text()))
    }
}

/// Return every document in store order, identifiers included.
pub async fn list_documents(
    State(state): State<AppState>,
) -> Result<Json<Vec<JsonDocument>>, AppError> {
    let documents = state.store.list().await?;

    tracing::debug!(count = documents.len(), "Listed documents");

    Ok(Json(documents))
}
