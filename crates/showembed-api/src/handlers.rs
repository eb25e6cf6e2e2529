use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

use crate::docs::DOCS_MARKDOWN;
use crate::error::ApiError;
use crate::request::{EmbedQueryRequest, TextQuery};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct EmbedQueryResponse {
    pub input_texts: Vec<String>,
    pub model: String,
    pub timestamp: String,
    pub embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
pub struct SingleEmbeddingResponse {
    pub text: String,
    pub vector: Vec<f32>,
}

pub async fn docs() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/markdown; charset=utf-8")], DOCS_MARKDOWN)
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, &'static str) {
    match state.store.health_check().await {
        Ok(()) => (StatusCode::OK, "OK (Database connected)"),
        Err(e) => {
            error!("Health check failed - DB error: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Error (Database connection failed)")
        }
    }
}

pub async fn embed_query(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<EmbedQueryResponse>, ApiError> {
    let Json(body) = payload.map_err(|e| ApiError::validation(format!("Invalid JSON body: {}", e.body_text())))?;
    let request = EmbedQueryRequest::from_value(&body)?;

    let embeddings = state.provider.embed(&request.texts).await.map_err(|e| {
        error!("Error in /embed-query endpoint: {e}");
        ApiError::Embedding { context: "Failed to generate embeddings.", details: e.to_string() }
    })?;
    info!(inputs = request.texts.len(), "Embedded query batch");

    Ok(Json(EmbedQueryResponse {
        input_texts: request.texts,
        model: state.provider.model_name().to_string(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        embeddings,
    }))
}

pub async fn embed_single(
    State(state): State<AppState>,
    Query(query): Query<TextQuery>,
) -> Result<Json<SingleEmbeddingResponse>, ApiError> {
    let text = query.validated()?;
    let vector = state.provider.embed_one(&text).await.map_err(|e| {
        error!("Error in /api/embed-query endpoint: {e}");
        ApiError::Embedding { context: "Failed to generate embedding.", details: e.to_string() }
    })?;
    Ok(Json(SingleEmbeddingResponse { text, vector }))
}
