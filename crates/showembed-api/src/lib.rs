//! HTTP façade over the embedding provider.
//!
//! Routes:
//! - `GET /` markdown usage notes
//! - `GET /health` database round trip
//! - `POST /embed-query` batch embedding
//! - `GET /api/embed-query?text=` single-text embedding
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use showembed_embed::EmbeddingProvider;
use showembed_vector::RowStore;

pub mod docs;
pub mod error;
pub mod handlers;
pub mod request;

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<EmbeddingProvider>,
    pub store: Arc<dyn RowStore>,
}

impl AppState {
    pub fn new(provider: Arc<EmbeddingProvider>, store: Arc<dyn RowStore>) -> Self {
        Self { provider, store }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::docs))
        .route("/health", get(handlers::health))
        .route("/embed-query", post(handlers::embed_query))
        .route("/api/embed-query", get(handlers::embed_single))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
