use std::sync::Arc;

use anyhow::Context;
use showembed_api::{router, AppState};
use showembed_core::config::Config;
use showembed_embed::EmbeddingProvider;
use showembed_vector::{connect_pool, PgGateway, TableName};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load().map_err(|e| { eprintln!("Error loading config: {}", e); e })?;
    let settings = config.settings()?;

    let provider = Arc::new(EmbeddingProvider::new(settings.embedding.clone()));
    if let Err(e) = provider.initialize().await {
        error!("Failed to start server due to embedding model initialization error: {e}");
        std::process::exit(1);
    }
    info!("Embedding model initialized successfully.");

    let pool = connect_pool(&settings.database)?;
    let table = TableName::new(settings.backfill.schema.clone(), settings.backfill.table.clone())?;
    let store = Arc::new(PgGateway::new(pool, table));
    let app = router(AppState::new(provider, store));

    let addr = settings.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Embedding API server running on {addr}");
    info!("Health check: http://localhost:{}/health", settings.server.port);
    info!("Send POST requests to http://localhost:{}/embed-query", settings.server.port);
    axum::serve(listener, app).await.context("server shutdown")?;
    Ok(())
}
