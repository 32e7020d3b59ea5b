//! Headless sync agent: runs the offline engine against the SiteSafe API
//! with SQLite-backed stores until interrupted.

use anyhow::Context;

use sitesafe_client::{EngineConfig, OfflineEngine};
use sitesafe_store::offline_db_path;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sitesafe_observability::init();

    let api_base = std::env::var("SITESAFE_API_URL")
        .unwrap_or_else(|_| "http://localhost:8080".to_owned());
    let mut config = EngineConfig::new(&api_base);
    if let Ok(token) = std::env::var("SITESAFE_AUTH_TOKEN") {
        config = config.with_bearer_token(token);
    } else {
        tracing::warn!("SITESAFE_AUTH_TOKEN not set; requests go out unauthenticated");
    }

    let db_path = offline_db_path().context("failed to resolve offline database path")?;
    tracing::info!(api = %api_base, db = %db_path.display(), "starting sitesafe agent");

    let engine = OfflineEngine::open_sqlite(config, &db_path)
        .await
        .context("failed to open offline database")?;

    // Surface sync outcomes in the agent log.
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::info!(event = ?event, "sync event");
        }
    });

    let worker = engine.start_worker();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutting down");
    worker.stop().await;

    Ok(())
}
