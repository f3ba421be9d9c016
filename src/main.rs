use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

mod api;
mod config;
mod db;
mod engine;
mod error;
mod fixtures;

use api::AppState;
use config::Config;
use db::Database;
use engine::PredictionEngine;
use fixtures::{FixtureSource, FootballData};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    // Open database
    let db = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path);

    let source: Arc<dyn FixtureSource> = Arc::new(FootballData::new(
        &config.fixtures_api_url,
        config.football_api_key.clone(),
        &config.competition,
        config.stage.clone(),
    )?);
    info!(
        "Fixture source: {} (competition {}, stage {})",
        source.name(),
        config.competition,
        config.stage.as_deref().unwrap_or("all")
    );

    let engine = PredictionEngine::new(db, source, config.lock_at_kickoff);

    if config.sync_on_start {
        match engine.sync_fixtures().await {
            Ok(r) => info!("Initial sync: {} created, {} updated", r.created, r.updated),
            Err(e) => warn!("Initial fixture sync failed: {}", e),
        }
    }

    let app = api::router(AppState { engine });
    let addr: SocketAddr = config.listen_addr.parse()?;
    info!("API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app).await?;

    Ok(())
}
