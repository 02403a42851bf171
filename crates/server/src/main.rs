use std::path::Path;

use anyhow::Context;

use concilio_reconcile::MatchWeights;
use concilio_server::{app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let db_path = std::env::var("CONCILIO_DB").unwrap_or_else(|_| "concilio.db".to_string());
    let db = concilio_storage::create_db(Path::new(&db_path))
        .await
        .with_context(|| format!("failed to open database at {db_path}"))?;

    let weights = match std::env::var("CONCILIO_WEIGHTS") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read weights file {path}"))?;
            MatchWeights::from_toml(&raw).map_err(anyhow::Error::msg)?
        }
        Err(_) => MatchWeights::default(),
    };

    let addr = std::env::var("CONCILIO_ADDR").unwrap_or_else(|_| "127.0.0.1:8640".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("listening on {addr}, database {db_path}");

    axum::serve(listener, app(AppState { db, weights }))
        .await
        .context("server error")?;
    Ok(())
}
