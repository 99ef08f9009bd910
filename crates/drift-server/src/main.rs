use anyhow::Result;
use axum::{http::StatusCode, response::IntoResponse, routing::get, Json};
use clap::Parser;
use serde_json::json;
use std::path::Path;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("drift=info,tower_http=debug")),
        )
        .init();

    let args = cli::Args::parse();
    let config = config::Config::load(&args.config)?;

    ensure_data_dir(&config.database.url);

    let db = drift_db::create_pool(&config.database.url, config.database.max_connections).await?;
    drift_db::run_migrations(&db).await?;

    let state = drift_core::AppState::new(db, config.app_config());
    state.chat.clone().spawn_health_logger();

    let app = drift_ws::gateway_router()
        .route("/health", get(health))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!("listening on {}", config.server.bind_address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "service": "drift" })),
    )
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

/// Auto-create the directory holding a file-backed SQLite database so a
/// fresh checkout starts without manual setup.
fn ensure_data_dir(database_url: &str) {
    let Some(path) = database_url
        .strip_prefix("sqlite://")
        .map(|rest| rest.split('?').next().unwrap_or(rest))
    else {
        return;
    };
    if path.starts_with(":memory:") || path.is_empty() {
        return;
    }
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                tracing::warn!("could not create data directory {parent:?}: {err}");
            }
        }
    }
}
