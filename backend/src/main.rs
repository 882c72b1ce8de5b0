use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pinpoint_server::config::AppConfig;
use pinpoint_server::services::pinballmap;
use pinpoint_server::{build_router, static_files, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pinpoint_server=debug,pinpoint=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env().context("invalid configuration")?;

    if config.dev_mode {
        tracing::warn!("Running in DEV MODE - authentication is bypassed!");
    }
    if !static_files::assets_embedded() {
        tracing::warn!("frontend assets not embedded, run `trunk build --release` in frontend/");
    }

    let port = config.port;
    let state = Arc::new(AppState::new(config).context("failed to initialise server state")?);

    pinballmap::spawn_periodic_sync(state.clone());

    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}
