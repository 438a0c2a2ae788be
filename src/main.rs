use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use affiliate_tracker::config::Config;
use affiliate_tracker::recorder::{ClickRecorder, LoggingHook, MokaDedupCache};
use affiliate_tracker::redirect::{create_redirect_router, RedirectState};
use affiliate_tracker::storage;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    // Initialize click store
    let store = storage::connect(&config.database).await?;
    info!("Initializing database...");
    store.init().await.context("failed to initialize click store")?;
    info!("Database initialized successfully");

    // Initialize recorder
    let mut recorder = ClickRecorder::new(
        Arc::clone(&store),
        Arc::new(MokaDedupCache::default()),
        &config.tracker,
    );
    if config.tracker.log_clicks {
        recorder = recorder.with_hook(Arc::new(LoggingHook));
    }
    info!(
        "Click dedup window: {}ms",
        config.tracker.dedup_window.as_millis()
    );

    let state = Arc::new(RedirectState::new(
        &config.tracker,
        config.client_ip.clone(),
        Arc::new(recorder),
    )?);
    let route_path = config.tracker.normalized_route_path();
    let router = create_redirect_router(state, &route_path);

    // Start redirect server
    let addr = format!(
        "{}:{}",
        config.redirect_server.host, config.redirect_server.port
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🚀 Redirect server listening on http://{}", addr);
    info!("   - Tracking links: {}{}/<payload>?s=<signature>", config.tracker.base_url, route_path);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
