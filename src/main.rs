use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stagevote::{
    app, auth,
    config::{ServerConfig, ShowConfig},
    state::AppState,
    store::MemoryStore,
    tasks,
};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stagevote=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Stagevote...");

    let auth_config = Arc::new(auth::AuthConfig::from_env());
    let show_config = Arc::new(ShowConfig::from_env());
    let server_config = ServerConfig::from_env();
    tracing::info!(?show_config, controller = ?server_config.controller, "Show configured");

    let store = Arc::new(MemoryStore::new());
    if let Some(path) = &server_config.snapshot_path {
        match store.load_snapshot(path).await {
            Ok(true) => tracing::info!("Restored show from {}", path.display()),
            Ok(false) => tracing::info!("No snapshot at {}, starting fresh", path.display()),
            Err(e) => {
                tracing::error!("Failed to load snapshot {}: {}", path.display(), e);
                return;
            }
        }
    }

    let state = Arc::new(AppState::new(
        store.clone(),
        show_config,
        server_config.controller,
    ));

    if let Some(path) = server_config.snapshot_path.clone() {
        tasks::spawn_snapshot_writer(store, path, server_config.snapshot_interval);
    }

    let app = app::router(state.clone(), auth_config);

    let listener = match tokio::net::TcpListener::bind(server_config.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", server_config.bind, e);
            return;
        }
    };
    tracing::info!("Listening on http://{}", server_config.bind);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {}", e);
    }

    state.shutdown().await;
    tracing::info!("Stagevote stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
