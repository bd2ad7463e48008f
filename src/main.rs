// src/main.rs
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use live_poll::{
    config::Config,
    feed::ChangeFeed,
    geo::GeoResolver,
    routes,
    state::AppState,
    store::{create_pool, spawn_change_listener, PgStore},
};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // Load environment variables from .env file

    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().context("Environment misconfigured")?;
    let resolver = GeoResolver::from_endpoints(&config.geo_endpoints, reqwest::Client::new());

    let state = match &config.database_url {
        Some(database_url) => {
            let pool = create_pool(database_url, config.database_max_connections)
                .await
                .context("Failed to connect to the database")?;
            let feed = ChangeFeed::new();
            spawn_change_listener(&pool, feed.clone())
                .await
                .context("Failed to listen for table changes")?;

            AppState::new(&config, Arc::new(PgStore::new(pool)), feed, resolver)
        }
        None => {
            warn!("DATABASE_URL not set, votes are kept in memory only");
            AppState::in_memory(&config, resolver)
        }
    };

    info!("Loading poll state...");
    state.sync.refresh_all().await;

    let app = routes::create_routes(state.clone());

    let address = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.sync.teardown();
    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
