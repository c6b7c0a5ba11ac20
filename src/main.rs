//! match-engine binary entrypoint wiring REST, SSE and the match store.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use match_engine::{
    config::AppConfig,
    dao::match_store::MemoryMatchStore,
    games::GameRegistry,
    routes,
    services::reconciler,
    state::{AppState, SharedState},
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let port = config.port;
    let games = GameRegistry::builtin();
    info!(games = ?games.names().collect::<Vec<_>>(), "registered games");

    let app_state = AppState::new(config, games, Arc::new(MemoryMatchStore::new()));
    match reconciler::rehydrate(&app_state).await {
        Ok(outcome) => info!(
            restored = outcome.restored,
            halted = outcome.halted,
            "stored matches rehydrated"
        ),
        Err(err) => warn!(error = %err, "could not list stored matches; starting empty"),
    }
    tokio::spawn(reconciler::run(app_state.clone()));

    let app = build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
