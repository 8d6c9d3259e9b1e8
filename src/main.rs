//! Live Poll Back binary entrypoint wiring REST, SSE, and the in-memory session store.

use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tokio::time::sleep;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use live_poll_back::{
    bus::ChangeBus,
    config::AppConfig,
    dao::session_store::MemorySessionStore,
    routes,
    state::{AppState, SharedState},
};

const STORE_PING_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let bus = ChangeBus::new();
    let store = MemorySessionStore::new(bus.clone());
    let app_state = AppState::new(config, Arc::new(store), bus);

    tokio::spawn(run_store_monitor(app_state.clone()));
    let app = build_router(app_state.clone());

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    app_state.close_all().await;
    info!("all instances closed");
    Ok(())
}

/// Periodically ping the session store and log when it enters or leaves
/// degraded mode.
async fn run_store_monitor(state: SharedState) {
    let mut degraded = false;
    loop {
        match state.store().health_check().await {
            Ok(()) if degraded => {
                info!("session store reachable again; leaving degraded mode");
                degraded = false;
            }
            Err(err) if !degraded => {
                warn!(error = %err, "session store ping failed; entering degraded mode");
                degraded = true;
            }
            _ => {}
        }
        sleep(STORE_PING_INTERVAL).await;
    }
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

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "could not install SIGTERM handler; waiting for Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
