use std::net::SocketAddr;

use axum::{Router, routing::get, routing::post};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::{
    services::{
        audit, cancel_task, get_pod, get_task, health, list_pods, list_task_reservations, metrics,
    },
    state::AppState,
};
use crate::config::Config;
use crate::ledger::LedgerStore;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Operator routes over the given state
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/operators/tasks/{task_id}", get(get_task))
        .route("/operators/tasks/{task_id}/cancel", post(cancel_task))
        .route(
            "/operators/tasks/{task_id}/reservations",
            get(list_task_reservations),
        )
        .route("/operators/pods", get(list_pods))
        .route("/operators/pods/{name}", get(get_pod))
        .route("/operators/metrics", get(metrics))
        .route("/operators/audit", get(audit))
        .route("/operators/health", get(health))
        .route("/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn run(address: SocketAddr, config: Config) -> Result<(), AnyError> {
    info!(path = %config.server.ledger_path.display(), "Opening ledger");
    let store = LedgerStore::open_with(&config.server.ledger_path, &config.ledger)
        .map_err(|e| format!("Failed to open ledger: {}", e))?;

    let state = AppState::new(config, store);
    let app = router(state.clone());

    let listener = TcpListener::bind(address).await?;
    info!(%address, "Operator API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.store.persist()?;
    info!("Ledger flushed");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
