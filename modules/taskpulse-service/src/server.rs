//! Process lifecycle: database pool, HTTP surface, signal handling.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::health::{self, HealthCheck};
use crate::metrics::ServiceMetrics;

pub async fn connect_postgres(url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    info!(max_connections, "Connected to database");
    Ok(pool)
}

/// Compose the service's routes with `/health`, `/healthz`, `/metrics` and
/// request tracing (method and path only).
pub fn app(routes: Router, checks: Vec<Arc<dyn HealthCheck>>, metrics: ServiceMetrics) -> Router {
    routes
        .merge(health::router(checks))
        .route(
            "/metrics",
            get(move || {
                let metrics = metrics.clone();
                async move { metrics.render() }
            }),
        )
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        )
}

/// Serve until `shutdown` flips to true, then let in-flight requests finish.
pub async fn serve(app: Router, addr: &str, shutdown: watch::Receiver<bool>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(shutdown))
        .await?;
    Ok(())
}

/// Resolves once the receiver observes `true` (or its sender is gone).
pub async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Wait for background loops to stop, logging any that panicked or were
/// cancelled. Returns how many did not finish cleanly.
pub async fn join_background(tasks: Vec<(&'static str, JoinHandle<()>)>) -> usize {
    let mut failed = 0;
    for (name, handle) in tasks {
        if let Err(e) = handle.await {
            error!(task = name, error = %e, "Background task did not finish cleanly");
            failed += 1;
        }
    }
    failed
}

/// Spawn a watcher that flips the returned receiver on SIGINT or SIGTERM.
pub fn shutdown_signal() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(false);
    let signal_tx = tx.clone();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sig) => sig,
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
                return;
            }
        }

        info!("Shutdown signal received, starting graceful shutdown");
        let _ = signal_tx.send(true);
    });

    (tx, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_background_counts_panicked_tasks() {
        let clean = tokio::spawn(async {});
        let panicked = tokio::spawn(async { panic!("loop blew up") });

        let failed = join_background(vec![("clean", clean), ("panicked", panicked)]).await;

        assert_eq!(failed, 1);
    }
}
