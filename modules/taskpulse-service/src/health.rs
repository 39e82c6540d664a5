//! Liveness (`/healthz`) and dependency health (`/health`).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use sqlx::PgPool;

use taskpulse_events::EventBus;

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// A downstream dependency this process needs to do useful work.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &'static str;
    async fn check(&self) -> Result<(), String>;
}

pub struct PostgresCheck {
    pool: PgPool,
}

impl PostgresCheck {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HealthCheck for PostgresCheck {
    fn name(&self) -> &'static str {
        "database"
    }

    async fn check(&self) -> Result<(), String> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

pub struct BrokerCheck {
    bus: Arc<dyn EventBus>,
}

impl BrokerCheck {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl HealthCheck for BrokerCheck {
    fn name(&self) -> &'static str {
        "broker"
    }

    async fn check(&self) -> Result<(), String> {
        self.bus.health().await.map_err(|e| e.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub checks: BTreeMap<&'static str, String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == "ok"
    }
}

/// Run every check concurrently, each bounded by a timeout.
pub async fn run_checks(checks: &[Arc<dyn HealthCheck>]) -> HealthReport {
    let results = futures::future::join_all(checks.iter().map(|c| async move {
        let outcome = match tokio::time::timeout(CHECK_TIMEOUT, c.check()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(format!("timed out after {}s", CHECK_TIMEOUT.as_secs())),
        };
        (c.name(), outcome)
    }))
    .await;

    let healthy = results.iter().all(|(_, r)| r.is_ok());
    HealthReport {
        status: if healthy { "ok" } else { "degraded" },
        checks: results
            .into_iter()
            .map(|(name, r)| (name, r.map_or_else(|e| format!("error: {e}"), |_| "ok".into())))
            .collect(),
    }
}

pub fn router(checks: Vec<Arc<dyn HealthCheck>>) -> Router {
    let checks = Arc::new(checks);
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route(
            "/health",
            get(move || {
                let checks = checks.clone();
                async move {
                    let report = run_checks(&checks).await;
                    let status = if report.is_healthy() {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    };
                    (status, Json(report))
                }
            }),
        )
}
