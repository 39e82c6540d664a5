use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use taskpulse_common::{ServiceConfig, Topic};
use taskpulse_events::{DaprBus, EventBus, PgEventLog};
use taskpulse_recurring::{HttpTaskService, RecurringConfig, RecurringTaskConsumer, CONSUMER};
use taskpulse_service::periodic::{run_event_log_purge, EVENT_LOG_PURGE_INTERVAL};
use taskpulse_service::server::{app, connect_postgres, join_background, serve, shutdown_signal};
use taskpulse_service::{
    subscription, telemetry, BrokerCheck, HealthCheck, PostgresCheck, ServiceMetrics, Subscription,
};

#[derive(Parser)]
#[command(name = "recurring-task-service", about = "Generates the next occurrence of completed recurring tasks")]
struct Args {
    /// Port to listen on (overrides HTTP_PORT)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing()?;
    let args = Args::parse();

    info!("Recurring task service starting...");

    let mut config = ServiceConfig::from_env(CONSUMER)?;
    if let Some(port) = args.port {
        config.http_port = port;
    }
    config.log_redacted();

    let recurring = RecurringConfig::from_env()?;
    recurring.log_redacted();

    let pool = connect_postgres(&config.database_url, config.consumer_workers as u32 + 2).await?;
    let event_log = Arc::new(PgEventLog::new(pool.clone()));
    event_log.migrate().await?;

    let bus: Arc<dyn EventBus> = Arc::new(DaprBus::new(&config.dapr_http_endpoint, &config.pubsub_name)?);
    let tasks = Arc::new(HttpTaskService::from_config(&recurring)?);
    let metrics = ServiceMetrics::new()?;

    let consumer = Arc::new(RecurringTaskConsumer::new(
        tasks,
        event_log.clone(),
        config.event_log_retention_days,
    ));
    let routes = subscription::router(
        &config.pubsub_name,
        vec![Subscription::new(Topic::TaskEvents, "/events/task-events", consumer)],
        metrics.clone(),
        config.consumer_workers,
    );
    let checks: Vec<Arc<dyn HealthCheck>> = vec![
        Arc::new(PostgresCheck::new(pool)),
        Arc::new(BrokerCheck::new(bus)),
    ];

    let (_shutdown_tx, shutdown) = shutdown_signal();
    let purge = tokio::spawn(run_event_log_purge(
        event_log,
        EVENT_LOG_PURGE_INTERVAL,
        shutdown.clone(),
    ));

    serve(app(routes, checks, metrics), &config.bind_addr(), shutdown).await?;
    join_background(vec![("event_log_purge", purge)]).await;

    info!("Recurring task service stopped");
    Ok(())
}
