use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tracing::info;

use taskpulse_common::ServiceConfig;
use taskpulse_events::{DaprBus, EventBus, EventPublisher};
use taskpulse_reminders::{PgReminderStore, ReminderScheduler, SchedulerConfig, SERVICE_NAME};
use taskpulse_service::periodic::run_periodic;
use taskpulse_service::server::{app, connect_postgres, join_background, serve, shutdown_signal};
use taskpulse_service::{subscription, telemetry, BrokerCheck, HealthCheck, PostgresCheck, ServiceMetrics};

#[derive(Parser)]
#[command(name = "reminder-scheduler", about = "Publishes reminder.due events when reminders come due")]
struct Args {
    /// Port to listen on (overrides HTTP_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Run a single scan, flush, and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing()?;
    let args = Args::parse();

    info!("Reminder scheduler starting...");

    let mut config = ServiceConfig::from_env(SERVICE_NAME)?;
    if let Some(port) = args.port {
        config.http_port = port;
    }
    config.log_redacted();

    let scheduler_config = SchedulerConfig::from_env()?;
    info!(
        scan_interval_secs = scheduler_config.scan_interval.as_secs(),
        batch_size = scheduler_config.batch_size,
        "Scheduler configuration"
    );

    let pool = connect_postgres(&config.database_url, 4).await?;
    let metrics = ServiceMetrics::new()?;
    let bus: Arc<dyn EventBus> = Arc::new(DaprBus::new(&config.dapr_http_endpoint, &config.pubsub_name)?);
    let publisher = Arc::new(
        EventPublisher::new(bus.clone(), config.publish_buffer_capacity)
            .with_depth_gauge(metrics.publish_buffer_depth.clone()),
    );
    let scheduler = Arc::new(
        ReminderScheduler::new(
            Arc::new(PgReminderStore::new(pool.clone())),
            publisher.clone(),
            scheduler_config.batch_size,
        )
        .with_metrics(metrics.clone()),
    );

    if args.once {
        let report = scheduler.run_once(Utc::now()).await?;
        let flushed = publisher.shutdown_flush(config.shutdown_grace).await;
        info!(
            found = report.found,
            dispatched = report.dispatched,
            failed = report.failed,
            lost = flushed.remaining,
            "Single scan complete"
        );
        return Ok(());
    }

    // The scheduler subscribes to nothing; the empty subscription list keeps
    // the sidecar's discovery call answered.
    let routes = subscription::router(&config.pubsub_name, Vec::new(), metrics.clone(), 1);
    let checks: Vec<Arc<dyn HealthCheck>> = vec![
        Arc::new(PostgresCheck::new(pool)),
        Arc::new(BrokerCheck::new(bus)),
    ];

    let (_shutdown_tx, shutdown) = shutdown_signal();

    let flush = tokio::spawn(
        publisher
            .clone()
            .run_flush_loop(config.publish_flush_interval, shutdown.clone()),
    );
    let scans = tokio::spawn(run_periodic(
        "reminder_scan",
        scheduler_config.scan_interval,
        shutdown.clone(),
        move || {
            let scheduler = scheduler.clone();
            async move { scheduler.run_once(Utc::now()).await.map(|_| ()) }
        },
    ));

    serve(app(routes, checks, metrics), &config.bind_addr(), shutdown).await?;
    join_background(vec![("publish_flush", flush), ("reminder_scan", scans)]).await;

    let report = publisher.shutdown_flush(config.shutdown_grace).await;
    info!(
        delivered = report.delivered,
        lost = report.remaining,
        "Reminder scheduler stopped"
    );
    Ok(())
}
