use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tracing::info;

use taskpulse_common::{ServiceConfig, Topic};
use taskpulse_events::{DaprBus, EventBus, EventPublisher, PgEventLog};
use taskpulse_notifications::{
    Channels, Delivery, EmailRelay, NotificationConfig, NotificationConsumer, PgNotificationStore,
    PushGateway, RetrySweep, CONSUMER,
};
use taskpulse_service::periodic::{run_event_log_purge, run_periodic, EVENT_LOG_PURGE_INTERVAL};
use taskpulse_service::server::{app, connect_postgres, join_background, serve, shutdown_signal};
use taskpulse_service::{
    subscription, telemetry, BrokerCheck, HealthCheck, PostgresCheck, ServiceMetrics, Subscription,
};

#[derive(Parser)]
#[command(name = "notification-service", about = "Delivers due reminders over email and push")]
struct Args {
    /// Port to listen on (overrides HTTP_PORT)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing()?;
    let args = Args::parse();

    info!("Notification service starting...");

    let mut config = ServiceConfig::from_env(CONSUMER)?;
    if let Some(port) = args.port {
        config.http_port = port;
    }
    config.log_redacted();

    let notifications = NotificationConfig::from_env()?;
    notifications.log_redacted();

    let pool = connect_postgres(&config.database_url, config.consumer_workers as u32 + 2).await?;
    let event_log = Arc::new(PgEventLog::new(pool.clone()));
    event_log.migrate().await?;
    let store = Arc::new(PgNotificationStore::new(pool.clone()));
    store.migrate().await?;

    let metrics = ServiceMetrics::new()?;
    let bus: Arc<dyn EventBus> = Arc::new(DaprBus::new(&config.dapr_http_endpoint, &config.pubsub_name)?);
    let publisher = Arc::new(
        EventPublisher::new(bus.clone(), config.publish_buffer_capacity)
            .with_depth_gauge(metrics.publish_buffer_depth.clone()),
    );

    let channels = Channels::new(
        Arc::new(EmailRelay::new(&notifications.email)?),
        Arc::new(PushGateway::new(&notifications.push)?),
    );
    let delivery = Arc::new(
        Delivery::new(channels.clone(), store, publisher.clone(), notifications.retry)
            .with_metrics(metrics.clone()),
    );

    let consumer = Arc::new(NotificationConsumer::new(
        delivery.clone(),
        event_log.clone(),
        config.event_log_retention_days,
    ));
    let routes = subscription::router(
        &config.pubsub_name,
        vec![Subscription::new(Topic::Reminders, "/events/reminders", consumer)],
        metrics.clone(),
        config.consumer_workers,
    );

    let mut checks: Vec<Arc<dyn HealthCheck>> = vec![
        Arc::new(PostgresCheck::new(pool)),
        Arc::new(BrokerCheck::new(bus)),
    ];
    checks.extend(channels.health_checks());

    let (_shutdown_tx, shutdown) = shutdown_signal();

    let flush = tokio::spawn(
        publisher
            .clone()
            .run_flush_loop(config.publish_flush_interval, shutdown.clone()),
    );
    let purge = tokio::spawn(run_event_log_purge(
        event_log,
        EVENT_LOG_PURGE_INTERVAL,
        shutdown.clone(),
    ));
    let sweep = Arc::new(RetrySweep::new(delivery, notifications.retry_batch_size));
    let retries = tokio::spawn(run_periodic(
        "notification_retry",
        notifications.retry_sweep_interval,
        shutdown.clone(),
        move || {
            let sweep = sweep.clone();
            async move { sweep.run_once(Utc::now()).await.map(|_| ()) }
        },
    ));

    serve(app(routes, checks, metrics), &config.bind_addr(), shutdown).await?;
    join_background(vec![
        ("publish_flush", flush),
        ("event_log_purge", purge),
        ("notification_retry", retries),
    ])
    .await;

    let report = publisher.shutdown_flush(config.shutdown_grace).await;
    info!(
        delivered = report.delivered,
        lost = report.remaining,
        "Notification service stopped"
    );
    Ok(())
}
