//! Prometheus metrics for one service process, rendered at `GET /metrics`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use crate::subscription::Disposition;

#[derive(Clone)]
pub struct ServiceMetrics {
    registry: Registry,
    pub events_processed: IntCounterVec,
    pub events_failed: IntCounterVec,
    pub notifications: IntCounterVec,
    pub consumer_lag_seconds: GaugeVec,
    pub processing_duration: HistogramVec,
    pub publish_buffer_depth: IntGauge,
    pub reminders_dispatched: IntCounter,
}

impl ServiceMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let events_processed = IntCounterVec::new(
            Opts::new(
                "taskpulse_events_processed_total",
                "Events handled by a consumer, by event type and outcome",
            ),
            &["consumer", "event_type", "outcome"],
        )?;
        let events_failed = IntCounterVec::new(
            Opts::new(
                "taskpulse_events_failed_total",
                "Events a consumer could not handle (retried or dead-lettered)",
            ),
            &["consumer", "event_type"],
        )?;
        let notifications = IntCounterVec::new(
            Opts::new(
                "taskpulse_notifications_total",
                "Notification dispatch outcomes by channel",
            ),
            &["channel", "status"],
        )?;
        let consumer_lag_seconds = GaugeVec::new(
            Opts::new(
                "taskpulse_consumer_lag_seconds",
                "Age of the most recently delivered event at receipt",
            ),
            &["consumer", "topic"],
        )?;
        let processing_duration = HistogramVec::new(
            HistogramOpts::new(
                "taskpulse_event_processing_duration_seconds",
                "Time spent handling one delivered event",
            )
            .buckets(vec![0.005, 0.025, 0.1, 0.25, 1.0, 2.5, 10.0, 30.0, 60.0, 180.0]),
            &["consumer", "event_type"],
        )?;
        let publish_buffer_depth = IntGauge::new(
            "taskpulse_publish_buffer_depth",
            "Events waiting in the publisher's fallback buffer",
        )?;
        let reminders_dispatched = IntCounter::new(
            "taskpulse_reminders_dispatched_total",
            "reminder.due events handed to the publisher",
        )?;

        registry.register(Box::new(events_processed.clone()))?;
        registry.register(Box::new(events_failed.clone()))?;
        registry.register(Box::new(notifications.clone()))?;
        registry.register(Box::new(consumer_lag_seconds.clone()))?;
        registry.register(Box::new(processing_duration.clone()))?;
        registry.register(Box::new(publish_buffer_depth.clone()))?;
        registry.register(Box::new(reminders_dispatched.clone()))?;

        Ok(Self {
            registry,
            events_processed,
            events_failed,
            notifications,
            consumer_lag_seconds,
            processing_duration,
            publish_buffer_depth,
            reminders_dispatched,
        })
    }

    pub fn record_delivery(
        &self,
        consumer: &str,
        event_type: &str,
        disposition: Disposition,
        elapsed: Duration,
    ) {
        self.events_processed
            .with_label_values(&[consumer, event_type, disposition.as_label()])
            .inc();
        if disposition != Disposition::Ack {
            self.events_failed
                .with_label_values(&[consumer, event_type])
                .inc();
        }
        self.processing_duration
            .with_label_values(&[consumer, event_type])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_lag(&self, consumer: &str, topic: &str, event_timestamp: DateTime<Utc>) {
        let lag = (Utc::now() - event_timestamp).num_milliseconds().max(0) as f64 / 1000.0;
        self.consumer_lag_seconds
            .with_label_values(&[consumer, topic])
            .set(lag);
    }

    pub fn record_notification(&self, channel: &str, status: &str) {
        self.notifications.with_label_values(&[channel, status]).inc();
    }

    /// Text exposition format.
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buf) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_registered_families() {
        let metrics = ServiceMetrics::new().unwrap();
        metrics.record_delivery(
            "recurring-task-service",
            "task.completed.v1",
            Disposition::Retry,
            Duration::from_millis(20),
        );
        metrics.record_notification("email", "sent");
        metrics.reminders_dispatched.inc();

        let text = metrics.render();
        assert!(text.contains(
            r#"taskpulse_events_processed_total{consumer="recurring-task-service",event_type="task.completed.v1",outcome="retry"} 1"#
        ));
        assert!(text.contains(
            r#"taskpulse_events_failed_total{consumer="recurring-task-service",event_type="task.completed.v1"} 1"#
        ));
        assert!(text.contains(r#"taskpulse_notifications_total{channel="email",status="sent"} 1"#));
        assert!(text.contains("taskpulse_reminders_dispatched_total 1"));
    }

    #[test]
    fn acks_do_not_count_as_failures() {
        let metrics = ServiceMetrics::new().unwrap();
        metrics.record_delivery("c", "t", Disposition::Ack, Duration::ZERO);
        assert_eq!(metrics.events_failed.with_label_values(&["c", "t"]).get(), 0);
    }
}
