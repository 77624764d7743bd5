//! Metrics sink consumed by [`crate::service::DeltaService`]. Three
//! backends, selected by `DG_METRICS`: `noop` (default in tests),
//! `logging` (structured `tracing` events, the default for the CLI), and
//! `cloudwatch` (real AWS CloudWatch custom metrics).

use std::sync::Arc;
use tracing::info;

/// Narrow metrics port. Mirrors the three calls the core service makes:
/// a duration, a monotonic counter, and a point-in-time value.
pub trait MetricsSink: Send + Sync {
    fn timing(&self, name: &str, seconds: f64);
    fn increment(&self, name: &str);
    fn gauge(&self, name: &str, value: f64);
}

/// Discards everything. Used by tests and by callers that embed
/// `DeltaService` without wanting an observability dependency.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn timing(&self, _name: &str, _seconds: f64) {}
    fn increment(&self, _name: &str) {}
    fn gauge(&self, _name: &str, _value: f64) {}
}

/// Emits one `tracing` event per call, namespaced under `namespace`. This
/// is what the CLI wires up by default (`DG_METRICS=logging`), so metrics
/// show up in the same structured log stream as everything else.
#[derive(Debug, Clone)]
pub struct LoggingMetrics {
    namespace: String,
}

impl LoggingMetrics {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }
}

impl MetricsSink for LoggingMetrics {
    fn timing(&self, name: &str, seconds: f64) {
        info!(namespace = %self.namespace, metric = name, seconds, "timing");
    }

    fn increment(&self, name: &str) {
        info!(namespace = %self.namespace, metric = name, "increment");
    }

    fn gauge(&self, name: &str, value: f64) {
        info!(namespace = %self.namespace, metric = name, value, "gauge");
    }
}

/// Publishes to AWS CloudWatch as custom metrics under `namespace`.
///
/// Calls are fire-and-forget: a failed `put_metric_data` is logged and
/// swallowed rather than propagated, since a metrics outage must never
/// fail a `put`/`get`/`delete` operation.
#[derive(Clone)]
pub struct CloudWatchMetrics {
    client: Arc<aws_sdk_cloudwatch::Client>,
    namespace: String,
}

impl CloudWatchMetrics {
    pub fn new(client: aws_sdk_cloudwatch::Client, namespace: impl Into<String>) -> Self {
        Self {
            client: Arc::new(client),
            namespace: namespace.into(),
        }
    }

    fn publish(&self, name: &str, value: f64, unit: aws_sdk_cloudwatch::types::StandardUnit) {
        let client = self.client.clone();
        let namespace = self.namespace.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            let datum = aws_sdk_cloudwatch::types::MetricDatum::builder()
                .metric_name(name)
                .value(value)
                .unit(unit)
                .build();
            if let Err(e) = client
                .put_metric_data()
                .namespace(namespace)
                .metric_data(datum)
                .send()
                .await
            {
                tracing::warn!("failed to publish CloudWatch metric: {e}");
            }
        });
    }
}

impl MetricsSink for CloudWatchMetrics {
    fn timing(&self, name: &str, seconds: f64) {
        self.publish(name, seconds * 1000.0, aws_sdk_cloudwatch::types::StandardUnit::Milliseconds);
    }

    fn increment(&self, name: &str) {
        self.publish(name, 1.0, aws_sdk_cloudwatch::types::StandardUnit::Count);
    }

    fn gauge(&self, name: &str, value: f64) {
        self.publish(name, value, aws_sdk_cloudwatch::types::StandardUnit::None);
    }
}
