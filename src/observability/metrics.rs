//! OpenTelemetry metrics for the writer.
//!
//! Key metrics:
//! - spillway_batches_committed_total: Counter for committed batches
//! - spillway_rows_appended_total: Counter for committed rows
//! - spillway_batch_failures_total: Counter for discarded batches, by reason
//! - spillway_commit_latency_seconds: Histogram for per-batch commit latency
//! - spillway_queue_depth: Gauge for items waiting in the work queue
//! - spillway_connect_failures_total: Counter for writers that failed to start

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::metrics::{ManualReader, SdkMeterProvider};
use std::sync::OnceLock;

/// Global metrics instance.
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Spillway metrics registry.
#[derive(Debug)]
pub struct Metrics {
    /// Total number of committed batches.
    pub batches_committed: Counter<u64>,
    /// Total number of committed rows.
    pub rows_appended: Counter<u64>,
    /// Total number of discarded batches.
    pub batch_failures: Counter<u64>,
    /// Histogram of commit latency in seconds.
    pub commit_latency: Histogram<f64>,
    /// Items waiting in the work queue.
    pub queue_depth: Gauge<u64>,
    /// Writers that could not open their connection.
    pub connect_failures: Counter<u64>,
}

impl Metrics {
    /// Create a new metrics registry from a meter.
    fn new(meter: &Meter) -> Self {
        Self {
            batches_committed: meter
                .u64_counter("spillway_batches_committed_total")
                .with_description("Total number of committed batches")
                .with_unit("1")
                .init(),
            rows_appended: meter
                .u64_counter("spillway_rows_appended_total")
                .with_description("Total number of rows committed")
                .with_unit("1")
                .init(),
            batch_failures: meter
                .u64_counter("spillway_batch_failures_total")
                .with_description("Batches discarded after an error")
                .with_unit("1")
                .init(),
            commit_latency: meter
                .f64_histogram("spillway_commit_latency_seconds")
                .with_description("Time from dequeue to commit of one batch")
                .with_unit("s")
                .init(),
            queue_depth: meter
                .u64_gauge("spillway_queue_depth")
                .with_description("Items waiting in the work queue")
                .with_unit("1")
                .init(),
            connect_failures: meter
                .u64_counter("spillway_connect_failures_total")
                .with_description("Writers that failed to open their store connection")
                .with_unit("1")
                .init(),
        }
    }
}

/// Initialize the metrics system.
///
/// This should be called once at startup. Subsequent calls are ignored.
/// The OTLP exporter needs a running Tokio runtime.
///
/// # Arguments
///
/// * `otel_endpoint` - Optional OTLP endpoint for metrics export
pub fn init_metrics_with_endpoint(otel_endpoint: Option<&str>) {
    METRICS.get_or_init(|| {
        if let Some(endpoint) = otel_endpoint {
            use opentelemetry_otlp::{Protocol, WithExportConfig};

            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .with_protocol(Protocol::Grpc);

            match opentelemetry_otlp::new_pipeline()
                .metrics(opentelemetry_sdk::runtime::Tokio)
                .with_exporter(exporter)
                .with_period(std::time::Duration::from_secs(10))
                .build()
            {
                Ok(provider) => {
                    global::set_meter_provider(provider);
                    tracing::info!(endpoint, "OTLP metrics exporter configured");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to create OTLP exporter, using no-op metrics");
                    set_manual_provider();
                }
            }
        } else {
            // Metrics are recorded but not exported
            set_manual_provider();
        }

        let meter = global::meter("spillway");
        Metrics::new(&meter)
    });
}

fn set_manual_provider() {
    let reader = ManualReader::builder().build();
    let provider = SdkMeterProvider::builder().with_reader(reader).build();
    global::set_meter_provider(provider);
}

/// Initialize the metrics system without OTLP export.
pub fn init_metrics() {
    init_metrics_with_endpoint(None);
}

/// Record a committed batch.
pub fn record_commit(table: &str, rows: usize, latency_seconds: f64) {
    if let Some(m) = METRICS.get() {
        let attrs = [KeyValue::new("table", table.to_string())];
        m.batches_committed.add(1, &attrs);
        m.rows_appended.add(rows as u64, &attrs);
        m.commit_latency.record(latency_seconds, &attrs);
    }
}

/// Record a discarded batch.
pub fn record_batch_failure(table: &str, reason: &'static str) {
    if let Some(m) = METRICS.get() {
        let attrs = [
            KeyValue::new("table", table.to_string()),
            KeyValue::new("reason", reason),
        ];
        m.batch_failures.add(1, &attrs);
    }
}

/// Record the current work queue depth.
pub fn record_queue_depth(depth: usize) {
    if let Some(m) = METRICS.get() {
        m.queue_depth.record(depth as u64, &[]);
    }
}

/// Record a writer that failed to start.
pub fn record_connect_failure() {
    if let Some(m) = METRICS.get() {
        m.connect_failures.add(1, &[]);
    }
}
