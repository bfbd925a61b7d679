//! Configuration parsing for the Spillway binary.
//!
//! Supports:
//! - CLI arguments via clap
//! - Environment variable overrides
//! - Sensible defaults for quick start

use clap::Parser;
use std::path::PathBuf;

use crate::writer::WriterConfig;

/// Spillway: commits newline-delimited JSON batches into an analytical store.
#[derive(Parser, Debug, Clone)]
#[command(name = "spillway")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Database location (file path, or ":memory:")
    #[arg(short, long, env = "SPILLWAY_DATABASE", default_value = "./spillway.db")]
    pub database: PathBuf,

    /// Work queue capacity (0 = unbounded)
    #[arg(long, env = "SPILLWAY_QUEUE_CAPACITY", default_value_t = 0)]
    pub queue_capacity: usize,

    /// How long a producer waits on a full bounded queue, in milliseconds
    #[arg(long, env = "SPILLWAY_ENQUEUE_TIMEOUT_MS", default_value_t = 5000)]
    pub enqueue_timeout_ms: u64,

    /// How long the writer waits for work before re-checking for stop, in milliseconds
    #[arg(long, env = "SPILLWAY_POLL_INTERVAL_MS", default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// Maximum time to wait for the writer to drain on shutdown, in milliseconds
    #[arg(long, env = "SPILLWAY_SHUTDOWN_TIMEOUT_MS", default_value_t = 30_000)]
    pub shutdown_timeout_ms: u64,

    /// Size of the report channel
    #[arg(long, env = "SPILLWAY_REPORT_CHANNEL_SIZE", default_value_t = 1024)]
    pub report_channel_size: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "SPILLWAY_LOG_JSON")]
    pub log_json: bool,

    /// OpenTelemetry collector endpoint for metrics export (optional)
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otel_endpoint: Option<String>,
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Writer settings derived from this configuration.
    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig::from_config(
            self.queue_capacity,
            self.enqueue_timeout_ms,
            self.poll_interval_ms,
        )
    }

    /// Database location as passed to the store factory.
    pub fn location(&self) -> String {
        self.database.to_string_lossy().into_owned()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: PathBuf::from("./spillway.db"),
            queue_capacity: 0,
            enqueue_timeout_ms: 5000,
            poll_interval_ms: 1000,
            shutdown_timeout_ms: 30_000,
            report_channel_size: 1024,
            log_level: "info".into(),
            log_json: false,
            otel_endpoint: None,
        }
    }
}
