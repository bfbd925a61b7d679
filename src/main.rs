//! Spillway: commits newline-delimited JSON batches into SQLite.
//!
//! # Usage
//!
//! ```bash
//! spillway --database ./events.db --queue-capacity 1000 < batches.ndjson
//! ```
//!
//! Each input line is one batch: `{"table": "events", "rows": [[1, "a"]]}`.
//! Destination tables must already exist. One JSON report per batch is
//! written to stdout.
//!
//! Environment variables can also be used:
//! - `SPILLWAY_DATABASE`: Database file
//! - `SPILLWAY_QUEUE_CAPACITY`: Work queue capacity (0 = unbounded)
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use anyhow::Context;
use serde_json::json;
use spillway::config::Config;
use spillway::observability::metrics::init_metrics_with_endpoint;
use spillway::observability::tracing::init_tracing;
use spillway::storage::SqliteStore;
use spillway::{
    Batch, EnqueueError, ReportBus, Writer, WriterEvent, WriterHandle, WriterState,
};
use std::fs;
use std::io::{self, BufRead, Write as _};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot};

/// Print startup banner with version and configuration.
fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");
    let queue = if config.queue_capacity == 0 {
        "unbounded".to_string()
    } else {
        config.queue_capacity.to_string()
    };
    eprintln!(
        r#"
  Spillway v{} - batch ingestion writer

  Configuration:
    Database:   {}
    Queue:      {}
    Poll:       {}ms
    Log Level:  {}

  Reading batches from stdin. Press Ctrl+C to shutdown gracefully.
"#,
        version,
        config.database.display(),
        queue,
        config.poll_interval_ms,
        config.log_level
    );
}

/// Read batches from stdin and enqueue them until EOF or the queue closes.
///
/// Returns the number of accepted batches.
fn produce_from_stdin(handle: &WriterHandle) -> usize {
    let mut accepted = 0;

    for (index, line) in io::stdin().lock().lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let batch = match Batch::from_json(&line) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(line = index + 1, error = %e, "Skipping malformed batch");
                continue;
            }
        };

        match handle.enqueue(batch) {
            Ok(()) => accepted += 1,
            Err(EnqueueError::Closed(_)) => {
                tracing::info!("Writer is shutting down, no longer reading input");
                break;
            }
            Err(EnqueueError::Full(batch)) => {
                tracing::warn!(
                    line = index + 1,
                    table = batch.table(),
                    rows = batch.len(),
                    "Work queue full, batch dropped"
                );
            }
        }
    }

    accepted
}

/// Write one JSON line per report to stdout until the writer stops.
async fn print_reports(mut rx: broadcast::Receiver<WriterEvent>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Report printer fell behind");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let line = match &event {
            WriterEvent::Committed {
                batch_id,
                table,
                rows,
                latency,
            } => json!({
                "outcome": "committed",
                "batch_id": batch_id.to_string(),
                "table": table,
                "rows": rows,
                "latency_ms": latency.as_secs_f64() * 1000.0,
            }),
            WriterEvent::Failed {
                batch_id,
                table,
                rows,
                error,
            } => json!({
                "outcome": "failed",
                "batch_id": batch_id.to_string(),
                "table": table,
                "rows": rows,
                "error": error.to_string(),
            }),
            WriterEvent::Stopped {
                committed,
                failed,
                discarded,
            } => json!({
                "outcome": "stopped",
                "committed": committed,
                "failed": failed,
                "discarded": discarded,
            }),
            WriterEvent::ConnectFailed { error } => json!({
                "outcome": "connect_failed",
                "error": error.to_string(),
            }),
            WriterEvent::Connected { .. } | WriterEvent::Interrupted { .. } => continue,
        };

        if writeln!(io::stdout().lock(), "{line}").is_err() {
            break;
        }

        if event.is_terminal() {
            break;
        }
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {
                        tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
                    }
                    _ = sigterm.recv() => {
                        tracing::info!("Received SIGTERM, initiating shutdown...");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = ctrl_c.await;
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("Received Ctrl+C, initiating shutdown...");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration from CLI arguments and environment
    let config = Config::parse_args();

    // Initialize tracing/logging
    init_tracing(&config.log_level, config.log_json);

    // Initialize metrics (with optional OTLP export)
    init_metrics_with_endpoint(config.otel_endpoint.as_deref());

    // Ensure the database directory exists
    if let Some(parent) = config.database.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    print_banner(&config);

    // Subscribe before spawning so no report is missed
    let reports = ReportBus::new(config.report_channel_size);
    let mut printer = tokio::spawn(print_reports(reports.subscribe()));

    let writer = Writer::spawn(
        SqliteStore::new(),
        config.location(),
        config.writer_config(),
        reports,
    )
    .context("failed to start writer")?;
    let handle = writer.handle();

    // Stdin is read on a plain thread; a blocked read must not hold up exit
    let (input_done_tx, input_done_rx) = oneshot::channel();
    let producer = handle.clone();
    std::thread::Builder::new()
        .name("spillway-stdin".into())
        .spawn(move || {
            let accepted = produce_from_stdin(&producer);
            let _ = input_done_tx.send(accepted);
        })
        .context("failed to spawn stdin reader")?;

    let mut printer_done = false;
    tokio::select! {
        accepted = input_done_rx => {
            tracing::info!(accepted = accepted.unwrap_or(0), "Input exhausted");
        }
        () = shutdown_signal() => {}
        _ = &mut printer => {
            // The printer only returns on a terminal report
            printer_done = true;
        }
    }

    handle.request_stop();

    let timeout = Duration::from_millis(config.shutdown_timeout_ms);
    let waiter = handle.clone();
    let drained = tokio::task::spawn_blocking(move || waiter.await_stopped(timeout)).await?;
    if !drained {
        tracing::warn!(
            pending = handle.queue_len(),
            "Writer did not drain in time, interrupting"
        );
        handle.interrupt();
    }

    let state = tokio::task::spawn_blocking(move || writer.join()).await??;
    if !printer_done {
        let _ = printer.await;
    }

    if state == WriterState::ConnectFailed {
        anyhow::bail!("writer could not open {}", config.location());
    }

    tracing::info!(state = %state, "Spillway shutdown complete");
    Ok(())
}
