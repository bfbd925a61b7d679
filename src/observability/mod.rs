//! Observability infrastructure.
//!
//! Provides:
//! - Structured logging via tracing
//! - OpenTelemetry metrics for commits, failures and queue depth

pub mod metrics;
pub mod tracing;
