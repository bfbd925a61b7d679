//! Flow between producers, the writer and its observers.
//!
//! Provides:
//! - Work queue carrying batches and the shutdown item to the writer
//! - Report bus broadcasting commit and failure outcomes

pub mod queue;
pub mod report;
