//! A metrics pipeline stage converting cumulative OTLP sums into delta sums.
//!
//! Batches arrive over OTLP/gRPC, cumulative sums are rewritten in place
//! using an [`otlp_delta_core::MetricTracker`], and the batch is forwarded to
//! a downstream OTLP endpoint. Points without enough history to produce a
//! delta are dropped.

mod config;
mod error;
pub mod logging;
mod service;
mod translate;

#[cfg(test)]
mod test_utils;

pub use config::ProcessorConfig;
pub use error::Error;
pub use service::{serve, DeltaMetricsService};
pub use translate::{DeltaProcessor, ProcessStats};
