//! Conversion of cumulative OTLP sums into delta sums.
//!
//! A [`MetricTracker`] remembers the last observed point of every series and
//! turns each new cumulative point into the change since that observation,
//! correcting for counter resets on monotonic sums. Series are keyed by a
//! [`MetricIdentity`] fingerprint built from their resource, scope, metric
//! metadata and labels.

mod error;
mod identity;
mod tracker;
mod value;

pub use error::Error;
pub use identity::{MetricDataType, MetricIdentity, MetricPoint};
pub use tracker::{MetricTracker, SeriesState};
pub use value::{DeltaValue, NumberKind, Timestamp, Value, ValuePoint};
// Re-exported so callers can cancel the sweeper without naming tokio-util.
pub use tokio_util::sync::CancellationToken;
