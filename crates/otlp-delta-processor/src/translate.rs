//! Rewrites cumulative sums in OTLP metric batches into delta sums.

use std::{collections::HashSet, ops::AddAssign};

use opentelemetry_proto::tonic::{
    collector::metrics::v1::ExportMetricsServiceRequest,
    common::v1::KeyValue,
    metrics::v1::{
        metric::Data, number_data_point, AggregationTemporality, DataPointFlags, NumberDataPoint,
    },
};
use otlp_delta_core::{
    CancellationToken, MetricDataType, MetricIdentity, MetricPoint, MetricTracker, Timestamp,
    Value, ValuePoint,
};
use tracing::debug;

use crate::{Error, ProcessorConfig};

/// Counts of data points handled while processing a batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessStats {
    /// Points rewritten as deltas.
    pub converted: usize,
    /// Points removed because no delta could be computed.
    pub dropped: usize,
}

impl AddAssign for ProcessStats {
    fn add_assign(&mut self, rhs: Self) {
        self.converted += rhs.converted;
        self.dropped += rhs.dropped;
    }
}

/// Converts cumulative sums in incoming batches, in place.
pub struct DeltaProcessor {
    tracker: MetricTracker,
    monotonic_only: bool,
    /// When set, only these metric names are converted.
    enabled_metrics: Option<HashSet<String>>,
}

impl DeltaProcessor {
    /// Constructs a processor whose stale series sweeper stops with `cancel`.
    pub fn new(config: &ProcessorConfig, cancel: CancellationToken) -> Result<Self, Error> {
        let tracker = MetricTracker::new(config.max_stale, cancel)?;
        Ok(Self::with_tracker(tracker, config))
    }

    /// Constructs a processor around an existing tracker.
    pub fn with_tracker(tracker: MetricTracker, config: &ProcessorConfig) -> Self {
        let enabled_metrics = if config.metrics.is_empty() {
            None
        } else {
            Some(config.metrics.iter().cloned().collect())
        };
        Self {
            tracker,
            monotonic_only: config.monotonic_only,
            enabled_metrics,
        }
    }

    pub fn tracker(&self) -> &MetricTracker {
        &self.tracker
    }

    fn is_enabled(&self, name: &str) -> bool {
        self.enabled_metrics
            .as_ref()
            .map_or(true, |enabled| enabled.contains(name))
    }

    /// Converts every eligible cumulative sum in `request` into a delta sum.
    ///
    /// Points that cannot be converted are removed. Everything else in the
    /// batch is left as it was.
    pub fn process(&self, request: &mut ExportMetricsServiceRequest) -> ProcessStats {
        let mut stats = ProcessStats::default();
        for rm in request.resource_metrics.iter_mut() {
            let resource = rm
                .resource
                .as_ref()
                .map(|r| r.attributes.as_slice())
                .unwrap_or_default();
            for sm in rm.scope_metrics.iter_mut() {
                let (scope_name, scope_version) = sm
                    .scope
                    .as_ref()
                    .map(|s| (s.name.as_str(), s.version.as_str()))
                    .unwrap_or(("", ""));
                for metric in sm.metrics.iter_mut() {
                    if !self.is_enabled(&metric.name) {
                        continue;
                    }
                    let Some(Data::Sum(sum)) = metric.data.as_mut() else {
                        continue;
                    };
                    if sum.aggregation_temporality != AggregationTemporality::Cumulative as i32 {
                        continue;
                    }
                    if self.monotonic_only && !sum.is_monotonic {
                        continue;
                    }
                    let series = SeriesTemplate {
                        resource,
                        scope_name,
                        scope_version,
                        name: &metric.name,
                        description: &metric.description,
                        unit: &metric.unit,
                        is_monotonic: sum.is_monotonic,
                    };
                    stats += self.convert_data_points(&mut sum.data_points, &series);
                    sum.aggregation_temporality = AggregationTemporality::Delta as i32;
                }
            }
        }
        stats
    }

    fn convert_data_points(
        &self,
        points: &mut Vec<NumberDataPoint>,
        series: &SeriesTemplate<'_>,
    ) -> ProcessStats {
        let before = points.len();
        points.retain_mut(|dp| {
            let (data_type, value) = match dp.value {
                Some(number_data_point::Value::AsDouble(v)) => (MetricDataType::Sum, Value::Float(v)),
                Some(number_data_point::Value::AsInt(v)) => (MetricDataType::IntSum, Value::Int(v)),
                None => return false,
            };
            // A point without a recorded value is a staleness marker, like NaN.
            if dp.flags & DataPointFlags::NoRecordedValueMask as u32 != 0 {
                return false;
            }
            let point = MetricPoint {
                identity: series.identity(data_type, dp.attributes.clone()),
                point: ValuePoint {
                    observed_timestamp: Timestamp(dp.time_unix_nano),
                    value,
                },
            };
            let delta = self.tracker.convert(&point);
            debug!(
                id = %point.identity.fingerprint(),
                point = ?point.point,
                ?delta,
                valid = delta.is_some(),
                "cumulative-to-delta"
            );
            let Some(delta) = delta else {
                return false;
            };
            dp.start_time_unix_nano = delta.start_timestamp.as_unix_nanos();
            dp.value = Some(match delta.value {
                Value::Float(v) => number_data_point::Value::AsDouble(v),
                Value::Int(v) => number_data_point::Value::AsInt(v),
            });
            true
        });
        ProcessStats {
            converted: points.len(),
            dropped: before - points.len(),
        }
    }
}

/// The parts of a series identity shared by every point of one metric.
struct SeriesTemplate<'a> {
    resource: &'a [KeyValue],
    scope_name: &'a str,
    scope_version: &'a str,
    name: &'a str,
    description: &'a str,
    unit: &'a str,
    is_monotonic: bool,
}

impl SeriesTemplate<'_> {
    fn identity(&self, data_type: MetricDataType, labels: Vec<KeyValue>) -> MetricIdentity {
        MetricIdentity::new(data_type, self.name)
            .with_resource(self.resource.to_vec())
            .with_scope(self.scope_name, self.scope_version)
            .with_monotonic(self.is_monotonic)
            .with_description(self.description)
            .with_unit(self.unit)
            .with_labels(labels)
    }
}
