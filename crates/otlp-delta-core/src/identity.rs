//! Timeseries identity helpers.

use std::{cell::RefCell, cmp::Ordering, fmt::Write};

use itertools::Itertools;
use opentelemetry_proto::tonic::common::v1::{any_value::Value as OtlpValue, AnyValue, KeyValue};

use crate::value::{NumberKind, ValuePoint};

/// Allocate a minimum of 64 bytes for fingerprint buffers.
const INITIAL_CAPACITY: usize = 64;

/// Field delimiter in fingerprints.
const DELIMITER: char = ';';

/// Characters escaped inside keys and values so they cannot forge structure.
const RESERVED: &[char] = &[DELIMITER, '\\', ',', '=', '[', ']', '{', '}'];

thread_local! {
    static FINGERPRINT_BUFFER: RefCell<String> = RefCell::new(String::with_capacity(INITIAL_CAPACITY));
}

/// The shape of a metric stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricDataType {
    /// Sum with floating point points.
    Sum,
    /// Sum with integer points.
    IntSum,
    Gauge,
    IntGauge,
    Histogram,
    ExponentialHistogram,
    Summary,
}

impl MetricDataType {
    /// Returns the scalar kind of points for number-valued types.
    pub fn number_kind(&self) -> Option<NumberKind> {
        match self {
            MetricDataType::Sum | MetricDataType::Gauge => Some(NumberKind::Float),
            MetricDataType::IntSum | MetricDataType::IntGauge => Some(NumberKind::Int),
            _ => None,
        }
    }

    /// Whether cumulative points of this type can be turned into deltas.
    pub fn is_convertible(&self) -> bool {
        matches!(self, MetricDataType::Sum | MetricDataType::IntSum)
    }

    fn tag(&self) -> &'static str {
        match self {
            MetricDataType::Sum => "sum",
            MetricDataType::IntSum => "isum",
            MetricDataType::Gauge => "gauge",
            MetricDataType::IntGauge => "igauge",
            MetricDataType::Histogram => "hist",
            MetricDataType::ExponentialHistogram => "ehist",
            MetricDataType::Summary => "summary",
        }
    }
}

/// Describes which time series a point belongs to.
///
/// Identities compare by their fingerprint, so the order in which resource
/// attributes or labels were supplied never matters.
#[derive(Debug, Clone)]
pub struct MetricIdentity {
    resource: Vec<KeyValue>,
    scope_name: String,
    scope_version: String,
    data_type: MetricDataType,
    is_monotonic: bool,
    name: String,
    description: String,
    unit: String,
    labels: Vec<KeyValue>,
}

impl MetricIdentity {
    /// Constructs a new identity for the named metric with no attributes.
    pub fn new(data_type: MetricDataType, name: impl Into<String>) -> MetricIdentity {
        MetricIdentity {
            resource: Vec::new(),
            scope_name: String::new(),
            scope_version: String::new(),
            data_type,
            is_monotonic: false,
            name: name.into(),
            description: String::new(),
            unit: String::new(),
            labels: Vec::new(),
        }
    }

    pub fn with_resource(mut self, attributes: Vec<KeyValue>) -> Self {
        self.resource = attributes;
        self
    }

    pub fn with_scope(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.scope_name = name.into();
        self.scope_version = version.into();
        self
    }

    pub fn with_monotonic(mut self, is_monotonic: bool) -> Self {
        self.is_monotonic = is_monotonic;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Sets the point attributes that distinguish this series within its metric.
    pub fn with_labels(mut self, labels: Vec<KeyValue>) -> Self {
        self.labels = labels;
        self
    }

    pub fn resource(&self) -> &[KeyValue] {
        &self.resource
    }

    pub fn scope_name(&self) -> &str {
        &self.scope_name
    }

    pub fn scope_version(&self) -> &str {
        &self.scope_version
    }

    pub fn data_type(&self) -> MetricDataType {
        self.data_type
    }

    pub fn is_monotonic(&self) -> bool {
        self.is_monotonic
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn labels(&self) -> &[KeyValue] {
        &self.labels
    }

    /// Writes the canonical form of this identity into `buf`.
    ///
    /// Every field is written, even when empty, and attributes are written in
    /// ascending key order.
    pub fn write(&self, buf: &mut String) {
        buf.push_str("r;");
        write_attributes(buf, &self.resource);

        buf.push_str(";i;");
        write_escaped(buf, &self.scope_name);
        buf.push(DELIMITER);
        write_escaped(buf, &self.scope_version);

        buf.push_str(";t;");
        buf.push_str(self.data_type.tag());
        buf.push(DELIMITER);
        buf.push(if self.is_monotonic { '1' } else { '0' });

        buf.push_str(";m;");
        write_escaped(buf, &self.name);
        buf.push(DELIMITER);
        write_escaped(buf, &self.description);
        buf.push(DELIMITER);
        write_escaped(buf, &self.unit);

        buf.push_str(";l;");
        write_attributes(buf, &self.labels);
    }

    /// The canonical, order independent key of this series.
    pub fn fingerprint(&self) -> String {
        FINGERPRINT_BUFFER.with_borrow_mut(|buf| {
            buf.clear();
            self.write(buf);
            buf.clone()
        })
    }
}

impl PartialEq for MetricIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint() == other.fingerprint()
    }
}
impl Eq for MetricIdentity {}

impl std::hash::Hash for MetricIdentity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.fingerprint().hash(state)
    }
}

/// A point observed on a series.
#[derive(Debug, Clone)]
pub struct MetricPoint {
    pub identity: MetricIdentity,
    pub point: ValuePoint,
}

/// Orders attributes by key. Duplicate keys fall back to their rendered
/// value so the fingerprint never depends on input order.
fn attribute_order(l: &&KeyValue, r: &&KeyValue) -> Ordering {
    l.key.cmp(&r.key).then_with(|| {
        let mut lv = String::new();
        let mut rv = String::new();
        write_any_value(&mut lv, l.value.as_ref());
        write_any_value(&mut rv, r.value.as_ref());
        lv.cmp(&rv)
    })
}

fn write_attributes(buf: &mut String, attributes: &[KeyValue]) {
    for kv in attributes.iter().sorted_by(attribute_order) {
        write_escaped(buf, &kv.key);
        buf.push(DELIMITER);
        write_any_value(buf, kv.value.as_ref());
        buf.push(DELIMITER);
    }
}

fn write_escaped(buf: &mut String, s: &str) {
    for c in s.chars() {
        if RESERVED.contains(&c) {
            buf.push('\\');
        }
        buf.push(c);
    }
}

fn write_any_value(buf: &mut String, value: Option<&AnyValue>) {
    match value.and_then(|v| v.value.as_ref()) {
        None => buf.push('_'),
        Some(OtlpValue::StringValue(s)) => {
            buf.push_str("s:");
            write_escaped(buf, s);
        }
        Some(OtlpValue::BoolValue(b)) => {
            let _ = write!(buf, "b:{b}");
        }
        Some(OtlpValue::IntValue(i)) => {
            let _ = write!(buf, "i:{i}");
        }
        Some(OtlpValue::DoubleValue(d)) => {
            let _ = write!(buf, "d:{d}");
        }
        Some(OtlpValue::BytesValue(bytes)) => {
            buf.push_str("x:");
            for b in bytes {
                let _ = write!(buf, "{b:02x}");
            }
        }
        Some(OtlpValue::ArrayValue(array)) => {
            buf.push('[');
            for v in &array.values {
                write_any_value(buf, Some(v));
                buf.push(',');
            }
            buf.push(']');
        }
        Some(OtlpValue::KvlistValue(list)) => {
            buf.push('{');
            for kv in list.values.iter().sorted_by(attribute_order) {
                write_escaped(buf, &kv.key);
                buf.push('=');
                write_any_value(buf, kv.value.as_ref());
                buf.push(',');
            }
            buf.push('}');
        }
    }
}
