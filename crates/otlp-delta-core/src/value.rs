//! Observed values and the deltas computed from them.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Nanoseconds since the UNIX epoch, as carried by OTLP `time_unix_nano`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// The current wall clock time.
    pub fn now() -> Timestamp {
        Timestamp::from_system_time(SystemTime::now())
    }

    /// Converts a system time, clamping anything before the epoch to zero.
    pub fn from_system_time(time: SystemTime) -> Timestamp {
        let nanos = time
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos().min(u64::MAX as u128) as u64)
            .unwrap_or(0);
        Timestamp(nanos)
    }

    /// Moves this timestamp back by `d`, stopping at the epoch.
    pub fn saturating_sub(self, d: Duration) -> Timestamp {
        let nanos = d.as_nanos().min(u64::MAX as u128) as u64;
        Timestamp(self.0.saturating_sub(nanos))
    }

    pub fn as_unix_nanos(self) -> u64 {
        self.0
    }
}

impl From<u64> for Timestamp {
    fn from(nanos: u64) -> Self {
        Timestamp(nanos)
    }
}

/// Numeric representation of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumberKind {
    Float,
    Int,
}

/// A single scalar sample value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Float(f64),
    Int(i64),
}

impl Value {
    pub fn kind(&self) -> NumberKind {
        match self {
            Value::Float(_) => NumberKind::Float,
            Value::Int(_) => NumberKind::Int,
        }
    }

    /// Upstream sources report NaN to mark a series as stale.
    pub fn is_stale_marker(&self) -> bool {
        matches!(self, Value::Float(v) if v.is_nan())
    }

    /// Computes the change from `prev` to `self`.
    ///
    /// For monotonic series a decrease is read as a counter reset, and the
    /// new value is the total accrued since that reset.
    ///
    /// # Panics
    ///
    /// Panics if `self` and `prev` are of different kinds. A float and an int
    /// under one series means the identity was built wrong upstream.
    pub fn delta_since(self, prev: Value, monotonic: bool) -> Value {
        match (self, prev) {
            (Value::Float(value), Value::Float(prev)) => {
                if monotonic && value < prev {
                    Value::Float(value)
                } else {
                    Value::Float(value - prev)
                }
            }
            (Value::Int(value), Value::Int(prev)) => {
                if monotonic && value < prev {
                    Value::Int(value)
                } else {
                    Value::Int(value.wrapping_sub(prev))
                }
            }
            (value, prev) => panic!(
                "series value kind changed from {:?} to {:?}",
                prev.kind(),
                value.kind()
            ),
        }
    }
}

/// A value observed at a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValuePoint {
    pub observed_timestamp: Timestamp,
    pub value: Value,
}

/// The change of a series over the window starting at `start_timestamp` and
/// ending at the observation that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeltaValue {
    pub start_timestamp: Timestamp,
    pub value: Value,
}
