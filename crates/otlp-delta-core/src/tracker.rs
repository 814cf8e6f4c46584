//! Stateful conversion of cumulative sums into deltas.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use scc::hash_map::Entry;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    identity::{MetricIdentity, MetricPoint},
    value::{DeltaValue, Timestamp, ValuePoint},
    Error,
};

/// Last observation of a single series.
#[derive(Debug)]
pub struct SeriesState {
    identity: MetricIdentity,
    prev_point: ValuePoint,
}

impl SeriesState {
    pub fn identity(&self) -> &MetricIdentity {
        &self.identity
    }

    pub fn prev_point(&self) -> ValuePoint {
        self.prev_point
    }
}

/// Series state keyed by identity fingerprint. Each entry has its own lock.
type StateStore = scc::HashMap<String, Arc<Mutex<SeriesState>>>;

/// Converts cumulative points into deltas, remembering the previous point of
/// every series it has seen.
///
/// Clones share the same state.
#[derive(Clone)]
pub struct MetricTracker {
    max_stale: Duration,
    states: Arc<StateStore>,
}

impl MetricTracker {
    /// Constructs a new tracker.
    ///
    /// A non-zero `max_stale` spawns a sweeper on the current Tokio runtime
    /// that forgets series which have not reported for `max_stale`. It stops
    /// once `cancel` is cancelled. With a zero `max_stale` state is kept
    /// forever and no runtime is needed.
    pub fn new(max_stale: Duration, cancel: CancellationToken) -> Result<MetricTracker, Error> {
        let tracker = MetricTracker {
            max_stale,
            states: Arc::new(StateStore::default()),
        };
        if !max_stale.is_zero() {
            let handle = tokio::runtime::Handle::try_current()?;
            let states = tracker.states.clone();
            handle.spawn(sweeper(max_stale, cancel, move |stale_before| {
                let removed = remove_stale(&states, stale_before);
                debug!(
                    removed,
                    remaining = states.len(),
                    "Swept stale series"
                );
            }));
        }
        Ok(tracker)
    }

    pub fn max_stale(&self) -> Duration {
        self.max_stale
    }

    /// Number of series currently tracked.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Converts a cumulative point into the delta since the previous point of
    /// its series.
    ///
    /// Returns `None` when the point must be dropped: the metric is not a
    /// sum, the value is a stale marker, or this is the first point of a
    /// non-monotonic series.
    ///
    /// # Panics
    ///
    /// Panics if the value kind does not match the identity's data type.
    pub fn convert(&self, in_point: &MetricPoint) -> Option<DeltaValue> {
        let identity = &in_point.identity;
        if !identity.data_type().is_convertible() {
            return None;
        }

        let point = in_point.point;
        assert_eq!(
            identity.data_type().number_kind(),
            Some(point.value.kind()),
            "value kind does not match metric data type of {}",
            identity.name()
        );
        // NaN marks the series as stale upstream. It never touches state.
        if point.value.is_stale_marker() {
            return None;
        }

        let key = identity.fingerprint();
        let (state, created) = self.get_or_create(key, identity, point);
        if created {
            debug!(metric = identity.name(), "Discovered new series");
            if identity.is_monotonic() {
                return Some(DeltaValue {
                    start_timestamp: point.observed_timestamp,
                    value: point.value,
                });
            }
            return None;
        }

        let mut state = lock(&state);
        let out = DeltaValue {
            start_timestamp: state.prev_point.observed_timestamp,
            value: point
                .value
                .delta_since(state.prev_point.value, identity.is_monotonic()),
        };
        trace!(metric = identity.name(), prev = ?state.prev_point, ?point, delta = ?out);
        state.prev_point = point;
        Some(out)
    }

    /// Looks up the state for `key`, inserting `point` as its first
    /// observation if absent. The flag is true when the state was created.
    fn get_or_create(
        &self,
        key: String,
        identity: &MetricIdentity,
        point: ValuePoint,
    ) -> (Arc<Mutex<SeriesState>>, bool) {
        if let Some(state) = self.states.read_sync(&key, |_, s| s.clone()) {
            return (state, false);
        }
        match self.states.entry_sync(key) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let state = Arc::new(Mutex::new(SeriesState {
                    identity: identity.clone(),
                    prev_point: point,
                }));
                let _ = entry.insert_entry(state.clone());
                (state, true)
            }
        }
    }
}

fn lock(state: &Mutex<SeriesState>) -> MutexGuard<'_, SeriesState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes every series last observed before `stale_before`, returning how
/// many were removed.
fn remove_stale(states: &StateStore, stale_before: Timestamp) -> usize {
    let mut removed = 0;
    states.retain_sync(|_, state| {
        // There is a known race here. A series may be updated at the same
        // time as it is judged stale, if its point arrives around the
        // expiration time. Either the update wins and the series survives,
        // or the removal wins and the update lands on a detached state; the
        // next point then starts the series over as a first observation.
        let last_observed = lock(state).prev_point.observed_timestamp;
        let keep = last_observed >= stale_before;
        if !keep {
            removed += 1;
        }
        keep
    });
    removed
}

/// Calls `remove` every `max_stale` with the cutoff for staleness, until
/// `cancel` fires.
async fn sweeper<F: FnMut(Timestamp)>(
    max_stale: Duration,
    cancel: CancellationToken,
    mut remove: F,
) {
    let Some(first_tick) = Instant::now().checked_add(max_stale) else {
        warn!(?max_stale, "Stale series retention cannot be scheduled, never sweeping");
        cancel.cancelled().await;
        return;
    };
    let mut ticker = tokio::time::interval_at(first_tick, max_stale);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Stopping stale series sweeper");
                return;
            }
            _ = ticker.tick() => {
                remove(Timestamp::now().saturating_sub(max_stale));
            }
        }
    }
}
