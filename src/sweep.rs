//! Retiring entities that stopped appearing in the feed.
//!
//! Both sweeps only flip flags on entities that are not yet inactive or
//! finished, so running one again without new input changes nothing.

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info};

use crate::reconcile::{EntityStore, Lifecycle};
use crate::snapshot::EntityKind;

/// How many entities a sweep touched, per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub alerts: usize,
    pub jams: usize,
}

impl SweepOutcome {
    pub fn total(&self) -> usize {
        self.alerts + self.jams
    }

    fn count(&mut self, entity: &dyn Lifecycle) {
        match entity.kind() {
            EntityKind::Alert => self.alerts += 1,
            EntityKind::Jam => self.jams += 1,
        }
    }
}

/// Streaming sweep: marks inactive every active entity last seen more than
/// `window` before `now`.
pub fn deactivate_stale(
    store: &mut EntityStore,
    now: DateTime<Utc>,
    window: TimeDelta,
) -> SweepOutcome {
    let cutoff = now - window;
    let mut outcome = SweepOutcome::default();

    for entity in store.entities_mut() {
        if entity.is_active() && entity.last_seen() < cutoff {
            entity.deactivate();
            outcome.count(entity);
        }
    }

    info!(
        cutoff = %cutoff,
        alerts = outcome.alerts,
        jams = outcome.jams,
        "Deactivated stale entities"
    );
    outcome
}

/// Consecutive pairs of `timestamps` (sorted first) further apart than
/// `threshold`, as `(last before gap, first after gap)`.
pub fn gaps(
    timestamps: &[DateTime<Utc>],
    threshold: TimeDelta,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut sorted = timestamps.to_vec();
    sorted.sort();
    sorted
        .windows(2)
        .filter(|pair| pair[1] - pair[0] > threshold)
        .map(|pair| (pair[0], pair[1]))
        .collect()
}

/// Batch sweep: for every gap in the processed snapshot times longer than
/// `threshold`, finishes each unfinished entity last seen at or before the
/// start of the gap, as of that start.
///
/// The feed was unavailable during the gap, so whatever was current when it
/// went quiet is presumed to have ended at the last good snapshot. Entities
/// seen again after the gap are left alone.
pub fn finish_after_gaps(
    store: &mut EntityStore,
    timestamps: &[DateTime<Utc>],
    threshold: TimeDelta,
) -> SweepOutcome {
    let mut outcome = SweepOutcome::default();

    for (start, end) in gaps(timestamps, threshold) {
        debug!(start = %start, end = %end, "Snapshot gap");
        for entity in store.entities_mut() {
            if !entity.is_finished() && entity.last_seen() <= start {
                entity.finish(start);
                outcome.count(entity);
            }
        }
    }

    info!(
        alerts = outcome.alerts,
        jams = outcome.jams,
        "Finished entities at snapshot gaps"
    );
    outcome
}
