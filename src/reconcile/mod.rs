//! Reconciliation of successive snapshots into one evolving record per entity.
//!
//! [`Reconciler`] owns the [`EntityStore`] and the [`ChangeLog`] for one run of
//! one source. The live and batch drivers both go through it and differ only
//! in their [`TimestampSource`] and in which sweep they call.

// Overwrites each listed field with the observed value when it differs,
// logging the old and new value.
macro_rules! replace_on_change {
    ($log:expr, $kind:expr, $id:expr, $entity:expr, $obs:expr, $at:expr; $($field:ident),+ $(,)?) => {
        $(
            if $entity.$field != $obs.$field {
                $log.record($kind, &$id, stringify!($field), &$entity.$field, &$obs.$field, $at);
                $entity.$field = $obs.$field.clone();
            }
        )+
    };
}

// Keeps the highest value ever observed; only increases are logged.
macro_rules! keep_max {
    ($log:expr, $kind:expr, $id:expr, $entity:expr, $obs:expr, $at:expr; $($field:ident),+ $(,)?) => {
        $(
            if $obs.$field > $entity.$field {
                $log.record($kind, &$id, stringify!($field), $entity.$field, $obs.$field, $at);
                $entity.$field = $obs.$field;
            }
        )+
    };
}

mod alert;
mod jam;
mod store;

pub use alert::{Alert, reconcile_alert};
pub use jam::{Jam, JamMetrics, reconcile_jam};
pub use store::{EntityStore, Upsert};

use std::collections::HashSet;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};

use crate::changelog::{ChangeLog, ChangeRecord};
use crate::error::SnapshotError;
use crate::parser::ParsedSnapshot;
use crate::snapshot::{EntityKind, Snapshot};
use crate::sweep::{self, SweepOutcome};

/// Which clock stamps a newly created entity's `last_updated`.
///
/// First-seen time is always the observation's own publish time when the feed
/// reports one, and every later update is stamped with the snapshot time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampSource {
    /// Snapshot arrival time (live polling).
    #[default]
    Arrival,
    /// The observation's publish time, falling back to the snapshot time
    /// (replaying an archive).
    Publication,
}

/// When and how an observation was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    pub at: DateTime<Utc>,
    pub source: TimestampSource,
}

impl Stamp {
    pub fn arrival(at: DateTime<Utc>) -> Self {
        Self {
            at,
            source: TimestampSource::Arrival,
        }
    }

    pub fn publication(at: DateTime<Utc>) -> Self {
        Self {
            at,
            source: TimestampSource::Publication,
        }
    }

    fn first_seen(&self, published: Option<DateTime<Utc>>) -> DateTime<Utc> {
        published.unwrap_or(self.at)
    }

    fn initial_update(&self, published: Option<DateTime<Utc>>) -> DateTime<Utc> {
        match self.source {
            TimestampSource::Arrival => self.at,
            TimestampSource::Publication => published.unwrap_or(self.at),
        }
    }
}

/// Activity state shared by alerts and jams, as seen by the sweeper.
pub trait Lifecycle {
    fn kind(&self) -> EntityKind;
    fn id(&self) -> &str;
    /// Time of the last snapshot that contained this entity.
    fn last_seen(&self) -> DateTime<Utc>;
    fn is_active(&self) -> bool;
    fn is_finished(&self) -> bool;
    fn deactivate(&mut self);
    /// Marks the entity as ended at `at`.
    fn finish(&mut self, at: DateTime<Utc>);
}

/// What applying one snapshot did to the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotReport {
    pub alerts_added: usize,
    pub alerts_updated: usize,
    pub jams_added: usize,
    pub jams_updated: usize,
    /// Records repeated under an id already applied from the same snapshot.
    pub duplicates: usize,
    /// Records dropped while parsing.
    pub rejected: usize,
}

impl SnapshotReport {
    pub fn applied(&self) -> usize {
        self.alerts_added + self.alerts_updated + self.jams_added + self.jams_updated
    }
}

pub struct Reconciler {
    store: EntityStore,
    changes: ChangeLog,
    source: TimestampSource,
    processed: Vec<DateTime<Utc>>,
}

impl Reconciler {
    pub fn new(source: TimestampSource) -> Self {
        Self::with_store(EntityStore::new(), source)
    }

    /// Continues from a previously checkpointed store.
    pub fn with_store(store: EntityStore, source: TimestampSource) -> Self {
        Self {
            store,
            changes: ChangeLog::new(),
            source,
            processed: Vec::new(),
        }
    }

    /// Merges every observation of `snapshot` into the store, alerts first.
    ///
    /// A snapshot older than the last one applied is refused before anything
    /// is touched. An id repeated within one snapshot is only applied once.
    pub fn apply(&mut self, snapshot: &Snapshot) -> Result<SnapshotReport, SnapshotError> {
        if let Some(&last) = self.processed.last() {
            if snapshot.taken_at < last {
                return Err(SnapshotError::OutOfOrder {
                    taken_at: snapshot.taken_at,
                    last,
                });
            }
        }

        let stamp = Stamp {
            at: snapshot.taken_at,
            source: self.source,
        };
        let mut report = SnapshotReport::default();

        let mut seen = HashSet::new();
        for alert in &snapshot.alerts {
            if !seen.insert(alert.uuid.as_str()) {
                warn!(uuid = %alert.uuid, "Alert repeated within snapshot, ignoring");
                report.duplicates += 1;
                continue;
            }
            match self.store.upsert_alert(alert, stamp, &mut self.changes) {
                Upsert::Added => report.alerts_added += 1,
                Upsert::Updated => report.alerts_updated += 1,
            }
        }

        let mut seen = HashSet::new();
        for jam in &snapshot.jams {
            if !seen.insert(jam.id.as_str()) {
                warn!(id = %jam.id, "Jam repeated within snapshot, ignoring");
                report.duplicates += 1;
                continue;
            }
            match self.store.upsert_jam(jam, stamp, &mut self.changes) {
                Upsert::Added => report.jams_added += 1,
                Upsert::Updated => report.jams_updated += 1,
            }
        }

        self.processed.push(snapshot.taken_at);
        debug!(
            taken_at = %snapshot.taken_at,
            alerts_added = report.alerts_added,
            alerts_updated = report.alerts_updated,
            jams_added = report.jams_added,
            jams_updated = report.jams_updated,
            "Snapshot applied"
        );
        Ok(report)
    }

    /// Like [`Reconciler::apply`], reporting the records the parser dropped.
    pub fn apply_parsed(
        &mut self,
        parsed: &ParsedSnapshot,
    ) -> Result<SnapshotReport, SnapshotError> {
        for error in &parsed.errors {
            warn!(kind = %error.kind(), error = %error, "Skipping record");
        }
        let mut report = self.apply(&parsed.snapshot)?;
        report.rejected = parsed.errors.len();
        Ok(report)
    }

    /// Streaming sweep: deactivates entities unseen for longer than `window`.
    pub fn sweep_inactive(&mut self, now: DateTime<Utc>, window: TimeDelta) -> SweepOutcome {
        sweep::deactivate_stale(&mut self.store, now, window)
    }

    /// Batch sweep over the timestamps of every snapshot applied so far.
    pub fn sweep_gaps(&mut self, threshold: TimeDelta) -> SweepOutcome {
        sweep::finish_after_gaps(&mut self.store, &self.processed, threshold)
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn changes(&self) -> &ChangeLog {
        &self.changes
    }

    pub fn drain_changes(&mut self) -> Vec<ChangeRecord> {
        self.changes.drain()
    }

    /// Snapshot timestamps applied so far, in order.
    pub fn processed(&self) -> &[DateTime<Utc>] {
        &self.processed
    }

    pub fn into_store(self) -> EntityStore {
        self.store
    }
}
