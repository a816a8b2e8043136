//! Batch merge: replay an archive directory in order into a single store.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::archive::{list_snapshots, select_feed};
use crate::changelog::ChangeRecord;
use crate::config::{CityFilter, SweepConfig};
use crate::output::{alert_records, append_changes, jam_records, write_json};
use crate::parser::parse_snapshot;
use crate::reconcile::{EntityStore, Reconciler, TimestampSource};
use crate::sweep::SweepOutcome;

pub const ALERTS_FILE: &str = "alerts_full.json";
pub const JAMS_FILE: &str = "jams_full.json";
pub const CHANGES_FILE: &str = "changes.csv";

/// The merged result of one archive.
#[derive(Debug)]
pub struct BatchOutcome {
    pub store: EntityStore,
    pub changes: Vec<ChangeRecord>,
    /// Capture times of every snapshot that was applied, oldest first.
    pub processed: Vec<DateTime<Utc>>,
    /// Files that could not be read or parsed.
    pub skipped: Vec<PathBuf>,
    pub rejected_records: usize,
    pub finished: SweepOutcome,
}

/// Reconciles the archived snapshots of one feed in `dir`, then finishes
/// whatever was current before each pause longer than the sweep's gap
/// threshold.
///
/// `key` names the feed; without it the archive must hold only one.
/// Unreadable or corrupt files are logged and skipped; they take no part in
/// gap detection.
#[tracing::instrument(skip_all, fields(dir = %dir.display(), key = ?key))]
pub fn merge_archive(dir: &Path, key: Option<&str>, sweep: &SweepConfig) -> Result<BatchOutcome> {
    let snapshots = select_feed(list_snapshots(dir)?, key)?;
    info!(files = snapshots.len(), "Merging archive");

    let mut reconciler = Reconciler::new(TimestampSource::Publication);
    let mut skipped = Vec::new();
    let mut rejected_records = 0;

    for archived in &snapshots {
        let bytes = match std::fs::read(&archived.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(file = %archived.path.display(), error = %e, "Failed to read snapshot");
                skipped.push(archived.path.clone());
                continue;
            }
        };

        let parsed = match parse_snapshot(&bytes, archived.taken_at) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(file = %archived.path.display(), error = %e, "Corrupt snapshot, skipping");
                skipped.push(archived.path.clone());
                continue;
            }
        };

        match reconciler.apply_parsed(&parsed) {
            Ok(report) => rejected_records += report.rejected,
            Err(e) => {
                warn!(file = %archived.path.display(), error = %e, "Snapshot not applied");
                skipped.push(archived.path.clone());
            }
        }
    }

    let finished = reconciler.sweep_gaps(sweep.gap_threshold);
    let changes = reconciler.drain_changes();
    let processed = reconciler.processed().to_vec();
    let store = reconciler.into_store();

    info!(
        processed = processed.len(),
        skipped = skipped.len(),
        alerts = store.alert_count(),
        jams = store.jam_count(),
        changes = changes.len(),
        "Archive merged"
    );

    Ok(BatchOutcome {
        store,
        changes,
        processed,
        skipped,
        rejected_records,
        finished,
    })
}

/// Writes the merged entities and the change log into `out_dir`.
///
/// Returns the paths written, for uploading.
pub fn export(outcome: &BatchOutcome, out_dir: &Path, city: &CityFilter) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(out_dir)?;
    let mut written = Vec::with_capacity(3);

    let alerts = alert_records(&outcome.store, city);
    let path = out_dir.join(ALERTS_FILE);
    write_json(&path, &alerts)?;
    written.push(path);

    let jams = jam_records(&outcome.store, city);
    let path = out_dir.join(JAMS_FILE);
    write_json(&path, &jams)?;
    written.push(path);

    let path = out_dir.join(CHANGES_FILE);
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    if !outcome.changes.is_empty() {
        append_changes(&path, &outcome.changes)?;
        written.push(path);
    }

    info!(
        out_dir = %out_dir.display(),
        alerts = alerts.len(),
        jams = jams.len(),
        "Merged results exported"
    );
    Ok(written)
}
