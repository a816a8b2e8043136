//! Export of reconciled entities and change logs.
//!
//! Entities are flattened into upsert-ready records (alerts keyed by `uuid`,
//! jams by `id`). Geometry stays a coordinate list; the WKT helpers are for
//! stores that want `POINT`/`LINESTRING` text.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use serde::Serialize;
use tracing::{debug, info};

use crate::changelog::ChangeRecord;
use crate::config::CityFilter;
use crate::reconcile::{Alert, EntityStore, Jam};
use crate::snapshot::Point;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRecord {
    pub uuid: String,
    pub country: String,
    pub city: String,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub subtype: String,
    pub street: String,
    pub road_type: i64,
    pub report_rating: i64,
    pub confidence: i64,
    pub reliability: i64,
    pub magvar: i64,
    pub report_by_municipality_user: bool,
    pub report_description: String,
    pub location: Option<Point>,
    pub published_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub active: bool,
    pub finished: bool,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Alert> for AlertRecord {
    fn from(a: &Alert) -> Self {
        AlertRecord {
            uuid: a.uuid.clone(),
            country: a.country.clone(),
            city: a.city.clone(),
            alert_type: a.alert_type.clone(),
            subtype: a.subtype.clone(),
            street: a.street.clone(),
            road_type: a.road_type,
            report_rating: a.report_rating,
            confidence: a.confidence,
            reliability: a.reliability,
            magvar: a.magvar,
            report_by_municipality_user: a.report_by_municipality_user,
            report_description: a.report_description.clone(),
            location: a.location,
            published_at: a.published_at,
            last_updated: a.last_updated,
            active: a.active,
            finished: a.finished,
            finished_at: a.finished_at,
        }
    }
}

/// A jam segment with the id of the jam it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentRecord {
    pub jam_id: String,
    pub segment_id: Option<i64>,
    pub from_node: Option<i64>,
    pub to_node: Option<i64>,
    pub is_forward: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JamRecord {
    pub id: String,
    pub uuid: String,
    pub country: String,
    pub city: String,
    pub turn_type: String,
    pub street: String,
    pub start_node: String,
    pub end_node: String,
    pub road_type: i64,
    pub blocking_alert_uuid: String,
    pub level_max: f64,
    pub level_avg: f64,
    pub speed_kmh_min: f64,
    pub speed_kmh_avg: f64,
    pub length_max: f64,
    pub length_avg: f64,
    pub speed_max: f64,
    pub speed_avg: f64,
    pub delay_max: f64,
    pub delay_avg: f64,
    pub update_count: u64,
    pub line: Vec<Point>,
    pub segments: Vec<SegmentRecord>,
    pub published_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub active: bool,
    pub finished: bool,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Jam> for JamRecord {
    fn from(j: &Jam) -> Self {
        let m = &j.metrics;
        JamRecord {
            id: j.id.clone(),
            uuid: j.uuid.clone(),
            country: j.country.clone(),
            city: j.city.clone(),
            turn_type: j.turn_type.clone(),
            street: j.street.clone(),
            start_node: j.start_node.clone(),
            end_node: j.end_node.clone(),
            road_type: j.road_type,
            blocking_alert_uuid: j.blocking_alert_uuid.clone(),
            level_max: m.level.max(),
            level_avg: m.level.average(),
            speed_kmh_min: m.speed_kmh.min(),
            speed_kmh_avg: m.speed_kmh.average(),
            length_max: m.length.max(),
            length_avg: m.length.average(),
            speed_max: m.speed.max(),
            speed_avg: m.speed.average(),
            delay_max: m.delay.max(),
            delay_avg: m.delay.average(),
            update_count: j.update_count,
            line: j.line.clone(),
            segments: j
                .segments
                .iter()
                .map(|s| SegmentRecord {
                    jam_id: j.id.clone(),
                    segment_id: s.id,
                    from_node: s.from_node,
                    to_node: s.to_node,
                    is_forward: s.is_forward,
                })
                .collect(),
            published_at: j.published_at,
            last_updated: j.last_updated,
            active: j.active,
            finished: j.finished,
            finished_at: j.finished_at,
        }
    }
}

pub fn alert_records(store: &EntityStore, filter: &CityFilter) -> Vec<AlertRecord> {
    store
        .alerts()
        .filter(|a| filter.matches(&a.city))
        .map(AlertRecord::from)
        .collect()
}

pub fn jam_records(store: &EntityStore, filter: &CityFilter) -> Vec<JamRecord> {
    store
        .jams()
        .filter(|j| filter.matches(&j.city))
        .map(JamRecord::from)
        .collect()
}

pub fn to_point_wkt(point: &Point) -> String {
    format!("POINT({} {})", point.x, point.y)
}

pub fn to_linestring_wkt(points: &[Point]) -> String {
    if points.is_empty() {
        return "LINESTRING EMPTY".to_string();
    }
    let coords: Vec<String> = points.iter().map(Point::to_string).collect();
    format!("LINESTRING({})", coords.join(", "))
}

/// Writes `value` as indented JSON, creating parent directories as needed.
pub fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let body = serde_json::to_vec_pretty(value)?;
    fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))?;
    debug!(path = %path.display(), "JSON written");
    Ok(())
}

/// Appends change records as rows to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_changes(path: &Path, changes: &[ChangeRecord]) -> Result<()> {
    if changes.is_empty() {
        return Ok(());
    }
    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, rows = changes.len(), "Appending change log");

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);

    for change in changes {
        writer.serialize(change)?;
    }
    writer.flush()?;

    Ok(())
}

/// Destination for the state of one source after a processing cycle.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn persist(
        &self,
        source: &str,
        store: &EntityStore,
        changes: &[ChangeRecord],
    ) -> Result<()>;
}

/// Keeps one directory per source holding `alerts.json`, `jams.json`, the
/// `store.json` checkpoint and an ever-growing `changes.csv`.
pub struct JsonDirSink {
    root: PathBuf,
}

impl JsonDirSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn source_dir(&self, source: &str) -> PathBuf {
        self.root.join(source)
    }

    pub fn checkpoint_path(&self, source: &str) -> PathBuf {
        self.source_dir(source).join("store.json")
    }

    /// Loads a source's checkpoint, or an empty store when it has none yet.
    ///
    /// A checkpoint that exists but cannot be read is an error and is left
    /// in place.
    pub fn load_checkpoint(&self, source: &str) -> Result<EntityStore> {
        let path = self.checkpoint_path(source);
        if !path.exists() {
            info!(source, path = %path.display(), "No checkpoint, starting empty");
            return Ok(EntityStore::new());
        }
        let store = EntityStore::load(&path)
            .with_context(|| format!("unusable checkpoint for source {source}"))?;
        info!(
            source,
            alerts = store.alert_count(),
            jams = store.jam_count(),
            "Checkpoint loaded"
        );
        Ok(store)
    }
}

#[async_trait]
impl RecordSink for JsonDirSink {
    async fn persist(
        &self,
        source: &str,
        store: &EntityStore,
        changes: &[ChangeRecord],
    ) -> Result<()> {
        let dir = self.source_dir(source);
        write_json(&dir.join("alerts.json"), &alert_records(store, &CityFilter::Any))?;
        write_json(&dir.join("jams.json"), &jam_records(store, &CityFilter::Any))?;
        // The log is appended last: rows only land once the checkpoint
        // holding them is written.
        store.save(&self.checkpoint_path(source))?;
        append_changes(&dir.join("changes.csv"), changes)?;

        info!(
            source,
            alerts = store.alert_count(),
            jams = store.jam_count(),
            changes = changes.len(),
            "Source persisted"
        );
        Ok(())
    }
}
