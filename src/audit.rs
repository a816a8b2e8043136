//! Raw field audit over an archive.
//!
//! Unlike the reconciler, this compares the feed's own JSON values between
//! consecutive appearances of an entity and keeps nothing but the last seen
//! values. Useful for checking which fields the feed actually revises.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::archive::{list_snapshots, select_feed};
use crate::snapshot::EntityKind;

pub const TRACKED_ALERT_FIELDS: &[&str] = &[
    "country",
    "city",
    "reportRating",
    "confidence",
    "reliability",
    "type",
    "subtype",
    "street",
    "roadType",
    "location",
    "pubMillis",
];

pub const TRACKED_JAM_FIELDS: &[&str] = &[
    "country", "level", "city", "speedKMH", "length", "delay", "street", "roadType", "line",
    "pubMillis",
];

/// A tracked raw field whose value differs from the entity's previous
/// appearance. Absent fields compare as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub kind: EntityKind,
    pub entity_id: String,
    pub snapshot: String,
    pub field: &'static str,
    pub old_value: Value,
    pub new_value: Value,
}

type Tracked = Vec<Value>;

#[derive(Debug, Default)]
pub struct ChangeAudit {
    alerts: HashMap<String, Tracked>,
    jams: HashMap<String, Tracked>,
}

impl ChangeAudit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compares one raw feed document against what was seen before.
    /// `label` names the snapshot in the reported changes.
    pub fn observe(&mut self, label: &str, doc: &Value) -> Vec<FieldChange> {
        let mut changes = Vec::new();
        compare_all(
            &mut self.alerts,
            EntityKind::Alert,
            doc.get("alerts"),
            TRACKED_ALERT_FIELDS,
            label,
            &mut changes,
        );
        compare_all(
            &mut self.jams,
            EntityKind::Jam,
            doc.get("jams"),
            TRACKED_JAM_FIELDS,
            label,
            &mut changes,
        );
        changes
    }

    pub fn tracked_alerts(&self) -> usize {
        self.alerts.len()
    }

    pub fn tracked_jams(&self) -> usize {
        self.jams.len()
    }
}

fn compare_all(
    previous: &mut HashMap<String, Tracked>,
    kind: EntityKind,
    items: Option<&Value>,
    fields: &'static [&'static str],
    label: &str,
    changes: &mut Vec<FieldChange>,
) {
    let Some(items) = items.and_then(Value::as_array) else {
        return;
    };

    for item in items {
        let Some(uuid) = entity_key(item) else {
            warn!(%kind, snapshot = label, "Record without uuid, not audited");
            continue;
        };
        let current: Tracked = fields
            .iter()
            .map(|f| item.get(*f).cloned().unwrap_or(Value::Null))
            .collect();

        if let Some(before) = previous.get(&uuid) {
            for ((&field, old), new) in fields.iter().zip(before).zip(&current) {
                if old != new {
                    info!(
                        %kind,
                        id = %uuid,
                        snapshot = label,
                        field,
                        %old,
                        %new,
                        "Raw field changed"
                    );
                    changes.push(FieldChange {
                        kind,
                        entity_id: uuid.clone(),
                        snapshot: label.to_string(),
                        field,
                        old_value: old.clone(),
                        new_value: new.clone(),
                    });
                }
            }
        }
        previous.insert(uuid, current);
    }
}

/// The `uuid` of a raw record. Jam feeds send it as a number.
fn entity_key(item: &Value) -> Option<String> {
    match item.get("uuid")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Audits the archived snapshots of one feed in `dir` in capture order.
///
/// Files that cannot be read or are not JSON are skipped. See
/// [`select_feed`] for how `key` picks the feed.
#[tracing::instrument(skip_all, fields(dir = %dir.display(), key = ?key))]
pub fn audit_archive(dir: &Path, key: Option<&str>) -> Result<Vec<FieldChange>> {
    let mut audit = ChangeAudit::new();
    let mut changes = Vec::new();

    for archived in select_feed(list_snapshots(dir)?, key)? {
        let label = archived
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        let doc: Value = match std::fs::read(&archived.path)
            .context("read failed")
            .and_then(|bytes| serde_json::from_slice(&bytes).context("invalid JSON"))
        {
            Ok(doc) => doc,
            Err(e) => {
                warn!(file = %label, error = %e, "Skipping snapshot");
                continue;
            }
        };

        changes.extend(audit.observe(&label, &doc));
    }

    info!(
        alerts = audit.tracked_alerts(),
        jams = audit.tracked_jams(),
        changes = changes.len(),
        "Audit complete"
    );
    Ok(changes)
}
