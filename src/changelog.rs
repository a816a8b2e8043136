//! Field-level audit trail produced while reconciling.

use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::snapshot::EntityKind;

/// One field of one entity changing value in one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub kind: EntityKind,
    pub entity_id: String,
    pub field: String,
    pub old_value: String,
    pub new_value: String,
    pub at: DateTime<Utc>,
}

/// Append-only sequence of [`ChangeRecord`]s. Nothing in the reconciler reads
/// it back; consumers take the records with [`ChangeLog::drain`].
#[derive(Debug, Default, Clone)]
pub struct ChangeLog {
    records: Vec<ChangeRecord>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        kind: EntityKind,
        entity_id: &str,
        field: &str,
        old_value: impl Display,
        new_value: impl Display,
        at: DateTime<Utc>,
    ) {
        let record = ChangeRecord {
            kind,
            entity_id: entity_id.to_string(),
            field: field.to_string(),
            old_value: old_value.to_string(),
            new_value: new_value.to_string(),
            at,
        };
        info!(
            kind = %record.kind,
            id = %record.entity_id,
            field = %record.field,
            old = %record.old_value,
            new = %record.new_value,
            "Field changed"
        );
        self.records.push(record);
    }

    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Hands over everything recorded so far and leaves the log empty.
    pub fn drain(&mut self) -> Vec<ChangeRecord> {
        std::mem::take(&mut self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_keeps_order() {
        let mut log = ChangeLog::new();
        let at = Utc::now();
        log.record(EntityKind::Alert, "a", "street", "Old", "New", at);
        log.record(EntityKind::Jam, "7", "level", 2, 4, at);

        assert_eq!(log.len(), 2);
        assert_eq!(log.records()[0].field, "street");
        assert_eq!(log.records()[1].old_value, "2");
        assert_eq!(log.records()[1].new_value, "4");
    }

    #[test]
    fn test_drain_empties_log() {
        let mut log = ChangeLog::new();
        log.record(EntityKind::Alert, "a", "city", "", "Brno", Utc::now());

        let drained = log.drain();
        assert_eq!(drained.len(), 1);
        assert!(log.is_empty());
    }
}
