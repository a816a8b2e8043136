use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Alert, Jam, Lifecycle, Stamp, reconcile_alert, reconcile_jam};
use crate::changelog::ChangeLog;
use crate::snapshot::{AlertObservation, JamObservation};

/// Whether an upsert created the entity or updated a known one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Added,
    Updated,
}

/// Every alert and jam known to one run, keyed by their feed identifiers.
///
/// Entities are never removed; stale ones are only flagged by the sweeper.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityStore {
    alerts: BTreeMap<String, Alert>,
    jams: BTreeMap<String, Jam>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a checkpoint written by [`EntityStore::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read checkpoint {}", path.display()))?;
        let store: EntityStore = serde_json::from_slice(&bytes)
            .with_context(|| format!("corrupt checkpoint {}", path.display()))?;
        debug!(
            path = %path.display(),
            alerts = store.alerts.len(),
            jams = store.jams.len(),
            "Checkpoint loaded"
        );
        Ok(store)
    }

    /// Writes the store to `path`, replacing any previous checkpoint only once
    /// the new one is fully written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(self)?)
            .with_context(|| format!("failed to write checkpoint {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("failed to replace checkpoint {}", path.display()))?;
        Ok(())
    }

    pub fn upsert_alert(
        &mut self,
        obs: &AlertObservation,
        stamp: Stamp,
        log: &mut ChangeLog,
    ) -> Upsert {
        let existing = self.alerts.remove(&obs.uuid);
        let upsert = if existing.is_some() {
            Upsert::Updated
        } else {
            Upsert::Added
        };
        let alert = reconcile_alert(existing, obs, stamp, log);
        self.alerts.insert(alert.uuid.clone(), alert);
        upsert
    }

    pub fn upsert_jam(
        &mut self,
        obs: &JamObservation,
        stamp: Stamp,
        log: &mut ChangeLog,
    ) -> Upsert {
        let existing = self.jams.remove(&obs.id);
        let upsert = if existing.is_some() {
            Upsert::Updated
        } else {
            Upsert::Added
        };
        let jam = reconcile_jam(existing, obs, stamp, log);
        self.jams.insert(jam.id.clone(), jam);
        upsert
    }

    pub fn alert(&self, uuid: &str) -> Option<&Alert> {
        self.alerts.get(uuid)
    }

    pub fn jam(&self, id: &str) -> Option<&Jam> {
        self.jams.get(id)
    }

    pub fn alerts(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.values()
    }

    pub fn jams(&self) -> impl Iterator<Item = &Jam> {
        self.jams.values()
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.len()
    }

    pub fn jam_count(&self) -> usize {
        self.jams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty() && self.jams.is_empty()
    }

    /// Every entity, alerts first, for the staleness sweeps.
    pub(crate) fn entities_mut(&mut self) -> impl Iterator<Item = &mut dyn Lifecycle> {
        let alerts = self.alerts.values_mut().map(|a| a as &mut dyn Lifecycle);
        let jams = self.jams.values_mut().map(|j| j as &mut dyn Lifecycle);
        alerts.chain(jams)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use serde_json::json;

    fn at() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_upsert_reports_added_then_updated() {
        let mut store = EntityStore::new();
        let mut log = ChangeLog::new();
        let obs: JamObservation = serde_json::from_value(json!({ "id": 5, "level": 1 })).unwrap();

        assert_eq!(store.upsert_jam(&obs, Stamp::arrival(at()), &mut log), Upsert::Added);
        assert_eq!(store.upsert_jam(&obs, Stamp::arrival(at()), &mut log), Upsert::Updated);
        assert_eq!(store.jam_count(), 1);
        assert_eq!(store.jam("5").unwrap().update_count, 2);
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brno").join("store.json");

        let mut store = EntityStore::new();
        let mut log = ChangeLog::new();
        let alert: AlertObservation =
            serde_json::from_value(json!({ "uuid": "a", "reliability": 4 })).unwrap();
        let jam: JamObservation =
            serde_json::from_value(json!({ "id": 7, "level": 2, "line": [{ "x": 1, "y": 2 }] }))
                .unwrap();
        store.upsert_alert(&alert, Stamp::arrival(at()), &mut log);
        store.upsert_jam(&jam, Stamp::arrival(at()), &mut log);

        store.save(&path).unwrap();
        let loaded = EntityStore::load(&path).unwrap();

        assert_eq!(loaded, store);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_load_missing_checkpoint_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(EntityStore::load(&dir.path().join("absent.json")).is_err());
    }
}
