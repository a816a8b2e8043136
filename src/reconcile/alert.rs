use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Lifecycle, Stamp};
use crate::changelog::ChangeLog;
use crate::snapshot::{AlertObservation, EntityKind, Point};

/// An alert accumulated over every snapshot that reported it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub uuid: String,
    pub country: String,
    pub city: String,
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
    pub last_seen: DateTime<Utc>,
    pub active: bool,
    pub finished: bool,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Produces the next state of an alert from its current state (if known) and
/// a new observation of it.
///
/// Descriptive fields follow the latest observation. Rating, confidence and
/// reliability only ever go up. Every change lands in `log`.
pub fn reconcile_alert(
    existing: Option<Alert>,
    obs: &AlertObservation,
    stamp: Stamp,
    log: &mut ChangeLog,
) -> Alert {
    match existing {
        Some(mut alert) => {
            alert.merge(obs, stamp, log);
            alert
        }
        None => {
            info!(uuid = %obs.uuid, "New alert");
            Alert::from_observation(obs, stamp)
        }
    }
}

impl Alert {
    fn from_observation(obs: &AlertObservation, stamp: Stamp) -> Self {
        let published = obs.published_at();
        Alert {
            uuid: obs.uuid.clone(),
            country: obs.country.clone(),
            city: obs.city.clone(),
            alert_type: obs.alert_type.clone(),
            subtype: obs.subtype.clone(),
            street: obs.street.clone(),
            road_type: obs.road_type,
            report_rating: obs.report_rating,
            confidence: obs.confidence,
            reliability: obs.reliability,
            magvar: obs.magvar,
            report_by_municipality_user: obs.report_by_municipality_user,
            report_description: obs.report_description.clone(),
            location: obs.location,
            published_at: stamp.first_seen(published),
            last_updated: stamp.initial_update(published),
            last_seen: stamp.at,
            active: true,
            finished: false,
            finished_at: None,
        }
    }

    fn merge(&mut self, obs: &AlertObservation, stamp: Stamp, log: &mut ChangeLog) {
        let at = stamp.at;
        replace_on_change!(log, EntityKind::Alert, self.uuid, self, obs, at;
            country,
            city,
            alert_type,
            subtype,
            street,
            road_type,
            magvar,
            report_by_municipality_user,
            report_description,
        );
        keep_max!(log, EntityKind::Alert, self.uuid, self, obs, at;
            report_rating,
            confidence,
            reliability,
        );

        if self.location != obs.location {
            log.record(
                EntityKind::Alert,
                &self.uuid,
                "location",
                describe_location(self.location),
                describe_location(obs.location),
                at,
            );
            self.location = obs.location;
        }

        self.last_updated = at;
        self.last_seen = at;
        self.active = true;
        self.finished = false;
        self.finished_at = None;
    }
}

fn describe_location(location: Option<Point>) -> String {
    location.map_or_else(|| "none".to_string(), |p| p.to_string())
}

impl Lifecycle for Alert {
    fn kind(&self) -> EntityKind {
        EntityKind::Alert
    }

    fn id(&self) -> &str {
        &self.uuid
    }

    fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn deactivate(&mut self) {
        self.active = false;
    }

    fn finish(&mut self, at: DateTime<Utc>) {
        self.active = false;
        self.finished = true;
        self.finished_at = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use serde_json::json;

    fn ts(minutes: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap() + TimeDelta::minutes(minutes)
    }

    fn observation(fields: serde_json::Value) -> AlertObservation {
        serde_json::from_value(fields).unwrap()
    }

    #[test]
    fn test_new_alert_from_observation() {
        let mut log = ChangeLog::new();
        let obs = observation(json!({
            "uuid": "a-1",
            "city": "Brno",
            "type": "JAM",
            "reliability": 3,
            "location": { "x": 16.6, "y": 49.2 },
            "pubMillis": ts(-5).timestamp_millis()
        }));

        let alert = reconcile_alert(None, &obs, Stamp::arrival(ts(0)), &mut log);

        assert_eq!(alert.uuid, "a-1");
        assert_eq!(alert.alert_type, "JAM");
        assert_eq!(alert.reliability, 3);
        assert_eq!(alert.published_at, ts(-5));
        assert_eq!(alert.last_updated, ts(0));
        assert_eq!(alert.last_seen, ts(0));
        assert!(alert.active);
        assert!(!alert.finished);
        assert!(log.is_empty());
    }

    #[test]
    fn test_publication_source_stamps_new_alert_with_pub_time() {
        let mut log = ChangeLog::new();
        let obs = observation(json!({ "uuid": "a", "pubMillis": ts(-5).timestamp_millis() }));

        let alert = reconcile_alert(None, &obs, Stamp::publication(ts(0)), &mut log);

        assert_eq!(alert.last_updated, ts(-5));
        assert_eq!(alert.last_seen, ts(0));
    }

    #[test]
    fn test_first_seen_falls_back_to_snapshot_time() {
        let mut log = ChangeLog::new();
        let obs = observation(json!({ "uuid": "a" }));

        let alert = reconcile_alert(None, &obs, Stamp::publication(ts(3)), &mut log);

        assert_eq!(alert.published_at, ts(3));
        assert_eq!(alert.last_updated, ts(3));
    }

    #[test]
    fn test_reliability_keeps_maximum() {
        let mut log = ChangeLog::new();
        let mut alert = None;
        for (i, reliability) in [3, 5, 2].into_iter().enumerate() {
            let obs = observation(json!({ "uuid": "a", "reliability": reliability }));
            alert = Some(reconcile_alert(
                alert,
                &obs,
                Stamp::arrival(ts(i as i64)),
                &mut log,
            ));
        }

        let alert = alert.unwrap();
        assert_eq!(alert.reliability, 5);
        assert_eq!(log.len(), 1);
        let change = &log.records()[0];
        assert_eq!(change.field, "reliability");
        assert_eq!(change.old_value, "3");
        assert_eq!(change.new_value, "5");
        assert_eq!(change.at, ts(1));
    }

    #[test]
    fn test_descriptive_fields_replaced_and_logged() {
        let mut log = ChangeLog::new();
        let first = observation(json!({
            "uuid": "a",
            "street": "Husova",
            "subtype": "JAM_HEAVY_TRAFFIC",
            "location": { "x": 1.0, "y": 2.0 }
        }));
        let second = observation(json!({
            "uuid": "a",
            "street": "Kounicova",
            "subtype": "JAM_HEAVY_TRAFFIC",
            "location": { "x": 1.5, "y": 2.0 }
        }));

        let alert = reconcile_alert(None, &first, Stamp::arrival(ts(0)), &mut log);
        let alert = reconcile_alert(Some(alert), &second, Stamp::arrival(ts(2)), &mut log);

        assert_eq!(alert.street, "Kounicova");
        assert_eq!(alert.location, Some(Point { x: 1.5, y: 2.0 }));
        let fields: Vec<_> = log.records().iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["street", "location"]);
        assert_eq!(log.records()[1].old_value, "1 2");
        assert_eq!(log.records()[1].new_value, "1.5 2");
    }

    #[test]
    fn test_identical_observation_logs_nothing() {
        let mut log = ChangeLog::new();
        let obs = observation(json!({ "uuid": "a", "street": "Husova", "confidence": 2 }));

        let alert = reconcile_alert(None, &obs, Stamp::arrival(ts(0)), &mut log);
        let alert = reconcile_alert(Some(alert), &obs, Stamp::arrival(ts(2)), &mut log);

        assert!(log.is_empty());
        assert_eq!(alert.last_updated, ts(2));
        assert_eq!(alert.published_at, ts(0));
    }

    #[test]
    fn test_reappearance_unfinishes() {
        let mut log = ChangeLog::new();
        let obs = observation(json!({ "uuid": "a" }));
        let mut alert = reconcile_alert(None, &obs, Stamp::arrival(ts(0)), &mut log);
        alert.finish(ts(1));
        assert!(alert.finished);

        let alert = reconcile_alert(Some(alert), &obs, Stamp::arrival(ts(90)), &mut log);

        assert!(!alert.finished);
        assert!(alert.active);
        assert_eq!(alert.finished_at, None);
        assert_eq!(alert.last_seen, ts(90));
    }
}
