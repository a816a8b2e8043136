//! Typed model of one feed snapshot: the alert and jam observations it carries.
//!
//! Field defaults for anything the feed leaves out are declared here once, in
//! the serde attributes, rather than at the places that read the fields.

pub mod de;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CityFilter;

/// The two entity kinds the feed reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Alert,
    Jam,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Alert => write!(f, "alert"),
            EntityKind::Jam => write!(f, "jam"),
        }
    }
}

/// A coordinate pair as published by the feed (`x` = longitude, `y` = latitude).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.x, self.y)
    }
}

/// One road segment of a jam. Identity is `id` alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(rename = "fromNode", default)]
    pub from_node: Option<i64>,
    #[serde(rename = "toNode", default)]
    pub to_node: Option<i64>,
    #[serde(rename = "ID", default)]
    pub id: Option<i64>,
    #[serde(rename = "isForward", default, deserialize_with = "de::flag")]
    pub is_forward: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertObservation {
    #[serde(default, deserialize_with = "de::id")]
    pub uuid: String,
    #[serde(default, deserialize_with = "de::text")]
    pub country: String,
    #[serde(default, deserialize_with = "de::text")]
    pub city: String,
    #[serde(rename = "type", default, deserialize_with = "de::text")]
    pub alert_type: String,
    #[serde(default, deserialize_with = "de::text")]
    pub subtype: String,
    #[serde(default, deserialize_with = "de::text")]
    pub street: String,
    #[serde(default = "de::missing_score", deserialize_with = "de::score")]
    pub road_type: i64,
    #[serde(default = "de::missing_score", deserialize_with = "de::score")]
    pub report_rating: i64,
    #[serde(default = "de::missing_score", deserialize_with = "de::score")]
    pub confidence: i64,
    #[serde(default = "de::missing_score", deserialize_with = "de::score")]
    pub reliability: i64,
    #[serde(default = "de::missing_score", deserialize_with = "de::score")]
    pub magvar: i64,
    #[serde(default, deserialize_with = "de::flag")]
    pub report_by_municipality_user: bool,
    #[serde(default, deserialize_with = "de::text")]
    pub report_description: String,
    #[serde(default)]
    pub location: Option<Point>,
    #[serde(default)]
    pub pub_millis: Option<i64>,
}

impl AlertObservation {
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        self.pub_millis.and_then(DateTime::from_timestamp_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JamObservation {
    #[serde(default, deserialize_with = "de::id")]
    pub id: String,
    #[serde(default, deserialize_with = "de::id")]
    pub uuid: String,
    #[serde(default, deserialize_with = "de::text")]
    pub country: String,
    #[serde(default, deserialize_with = "de::text")]
    pub city: String,
    #[serde(default, deserialize_with = "de::text")]
    pub turn_type: String,
    #[serde(default, deserialize_with = "de::text")]
    pub street: String,
    #[serde(default, deserialize_with = "de::text")]
    pub start_node: String,
    #[serde(default, deserialize_with = "de::text")]
    pub end_node: String,
    #[serde(default = "de::missing_score", deserialize_with = "de::score")]
    pub road_type: i64,
    #[serde(default, deserialize_with = "de::text")]
    pub blocking_alert_uuid: String,
    #[serde(default = "de::missing_metric", deserialize_with = "de::metric")]
    pub level: f64,
    #[serde(
        rename = "speedKMH",
        default = "de::missing_metric",
        deserialize_with = "de::metric"
    )]
    pub speed_kmh: f64,
    #[serde(default = "de::missing_metric", deserialize_with = "de::metric")]
    pub length: f64,
    #[serde(default = "de::missing_metric", deserialize_with = "de::metric")]
    pub speed: f64,
    #[serde(default = "de::missing_metric", deserialize_with = "de::metric")]
    pub delay: f64,
    #[serde(default, deserialize_with = "de::list")]
    pub line: Vec<Point>,
    #[serde(default, deserialize_with = "de::list")]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub pub_millis: Option<i64>,
}

impl JamObservation {
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        self.pub_millis.and_then(DateTime::from_timestamp_millis)
    }
}

/// One timestamped capture of the feed. Never mutated once built; narrowing
/// to a city produces a new snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub alerts: Vec<AlertObservation>,
    pub jams: Vec<JamObservation>,
}

impl Snapshot {
    pub fn new(taken_at: DateTime<Utc>) -> Self {
        Self {
            taken_at,
            alerts: Vec::new(),
            jams: Vec::new(),
        }
    }

    pub fn with_alert(mut self, alert: AlertObservation) -> Self {
        self.alerts.push(alert);
        self
    }

    pub fn with_jam(mut self, jam: JamObservation) -> Self {
        self.jams.push(jam);
        self
    }

    /// Returns the part of this snapshot whose records pass `filter`.
    pub fn filtered(&self, filter: &CityFilter) -> Snapshot {
        Snapshot {
            taken_at: self.taken_at,
            alerts: self
                .alerts
                .iter()
                .filter(|a| filter.matches(&a.city))
                .cloned()
                .collect(),
            jams: self
                .jams
                .iter()
                .filter(|j| filter.matches(&j.city))
                .cloned()
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty() && self.jams.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_alert_defaults_for_missing_fields() {
        let alert: AlertObservation = serde_json::from_value(json!({ "uuid": "a-1" })).unwrap();

        assert_eq!(alert.uuid, "a-1");
        assert_eq!(alert.street, "");
        assert_eq!(alert.reliability, -1);
        assert_eq!(alert.road_type, -1);
        assert!(alert.location.is_none());
        assert!(alert.published_at().is_none());
        assert!(!alert.report_by_municipality_user);
    }

    #[test]
    fn test_alert_null_fields_use_defaults() {
        let alert: AlertObservation = serde_json::from_value(json!({
            "uuid": "a-1",
            "street": null,
            "confidence": null,
            "reportByMunicipalityUser": "True"
        }))
        .unwrap();

        assert_eq!(alert.street, "");
        assert_eq!(alert.confidence, -1);
        assert!(alert.report_by_municipality_user);
    }

    #[test]
    fn test_jam_numeric_identifiers_become_strings() {
        let jam: JamObservation = serde_json::from_value(json!({
            "id": 1234567,
            "uuid": 987,
            "level": 3,
            "speedKMH": 12.5,
            "line": [{ "x": 16.6, "y": 49.2 }],
            "segments": [{ "fromNode": 1, "toNode": 2, "ID": 77, "isForward": true }]
        }))
        .unwrap();

        assert_eq!(jam.id, "1234567");
        assert_eq!(jam.uuid, "987");
        assert_eq!(jam.level, 3.0);
        assert_eq!(jam.speed_kmh, 12.5);
        assert_eq!(jam.delay, -1.0);
        assert_eq!(jam.line.len(), 1);
        assert_eq!(jam.segments[0].id, Some(77));
        assert!(jam.segments[0].is_forward);
    }

    #[test]
    fn test_jam_non_numeric_metric_is_rejected() {
        let result: Result<JamObservation, _> =
            serde_json::from_value(json!({ "id": 1, "level": "heavy" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_published_at_from_millis() {
        let alert: AlertObservation =
            serde_json::from_value(json!({ "uuid": "a", "pubMillis": 1_700_000_000_000i64 }))
                .unwrap();
        assert_eq!(
            alert.published_at().unwrap().timestamp_millis(),
            1_700_000_000_000
        );
    }

    #[test]
    fn test_filtered_keeps_only_matching_city() {
        let brno: AlertObservation =
            serde_json::from_value(json!({ "uuid": "a", "city": "Brno" })).unwrap();
        let other: AlertObservation =
            serde_json::from_value(json!({ "uuid": "b", "city": "Blansko" })).unwrap();
        let snapshot = Snapshot::new(Utc::now()).with_alert(brno).with_alert(other);

        let only = snapshot.filtered(&CityFilter::Only("Brno".into()));
        let except = snapshot.filtered(&CityFilter::Except("Brno".into()));

        assert_eq!(only.alerts.len(), 1);
        assert_eq!(only.alerts[0].uuid, "a");
        assert_eq!(except.alerts.len(), 1);
        assert_eq!(except.alerts[0].uuid, "b");
        assert_eq!(snapshot.alerts.len(), 2);
    }
}
