use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Lifecycle, Stamp};
use crate::changelog::ChangeLog;
use crate::segments;
use crate::snapshot::{EntityKind, JamObservation, Point, Segment};
use crate::stats::MetricState;

/// Running statistics for the five numeric jam metrics.
///
/// Level, length, speed and delay are reported by their maximum (bigger is
/// worse); speed in km/h by its minimum (slower is worse). All five keep an
/// equal-weight average.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JamMetrics {
    pub level: MetricState,
    pub speed_kmh: MetricState,
    pub length: MetricState,
    pub speed: MetricState,
    pub delay: MetricState,
}

impl JamMetrics {
    pub fn seed(obs: &JamObservation) -> Self {
        JamMetrics {
            level: MetricState::new(obs.level),
            speed_kmh: MetricState::new(obs.speed_kmh),
            length: MetricState::new(obs.length),
            speed: MetricState::new(obs.speed),
            delay: MetricState::new(obs.delay),
        }
    }

    pub fn observe(&mut self, obs: &JamObservation) {
        self.level.observe(obs.level);
        self.speed_kmh.observe(obs.speed_kmh);
        self.length.observe(obs.length);
        self.speed.observe(obs.speed);
        self.delay.observe(obs.delay);
    }
}

/// A jam accumulated over every snapshot that reported it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jam {
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
    pub line: Vec<Point>,
    pub segments: Vec<Segment>,
    pub metrics: JamMetrics,
    pub update_count: u64,
    pub published_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub active: bool,
    pub finished: bool,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Produces the next state of a jam from its current state (if known) and a
/// new observation of it.
///
/// Each call counts as one observation: `update_count` goes up and every
/// metric takes the new value into its running statistics. The route line is
/// only replaced by a strictly longer one, and segments are merged by `ID`.
pub fn reconcile_jam(
    existing: Option<Jam>,
    obs: &JamObservation,
    stamp: Stamp,
    log: &mut ChangeLog,
) -> Jam {
    match existing {
        Some(mut jam) => {
            jam.merge(obs, stamp, log);
            jam
        }
        None => {
            info!(id = %obs.id, "New jam");
            Jam::from_observation(obs, stamp)
        }
    }
}

impl Jam {
    fn from_observation(obs: &JamObservation, stamp: Stamp) -> Self {
        let published = obs.published_at();
        let (segments, _) = segments::merge(&[], &obs.segments);
        Jam {
            id: obs.id.clone(),
            uuid: obs.uuid.clone(),
            country: obs.country.clone(),
            city: obs.city.clone(),
            turn_type: obs.turn_type.clone(),
            street: obs.street.clone(),
            start_node: obs.start_node.clone(),
            end_node: obs.end_node.clone(),
            road_type: obs.road_type,
            blocking_alert_uuid: obs.blocking_alert_uuid.clone(),
            line: obs.line.clone(),
            segments,
            metrics: JamMetrics::seed(obs),
            update_count: 1,
            published_at: stamp.first_seen(published),
            last_updated: stamp.initial_update(published),
            last_seen: stamp.at,
            active: true,
            finished: false,
            finished_at: None,
        }
    }

    fn merge(&mut self, obs: &JamObservation, stamp: Stamp, log: &mut ChangeLog) {
        let at = stamp.at;
        self.update_count += 1;

        replace_on_change!(log, EntityKind::Jam, self.id, self, obs, at;
            uuid,
            country,
            city,
            turn_type,
            street,
            start_node,
            end_node,
            road_type,
            blocking_alert_uuid,
        );

        if obs.line.len() > self.line.len() {
            log.record(
                EntityKind::Jam,
                &self.id,
                "line",
                format!("{} points", self.line.len()),
                format!("{} points", obs.line.len()),
                at,
            );
            self.line = obs.line.clone();
        }

        let (merged, added) = segments::merge(&self.segments, &obs.segments);
        if added > 0 {
            debug!(id = %self.id, added, "New segments");
            log.record(
                EntityKind::Jam,
                &self.id,
                "segments",
                self.segments.len(),
                merged.len(),
                at,
            );
            self.segments = merged;
        }

        self.metrics.observe(obs);
        debug_assert_eq!(self.metrics.level.count(), self.update_count);

        self.last_updated = at;
        self.last_seen = at;
        self.active = true;
        self.finished = false;
        self.finished_at = None;
    }
}

impl Lifecycle for Jam {
    fn kind(&self) -> EntityKind {
        EntityKind::Jam
    }

    fn id(&self) -> &str {
        &self.id
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

    fn observation(fields: serde_json::Value) -> JamObservation {
        serde_json::from_value(fields).unwrap()
    }

    fn line(points: usize) -> serde_json::Value {
        json!((0..points)
            .map(|i| json!({ "x": 16.0 + i as f64 / 100.0, "y": 49.0 }))
            .collect::<Vec<_>>())
    }

    fn run(observations: &[JamObservation]) -> (Jam, ChangeLog) {
        let mut log = ChangeLog::new();
        let mut jam = None;
        for (i, obs) in observations.iter().enumerate() {
            jam = Some(reconcile_jam(
                jam,
                obs,
                Stamp::arrival(ts(2 * i as i64)),
                &mut log,
            ));
        }
        (jam.unwrap(), log)
    }

    #[test]
    fn test_new_jam_seeds_metrics() {
        let (jam, log) = run(&[observation(json!({
            "id": 42,
            "uuid": 4242,
            "level": 3,
            "speedKMH": 10.5,
            "length": 200,
            "speed": 2.9,
            "delay": 60
        }))]);

        assert_eq!(jam.id, "42");
        assert_eq!(jam.update_count, 1);
        assert_eq!(jam.metrics.level.max(), 3.0);
        assert_eq!(jam.metrics.level.average(), 3.0);
        assert_eq!(jam.metrics.speed_kmh.min(), 10.5);
        assert_eq!(jam.metrics.delay.average(), 60.0);
        assert!(jam.active);
        assert!(log.is_empty());
    }

    #[test]
    fn test_two_observations_average_level() {
        let (jam, _) = run(&[
            observation(json!({ "id": 1, "level": 4 })),
            observation(json!({ "id": 1, "level": 8 })),
        ]);

        assert_eq!(jam.metrics.level.max(), 8.0);
        assert_eq!(jam.metrics.level.average(), 6.0);
        assert_eq!(jam.update_count, 2);
    }

    #[test]
    fn test_speed_kmh_tracks_minimum() {
        let (jam, _) = run(&[
            observation(json!({ "id": 1, "speedKMH": 20.0 })),
            observation(json!({ "id": 1, "speedKMH": 5.0 })),
            observation(json!({ "id": 1, "speedKMH": 11.0 })),
        ]);

        assert_eq!(jam.metrics.speed_kmh.min(), 5.0);
        assert_eq!(jam.metrics.speed_kmh.average(), 12.0);
        assert_eq!(jam.update_count, 3);
    }

    #[test]
    fn test_shorter_line_does_not_replace() {
        let (jam, log) = run(&[
            observation(json!({ "id": 1, "line": line(3) })),
            observation(json!({ "id": 1, "line": line(2) })),
        ]);

        assert_eq!(jam.line.len(), 3);
        assert!(log.is_empty());
    }

    #[test]
    fn test_longer_line_replaces() {
        let (jam, log) = run(&[
            observation(json!({ "id": 1, "line": line(3) })),
            observation(json!({ "id": 1, "line": line(2) })),
            observation(json!({ "id": 1, "line": line(5) })),
        ]);

        assert_eq!(jam.line.len(), 5);
        assert_eq!(log.len(), 1);
        assert_eq!(log.records()[0].field, "line");
        assert_eq!(log.records()[0].old_value, "3 points");
        assert_eq!(log.records()[0].new_value, "5 points");
    }

    #[test]
    fn test_segments_merged_by_id() {
        let (jam, log) = run(&[
            observation(json!({ "id": 1, "segments": [
                { "ID": 1, "fromNode": 10, "toNode": 11, "isForward": true },
                { "ID": 2, "fromNode": 11, "toNode": 12, "isForward": true }
            ]})),
            observation(json!({ "id": 1, "segments": [
                { "ID": 2, "fromNode": 11, "toNode": 12, "isForward": false },
                { "ID": 3, "fromNode": 12, "toNode": 13, "isForward": true }
            ]})),
        ]);

        let ids: Vec<_> = jam.segments.iter().filter_map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(jam.segments[1].is_forward);
        assert_eq!(log.len(), 1);
        assert_eq!(log.records()[0].field, "segments");
        assert_eq!(log.records()[0].old_value, "2");
        assert_eq!(log.records()[0].new_value, "3");
    }

    #[test]
    fn test_descriptive_change_logged_once() {
        let (jam, log) = run(&[
            observation(json!({ "id": 1, "street": "Husova", "blockingAlertUuid": "" })),
            observation(json!({ "id": 1, "street": "Husova", "blockingAlertUuid": "a-9" })),
            observation(json!({ "id": 1, "street": "Husova", "blockingAlertUuid": "a-9" })),
        ]);

        assert_eq!(jam.blocking_alert_uuid, "a-9");
        assert_eq!(log.len(), 1);
        assert_eq!(log.records()[0].field, "blocking_alert_uuid");
        assert_eq!(log.records()[0].at, ts(2));
    }

    #[test]
    fn test_update_timestamps() {
        let (jam, _) = run(&[
            observation(json!({ "id": 1, "pubMillis": ts(-10).timestamp_millis() })),
            observation(json!({ "id": 1 })),
        ]);

        assert_eq!(jam.published_at, ts(-10));
        assert_eq!(jam.last_updated, ts(2));
        assert_eq!(jam.last_seen, ts(2));
    }
}
