//! JSON parser for feed snapshots.
//!
//! A document that is not an object with `alerts`/`jams` arrays is rejected
//! as a whole. Inside a valid document each record is decoded on its own, so
//! one bad record only costs that record.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{RecordError, SnapshotError};
use crate::snapshot::{AlertObservation, EntityKind, JamObservation, Snapshot};

/// A decoded snapshot plus the records that had to be dropped from it.
#[derive(Debug)]
pub struct ParsedSnapshot {
    pub snapshot: Snapshot,
    pub errors: Vec<RecordError>,
}

/// Decodes a feed document captured at `taken_at`.
///
/// # Errors
///
/// Returns a [`SnapshotError`] if the bytes are not JSON or the document does
/// not have the expected shape. Per-record problems are collected in
/// [`ParsedSnapshot::errors`] instead.
pub fn parse_snapshot(
    bytes: &[u8],
    taken_at: DateTime<Utc>,
) -> Result<ParsedSnapshot, SnapshotError> {
    let root: Value = serde_json::from_slice(bytes)?;
    parse_document(&root, taken_at)
}

/// Same as [`parse_snapshot`] for a document that is already decoded.
pub fn parse_document(
    root: &Value,
    taken_at: DateTime<Utc>,
) -> Result<ParsedSnapshot, SnapshotError> {
    let object = root
        .as_object()
        .ok_or_else(|| SnapshotError::NotAnObject(type_name(root)))?;

    let mut errors = Vec::new();
    let alerts = decode_all::<AlertObservation>(
        collection(object, "alerts")?,
        EntityKind::Alert,
        "uuid",
        &mut errors,
    );
    let jams = decode_all::<JamObservation>(
        collection(object, "jams")?,
        EntityKind::Jam,
        "id",
        &mut errors,
    );

    Ok(ParsedSnapshot {
        snapshot: Snapshot {
            taken_at,
            alerts,
            jams,
        },
        errors,
    })
}

fn collection<'a>(
    object: &'a Map<String, Value>,
    key: &'static str,
) -> Result<&'a [Value], SnapshotError> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(SnapshotError::NotAnArray(key)),
    }
}

fn decode_all<T: DeserializeOwned>(
    items: &[Value],
    kind: EntityKind,
    id_field: &'static str,
    errors: &mut Vec<RecordError>,
) -> Vec<T> {
    let mut decoded = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        if !has_identifier(item, id_field) {
            errors.push(RecordError::MissingIdentifier {
                kind,
                index,
                field: id_field,
            });
            continue;
        }
        match T::deserialize(item) {
            Ok(record) => decoded.push(record),
            Err(source) => errors.push(RecordError::Malformed {
                kind,
                index,
                source,
            }),
        }
    }
    decoded
}

fn has_identifier(item: &Value, field: &str) -> bool {
    match item.get(field) {
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Number(_)) => true,
        _ => false,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
