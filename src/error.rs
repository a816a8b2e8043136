//! Typed errors raised while turning raw feed documents into observations.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::snapshot::EntityKind;

/// A single observation that could not be used. The rest of the snapshot is
/// still applied.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("{kind} #{index}: missing identifier `{field}`")]
    MissingIdentifier {
        kind: EntityKind,
        index: usize,
        field: &'static str,
    },

    #[error("{kind} #{index}: malformed record: {source}")]
    Malformed {
        kind: EntityKind,
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl RecordError {
    pub fn kind(&self) -> EntityKind {
        match self {
            RecordError::MissingIdentifier { kind, .. } | RecordError::Malformed { kind, .. } => {
                *kind
            }
        }
    }
}

/// The whole snapshot is unusable; nothing from it may be applied.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("snapshot root must be an object, found {0}")]
    NotAnObject(&'static str),

    #[error("snapshot field `{0}` must be an array")]
    NotAnArray(&'static str),

    #[error("snapshot taken at {taken_at} arrived after one taken at {last}")]
    OutOfOrder {
        taken_at: DateTime<Utc>,
        last: DateTime<Utc>,
    },
}
