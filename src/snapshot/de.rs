//! Lenient field deserializers for feed records.
//!
//! The feed omits fields freely and sometimes sends `null`; every helper here
//! maps an absent or null value onto the documented default so call sites
//! never deal with `Option` for plain descriptive fields.

use serde::{Deserialize, Deserializer};

/// Default for numeric scores the feed did not report (ratings, road type, ...).
pub const MISSING_SCORE: i64 = -1;

/// Default for jam metrics the feed did not report.
pub const MISSING_METRIC: f64 = -1.0;

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Text(s) => s,
            Scalar::Integer(n) => n.to_string(),
            Scalar::Float(f) => f.to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
}

/// Identifiers arrive as strings for alerts and as numbers for jams.
pub fn id<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<Scalar>::deserialize(d)?
        .map(|s| s.into_string().trim().to_string())
        .unwrap_or_default())
}

pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<Scalar>::deserialize(d)?
        .map(Scalar::into_string)
        .unwrap_or_default())
}

pub fn score<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    Ok(Option::<i64>::deserialize(d)?.unwrap_or(MISSING_SCORE))
}

pub fn metric<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(d)?.unwrap_or(MISSING_METRIC))
}

/// `true`/`false` either as JSON booleans or as the strings the feed uses.
pub fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(match Option::<Flag>::deserialize(d)? {
        Some(Flag::Bool(b)) => b,
        Some(Flag::Text(s)) => s.trim().eq_ignore_ascii_case("true"),
        None => false,
    })
}

pub fn list<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(d)?.unwrap_or_default())
}

pub fn missing_score() -> i64 {
    MISSING_SCORE
}

pub fn missing_metric() -> f64 {
    MISSING_METRIC
}
