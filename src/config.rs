//! Run configuration: staleness thresholds and the list of feed sources.

use anyhow::{Context, Result, bail};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Which records of a feed belong to a source, by their `city` field.
///
/// In the sources file this is written as `"any"`, `{"only": "Brno"}` or
/// `{"except": "Brno"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CityFilter {
    #[default]
    Any,
    Only(String),
    Except(String),
}

impl CityFilter {
    pub fn matches(&self, city: &str) -> bool {
        match self {
            CityFilter::Any => true,
            CityFilter::Only(c) => city == c,
            CityFilter::Except(c) => city != c,
        }
    }
}

/// When entities are considered stale and how often the live sweep runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepConfig {
    /// Live mode: entities unseen for longer than this become inactive.
    pub inactivity_window: TimeDelta,
    /// Batch mode: a pause between snapshots longer than this finishes
    /// everything seen before it.
    pub gap_threshold: TimeDelta,
    /// Live mode: sweep on every n-th cycle.
    pub sweep_every: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            inactivity_window: TimeDelta::minutes(3),
            gap_threshold: TimeDelta::hours(1),
            sweep_every: 5,
        }
    }
}

/// One feed endpoint and the slice of it this run tracks.
///
/// The URL is given either inline or as the name of an environment variable,
/// so that tokenized endpoints can stay in `.env`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub url_env: Option<String>,
    #[serde(default)]
    pub city: CityFilter,
}

impl SourceConfig {
    pub fn resolve_url(&self) -> Result<String> {
        match (&self.url, &self.url_env) {
            (Some(url), _) => Ok(url.clone()),
            (None, Some(var)) => std::env::var(var).with_context(|| {
                format!("source '{}': environment variable {var} is not set", self.name)
            }),
            (None, None) => bail!("source '{}' has neither `url` nor `url_env`", self.name),
        }
    }
}

/// The sources file: a JSON array of [`SourceConfig`].
///
/// ```json
/// [
///   { "name": "brno", "url_env": "DATA_JMK", "city": { "only": "Brno" } },
///   { "name": "jmk", "url_env": "DATA_JMK", "city": { "except": "Brno" } },
///   { "name": "orp_most", "url_env": "DATA_ORP_MOST" }
/// ]
/// ```
#[derive(Debug, Clone)]
pub struct SourcesConfig {
    sources: Vec<SourceConfig>,
}

impl SourcesConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read sources file '{path}'"))?;
        Self::from_json(&content).with_context(|| format!("invalid sources file '{path}'"))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let sources: Vec<SourceConfig> = serde_json::from_str(content)?;
        if sources.is_empty() {
            bail!("no sources configured");
        }
        let mut names = HashSet::new();
        for source in &sources {
            if !names.insert(source.name.as_str()) {
                bail!("duplicate source name '{}'", source.name);
            }
        }
        Ok(Self { sources })
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
