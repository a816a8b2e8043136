//! Live ingestion: poll the configured feeds, reconcile each source into its
//! own store and periodically deactivate what stopped being reported.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::config::{CityFilter, SourceConfig, SweepConfig};
use crate::fetch::{FeedClient, fetch_all};
use crate::output::RecordSink;
use crate::parser::{ParsedSnapshot, parse_snapshot};
use crate::reconcile::{EntityStore, Reconciler, SnapshotReport, TimestampSource};
use crate::shutdown::Shutdown;
use crate::sweep::SweepOutcome;

/// One tracked slice of a feed with its own entity store.
pub struct LiveSource {
    name: String,
    url: String,
    city: CityFilter,
    reconciler: Reconciler,
}

impl LiveSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, city: CityFilter) -> Self {
        Self::resume(name, url, city, EntityStore::new())
    }

    /// Continues tracking from a checkpointed store.
    pub fn resume(
        name: impl Into<String>,
        url: impl Into<String>,
        city: CityFilter,
        store: EntityStore,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            city,
            reconciler: Reconciler::with_store(store, TimestampSource::Arrival),
        }
    }

    pub fn from_config(config: &SourceConfig, store: EntityStore) -> Result<Self> {
        Ok(Self::resume(
            config.name.clone(),
            config.resolve_url()?,
            config.city.clone(),
            store,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn store(&self) -> &EntityStore {
        self.reconciler.store()
    }
}

/// What one cycle did for one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub source: String,
    /// `None` when the source's feed could not be fetched or parsed.
    pub applied: Option<SnapshotReport>,
    pub swept: Option<SweepOutcome>,
}

pub struct LiveIngest {
    sources: Vec<LiveSource>,
    sweep: SweepConfig,
    cycle: usize,
}

impl LiveIngest {
    pub fn new(sources: Vec<LiveSource>, sweep: SweepConfig) -> Self {
        Self {
            sources,
            sweep,
            cycle: 0,
        }
    }

    pub fn sources(&self) -> &[LiveSource] {
        &self.sources
    }

    /// Distinct feed URLs, in source order. Sources sharing a feed share one
    /// download per cycle.
    pub fn urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        for source in &self.sources {
            if !urls.iter().any(|u| u == &source.url) {
                urls.push(source.url.clone());
            }
        }
        urls
    }

    /// Applies one round of downloaded documents, all stamped with `now`.
    ///
    /// A source whose document is missing, failed or unparseable is skipped
    /// for this cycle and its store stays as it was. Every
    /// `sweep_every`-th cycle deactivates stale entities in every source.
    pub fn apply_cycle(
        &mut self,
        fetched: &HashMap<String, Result<Vec<u8>>>,
        now: DateTime<Utc>,
    ) -> Vec<CycleReport> {
        self.cycle += 1;

        let mut parsed: HashMap<&str, Option<ParsedSnapshot>> = HashMap::new();
        for (url, result) in fetched {
            let snapshot = match result {
                Ok(bytes) => match parse_snapshot(bytes, now) {
                    Ok(parsed) => {
                        for error in &parsed.errors {
                            warn!(
                                url = %url,
                                kind = %error.kind(),
                                error = %error,
                                "Skipping record"
                            );
                        }
                        Some(parsed)
                    }
                    Err(e) => {
                        error!(url = %url, error = %e, "Feed parse failed");
                        None
                    }
                },
                Err(_) => None,
            };
            parsed.insert(url.as_str(), snapshot);
        }

        let sweep_now = self.sweep.sweep_every > 0 && self.cycle % self.sweep.sweep_every == 0;
        let mut reports = Vec::with_capacity(self.sources.len());

        for source in &mut self.sources {
            let applied = match parsed.get(source.url.as_str()) {
                Some(Some(doc)) => {
                    let snapshot = doc.snapshot.filtered(&source.city);
                    match source.reconciler.apply(&snapshot) {
                        Ok(report) => {
                            info!(
                                source = %source.name,
                                alerts_added = report.alerts_added,
                                alerts_updated = report.alerts_updated,
                                jams_added = report.jams_added,
                                jams_updated = report.jams_updated,
                                "Source ingested"
                            );
                            Some(report)
                        }
                        Err(e) => {
                            error!(source = %source.name, error = %e, "Snapshot rejected");
                            None
                        }
                    }
                }
                _ => {
                    warn!(source = %source.name, "No usable snapshot this cycle");
                    None
                }
            };

            let swept = if sweep_now {
                Some(source.reconciler.sweep_inactive(now, self.sweep.inactivity_window))
            } else {
                None
            };

            reports.push(CycleReport {
                source: source.name.clone(),
                applied,
                swept,
            });
        }

        if !sweep_now {
            info!(cycle = self.cycle, every = self.sweep.sweep_every, "Skipping cleanup");
        }
        reports
    }

    /// Hands every source's store and pending changes to `sink`.
    ///
    /// Changes are only dropped from a source once the sink accepted them.
    pub async fn persist<S: RecordSink + ?Sized>(&mut self, sink: &S) -> Result<()> {
        for source in &mut self.sources {
            let pending = source.reconciler.changes().records().to_vec();
            sink.persist(&source.name, source.reconciler.store(), &pending)
                .await?;
            source.reconciler.drain_changes();
        }
        Ok(())
    }
}

/// Polls until `cycles` rounds are done (0 = forever) or a stop is requested.
///
/// A stop is only acted on between cycles, never while a snapshot is being
/// applied; one requested during a cycle ends the loop once it is persisted.
#[tracing::instrument(
    skip_all,
    fields(sources = ingest.sources().len(), interval_secs = interval_secs, cycles = cycles)
)]
pub async fn run_live<C, S>(
    client: Arc<C>,
    ingest: &mut LiveIngest,
    sink: &S,
    interval_secs: u64,
    cycles: usize,
    mut shutdown: Shutdown,
) -> Result<()>
where
    C: FeedClient + 'static,
    S: RecordSink + ?Sized,
{
    let urls = ingest.urls();
    let mut done = 0;

    loop {
        done += 1;
        info!(cycle = done, "Starting ingestion cycle");

        let fetched = fetch_all(client.clone(), &urls).await;
        ingest.apply_cycle(&fetched, Utc::now());

        if let Err(e) = ingest.persist(sink).await {
            error!(error = %e, "Failed to persist sources");
        }

        if cycles > 0 && done >= cycles {
            break;
        }

        info!(interval_secs, "Waiting before next cycle");
        if shutdown.sleep(Duration::from_secs(interval_secs)).await {
            info!(cycles = done, "Stopping after completed cycle");
            break;
        }
    }

    Ok(())
}
