//! Archive downloader: store every raw feed document for later batch merges.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::archive::write_snapshot;
use crate::config::SourcesConfig;
use crate::fetch::{FeedClient, fetch_all};
use crate::shutdown::Shutdown;

/// One feed to archive, stored under `<root>/<key>/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveTarget {
    pub key: String,
    pub url: String,
}

/// One target per distinct URL, named after the first source using it.
pub fn targets(config: &SourcesConfig) -> Result<Vec<ArchiveTarget>> {
    let mut targets: Vec<ArchiveTarget> = Vec::new();
    for source in config.iter() {
        let url = source.resolve_url()?;
        if targets.iter().any(|t| t.url == url) {
            continue;
        }
        targets.push(ArchiveTarget {
            key: source.name.clone(),
            url,
        });
    }
    Ok(targets)
}

/// Writes each successfully fetched document to its target's directory.
/// Failed fetches and documents that are not JSON are logged and skipped.
pub fn archive_fetched(
    root: &Path,
    targets: &[ArchiveTarget],
    fetched: &HashMap<String, Result<Vec<u8>>>,
    at: DateTime<Utc>,
) -> Vec<PathBuf> {
    let mut written = Vec::new();

    for target in targets {
        let Some(Ok(bytes)) = fetched.get(&target.url) else {
            warn!(key = %target.key, "Nothing to archive this round");
            continue;
        };
        match write_snapshot(&root.join(&target.key), &target.key, at, bytes) {
            Ok(path) => {
                info!(key = %target.key, file = %path.display(), "Snapshot archived");
                written.push(path);
            }
            Err(e) => error!(key = %target.key, error = %e, "Failed to archive snapshot"),
        }
    }
    written
}

/// Downloads every target each `interval_secs` until `rounds` are done
/// (0 = forever) or a stop is requested.
#[tracing::instrument(skip_all, fields(root = %root.display(), interval_secs = interval_secs))]
pub async fn run_download<C: FeedClient + 'static>(
    client: Arc<C>,
    targets: &[ArchiveTarget],
    root: &Path,
    interval_secs: u64,
    rounds: usize,
    mut shutdown: Shutdown,
) -> Result<()> {
    let urls: Vec<String> = targets.iter().map(|t| t.url.clone()).collect();
    let mut done = 0;

    loop {
        done += 1;
        let fetched = fetch_all(client.clone(), &urls).await;
        let written = archive_fetched(root, targets, &fetched, Utc::now());
        info!(round = done, files = written.len(), "Download round complete");

        if rounds > 0 && done >= rounds {
            break;
        }

        if shutdown.sleep(Duration::from_secs(interval_secs)).await {
            info!(rounds = done, "Stopping downloads");
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::list_snapshots;

    fn target(key: &str, url: &str) -> ArchiveTarget {
        ArchiveTarget {
            key: key.into(),
            url: url.into(),
        }
    }

    #[test]
    fn test_targets_share_urls() {
        let config = SourcesConfig::from_json(
            r#"[
                {"name": "brno", "url": "http://a", "city": {"only": "Brno"}},
                {"name": "jmk", "url": "http://a", "city": {"except": "Brno"}},
                {"name": "most", "url": "http://b"}
            ]"#,
        )
        .unwrap();

        let found = targets(&config).unwrap();

        assert_eq!(found, vec![target("brno", "http://a"), target("most", "http://b")]);
    }

    #[test]
    fn test_archive_fetched_skips_failures() {
        let dir = tempfile::tempdir().unwrap();
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let targets = vec![
            target("JMK", "http://a"),
            target("ORP_MOST", "http://b"),
            target("BAD", "http://c"),
        ];
        let fetched: HashMap<String, Result<Vec<u8>>> = HashMap::from([
            ("http://a".to_string(), Ok(br#"{"alerts": []}"#.to_vec())),
            ("http://b".to_string(), Err(anyhow::anyhow!("503"))),
            ("http://c".to_string(), Ok(b"<html>".to_vec())),
        ]);

        let written = archive_fetched(dir.path(), &targets, &fetched, at);

        assert_eq!(written.len(), 1);
        let listed = list_snapshots(&dir.path().join("JMK")).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, "JMK");
        assert_eq!(listed[0].taken_at, at);
    }

    struct RefusingClient;

    #[async_trait::async_trait]
    impl FeedClient for RefusingClient {
        async fn get(&self, url: &str) -> reqwest::Result<reqwest::Response> {
            reqwest::Client::new()
                .get(format!("not a url {url}"))
                .send()
                .await
        }
    }

    #[tokio::test]
    async fn test_stop_before_wait_ends_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, shutdown) = Shutdown::channel();
        tx.send(true).unwrap();
        let targets = vec![target("JMK", "http://a")];

        let run = run_download(Arc::new(RefusingClient), &targets, dir.path(), 3600, 0, shutdown);
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();

        assert!(!dir.path().join("JMK").exists());
    }
}
