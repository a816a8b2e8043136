//! Snapshot archives on disk.
//!
//! Each downloaded document is stored as
//! `data_<KEY>_<YYYY-MM-DD>_<HH>-<MM>-<SS>.json`; the name is the only record
//! of when the snapshot was taken. Times in names are UTC.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use tracing::debug;

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"data_(.+?)_(\d{4}-\d{2}-\d{2})_(\d{2})-(\d{2})-(\d{2})")
        .expect("archive name pattern is valid")
});

const NAME_TIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// A snapshot file found in an archive directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedSnapshot {
    pub path: PathBuf,
    pub key: String,
    pub taken_at: DateTime<Utc>,
}

fn parse_name(name: &str) -> Option<(String, DateTime<Utc>)> {
    let caps = NAME_PATTERN.captures(name)?;
    let stamp = format!("{} {}:{}:{}", &caps[2], &caps[3], &caps[4], &caps[5]);
    let naive = NaiveDateTime::parse_from_str(&stamp, "%Y-%m-%d %H:%M:%S").ok()?;
    Some((caps[1].to_string(), naive.and_utc()))
}

/// Extracts the capture time encoded in an archive file name.
pub fn timestamp_from_name(name: &str) -> Option<DateTime<Utc>> {
    parse_name(name).map(|(_, taken_at)| taken_at)
}

/// File name under which a snapshot of `key` taken at `at` is archived.
pub fn archive_name(key: &str, at: DateTime<Utc>) -> String {
    format!("data_{key}_{}.json", at.format(NAME_TIME_FORMAT))
}

/// Lists the archived snapshots in `dir`, oldest first. Files that do not
/// follow the naming scheme are ignored.
pub fn list_snapshots(dir: &Path) -> Result<Vec<ArchivedSnapshot>> {
    let mut snapshots = Vec::new();

    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();

        if !entry.file_type()?.is_file() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with("data_") {
            continue;
        }
        match parse_name(name) {
            Some((key, taken_at)) => snapshots.push(ArchivedSnapshot {
                path: path.clone(),
                key,
                taken_at,
            }),
            None => debug!(file = name, "Not an archived snapshot, skipping"),
        }
    }

    snapshots.sort_by(|a, b| a.taken_at.cmp(&b.taken_at).then_with(|| a.path.cmp(&b.path)));
    Ok(snapshots)
}

/// Narrows a listing to the snapshots of one feed.
///
/// With `key` given, only that feed's snapshots are kept. Without it the
/// listing must hold a single feed: snapshots of different feeds never share
/// a store.
pub fn select_feed(
    snapshots: Vec<ArchivedSnapshot>,
    key: Option<&str>,
) -> Result<Vec<ArchivedSnapshot>> {
    if let Some(key) = key {
        return Ok(snapshots.into_iter().filter(|s| s.key == key).collect());
    }

    let mut keys: Vec<&str> = snapshots.iter().map(|s| s.key.as_str()).collect();
    keys.sort_unstable();
    keys.dedup();
    if keys.len() > 1 {
        bail!(
            "archive mixes feeds {}; choose one with a key",
            keys.join(", ")
        );
    }
    Ok(snapshots)
}

/// Stores a raw feed document in `dir` under its archive name.
///
/// The document must be valid JSON; it is written back indented.
pub fn write_snapshot(
    dir: &Path,
    key: &str,
    at: DateTime<Utc>,
    bytes: &[u8],
) -> Result<PathBuf> {
    let document: serde_json::Value =
        serde_json::from_slice(bytes).context("feed document is not valid JSON")?;

    fs::create_dir_all(dir)?;
    let path = dir.join(archive_name(key, at));
    fs::write(&path, serde_json::to_vec_pretty(&document)?)
        .with_context(|| format!("failed to write {}", path.display()))?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_from_name() {
        let ts = timestamp_from_name("data_JMK_2025-03-14_08-05-09.json").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 3, 14, 8, 5, 9).unwrap());
    }

    #[test]
    fn test_timestamp_from_name_with_underscored_key() {
        let (key, ts) = parse_name("data_ORP_MOST_2025-03-14_23-59-00.json").unwrap();
        assert_eq!(key, "ORP_MOST");
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 3, 14, 23, 59, 0).unwrap());
    }

    #[test]
    fn test_timestamp_from_bad_names() {
        assert!(timestamp_from_name("notes.json").is_none());
        assert!(timestamp_from_name("data_JMK_2025-13-40_08-05-09.json").is_none());
    }

    #[test]
    fn test_archive_name_round_trips() {
        let at = Utc.with_ymd_and_hms(2024, 11, 2, 17, 4, 30).unwrap();
        let name = archive_name("JMK", at);
        assert_eq!(name, "data_JMK_2024-11-02_17-04-30.json");
        assert_eq!(timestamp_from_name(&name), Some(at));
    }

    #[test]
    fn test_list_snapshots_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let later = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2024, 1, 1, 9, 58, 0).unwrap();
        write_snapshot(dir.path(), "JMK", later, b"{}").unwrap();
        write_snapshot(dir.path(), "JMK", earlier, b"{}").unwrap();
        fs::write(dir.path().join("readme.txt"), "x").unwrap();
        fs::write(dir.path().join("data_JMK_garbage.json"), "{}").unwrap();

        let listed = list_snapshots(dir.path()).unwrap();

        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].taken_at, earlier);
        assert_eq!(listed[1].taken_at, later);
        assert_eq!(listed[0].key, "JMK");
    }

    #[test]
    fn test_select_feed_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        write_snapshot(dir.path(), "JMK", at, b"{}").unwrap();
        write_snapshot(dir.path(), "ORP_MOST", at, b"{}").unwrap();
        let listed = list_snapshots(dir.path()).unwrap();

        let most = select_feed(listed.clone(), Some("ORP_MOST")).unwrap();
        assert_eq!(most.len(), 1);
        assert_eq!(most[0].key, "ORP_MOST");
        assert!(select_feed(listed, Some("OTHER")).unwrap().is_empty());
    }

    #[test]
    fn test_select_feed_refuses_mixed_archive() {
        let dir = tempfile::tempdir().unwrap();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        write_snapshot(dir.path(), "JMK", at, b"{}").unwrap();
        let single = list_snapshots(dir.path()).unwrap();
        assert_eq!(select_feed(single, None).unwrap().len(), 1);

        write_snapshot(dir.path(), "ORP_MOST", at, b"{}").unwrap();
        let mixed = list_snapshots(dir.path()).unwrap();
        let err = select_feed(mixed, None).unwrap_err();
        assert!(err.to_string().contains("JMK, ORP_MOST"));
    }

    #[test]
    fn test_write_snapshot_rejects_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let result = write_snapshot(dir.path(), "JMK", Utc::now(), b"<html>");
        assert!(result.is_err());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
