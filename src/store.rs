//! Filesystem persistence for feed snapshots.
//!
//! Layout under the store root:
//!
//! ```text
//! root/raw/feed_id=<id>/<%Y%m%dT%H%M%SZ>.pb      protobuf bytes as fetched
//! root/parsed/feed_id=<id>/<%Y%m%dT%H%M%SZ>.json decoded feed + report
//! ```
//!
//! Snapshots are keyed by `(feed_id, timestamp)` and never overwritten: a
//! second writer for the same key loses gracefully and the first entry
//! stands. File stems sort lexicographically in time order.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::model::DecodedFeed;
use crate::validate::ValidationReport;

const STEM_FORMAT: &str = "%Y%m%dT%H%M%SZ";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot write failed: {0}")]
    WriteFailed(#[source] std::io::Error),
    #[error("snapshot read failed: {0}")]
    ReadFailed(#[source] std::io::Error),
    #[error("corrupt snapshot document: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("no stored snapshot for feed {feed_id}")]
    NotFound { feed_id: String },
}

/// The JSON document written for one parsed snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub decoded: DecodedFeed,
    pub report: ValidationReport,
}

/// One parsed snapshot loaded back from disk.
#[derive(Debug, Clone)]
pub struct StoredSnapshot {
    pub feed_id: String,
    pub timestamp: DateTime<Utc>,
    pub path: PathBuf,
    pub document: SnapshotDocument,
}

/// Result of one prune pass over a feed's snapshots.
#[derive(Debug, Default)]
pub struct PruneOutcome {
    /// Snapshots fully or partially removed.
    pub removed: usize,
    /// Paths that could not be deleted, with the reason.
    pub failures: Vec<(PathBuf, std::io::Error)>,
}

/// Snapshot store rooted at one directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens (and if needed creates) a store at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(root.join("raw")).map_err(StoreError::WriteFailed)?;
        fs::create_dir_all(root.join("parsed")).map_err(StoreError::WriteFailed)?;
        Ok(Self { root })
    }

    fn raw_dir(&self, feed_id: &str) -> PathBuf {
        self.root.join("raw").join(format!("feed_id={feed_id}"))
    }

    fn parsed_dir(&self, feed_id: &str) -> PathBuf {
        self.root.join("parsed").join(format!("feed_id={feed_id}"))
    }

    /// Persists the raw protobuf bytes of one fetch.
    ///
    /// If a snapshot already exists for this `(feed_id, timestamp)` the
    /// existing file is left untouched and its path returned.
    pub fn save_raw(
        &self,
        feed_id: &str,
        timestamp: DateTime<Utc>,
        bytes: &[u8],
    ) -> Result<PathBuf, StoreError> {
        let dir = self.raw_dir(feed_id);
        let path = dir.join(format!("{}.pb", stem_for(timestamp)));
        write_new(&dir, &path, bytes)?;
        Ok(path)
    }

    /// Persists the decoded feed and its validation report as pretty JSON.
    ///
    /// Same non-overwrite discipline as [`FileStore::save_raw`].
    pub fn save_parsed(
        &self,
        feed_id: &str,
        timestamp: DateTime<Utc>,
        decoded: &DecodedFeed,
        report: &ValidationReport,
    ) -> Result<PathBuf, StoreError> {
        let document = SnapshotDocument {
            decoded: decoded.clone(),
            report: report.clone(),
        };
        let json = serde_json::to_vec_pretty(&document)?;

        let dir = self.parsed_dir(feed_id);
        let path = dir.join(format!("{}.json", stem_for(timestamp)));
        write_new(&dir, &path, &json)?;
        Ok(path)
    }

    /// Timestamps of all parsed snapshots for one feed, ascending.
    ///
    /// `since` keeps only snapshots at or after that instant. A feed with no
    /// snapshots yields an empty list, not an error.
    pub fn list_snapshots(
        &self,
        feed_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<DateTime<Utc>>, StoreError> {
        let dir = self.parsed_dir(feed_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut timestamps = Vec::new();
        for entry in fs::read_dir(&dir).map_err(StoreError::ReadFailed)? {
            let entry = entry.map_err(StoreError::ReadFailed)?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(ts) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(parse_stem)
            else {
                continue;
            };
            if since.is_none_or(|cutoff| ts >= cutoff) {
                timestamps.push(ts);
            }
        }
        timestamps.sort();
        Ok(timestamps)
    }

    /// Loads the newest parsed snapshot for one feed.
    pub fn load_latest(&self, feed_id: &str) -> Result<StoredSnapshot, StoreError> {
        let timestamps = self.list_snapshots(feed_id, None)?;
        match timestamps.last() {
            Some(ts) => self.load_at(feed_id, *ts),
            None => Err(StoreError::NotFound {
                feed_id: feed_id.to_string(),
            }),
        }
    }

    /// Loads the newest parsed snapshot at or before `timestamp`.
    pub fn load_at_or_before(
        &self,
        feed_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<StoredSnapshot, StoreError> {
        let timestamps = self.list_snapshots(feed_id, None)?;
        match timestamps.iter().rev().find(|ts| **ts <= timestamp) {
            Some(ts) => self.load_at(feed_id, *ts),
            None => Err(StoreError::NotFound {
                feed_id: feed_id.to_string(),
            }),
        }
    }

    fn load_at(&self, feed_id: &str, timestamp: DateTime<Utc>) -> Result<StoredSnapshot, StoreError> {
        let path = self
            .parsed_dir(feed_id)
            .join(format!("{}.json", stem_for(timestamp)));
        let bytes = fs::read(&path).map_err(StoreError::ReadFailed)?;
        let document: SnapshotDocument = serde_json::from_slice(&bytes)?;
        Ok(StoredSnapshot {
            feed_id: feed_id.to_string(),
            timestamp,
            path,
            document,
        })
    }

    /// Feed ids with at least one parsed snapshot.
    pub fn feed_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.root.join("parsed")).map_err(StoreError::ReadFailed)? {
            let entry = entry.map_err(StoreError::ReadFailed)?;
            if !entry.file_type().map_err(StoreError::ReadFailed)?.is_dir() {
                continue;
            }
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|n| n.strip_prefix("feed_id="))
            {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Deletes all but the `keep_newest_n` newest snapshots of one feed,
    /// raw and parsed together.
    ///
    /// Deletion failures are collected per file and do not stop the pass.
    pub fn prune(&self, feed_id: &str, keep_newest_n: usize) -> Result<PruneOutcome, StoreError> {
        let timestamps = self.list_snapshots(feed_id, None)?;
        let cut = timestamps.len().saturating_sub(keep_newest_n);

        let mut outcome = PruneOutcome::default();
        for ts in &timestamps[..cut] {
            let stem = stem_for(*ts);
            let parsed = self.parsed_dir(feed_id).join(format!("{stem}.json"));
            let raw = self.raw_dir(feed_id).join(format!("{stem}.pb"));

            let mut deleted = false;
            for path in [parsed, raw] {
                match fs::remove_file(&path) {
                    Ok(()) => deleted = true,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => outcome.failures.push((path, e)),
                }
            }
            if deleted {
                outcome.removed += 1;
            }
        }

        debug!(
            feed_id,
            removed = outcome.removed,
            failures = outcome.failures.len(),
            "pruned snapshots"
        );
        Ok(outcome)
    }
}

fn stem_for(timestamp: DateTime<Utc>) -> String {
    timestamp.format(STEM_FORMAT).to_string()
}

fn parse_stem(stem: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(stem, STEM_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Creates `path` under `dir` only if it does not exist yet. An existing
/// file is success, not a conflict.
fn write_new(dir: &Path, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    fs::create_dir_all(dir).map_err(StoreError::WriteFailed)?;
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => file.write_all(bytes).map_err(StoreError::WriteFailed),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            debug!(path = %path.display(), "snapshot already stored, keeping first");
            Ok(())
        }
        Err(e) => Err(StoreError::WriteFailed(e)),
    }
}
