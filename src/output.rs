//! Output formatting and persistence for run records.
//!
//! Supports pretty-printing, JSON serialization, and CSV append.

use csv::WriterBuilder;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::stats::RunRecord;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("csv write failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("output io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Logs a run record using Rust's debug pretty-print format.
pub fn print_pretty(record: &RunRecord) {
    debug!("{:#?}", record);
}

/// Prints any serializable value as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<(), OutputError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Appends a [`RunRecord`] as a row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_record(path: &Path, record: &RunRecord) -> Result<(), OutputError> {
    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, "appending CSV record");

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    writer.serialize(record)?;
    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Utc;
    use std::fs;

    use crate::model::RawPayload;
    use crate::stats::RunRecord;
    use crate::validate::{FeedStats, ValidationReport};

    fn record() -> RunRecord {
        let payload = RawPayload {
            feed_id: "l".to_string(),
            fetched_at: Utc::now(),
            bytes: Bytes::from_static(b""),
            http_status: 200,
        };
        let report = ValidationReport {
            feed_id: "l".to_string(),
            is_valid: true,
            freshness_seconds: Some(12),
            issues: vec![],
            stats: FeedStats {
                trip_count: 1,
                vehicle_count: 0,
                lines_covered: ["L".to_string()].into_iter().collect(),
                out_of_bounds_count: 0,
                incomplete_position_count: 0,
                skipped_entities: 0,
            },
        };
        RunRecord::from_cycle(&payload, &report)
    }

    #[test]
    fn test_print_pretty_does_not_panic() {
        print_pretty(&record());
    }

    #[test]
    fn test_print_json_does_not_panic() {
        print_json(&record()).unwrap();
    }

    #[test]
    fn test_append_record_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.csv");

        append_record(&path, &record()).unwrap();

        assert!(path.exists());
        let content = fs::read_to_string(&path).unwrap();
        assert!(!content.is_empty());
    }

    #[test]
    fn test_append_record_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.csv");

        append_record(&path, &record()).unwrap();
        append_record(&path, &record()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        // Header line should appear exactly once
        let header_count = content.lines().filter(|l| l.contains("timestamp")).count();
        assert_eq!(header_count, 1);
        // 1 header + 2 data rows
        assert_eq!(content.lines().count(), 3);
    }
}
