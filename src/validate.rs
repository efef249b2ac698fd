//! Quality checks over decoded feeds.
//!
//! Validation never rejects data: every check appends an issue to the report
//! and the caller decides what to do with an invalid feed. Only structural
//! problems (missing header, route codes the feed should not carry) are
//! errors; staleness and implausible positions are warnings.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::DecodedFeed;
use crate::registry::FeedDescriptor;

/// Geographic box a plausible vehicle position must fall in.
#[derive(Debug, Clone, Copy)]
pub struct Bounds {
    pub min_lat: f32,
    pub max_lat: f32,
    pub min_lon: f32,
    pub max_lon: f32,
}

impl Bounds {
    /// NYC service area, padded past the outermost stations.
    pub fn nyc() -> Self {
        Self {
            min_lat: 40.4,
            max_lat: 41.0,
            min_lon: -74.3,
            max_lon: -73.65,
        }
    }

    pub fn contains(&self, lat: f32, lon: f32) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueCode {
    MissingHeader,
    Stale,
    OutOfBounds,
    IncompletePosition,
    UnexpectedLine,
    EmptyFeed,
    TimestampRegression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub code: IssueCode,
    pub message: String,
}

/// Counting summary of one decoded feed, carried alongside the issue list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedStats {
    pub trip_count: usize,
    pub vehicle_count: usize,
    pub lines_covered: BTreeSet<String>,
    pub out_of_bounds_count: usize,
    pub incomplete_position_count: usize,
    pub skipped_entities: usize,
}

/// Outcome of validating one decoded feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub feed_id: String,
    /// False iff any issue has `Severity::Error`.
    pub is_valid: bool,
    /// Age of the feed header at validation time, when a header timestamp
    /// exists. Negative if the header claims a future time.
    pub freshness_seconds: Option<i64>,
    pub issues: Vec<Issue>,
    pub stats: FeedStats,
}

/// Stateful validator. The last-seen header timestamp per feed lives here so
/// repeated cycles in one process can catch a feed moving backwards in time.
pub struct Validator {
    freshness_threshold: Duration,
    bounds: Bounds,
    last_seen: Mutex<HashMap<String, u64>>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(Duration::from_secs(600), Bounds::nyc())
    }
}

impl Validator {
    pub fn new(freshness_threshold: Duration, bounds: Bounds) -> Self {
        Self {
            freshness_threshold,
            bounds,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    /// Runs every check against one decoded feed.
    ///
    /// `descriptor` must be the registry entry the feed was fetched from; its
    /// line set defines which route codes are expected.
    pub fn validate(
        &self,
        feed: &DecodedFeed,
        descriptor: &FeedDescriptor,
        now: DateTime<Utc>,
    ) -> ValidationReport {
        let mut issues = Vec::new();

        let freshness_seconds = match feed.header_timestamp {
            Some(ts) => {
                let age = now.timestamp() - ts as i64;
                if age > self.freshness_threshold.as_secs() as i64 {
                    issues.push(Issue {
                        severity: Severity::Warning,
                        code: IssueCode::Stale,
                        message: format!(
                            "feed header is {age}s old, threshold {}s",
                            self.freshness_threshold.as_secs()
                        ),
                    });
                }
                self.check_regression(&feed.feed_id, ts, &mut issues);
                Some(age)
            }
            None => {
                issues.push(Issue {
                    severity: Severity::Error,
                    code: IssueCode::MissingHeader,
                    message: "feed header carries no timestamp".to_string(),
                });
                None
            }
        };

        let mut lines_covered = BTreeSet::new();
        for tu in &feed.trip_updates {
            if let Some(route) = &tu.route_id {
                lines_covered.insert(route.clone());
            }
        }
        for vp in &feed.vehicle_positions {
            if let Some(route) = &vp.route_id {
                lines_covered.insert(route.clone());
            }
        }

        let unexpected: Vec<&String> = lines_covered
            .iter()
            .filter(|line| !descriptor.carries_line(line))
            .collect();
        if !unexpected.is_empty() {
            let listed: Vec<&str> = unexpected.iter().map(|l| l.as_str()).collect();
            issues.push(Issue {
                severity: Severity::Error,
                code: IssueCode::UnexpectedLine,
                message: format!(
                    "feed {} carries unexpected line(s): {}",
                    feed.feed_id,
                    listed.join(", ")
                ),
            });
        }

        let mut out_of_bounds = 0usize;
        let mut incomplete = 0usize;
        for vp in &feed.vehicle_positions {
            match (vp.latitude, vp.longitude) {
                (Some(lat), Some(lon)) => {
                    if !self.bounds.contains(lat, lon) {
                        out_of_bounds += 1;
                    }
                }
                (None, None) => {}
                _ => incomplete += 1,
            }
        }
        if out_of_bounds > 0 {
            issues.push(Issue {
                severity: Severity::Warning,
                code: IssueCode::OutOfBounds,
                message: format!("{out_of_bounds} vehicle position(s) outside service area"),
            });
        }
        if incomplete > 0 {
            issues.push(Issue {
                severity: Severity::Warning,
                code: IssueCode::IncompletePosition,
                message: format!("{incomplete} vehicle position(s) missing one coordinate"),
            });
        }

        if feed.trip_updates.is_empty() && feed.vehicle_positions.is_empty() {
            issues.push(Issue {
                severity: Severity::Warning,
                code: IssueCode::EmptyFeed,
                message: "feed decoded with no trip updates and no vehicles".to_string(),
            });
        }

        let is_valid = !issues.iter().any(|i| i.severity == Severity::Error);

        ValidationReport {
            feed_id: feed.feed_id.clone(),
            is_valid,
            freshness_seconds,
            issues,
            stats: FeedStats {
                trip_count: feed.trip_updates.len(),
                vehicle_count: feed.vehicle_positions.len(),
                lines_covered,
                out_of_bounds_count: out_of_bounds,
                incomplete_position_count: incomplete,
                skipped_entities: feed.skipped_entities,
            },
        }
    }

    /// Flags a header timestamp older than the largest one seen for this
    /// feed. The stored high-water mark never moves backwards, so every
    /// regressed cycle is flagged, not just the first.
    fn check_regression(&self, feed_id: &str, ts: u64, issues: &mut Vec<Issue>) {
        let mut last_seen = self.last_seen.lock().unwrap_or_else(|e| e.into_inner());
        let entry = last_seen.entry(feed_id.to_string()).or_insert(ts);
        if ts < *entry {
            issues.push(Issue {
                severity: Severity::Warning,
                code: IssueCode::TimestampRegression,
                message: format!("header timestamp went backwards: {ts} after {entry}"),
            });
        } else {
            *entry = ts;
        }
    }
}

impl ValidationReport {
    pub fn has_issue(&self, code: IssueCode) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }
}
