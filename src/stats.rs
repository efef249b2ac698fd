//! Flat per-cycle records and cross-feed totals.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::RawPayload;
use crate::validate::ValidationReport;

/// One row of the per-feed run log, flat so it serializes to a CSV line.
#[derive(Debug, Serialize)]
pub struct RunRecord {
    pub timestamp: DateTime<Utc>,
    pub feed_id: String,
    pub http_status: u16,
    pub is_valid: bool,
    pub freshness_seconds: Option<i64>,
    pub trip_count: usize,
    pub vehicle_count: usize,
    /// Observed line codes joined with `|`.
    pub lines_covered: String,
    pub out_of_bounds_count: usize,
    pub incomplete_position_count: usize,
    pub skipped_entities: usize,
    /// Issue codes joined with `|`, empty when the feed was clean.
    pub issue_codes: String,
}

impl RunRecord {
    pub fn from_cycle(payload: &RawPayload, report: &ValidationReport) -> Self {
        let lines: Vec<&str> = report
            .stats
            .lines_covered
            .iter()
            .map(|l| l.as_str())
            .collect();
        let codes: Vec<String> = report
            .issues
            .iter()
            .map(|i| format!("{:?}", i.code))
            .collect();

        Self {
            timestamp: payload.fetched_at,
            feed_id: report.feed_id.clone(),
            http_status: payload.http_status,
            is_valid: report.is_valid,
            freshness_seconds: report.freshness_seconds,
            trip_count: report.stats.trip_count,
            vehicle_count: report.stats.vehicle_count,
            lines_covered: lines.join("|"),
            out_of_bounds_count: report.stats.out_of_bounds_count,
            incomplete_position_count: report.stats.incomplete_position_count,
            skipped_entities: report.stats.skipped_entities,
            issue_codes: codes.join("|"),
        }
    }
}

/// Cross-feed sums over one pipeline cycle. Only successful feeds contribute
/// counts; failures and skips are tallied separately.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Totals {
    pub total_trips: usize,
    pub total_vehicles: usize,
    pub lines_covered: BTreeSet<String>,
    pub feeds_failed: usize,
    pub feeds_skipped: usize,
}

impl Totals {
    pub fn absorb(&mut self, report: &ValidationReport) {
        self.total_trips += report.stats.trip_count;
        self.total_vehicles += report.stats.vehicle_count;
        self.lines_covered
            .extend(report.stats.lines_covered.iter().cloned());
    }
}
