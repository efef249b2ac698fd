//! Decoded domain records produced by the parser and consumed by the
//! validator and store.
//!
//! These are plain data: decoding passes numeric values through unmodified,
//! and plausibility judgements belong to the validator.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw bytes of one feed fetch, before decoding.
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub feed_id: String,
    pub fetched_at: DateTime<Utc>,
    pub bytes: Bytes,
    pub http_status: u16,
}

/// Predicted stop-time information for one vehicle run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripUpdate {
    pub trip_id: Option<String>,
    /// Line code, e.g. "L" or "6".
    pub route_id: Option<String>,
    pub start_date: Option<String>,
    pub stop_time_updates: Vec<StopTimeUpdate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopTimeUpdate {
    pub stop_id: Option<String>,
    /// POSIX seconds.
    pub arrival_time: Option<i64>,
    /// POSIX seconds.
    pub departure_time: Option<i64>,
}

/// Last-known location and status of one vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehiclePosition {
    pub vehicle_id: Option<String>,
    pub trip_id: Option<String>,
    pub route_id: Option<String>,
    pub latitude: Option<f32>,
    pub longitude: Option<f32>,
    /// POSIX seconds.
    pub timestamp: Option<u64>,
    pub current_status: Option<StopStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopStatus {
    IncomingAt,
    StoppedAt,
    InTransitTo,
}

/// One successfully decoded feed payload. Entity order from the wire is
/// preserved within `trip_updates` and `vehicle_positions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedFeed {
    pub feed_id: String,
    /// Feed production time from the header, POSIX seconds.
    pub header_timestamp: Option<u64>,
    pub trip_updates: Vec<TripUpdate>,
    pub vehicle_positions: Vec<VehiclePosition>,
    /// Entities carrying neither a trip update nor a vehicle position
    /// (alerts and other kinds this pipeline does not consume).
    pub skipped_entities: usize,
}
