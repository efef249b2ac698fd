//! Protobuf decoder for GTFS-Realtime payloads.
//!
//! Converts the raw bytes of one fetch into a [`DecodedFeed`]. Decoding is
//! deliberately permissive about values: out-of-range coordinates and
//! timestamps pass through untouched for the validator to judge.

use prost::Message;
use thiserror::Error;

use crate::gtfs_rt::{self, FeedMessage, VehicleStopStatus};
use crate::model::{
    DecodedFeed, RawPayload, StopStatus, StopTimeUpdate, TripUpdate, VehiclePosition,
};

#[derive(Debug, Error)]
pub enum DecodeError {
    /// Unparseable header or truncated body.
    #[error("malformed feed payload: {detail}")]
    Malformed { detail: String },
}

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid protobuf for a `FeedMessage`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage, DecodeError> {
    FeedMessage::decode(bytes).map_err(|e| DecodeError::Malformed {
        detail: e.to_string(),
    })
}

/// Decodes one fetched payload into domain records.
///
/// Entity order from the wire is preserved. Entities that carry neither a
/// trip update nor a vehicle position (alerts, unsupported kinds) are
/// counted in `skipped_entities`, not treated as fatal.
pub fn decode_feed(payload: &RawPayload) -> Result<DecodedFeed, DecodeError> {
    let message = parse_feed(&payload.bytes)?;

    let mut trip_updates = Vec::new();
    let mut vehicle_positions = Vec::new();
    let mut skipped = 0usize;

    for entity in &message.entity {
        let mut recognized = false;

        if let Some(tu) = &entity.trip_update {
            trip_updates.push(convert_trip_update(tu));
            recognized = true;
        }

        if let Some(vp) = &entity.vehicle {
            vehicle_positions.push(convert_vehicle_position(&entity.id, vp));
            recognized = true;
        }

        if !recognized {
            skipped += 1;
        }
    }

    Ok(DecodedFeed {
        feed_id: payload.feed_id.clone(),
        header_timestamp: message.header.timestamp,
        trip_updates,
        vehicle_positions,
        skipped_entities: skipped,
    })
}

fn convert_trip_update(tu: &gtfs_rt::TripUpdate) -> TripUpdate {
    TripUpdate {
        trip_id: tu.trip.trip_id.clone(),
        route_id: tu.trip.route_id.clone(),
        start_date: tu.trip.start_date.clone(),
        stop_time_updates: tu
            .stop_time_update
            .iter()
            .map(|stu| StopTimeUpdate {
                stop_id: stu.stop_id.clone(),
                arrival_time: stu.arrival.as_ref().and_then(|ev| ev.time),
                departure_time: stu.departure.as_ref().and_then(|ev| ev.time),
            })
            .collect(),
    }
}

fn convert_vehicle_position(entity_id: &str, vp: &gtfs_rt::VehiclePosition) -> VehiclePosition {
    // NYCT feeds rarely populate the vehicle descriptor; the entity id is
    // the stable identifier in practice.
    let vehicle_id = vp
        .vehicle
        .as_ref()
        .and_then(|d| d.id.clone())
        .or_else(|| Some(entity_id.to_string()));

    VehiclePosition {
        vehicle_id,
        trip_id: vp.trip.as_ref().and_then(|t| t.trip_id.clone()),
        route_id: vp.trip.as_ref().and_then(|t| t.route_id.clone()),
        latitude: vp.position.as_ref().map(|p| p.latitude),
        longitude: vp.position.as_ref().map(|p| p.longitude),
        timestamp: vp.timestamp,
        current_status: vp
            .current_status
            .and_then(|s| VehicleStopStatus::try_from(s).ok())
            .map(|s| match s {
                VehicleStopStatus::IncomingAt => StopStatus::IncomingAt,
                VehicleStopStatus::StoppedAt => StopStatus::StoppedAt,
                VehicleStopStatus::InTransitTo => StopStatus::InTransitTo,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Utc;

    use crate::gtfs_rt::{FeedEntity, FeedHeader, Position, StopTimeEvent, TripDescriptor};

    fn payload(bytes: Vec<u8>) -> RawPayload {
        RawPayload {
            feed_id: "l".to_string(),
            fetched_at: Utc::now(),
            bytes: Bytes::from(bytes),
            http_status: 200,
        }
    }

    fn header(ts: Option<u64>) -> FeedHeader {
        FeedHeader {
            gtfs_realtime_version: "2.0".to_string(),
            incrementality: None,
            timestamp: ts,
            feed_version: None,
        }
    }

    #[test]
    fn test_parse_invalid_bytes() {
        let invalid = vec![0xFF, 0xFE, 0x00, 0x01];
        let result = parse_feed(&invalid);
        assert!(matches!(result, Err(DecodeError::Malformed { .. })));
    }

    #[test]
    fn test_decode_round_trips_fixture() {
        let message = FeedMessage {
            header: header(Some(1_700_000_000)),
            entity: vec![
                FeedEntity {
                    id: "1".to_string(),
                    is_deleted: None,
                    trip_update: Some(gtfs_rt::TripUpdate {
                        trip: TripDescriptor {
                            trip_id: Some("L_1200".to_string()),
                            start_time: None,
                            start_date: Some("20260806".to_string()),
                            route_id: Some("L".to_string()),
                            direction_id: None,
                        },
                        stop_time_update: vec![gtfs_rt::StopTimeUpdate {
                            stop_sequence: Some(1),
                            arrival: Some(StopTimeEvent {
                                delay: None,
                                time: Some(1_700_000_060),
                                uncertainty: None,
                            }),
                            departure: None,
                            stop_id: Some("L08N".to_string()),
                        }],
                        vehicle: None,
                        timestamp: None,
                        delay: None,
                    }),
                    vehicle: None,
                },
                FeedEntity {
                    id: "2".to_string(),
                    is_deleted: None,
                    trip_update: None,
                    vehicle: Some(gtfs_rt::VehiclePosition {
                        trip: Some(TripDescriptor {
                            trip_id: Some("L_1200".to_string()),
                            start_time: None,
                            start_date: None,
                            route_id: Some("L".to_string()),
                            direction_id: None,
                        }),
                        position: Some(Position {
                            latitude: 40.75,
                            longitude: -73.98,
                            bearing: None,
                            odometer: None,
                            speed: None,
                        }),
                        current_stop_sequence: None,
                        current_status: Some(VehicleStopStatus::StoppedAt as i32),
                        timestamp: Some(1_700_000_030),
                        stop_id: Some("L08N".to_string()),
                        vehicle: None,
                    }),
                },
            ],
        };

        let decoded = decode_feed(&payload(message.encode_to_vec())).unwrap();

        assert_eq!(decoded.feed_id, "l");
        assert_eq!(decoded.header_timestamp, Some(1_700_000_000));
        assert_eq!(decoded.trip_updates.len(), 1);
        assert_eq!(decoded.vehicle_positions.len(), 1);
        assert_eq!(decoded.skipped_entities, 0);

        let tu = &decoded.trip_updates[0];
        assert_eq!(tu.trip_id.as_deref(), Some("L_1200"));
        assert_eq!(tu.route_id.as_deref(), Some("L"));
        assert_eq!(tu.stop_time_updates.len(), 1);
        assert_eq!(tu.stop_time_updates[0].arrival_time, Some(1_700_000_060));
        assert_eq!(tu.stop_time_updates[0].departure_time, None);

        let vp = &decoded.vehicle_positions[0];
        assert_eq!(vp.vehicle_id.as_deref(), Some("2"));
        assert_eq!(vp.route_id.as_deref(), Some("L"));
        assert_eq!(vp.latitude, Some(40.75));
        assert_eq!(vp.current_status, Some(StopStatus::StoppedAt));
    }

    #[test]
    fn test_decode_preserves_entity_order() {
        let mut entities = Vec::new();
        for i in 0..5 {
            entities.push(FeedEntity {
                id: format!("e{i}"),
                is_deleted: None,
                trip_update: Some(gtfs_rt::TripUpdate {
                    trip: TripDescriptor {
                        trip_id: Some(format!("trip_{i}")),
                        start_time: None,
                        start_date: None,
                        route_id: Some("G".to_string()),
                        direction_id: None,
                    },
                    stop_time_update: vec![],
                    vehicle: None,
                    timestamp: None,
                    delay: None,
                }),
                vehicle: None,
            });
        }
        let message = FeedMessage {
            header: header(Some(1)),
            entity: entities,
        };

        let decoded = decode_feed(&payload(message.encode_to_vec())).unwrap();
        let ids: Vec<_> = decoded
            .trip_updates
            .iter()
            .map(|t| t.trip_id.clone().unwrap())
            .collect();
        assert_eq!(ids, vec!["trip_0", "trip_1", "trip_2", "trip_3", "trip_4"]);
    }

    #[test]
    fn test_unrecognized_entities_are_skipped_and_counted() {
        // An alert-only entity carries neither field this schema subset
        // models, so it decodes as empty and is counted as skipped.
        let message = FeedMessage {
            header: header(Some(1)),
            entity: vec![FeedEntity {
                id: "alert-1".to_string(),
                is_deleted: None,
                trip_update: None,
                vehicle: None,
            }],
        };

        let decoded = decode_feed(&payload(message.encode_to_vec())).unwrap();
        assert_eq!(decoded.trip_updates.len(), 0);
        assert_eq!(decoded.vehicle_positions.len(), 0);
        assert_eq!(decoded.skipped_entities, 1);
    }

    #[test]
    fn test_missing_header_timestamp_survives_decode() {
        let message = FeedMessage {
            header: header(None),
            entity: vec![],
        };
        let decoded = decode_feed(&payload(message.encode_to_vec())).unwrap();
        assert_eq!(decoded.header_timestamp, None);
    }
}
