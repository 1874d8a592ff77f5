//! Decoding of raw inbound frames into typed ride events.
//!
//! The decoder is stateless: each call inspects one frame, in the order the
//! connection channel delivered it. Failures are returned to the caller,
//! which logs them and moves on to the next frame.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::event_kind::EventKind;
use crate::protocol::{
    CurrentLocationPayload, Position, RideEndedPayload, RideId, RidePositionPayload,
    RideStartedPayload, RideSummary,
};

/// Why a frame produced no event.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame is not valid JSON.
    #[error("invalid frame syntax: {0}")]
    Syntax(#[source] serde_json::Error),

    /// The frame has no string `type` field.
    #[error("frame has no `type` discriminator")]
    MissingType,

    /// The `type` is known but the payload does not match it.
    #[error("invalid {kind} payload: {source}")]
    Payload {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },
}

/// A typed inbound event.
///
/// Consumed once by the reducer and the list synchronizer, then dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedEvent {
    CurrentLocation(Position),
    RideStarted {
        ride: RideSummary,
        initial_position: Position,
    },
    RidePositionUpdate {
        ride_id: RideId,
        position: Position,
    },
    RideEnded {
        ride_id: RideId,
        end_time: DateTime<Utc>,
    },
    /// Well-formed frame with a `type` this client does not know.
    Unrecognized { kind: String },
}

impl DecodedEvent {
    /// The known kind of this event, if any.
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            Self::CurrentLocation(_) => Some(EventKind::CurrentLocation),
            Self::RideStarted { .. } => Some(EventKind::RideStarted),
            Self::RidePositionUpdate { .. } => Some(EventKind::RidePositionUpdate),
            Self::RideEnded { .. } => Some(EventKind::RideEnded),
            Self::Unrecognized { .. } => None,
        }
    }

    /// The ride this event refers to, if it refers to one.
    pub fn ride_id(&self) -> Option<RideId> {
        match self {
            Self::RideStarted { ride, .. } => Some(ride.id),
            Self::RidePositionUpdate { ride_id, .. } | Self::RideEnded { ride_id, .. } => {
                Some(*ride_id)
            }
            Self::CurrentLocation(_) | Self::Unrecognized { .. } => None,
        }
    }

    /// See [`EventKind::is_live_signal`].
    pub fn is_live_signal(&self) -> bool {
        self.kind().is_some_and(|k| k.is_live_signal())
    }
}

/// Parses inbound text frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventDecoder;

impl EventDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode one frame.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] for invalid JSON, a missing or non-string
    /// `type`, or a payload that does not match a known `type`. Unknown
    /// `type` values are not errors.
    pub fn decode(&self, raw: &str) -> Result<DecodedEvent, DecodeError> {
        let mut frame: Value = serde_json::from_str(raw).map_err(DecodeError::Syntax)?;

        let kind = match frame.get("type").and_then(Value::as_str) {
            Some(name) => match EventKind::from_wire(name) {
                Some(kind) => kind,
                None => {
                    return Ok(DecodedEvent::Unrecognized {
                        kind: name.to_string(),
                    })
                }
            },
            None => return Err(DecodeError::MissingType),
        };

        let payload = frame
            .get_mut("payload")
            .map(Value::take)
            .unwrap_or(Value::Null);

        let event = match kind {
            EventKind::CurrentLocation => {
                let position: CurrentLocationPayload = payload_as(kind, payload)?;
                DecodedEvent::CurrentLocation(position)
            }
            EventKind::RideStarted => {
                let p: RideStartedPayload = payload_as(kind, payload)?;
                DecodedEvent::RideStarted {
                    ride: RideSummary::new(p.ride_id, p.name, p.start_time),
                    initial_position: p.initial_position,
                }
            }
            EventKind::RidePositionUpdate => {
                let p: RidePositionPayload = payload_as(kind, payload)?;
                DecodedEvent::RidePositionUpdate {
                    ride_id: p.ride_id,
                    position: p.position,
                }
            }
            EventKind::RideEnded => {
                let p: RideEndedPayload = payload_as(kind, payload)?;
                DecodedEvent::RideEnded {
                    ride_id: p.ride_id,
                    end_time: p.end_time,
                }
            }
        };

        Ok(event)
    }
}

fn payload_as<T: DeserializeOwned>(kind: EventKind, payload: Value) -> Result<T, DecodeError> {
    serde_json::from_value(payload).map_err(|source| DecodeError::Payload { kind, source })
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn decode(raw: &str) -> Result<DecodedEvent, DecodeError> {
        EventDecoder::new().decode(raw)
    }

    #[test]
    fn decode_error_converts_into_crate_error() {
        let err: crate::error::RideTrackerError = decode("not json").unwrap_err().into();
        assert!(matches!(
            err,
            crate::error::RideTrackerError::Decode(DecodeError::Syntax(_))
        ));
        assert!(err.to_string().starts_with("decode error:"));
    }

    #[test]
    fn decodes_current_location() {
        let raw = r#"{
            "type": "current_location",
            "payload": {"latitude": 37.7, "longitude": -122.4, "timestamp": "2025-06-01T08:00:00Z", "speed_knots": 3.2},
            "timestamp": "2025-06-01T08:00:00.5Z"
        }"#;
        match decode(raw).unwrap() {
            DecodedEvent::CurrentLocation(p) => {
                assert_eq!(p.latitude, 37.7);
                assert_eq!(p.speed_knots, Some(3.2));
            }
            other => panic!("expected CurrentLocation, got {other:?}"),
        }
    }

    #[test]
    fn decodes_uppercase_ride_lifecycle() {
        let started = decode(
            r#"{"type":"RIDE_STARTED","payload":{"ride_id":5,"ride_name":"Ride 5",
            "timestamp":"2025-06-01T08:00:00Z",
            "position":{"latitude":1.0,"longitude":2.0,"timestamp":"2025-06-01T08:00:00Z"}}}"#,
        )
        .unwrap();
        assert_eq!(started.kind(), Some(EventKind::RideStarted));
        assert_eq!(started.ride_id(), Some(5));

        let update = decode(
            r#"{"type":"RIDE_POSITION_UPDATE","payload":{"ride_id":5,"timestamp":"2025-06-01T08:00:05Z",
            "position":{"latitude":1.1,"longitude":2.1,"timestamp":"2025-06-01T08:00:05Z"}}}"#,
        )
        .unwrap();
        assert!(matches!(
            update,
            DecodedEvent::RidePositionUpdate { ride_id: 5, .. }
        ));

        let ended = decode(
            r#"{"type":"RIDE_ENDED","payload":{"ride_id":5,"timestamp":"2025-06-01T08:30:00Z"}}"#,
        )
        .unwrap();
        match ended {
            DecodedEvent::RideEnded { ride_id, end_time } => {
                assert_eq!(ride_id, 5);
                assert_eq!(end_time.to_rfc3339(), "2025-06-01T08:30:00+00:00");
            }
            other => panic!("expected RideEnded, got {other:?}"),
        }
    }

    #[test]
    fn decodes_lowercase_ride_lifecycle() {
        let started = decode(
            r#"{"type":"ride_started","payload":{"ride_id":2,"name":"Commute",
            "start_time":"2025-06-01T08:00:00Z",
            "initial_position":{"latitude":1.0,"longitude":2.0,"timestamp":"2025-06-01T08:00:00Z"}}}"#,
        )
        .unwrap();
        match started {
            DecodedEvent::RideStarted { ride, .. } => {
                assert_eq!(ride.name, "Commute");
                assert!(ride.end_time.is_none());
            }
            other => panic!("expected RideStarted, got {other:?}"),
        }

        let added = decode(
            r#"{"type":"ride_position_added","payload":{"ride_id":2,
            "position":{"latitude":1.0,"longitude":2.0,"timestamp":"2025-06-01T08:00:01Z"}}}"#,
        )
        .unwrap();
        assert_eq!(added.kind(), Some(EventKind::RidePositionUpdate));

        let ended = decode(
            r#"{"type":"ride_ended","payload":{"ride_id":2,"end_time":"2025-06-01T09:00:00Z"}}"#,
        )
        .unwrap();
        assert_eq!(ended.ride_id(), Some(2));
    }

    #[test]
    fn unknown_type_is_unrecognized() {
        let event = decode(r#"{"type":"lock_status","payload":{"status":"LOCKED"}}"#).unwrap();
        assert_eq!(
            event,
            DecodedEvent::Unrecognized {
                kind: "lock_status".into()
            }
        );
        assert!(!event.is_live_signal());
    }

    #[test]
    fn invalid_json_is_a_syntax_error() {
        assert!(matches!(decode("not json"), Err(DecodeError::Syntax(_))));
        assert!(matches!(decode(""), Err(DecodeError::Syntax(_))));
    }

    #[test]
    fn missing_or_non_string_type_is_rejected() {
        assert!(matches!(
            decode(r#"{"latitude": 1.0, "longitude": 2.0}"#),
            Err(DecodeError::MissingType)
        ));
        assert!(matches!(
            decode(r#"{"type": 7, "payload": {}}"#),
            Err(DecodeError::MissingType)
        ));
        assert!(matches!(decode("[1,2,3]"), Err(DecodeError::MissingType)));
    }

    #[test]
    fn known_type_with_bad_payload_is_a_payload_error() {
        let err = decode(r#"{"type":"RIDE_ENDED","payload":{"ride_id":"five"}}"#).unwrap_err();
        match err {
            DecodeError::Payload { kind, .. } => assert_eq!(kind, EventKind::RideEnded),
            other => panic!("expected Payload error, got {other:?}"),
        }

        let err = decode(r#"{"type":"current_location"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Payload { .. }));
    }
}
