//! Discriminators for inbound ride tracker frames.
//!
//! The backend has shipped two spellings for the ride lifecycle frames: the
//! original `snake_case` names and the later `SCREAMING_SNAKE_CASE` ones. Both
//! are accepted on input; [`EventKind::as_str`] returns the current spelling.

use std::fmt;

/// The closed set of frame types the decoder understands.
///
/// Any other `type` string is tolerated and reported as
/// [`DecodedEvent::Unrecognized`](crate::decoder::DecodedEvent::Unrecognized).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Live GPS fix, sent for every accepted position whether or not a ride is active.
    CurrentLocation,
    /// A new ride was detected.
    RideStarted,
    /// A position was appended to an ongoing ride.
    RidePositionUpdate,
    /// A ride was closed by the backend.
    RideEnded,
}

impl EventKind {
    /// Every kind, in wire documentation order.
    pub const ALL: [EventKind; 4] = [
        Self::CurrentLocation,
        Self::RideStarted,
        Self::RidePositionUpdate,
        Self::RideEnded,
    ];

    /// Resolve a wire `type` value, accepting both dialects.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "current_location" => Some(Self::CurrentLocation),
            "ride_started" | "RIDE_STARTED" => Some(Self::RideStarted),
            "ride_position_added" | "RIDE_POSITION_UPDATE" => Some(Self::RidePositionUpdate),
            "ride_ended" | "RIDE_ENDED" => Some(Self::RideEnded),
            _ => None,
        }
    }

    /// The spelling the current backend emits.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CurrentLocation => "current_location",
            Self::RideStarted => "RIDE_STARTED",
            Self::RidePositionUpdate => "RIDE_POSITION_UPDATE",
            Self::RideEnded => "RIDE_ENDED",
        }
    }

    /// All accepted spellings for this kind.
    pub fn wire_names(&self) -> &'static [&'static str] {
        match self {
            Self::CurrentLocation => &["current_location"],
            Self::RideStarted => &["ride_started", "RIDE_STARTED"],
            Self::RidePositionUpdate => &["ride_position_added", "RIDE_POSITION_UPDATE"],
            Self::RideEnded => &["ride_ended", "RIDE_ENDED"],
        }
    }

    /// Returns a human-readable description of this frame type.
    pub fn description(&self) -> &'static str {
        match self {
            Self::CurrentLocation => "live location fix",
            Self::RideStarted => "ride started",
            Self::RidePositionUpdate => "ride position update",
            Self::RideEnded => "ride ended",
        }
    }

    /// Whether this kind establishes a live signal for the session.
    ///
    /// Position updates and ride endings only matter relative to a ride the
    /// session already knows about, so they never count on their own.
    pub fn is_live_signal(&self) -> bool {
        matches!(self, Self::CurrentLocation | Self::RideStarted)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
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

    #[test]
    fn every_wire_name_resolves_to_its_kind() {
        for kind in EventKind::ALL {
            for name in kind.wire_names() {
                assert_eq!(EventKind::from_wire(name), Some(kind), "{name}");
            }
        }
    }

    #[test]
    fn as_str_is_one_of_the_wire_names() {
        for kind in EventKind::ALL {
            assert!(kind.wire_names().contains(&kind.as_str()));
        }
    }

    #[test]
    fn unknown_and_case_mismatched_names_are_rejected() {
        assert_eq!(EventKind::from_wire("lock_status"), None);
        assert_eq!(EventKind::from_wire("Ride_Started"), None);
        assert_eq!(EventKind::from_wire("CURRENT_LOCATION"), None);
        assert_eq!(EventKind::from_wire(""), None);
    }

    #[test]
    fn only_location_and_ride_start_are_live_signals() {
        assert!(EventKind::CurrentLocation.is_live_signal());
        assert!(EventKind::RideStarted.is_live_signal());
        assert!(!EventKind::RidePositionUpdate.is_live_signal());
        assert!(!EventKind::RideEnded.is_live_signal());
    }

    #[test]
    fn display_uses_current_spelling() {
        assert_eq!(EventKind::RideEnded.to_string(), "RIDE_ENDED");
        assert_eq!(EventKind::CurrentLocation.to_string(), "current_location");
    }
}
