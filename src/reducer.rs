//! Ride State Reducer.
//!
//! Folds decoded events, one at a time and in arrival order, into a
//! [`RideState`]: the current ride, its accepted positions, and a
//! location-only view used while no ride is active.
//!
//! | Event | Condition | Effect |
//! |---|---|---|
//! | `CurrentLocation` | no current ride | latest location updated, trail extended |
//! | `CurrentLocation` | current ride | latest location updated only |
//! | `RideStarted` | always | ride and positions replaced together, trail reset |
//! | `RidePositionUpdate` | id matches current ride | position appended |
//! | `RideEnded` | id matches current ride | end time recorded once |
//! | anything else | | stale, ignored |

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::decoder::DecodedEvent;
use crate::protocol::{Position, RideId, RideStats, RideSummary};

/// Positions reported while no ride is in progress.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationView {
    latest: Option<Position>,
    trail: Vec<Position>,
}

impl LocationView {
    /// The most recent `current_location` fix.
    pub fn latest(&self) -> Option<&Position> {
        self.latest.as_ref()
    }

    /// Ordered location fixes, oldest first.
    pub fn trail(&self) -> &[Position] {
        &self.trail
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_none() && self.trail.is_empty()
    }
}

/// What applying one event did to the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Only the location-only view changed.
    LocationUpdated,
    /// A new current ride replaced `replaced` (if any).
    RideStarted {
        ride_id: RideId,
        replaced: Option<RideId>,
    },
    PositionAppended { ride_id: RideId },
    RideEnded { ride_id: RideId },
    /// The ride had already ended; nothing changed.
    AlreadyEnded { ride_id: RideId },
    /// The event refers to a ride that is not current.
    Stale {
        ride_id: RideId,
        current: Option<RideId>,
    },
    /// The event carries nothing for the reducer.
    Ignored,
}

impl Transition {
    /// Returns `true` if the state was modified.
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Self::LocationUpdated
                | Self::RideStarted { .. }
                | Self::PositionAppended { .. }
                | Self::RideEnded { .. }
        )
    }
}

/// The reducer's state.
///
/// `ride_positions` belongs to `current_ride`; the two are only ever
/// replaced together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RideState {
    current_ride: Option<RideSummary>,
    ride_positions: Vec<Position>,
    location: LocationView,
}

impl RideState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_ride(&self) -> Option<&RideSummary> {
        self.current_ride.as_ref()
    }

    pub fn current_ride_id(&self) -> Option<RideId> {
        self.current_ride.as_ref().map(|r| r.id)
    }

    /// Positions accepted for the current ride, oldest first. Empty when
    /// there is no current ride.
    pub fn ride_positions(&self) -> &[Position] {
        &self.ride_positions
    }

    pub fn location(&self) -> &LocationView {
        &self.location
    }

    /// Latest accepted position of the current ride.
    pub fn last_ride_position(&self) -> Option<&Position> {
        self.current_ride.as_ref().and(self.ride_positions.last())
    }

    /// See [`RideSummary::effective_end_time`].
    pub fn effective_end_time(&self) -> Option<DateTime<Utc>> {
        self.current_ride
            .as_ref()
            .and_then(|ride| ride.effective_end_time(&self.ride_positions))
    }

    pub fn stats(&self) -> Option<RideStats> {
        self.current_ride
            .as_ref()
            .map(|ride| RideStats::compute(ride, &self.ride_positions))
    }

    /// Apply one decoded event.
    pub fn apply(&mut self, event: &DecodedEvent) -> Transition {
        match event {
            DecodedEvent::CurrentLocation(position) => {
                if self.current_ride.is_none() {
                    self.location.trail.push(position.clone());
                }
                self.location.latest = Some(position.clone());
                Transition::LocationUpdated
            }

            DecodedEvent::RideStarted {
                ride,
                initial_position,
            } => {
                let replaced = self.current_ride_id();
                debug!(ride_id = ride.id, ?replaced, "ride started");
                self.current_ride = Some(ride.clone());
                self.ride_positions = vec![initial_position.clone()];
                self.location.trail = vec![initial_position.clone()];
                Transition::RideStarted {
                    ride_id: ride.id,
                    replaced,
                }
            }

            DecodedEvent::RidePositionUpdate { ride_id, position } => {
                let current = self.current_ride_id();
                if current != Some(*ride_id) {
                    return self.stale(*ride_id, current);
                }
                self.ride_positions.push(position.clone());
                Transition::PositionAppended { ride_id: *ride_id }
            }

            DecodedEvent::RideEnded { ride_id, end_time } => {
                let current = self.current_ride_id();
                if current != Some(*ride_id) {
                    return self.stale(*ride_id, current);
                }
                if self.adopt_end_time(*ride_id, *end_time) {
                    debug!(ride_id, %end_time, "ride ended");
                    Transition::RideEnded { ride_id: *ride_id }
                } else {
                    debug!(ride_id, "ride already ended");
                    Transition::AlreadyEnded { ride_id: *ride_id }
                }
            }

            DecodedEvent::Unrecognized { .. } => Transition::Ignored,
        }
    }

    /// Record an end time learned from another source for the current ride.
    ///
    /// Returns `true` if the current ride is `ride_id` and had no end time.
    pub fn adopt_end_time(&mut self, ride_id: RideId, end_time: DateTime<Utc>) -> bool {
        match self.current_ride.as_mut() {
            Some(ride) if ride.id == ride_id => ride.mark_ended(end_time),
            _ => false,
        }
    }

    fn stale(&self, ride_id: RideId, current: Option<RideId>) -> Transition {
        debug!(ride_id, ?current, "ignoring event for a ride that is not current");
        Transition::Stale { ride_id, current }
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
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn pos(secs: i64) -> Position {
        Position::new(37.0 + secs as f64 * 1e-4, -122.0, at(secs))
    }

    fn started(id: RideId, secs: i64) -> DecodedEvent {
        DecodedEvent::RideStarted {
            ride: RideSummary::new(id, format!("Ride {id}"), at(secs)),
            initial_position: pos(secs),
        }
    }

    fn update(id: RideId, secs: i64) -> DecodedEvent {
        DecodedEvent::RidePositionUpdate {
            ride_id: id,
            position: pos(secs),
        }
    }

    fn ended(id: RideId, secs: i64) -> DecodedEvent {
        DecodedEvent::RideEnded {
            ride_id: id,
            end_time: at(secs),
        }
    }

    #[test]
    fn ride_lifecycle() {
        let mut state = RideState::new();
        state.apply(&started(5, 0));
        state.apply(&update(5, 10));
        state.apply(&update(5, 20));
        assert_eq!(state.apply(&ended(5, 30)), Transition::RideEnded { ride_id: 5 });

        let ride = state.current_ride().unwrap();
        assert_eq!(ride.id, 5);
        assert_eq!(ride.end_time, Some(at(30)));
        assert_eq!(state.ride_positions(), &[pos(0), pos(10), pos(20)]);
    }

    #[test]
    fn stale_update_does_not_touch_positions() {
        let mut state = RideState::new();
        state.apply(&started(8, 0));
        let before = state.ride_positions().to_vec();

        assert_eq!(
            state.apply(&update(7, 5)),
            Transition::Stale {
                ride_id: 7,
                current: Some(8)
            }
        );
        assert_eq!(state.ride_positions(), before.as_slice());
    }

    #[test]
    fn update_without_current_ride_is_stale() {
        let mut state = RideState::new();
        let t = state.apply(&update(3, 5));
        assert!(!t.is_change());
        assert!(state.ride_positions().is_empty());
    }

    #[test]
    fn ride_started_replaces_ride_and_positions_together() {
        let mut state = RideState::new();
        state.apply(&started(4, 0));
        state.apply(&update(4, 10));
        let t = state.apply(&started(5, 100));

        assert_eq!(
            t,
            Transition::RideStarted {
                ride_id: 5,
                replaced: Some(4)
            }
        );
        assert_eq!(state.current_ride_id(), Some(5));
        assert_eq!(state.ride_positions(), &[pos(100)]);
    }

    #[test]
    fn ended_twice_keeps_first_end_time() {
        let mut state = RideState::new();
        state.apply(&started(5, 0));
        state.apply(&ended(5, 30));
        assert_eq!(
            state.apply(&ended(5, 90)),
            Transition::AlreadyEnded { ride_id: 5 }
        );
        assert_eq!(state.current_ride().unwrap().end_time, Some(at(30)));
    }

    #[test]
    fn ended_for_other_ride_is_ignored() {
        let mut state = RideState::new();
        state.apply(&started(5, 0));
        assert!(!state.apply(&ended(4, 30)).is_change());
        assert!(!state.current_ride().unwrap().is_ended());
    }

    #[test]
    fn ended_ride_stays_current_and_accepts_positions() {
        let mut state = RideState::new();
        state.apply(&started(5, 0));
        state.apply(&ended(5, 30));
        state.apply(&update(5, 40));
        assert_eq!(state.current_ride_id(), Some(5));
        assert_eq!(state.ride_positions().len(), 2);
    }

    #[test]
    fn current_location_without_ride_builds_trail() {
        let mut state = RideState::new();
        state.apply(&DecodedEvent::CurrentLocation(pos(1)));
        state.apply(&DecodedEvent::CurrentLocation(pos(2)));

        assert_eq!(state.location().trail(), &[pos(1), pos(2)]);
        assert_eq!(state.location().latest(), Some(&pos(2)));
        assert!(state.ride_positions().is_empty());
    }

    #[test]
    fn current_location_during_ride_is_informational() {
        let mut state = RideState::new();
        state.apply(&started(5, 0));
        state.apply(&DecodedEvent::CurrentLocation(pos(7)));

        assert_eq!(state.ride_positions(), &[pos(0)]);
        assert_eq!(state.location().trail(), &[pos(0)]);
        assert_eq!(state.location().latest(), Some(&pos(7)));
    }

    #[test]
    fn ride_started_resets_trail_to_initial_position() {
        let mut state = RideState::new();
        state.apply(&DecodedEvent::CurrentLocation(pos(1)));
        state.apply(&DecodedEvent::CurrentLocation(pos(2)));
        state.apply(&started(5, 3));
        assert_eq!(state.location().trail(), &[pos(3)]);
    }

    #[test]
    fn position_count_tracks_accepted_events() {
        let events = vec![
            started(1, 0),
            update(1, 1),
            update(2, 2),
            ended(1, 3),
            update(1, 4),
            DecodedEvent::CurrentLocation(pos(5)),
            started(2, 6),
            update(1, 7),
            update(2, 8),
            DecodedEvent::Unrecognized {
                kind: "lock_status".into(),
            },
        ];

        let mut state = RideState::new();
        let mut expected = 0usize;
        let mut previous: Option<RideId> = None;
        for event in &events {
            let before = state.ride_positions().len();
            match state.apply(event) {
                Transition::RideStarted { ride_id, .. } => {
                    expected = 1;
                    previous = Some(ride_id);
                }
                Transition::PositionAppended { ride_id } => {
                    assert_eq!(Some(ride_id), previous);
                    expected += 1;
                    assert!(state.ride_positions().len() > before);
                }
                _ => assert_eq!(state.ride_positions().len(), before),
            }
            assert_eq!(state.ride_positions().len(), expected);
        }
        assert_eq!(state.current_ride_id(), Some(2));
        assert_eq!(state.ride_positions(), &[pos(6), pos(8)]);
    }

    #[test]
    fn effective_end_time_uses_latest_position_until_ended() {
        let mut state = RideState::new();
        assert!(state.effective_end_time().is_none());

        state.apply(&started(5, 0));
        state.apply(&update(5, 45));
        assert_eq!(state.effective_end_time(), Some(at(45)));

        state.apply(&ended(5, 60));
        assert_eq!(state.effective_end_time(), Some(at(60)));
        assert_eq!(
            state.stats().unwrap().duration,
            Some(chrono::Duration::seconds(60))
        );
    }

    #[test]
    fn adopt_end_time_only_for_current_ride() {
        let mut state = RideState::new();
        state.apply(&started(5, 0));
        assert!(!state.adopt_end_time(4, at(10)));
        assert!(state.adopt_end_time(5, at(10)));
        assert!(!state.adopt_end_time(5, at(20)));
        assert_eq!(state.current_ride().unwrap().end_time, Some(at(10)));
    }
}
