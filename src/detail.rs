//! Ride Detail Tracker.
//!
//! Follows one ride chosen by the caller: its fetched detail is kept current
//! by live position and end events for the same id.

use tracing::{debug, error};

use crate::decoder::DecodedEvent;
use crate::error::Result;
use crate::protocol::{RideDetail, RideId};

/// How far the focused ride's detail has come.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum DetailState {
    /// Nothing focused.
    #[default]
    Unfocused,
    Loading,
    Loaded(RideDetail),
    Failed(String),
}

/// The focused ride and its detail.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailTracker {
    focus: Option<RideId>,
    state: DetailState,
}

impl DetailTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn focus(&self) -> Option<RideId> {
        self.focus
    }

    pub fn state(&self) -> &DetailState {
        &self.state
    }

    pub fn detail(&self) -> Option<&RideDetail> {
        match &self.state {
            DetailState::Loaded(detail) => Some(detail),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, DetailState::Loading)
    }

    /// Focus `ride_id`, or clear the focus with `None`.
    ///
    /// Returns `true` if a fetch for the new focus must be issued. Focusing
    /// the already-focused ride keeps its state and needs no fetch unless
    /// the last attempt failed.
    pub fn set_focus(&mut self, ride_id: Option<RideId>) -> bool {
        if ride_id.is_some() && ride_id == self.focus && !matches!(self.state, DetailState::Failed(_)) {
            return false;
        }
        self.focus = ride_id;
        match ride_id {
            Some(id) => {
                debug!(ride_id = id, "focusing ride");
                self.state = DetailState::Loading;
                true
            }
            None => {
                self.state = DetailState::Unfocused;
                false
            }
        }
    }

    /// Settle a detail fetch for `ride_id`.
    ///
    /// Returns `false` if `ride_id` is no longer the focused ride.
    pub fn complete(&mut self, ride_id: RideId, result: Result<RideDetail>) -> bool {
        if self.focus != Some(ride_id) || !self.is_loading() {
            debug!(ride_id, focus = ?self.focus, "dropping detail for unfocused ride");
            return false;
        }
        self.state = match result {
            Ok(detail) => DetailState::Loaded(detail),
            Err(e) => {
                error!(ride_id, "ride detail fetch failed: {e}");
                DetailState::Failed(e.to_string())
            }
        };
        true
    }

    /// Apply a live event to the loaded detail.
    ///
    /// Returns `true` if the detail changed.
    pub fn apply(&mut self, event: &DecodedEvent) -> bool {
        let DetailState::Loaded(detail) = &mut self.state else {
            return false;
        };
        match event {
            DecodedEvent::RidePositionUpdate { ride_id, position } if *ride_id == detail.id() => {
                detail.positions.push(position.clone());
                true
            }
            DecodedEvent::RideEnded { ride_id, end_time } if *ride_id == detail.id() => {
                detail.summary.mark_ended(*end_time)
            }
            _ => false,
        }
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
    use crate::error::RideTrackerError;
    use crate::protocol::{Position, RideSummary};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn detail(id: RideId) -> RideDetail {
        RideDetail::new(
            RideSummary::new(id, "r", at(0)),
            vec![Position::new(0.0, 0.0, at(1))],
        )
    }

    fn loaded(id: RideId) -> DetailTracker {
        let mut tracker = DetailTracker::new();
        assert!(tracker.set_focus(Some(id)));
        assert!(tracker.complete(id, Ok(detail(id))));
        tracker
    }

    #[test]
    fn live_events_extend_focused_detail() {
        let mut tracker = loaded(3);
        assert!(tracker.apply(&DecodedEvent::RidePositionUpdate {
            ride_id: 3,
            position: Position::new(1.0, 1.0, at(2)),
        }));
        assert!(tracker.apply(&DecodedEvent::RideEnded {
            ride_id: 3,
            end_time: at(10),
        }));
        assert!(!tracker.apply(&DecodedEvent::RideEnded {
            ride_id: 3,
            end_time: at(20),
        }));

        let detail = tracker.detail().unwrap();
        assert_eq!(detail.positions.len(), 2);
        assert_eq!(detail.summary.end_time, Some(at(10)));
    }

    #[test]
    fn events_for_other_rides_are_ignored() {
        let mut tracker = loaded(3);
        assert!(!tracker.apply(&DecodedEvent::RidePositionUpdate {
            ride_id: 4,
            position: Position::new(1.0, 1.0, at(2)),
        }));
        assert_eq!(tracker.detail().unwrap().positions.len(), 1);
    }

    #[test]
    fn completion_for_previous_focus_is_dropped() {
        let mut tracker = DetailTracker::new();
        tracker.set_focus(Some(1));
        tracker.set_focus(Some(2));
        assert!(!tracker.complete(1, Ok(detail(1))));
        assert!(tracker.is_loading());
        assert!(tracker.complete(2, Ok(detail(2))));
        assert_eq!(tracker.detail().unwrap().id(), 2);
    }

    #[test]
    fn clearing_focus_drops_detail() {
        let mut tracker = loaded(3);
        assert!(!tracker.set_focus(None));
        assert!(tracker.detail().is_none());
        assert_eq!(tracker.state(), &DetailState::Unfocused);
        assert!(!tracker.complete(3, Ok(detail(3))));
    }

    #[test]
    fn refocus_same_ride_only_refetches_after_failure() {
        let mut tracker = loaded(3);
        assert!(!tracker.set_focus(Some(3)));

        let mut failed = DetailTracker::new();
        failed.set_focus(Some(5));
        failed.complete(5, Err(RideTrackerError::RideNotFound { ride_id: 5 }));
        assert!(matches!(failed.state(), DetailState::Failed(_)));
        assert!(failed.set_focus(Some(5)));
    }
}
