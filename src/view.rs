//! The aggregated ride view presented to consumers.
//!
//! [`RideView`] is the snapshot the reconciler publishes after every change.
//! Display helpers apply the precedence between sources:
//!
//! 1. the live current ride
//! 2. the live location trail
//! 3. the fallback ride from history
//! 4. nothing

use crate::channel::ConnectionStatus;
use crate::detail::DetailTracker;
use crate::fallback::Fallback;
use crate::protocol::{Position, RideListQuery, RideSummary};
use crate::reducer::RideState;
use crate::rides::RideList;

/// Which source the displayed ride or location comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplaySource {
    LiveRide,
    LiveLocation,
    Fallback,
    Nothing,
}

/// Everything the reconciler knows, as of the last processed input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RideView {
    pub status: ConnectionStatus,
    pub ride: RideState,
    pub fallback: Fallback,
    pub rides: RideList,
    pub detail: DetailTracker,
}

impl RideView {
    pub fn new(initial_query: RideListQuery) -> Self {
        Self {
            rides: RideList::new(initial_query),
            ..Self::default()
        }
    }

    /// The source that currently wins, by precedence.
    pub fn display_source(&self) -> DisplaySource {
        if self.ride.current_ride().is_some() {
            DisplaySource::LiveRide
        } else if self.ride.location().latest().is_some() {
            DisplaySource::LiveLocation
        } else if self.fallback.detail().is_some() {
            DisplaySource::Fallback
        } else {
            DisplaySource::Nothing
        }
    }

    /// The ride being displayed, live or fallback.
    pub fn displayed_ride(&self) -> Option<&RideSummary> {
        match self.display_source() {
            DisplaySource::LiveRide => self.ride.current_ride(),
            DisplaySource::Fallback => self.fallback.detail().map(|d| &d.summary),
            DisplaySource::LiveLocation | DisplaySource::Nothing => None,
        }
    }

    /// The path being displayed, oldest first.
    pub fn displayed_positions(&self) -> &[Position] {
        match self.display_source() {
            DisplaySource::LiveRide => self.ride.ride_positions(),
            DisplaySource::LiveLocation => self.ride.location().trail(),
            DisplaySource::Fallback => self
                .fallback
                .detail()
                .map(|d| d.positions.as_slice())
                .unwrap_or_default(),
            DisplaySource::Nothing => &[],
        }
    }

    /// The point to mark as "here now".
    pub fn latest_point(&self) -> Option<&Position> {
        match self.display_source() {
            DisplaySource::LiveRide => self.ride.last_ride_position(),
            DisplaySource::LiveLocation => self.ride.location().latest(),
            DisplaySource::Fallback => self.fallback.last_position(),
            DisplaySource::Nothing => None,
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
    clippy::indexing_slicing,
    clippy::float_cmp
)]
mod tests {
    use super::*;
    use crate::decoder::DecodedEvent;
    use crate::protocol::RideDetail;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn with_fallback() -> RideView {
        let mut view = RideView::default();
        assert!(view.fallback.begin(&view.ride));
        view.fallback.complete(Ok(Some(RideDetail::new(
            RideSummary::new(1, "history", at(0)),
            vec![Position::new(1.0, 1.0, at(1)), Position::new(2.0, 2.0, at(2))],
        ))));
        view
    }

    #[test]
    fn empty_view_shows_nothing() {
        let view = RideView::default();
        assert_eq!(view.display_source(), DisplaySource::Nothing);
        assert!(view.displayed_positions().is_empty());
        assert!(view.latest_point().is_none());
    }

    #[test]
    fn fallback_shows_its_last_position() {
        let view = with_fallback();
        assert_eq!(view.display_source(), DisplaySource::Fallback);
        assert_eq!(view.displayed_ride().unwrap().id, 1);
        assert_eq!(view.latest_point().unwrap().timestamp, at(2));
    }

    #[test]
    fn live_location_beats_fallback() {
        let mut view = with_fallback();
        view.ride
            .apply(&DecodedEvent::CurrentLocation(Position::new(9.0, 9.0, at(9))));
        assert_eq!(view.display_source(), DisplaySource::LiveLocation);
        assert!(view.displayed_ride().is_none());
        assert_eq!(view.latest_point().unwrap().latitude, 9.0_f64);
    }

    #[test]
    fn live_ride_beats_everything() {
        let mut view = with_fallback();
        view.ride
            .apply(&DecodedEvent::CurrentLocation(Position::new(9.0, 9.0, at(9))));
        view.ride.apply(&DecodedEvent::RideStarted {
            ride: RideSummary::new(5, "live", at(10)),
            initial_position: Position::new(5.0, 5.0, at(10)),
        });
        assert_eq!(view.display_source(), DisplaySource::LiveRide);
        assert_eq!(view.displayed_ride().unwrap().id, 5);
        assert_eq!(view.displayed_positions().len(), 1);
    }
}
