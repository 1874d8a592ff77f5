//! Ride List Synchronizer.
//!
//! Holds one page of ride history and patches it from live events so it
//! agrees with the reducer without re-fetching. An explicit re-query
//! replaces the page wholesale.

use tracing::{debug, error};

use crate::decoder::DecodedEvent;
use crate::error::RideTrackerError;
use crate::protocol::{RideId, RideListQuery, RideSummary};

/// What a live event did to the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListChange {
    Prepended(RideId),
    Ended(RideId),
    /// The event is about a ride that is not on this page, or is already
    /// reflected in it.
    Unchanged,
}

impl ListChange {
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// A page of rides, most recent first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RideList {
    query: RideListQuery,
    rides: Vec<RideSummary>,
    in_flight: Option<RideListQuery>,
    last_error: Option<String>,
}

impl RideList {
    pub fn new(query: RideListQuery) -> Self {
        Self {
            query,
            ..Self::default()
        }
    }

    /// The query the current page answers.
    pub fn query(&self) -> &RideListQuery {
        &self.query
    }

    pub fn rides(&self) -> &[RideSummary] {
        &self.rides
    }

    pub fn get(&self, ride_id: RideId) -> Option<&RideSummary> {
        self.rides.iter().find(|r| r.id == ride_id)
    }

    /// Returns `true` while a query is outstanding.
    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    /// The query currently being fetched, if any.
    pub fn pending_query(&self) -> Option<&RideListQuery> {
        self.in_flight.as_ref()
    }

    /// Why the most recent query failed, cleared by the next success.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Mark `query` as in flight.
    ///
    /// Returns `false` without changing anything if another query is
    /// already outstanding.
    pub fn begin_query(&mut self, query: RideListQuery) -> bool {
        if self.in_flight.is_some() {
            return false;
        }
        self.in_flight = Some(query);
        true
    }

    /// Settle the outstanding query.
    ///
    /// On success the page is replaced by `result`. On failure the previous
    /// page is kept and the error recorded. A result for a query that is not
    /// outstanding is ignored and `false` is returned.
    pub fn complete_query(
        &mut self,
        query: &RideListQuery,
        result: Result<Vec<RideSummary>, RideTrackerError>,
    ) -> bool {
        if self.in_flight.as_ref() != Some(query) {
            debug!(?query, "ignoring result for a ride list query that is not pending");
            return false;
        }
        self.in_flight = None;

        match result {
            Ok(rides) => {
                debug!(page = query.page, count = rides.len(), "ride list loaded");
                self.query = query.clone();
                self.rides = rides;
                self.last_error = None;
            }
            Err(e) => {
                error!(page = query.page, "ride list query failed: {e}");
                self.last_error = Some(e.to_string());
            }
        }
        true
    }

    /// Apply a live event.
    pub fn apply(&mut self, event: &DecodedEvent) -> ListChange {
        match event {
            DecodedEvent::RideStarted { ride, .. } => {
                if self.get(ride.id).is_some() {
                    debug!(ride_id = ride.id, "started ride already listed");
                    return ListChange::Unchanged;
                }
                self.rides.insert(0, ride.clone());
                ListChange::Prepended(ride.id)
            }
            DecodedEvent::RideEnded { ride_id, end_time } => {
                if self.mark_ended(*ride_id, *end_time) {
                    ListChange::Ended(*ride_id)
                } else {
                    ListChange::Unchanged
                }
            }
            DecodedEvent::CurrentLocation(_)
            | DecodedEvent::RidePositionUpdate { .. }
            | DecodedEvent::Unrecognized { .. } => ListChange::Unchanged,
        }
    }

    /// Record an end time for a listed ride.
    ///
    /// Returns `true` if the ride is on this page and had no end time.
    pub fn mark_ended(&mut self, ride_id: RideId, end_time: chrono::DateTime<chrono::Utc>) -> bool {
        match self.rides.iter_mut().find(|r| r.id == ride_id) {
            Some(ride) => ride.mark_ended(end_time),
            None => {
                debug!(ride_id, "ended ride not on current page");
                false
            }
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
    use crate::protocol::Position;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn summary(id: RideId) -> RideSummary {
        RideSummary::new(id, format!("Ride {id}"), at(id * 100))
    }

    fn loaded(ids: &[RideId]) -> RideList {
        let mut list = RideList::new(RideListQuery::default());
        let query = RideListQuery::default();
        assert!(list.begin_query(query.clone()));
        list.complete_query(&query, Ok(ids.iter().copied().map(summary).collect()));
        list
    }

    fn ids(list: &RideList) -> Vec<RideId> {
        list.rides().iter().map(|r| r.id).collect()
    }

    #[test]
    fn ride_started_is_prepended() {
        let mut list = loaded(&[3, 2, 1]);
        let event = DecodedEvent::RideStarted {
            ride: summary(4),
            initial_position: Position::new(0.0, 0.0, at(400)),
        };
        assert_eq!(list.apply(&event), ListChange::Prepended(4));
        assert_eq!(ids(&list), vec![4, 3, 2, 1]);
    }

    #[test]
    fn ride_started_for_listed_ride_is_not_duplicated() {
        let mut list = loaded(&[3, 2]);
        let event = DecodedEvent::RideStarted {
            ride: summary(3),
            initial_position: Position::new(0.0, 0.0, at(300)),
        };
        assert_eq!(list.apply(&event), ListChange::Unchanged);
        assert_eq!(ids(&list), vec![3, 2]);
    }

    #[test]
    fn ride_ended_annotates_listed_ride_once() {
        let mut list = loaded(&[3, 2]);
        let end = DecodedEvent::RideEnded {
            ride_id: 2,
            end_time: at(250),
        };
        assert_eq!(list.apply(&end), ListChange::Ended(2));
        let again = DecodedEvent::RideEnded {
            ride_id: 2,
            end_time: at(999),
        };
        assert_eq!(list.apply(&again), ListChange::Unchanged);
        assert_eq!(list.get(2).unwrap().end_time, Some(at(250)));
    }

    #[test]
    fn ride_ended_off_page_is_dropped() {
        let mut list = loaded(&[3, 2]);
        let end = DecodedEvent::RideEnded {
            ride_id: 9,
            end_time: at(950),
        };
        assert_eq!(list.apply(&end), ListChange::Unchanged);
        assert_eq!(ids(&list), vec![3, 2]);
    }

    #[test]
    fn requery_replaces_live_patches() {
        let mut list = loaded(&[2, 1]);
        list.apply(&DecodedEvent::RideStarted {
            ride: summary(3),
            initial_position: Position::new(0.0, 0.0, at(300)),
        });

        let next = RideListQuery::new(2, 2);
        assert!(list.begin_query(next.clone()));
        assert!(list.complete_query(&next, Ok(vec![summary(8), summary(7)])));
        assert_eq!(ids(&list), vec![8, 7]);
        assert_eq!(list.query(), &next);
    }

    #[test]
    fn second_query_is_rejected_while_one_is_pending() {
        let mut list = RideList::new(RideListQuery::default());
        assert!(list.begin_query(RideListQuery::new(1, 10)));
        assert!(!list.begin_query(RideListQuery::new(2, 10)));
        assert_eq!(list.pending_query(), Some(&RideListQuery::new(1, 10)));
    }

    #[test]
    fn failed_query_keeps_previous_page() {
        let mut list = loaded(&[2, 1]);
        let next = RideListQuery::new(2, 50);
        list.begin_query(next.clone());
        list.complete_query(&next, Err(RideTrackerError::Request("connection refused".into())));

        assert_eq!(ids(&list), vec![2, 1]);
        assert_eq!(list.query(), &RideListQuery::default());
        assert!(list.last_error().unwrap().contains("connection refused"));
        assert!(!list.is_loading());
    }

    #[test]
    fn unsolicited_result_is_ignored() {
        let mut list = loaded(&[1]);
        assert!(!list.complete_query(&RideListQuery::new(5, 5), Ok(vec![])));
        assert_eq!(ids(&list), vec![1]);
    }
}
