//! Historical Fallback Fetcher.
//!
//! Until the live stream produces a location or a ride, the most recent ride
//! from history stands in for it. The fetch happens at most once per gap and
//! is only retried on request; once live data arrives the fallback is
//! superseded for the rest of the session.
//!
//! ```text
//!   Idle ──begin──▶ InFlight ──ok──▶ Loaded
//!    ▲                  │
//!    └──retry── Failed ◀┘ err
//!
//!   any state ──live signal──▶ Superseded
//! ```

use tracing::{debug, error};

use crate::api::RideApi;
use crate::error::{Result, RideTrackerError};
use crate::protocol::{Position, RideDetail, RideListQuery};
use crate::reducer::RideState;

/// Where the fallback is in its lifecycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum FallbackState {
    /// No fetch has been made for the current gap.
    #[default]
    Idle,
    InFlight,
    /// The fetch finished; `None` means the backend has no rides.
    Loaded(Option<RideDetail>),
    /// The fetch failed. Waits for an explicit retry.
    Failed(String),
    /// Live data arrived; the fallback is no longer consulted.
    Superseded,
}

/// Fallback bookkeeping owned by the reconciler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fallback {
    state: FallbackState,
}

impl Fallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &FallbackState {
        &self.state
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self.state, FallbackState::InFlight)
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self.state, FallbackState::Superseded)
    }

    /// Returns `true` if a fetch should start now: nothing live has been
    /// seen, the reducer has no ride, and no attempt has been made for
    /// this gap.
    pub fn should_fetch(&self, ride: &RideState) -> bool {
        matches!(self.state, FallbackState::Idle)
            && ride.current_ride().is_none()
            && ride.location().latest().is_none()
    }

    /// Move to `InFlight` if a fetch should start. Returns `true` if the
    /// caller must now issue the fetch.
    pub fn begin(&mut self, ride: &RideState) -> bool {
        if !self.should_fetch(ride) {
            return false;
        }
        debug!("starting fallback fetch");
        self.state = FallbackState::InFlight;
        true
    }

    /// Settle the in-flight fetch.
    ///
    /// Returns `false` (and changes nothing) if no fetch is in flight, which
    /// is the case once the fallback has been superseded.
    pub fn complete(&mut self, result: Result<Option<RideDetail>>) -> bool {
        if !self.is_in_flight() {
            debug!(state = ?self.state, "dropping fallback result");
            return false;
        }
        self.state = match result {
            Ok(detail) => {
                debug!(ride_id = ?detail.as_ref().map(RideDetail::id), "fallback loaded");
                FallbackState::Loaded(detail)
            }
            Err(e) => {
                error!("fallback fetch failed: {e}");
                FallbackState::Failed(e.to_string())
            }
        };
        true
    }

    /// Stop consulting the fallback. Returns `true` on the first call.
    pub fn supersede(&mut self) -> bool {
        if self.is_superseded() {
            return false;
        }
        debug!(previous = ?self.state, "fallback superseded by live data");
        self.state = FallbackState::Superseded;
        true
    }

    /// Re-arm after a failure. Returns `true` if the state was `Failed`.
    pub fn retry(&mut self) -> bool {
        if !matches!(self.state, FallbackState::Failed(_)) {
            return false;
        }
        self.state = FallbackState::Idle;
        true
    }

    /// The loaded fallback ride, unless superseded.
    pub fn detail(&self) -> Option<&RideDetail> {
        match &self.state {
            FallbackState::Loaded(detail) => detail.as_ref(),
            _ => None,
        }
    }

    /// The last position of the loaded fallback ride.
    pub fn last_position(&self) -> Option<&Position> {
        self.detail().and_then(RideDetail::last_position)
    }

    pub fn error(&self) -> Option<&str> {
        match &self.state {
            FallbackState::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Fetch the most recent ride with its positions.
///
/// Returns `Ok(None)` if the backend has no rides, or if the latest listed
/// ride disappeared before its detail could be read.
///
/// # Errors
///
/// Propagates any other error from `api`.
pub async fn fetch_latest_ride(api: &dyn RideApi) -> Result<Option<RideDetail>> {
    let rides = api.list_rides(&RideListQuery::latest()).await?;
    let Some(latest) = rides.first() else {
        debug!("no rides in history");
        return Ok(None);
    };

    match api.ride_detail(latest.id).await {
        Ok(detail) => Ok(Some(detail)),
        Err(RideTrackerError::RideNotFound { ride_id }) => {
            debug!(ride_id, "latest ride vanished before detail fetch");
            Ok(None)
        }
        Err(e) => Err(e),
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
    use crate::decoder::DecodedEvent;
    use crate::protocol::{RideId, RideSummary};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Mutex;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn detail(id: RideId) -> RideDetail {
        RideDetail::new(
            RideSummary::new(id, "r", at(0)),
            vec![Position::new(1.0, 1.0, at(1)), Position::new(2.0, 2.0, at(2))],
        )
    }

    #[test]
    fn begins_only_from_idle_with_nothing_live() {
        let mut fallback = Fallback::new();
        let mut ride = RideState::new();
        assert!(fallback.begin(&ride));
        assert!(!fallback.begin(&ride));

        let mut other = Fallback::new();
        ride.apply(&DecodedEvent::CurrentLocation(Position::new(0.0, 0.0, at(0))));
        assert!(!other.begin(&ride));
    }

    #[test]
    fn completion_loads_detail() {
        let mut fallback = Fallback::new();
        fallback.begin(&RideState::new());
        assert!(fallback.complete(Ok(Some(detail(1)))));
        assert_eq!(fallback.detail().unwrap().id(), 1);
        assert_eq!(fallback.last_position().unwrap().timestamp, at(2));
    }

    #[test]
    fn completion_after_supersede_is_dropped() {
        let mut fallback = Fallback::new();
        fallback.begin(&RideState::new());
        assert!(fallback.supersede());
        assert!(!fallback.complete(Ok(Some(detail(1)))));
        assert!(fallback.detail().is_none());
        assert!(!fallback.supersede());
    }

    #[test]
    fn failure_waits_for_retry() {
        let mut fallback = Fallback::new();
        let ride = RideState::new();
        fallback.begin(&ride);
        fallback.complete(Err(RideTrackerError::Timeout));
        assert!(fallback.error().is_some());
        assert!(!fallback.begin(&ride));

        assert!(fallback.retry());
        assert!(fallback.begin(&ride));
        assert!(!fallback.retry());
    }

    struct ScriptedApi {
        rides: Vec<RideSummary>,
        detail: Mutex<Option<Result<RideDetail>>>,
    }

    #[async_trait]
    impl RideApi for ScriptedApi {
        async fn list_rides(&self, query: &RideListQuery) -> Result<Vec<RideSummary>> {
            assert_eq!(query, &RideListQuery::latest());
            Ok(self.rides.clone())
        }

        async fn ride_detail(&self, _ride_id: RideId) -> Result<RideDetail> {
            self.detail.lock().unwrap().take().unwrap()
        }
    }

    #[tokio::test]
    async fn fetch_latest_reads_first_listed_ride() {
        let api = ScriptedApi {
            rides: vec![RideSummary::new(1, "r", at(0))],
            detail: Mutex::new(Some(Ok(detail(1)))),
        };
        let found = fetch_latest_ride(&api).await.unwrap().unwrap();
        assert_eq!(found.id(), 1);
        assert_eq!(found.positions.len(), 2);
    }

    #[tokio::test]
    async fn fetch_latest_with_no_history_is_none() {
        let api = ScriptedApi {
            rides: vec![],
            detail: Mutex::new(None),
        };
        assert!(fetch_latest_ride(&api).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fetch_latest_propagates_detail_errors() {
        let api = ScriptedApi {
            rides: vec![RideSummary::new(1, "r", at(0))],
            detail: Mutex::new(Some(Err(RideTrackerError::Http {
                status: 500,
                body: "boom".into(),
            }))),
        };
        assert!(matches!(
            fetch_latest_ride(&api).await,
            Err(RideTrackerError::Http { status: 500, .. })
        ));
    }
}
