#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Integration tests for the reconciling session.
//!
//! The backend is played by a [`LiveServer`] for the stream and a
//! [`MockRideApi`] for history, so each test controls exactly when frames
//! and fetch results arrive relative to each other.

mod common;

use std::sync::Arc;
use std::time::Duration;

use b3_ride_tracker::fallback::FallbackState;
use b3_ride_tracker::protocol::RideListQuery;
use b3_ride_tracker::{
    ChannelConfig, ConnectionChannel, ConnectionStatus, DisplaySource, Outbound,
    ReconcilerConfig, RideReconciler, RideTrackerError, RideView,
};
use tokio::sync::watch;

use common::{
    at, current_location_json, live_pair, pos, position_update_json, ride_detail,
    ride_ended_json, ride_started_json, ride_started_legacy_json, wait_for_view, LiveServer,
    MockRideApi,
};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

fn start_session(
    api: Arc<MockRideApi>,
    config: ReconcilerConfig,
) -> (RideReconciler, LiveServer, watch::Receiver<RideView>) {
    let (transport, server) = live_pair();
    let (channel, inbound) =
        ConnectionChannel::open(async move { Ok(transport) }, ChannelConfig::default());
    let session = RideReconciler::start(channel, inbound, api, config);
    let view = session.subscribe();
    (session, server, view)
}

#[allow(clippy::type_complexity)]
fn start_default(
    api: MockRideApi,
) -> (
    RideReconciler,
    LiveServer,
    watch::Receiver<RideView>,
    Arc<MockRideApi>,
) {
    let api = Arc::new(api);
    let (session, server, view) = start_session(Arc::clone(&api), ReconcilerConfig::default());
    (session, server, view, api)
}

fn fallback_settled(view: &RideView) -> bool {
    !matches!(
        view.fallback.state(),
        FallbackState::Idle | FallbackState::InFlight
    )
}

fn list_settled(view: &RideView) -> bool {
    !view.rides.is_loading()
}

// ════════════════════════════════════════════════════════════════════
// Cold start and fallback
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn cold_start_shows_last_point_of_latest_ride() {
    let (mut session, _server, mut view, api) =
        start_default(MockRideApi::new(vec![ride_detail(1, 0, &[10, 20])]));

    let snapshot = wait_for_view(&mut view, |v| v.fallback.detail().is_some()).await;

    assert_eq!(snapshot.display_source(), DisplaySource::Fallback);
    assert_eq!(snapshot.displayed_ride().unwrap().id, 1);
    assert_eq!(snapshot.latest_point(), Some(&pos(20)));
    assert_eq!(snapshot.displayed_positions(), &[pos(10), pos(20)]);
    assert!(api.list_calls().contains(&RideListQuery::latest()));
    assert_eq!(api.detail_calls(), vec![1]);

    session.shutdown().await;
}

#[tokio::test]
async fn empty_history_shows_nothing() {
    let (mut session, _server, mut view, _api) = start_default(MockRideApi::empty());

    let snapshot = wait_for_view(&mut view, fallback_settled).await;

    assert_eq!(snapshot.fallback.state(), &FallbackState::Loaded(None));
    assert_eq!(snapshot.display_source(), DisplaySource::Nothing);
    assert!(snapshot.latest_point().is_none());

    session.shutdown().await;
}

#[tokio::test]
async fn live_ride_takes_precedence_over_loaded_fallback() {
    let (mut session, server, mut view, _api) =
        start_default(MockRideApi::new(vec![ride_detail(1, 0, &[10, 20])]));
    wait_for_view(&mut view, |v| v.fallback.detail().is_some()).await;

    server.push(ride_started_json(9, 100));
    let snapshot = wait_for_view(&mut view, |v| v.ride.current_ride().is_some()).await;

    assert_eq!(snapshot.display_source(), DisplaySource::LiveRide);
    assert_eq!(snapshot.displayed_ride().unwrap().id, 9);
    assert_eq!(snapshot.latest_point(), Some(&pos(100)));
    assert!(snapshot.fallback.is_superseded());
    assert!(snapshot.fallback.detail().is_none());

    session.shutdown().await;
}

#[tokio::test]
async fn fallback_result_after_live_location_is_discarded() {
    let api = MockRideApi::new(vec![ride_detail(1, 0, &[10, 20])]).gated();
    let (mut session, server, mut view, api) = start_default(api);

    // Fallback fetch and initial list query are both held at the gate.
    server.push(current_location_json(&pos(500)));
    wait_for_view(&mut view, |v| v.fallback.is_superseded()).await;

    api.release(10);
    wait_for_view(&mut view, |v| !v.rides.rides().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snapshot = session.view();
    assert!(snapshot.fallback.is_superseded());
    assert_eq!(snapshot.display_source(), DisplaySource::LiveLocation);
    assert_eq!(snapshot.latest_point(), Some(&pos(500)));

    session.shutdown().await;
}

#[tokio::test]
async fn failed_fallback_is_not_retried_until_asked() {
    let api = MockRideApi::new(vec![ride_detail(3, 0, &[5])]);
    api.set_failing(true);
    let (mut session, _server, mut view, api) = start_default(api);

    let snapshot = wait_for_view(&mut view, fallback_settled).await;
    assert!(snapshot.fallback.error().unwrap().contains("503"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let latest_queries = api
        .list_calls()
        .iter()
        .filter(|q| **q == RideListQuery::latest())
        .count();
    assert_eq!(latest_queries, 1, "no automatic retry");

    api.set_failing(false);
    assert!(session.retry_fallback().await.unwrap());
    let snapshot = wait_for_view(&mut view, |v| v.fallback.detail().is_some()).await;
    assert_eq!(snapshot.latest_point(), Some(&pos(5)));

    // Nothing left to retry.
    assert!(!session.retry_fallback().await.unwrap());

    session.shutdown().await;
}

#[tokio::test]
async fn fallback_can_be_disabled() {
    let api = Arc::new(MockRideApi::new(vec![ride_detail(1, 0, &[10])]));
    let config = ReconcilerConfig::default().with_fetch_fallback_on_start(false);
    let (mut session, _server, mut view) = start_session(Arc::clone(&api), config);

    let snapshot = wait_for_view(&mut view, |v| !v.rides.rides().is_empty()).await;
    assert_eq!(snapshot.fallback.state(), &FallbackState::Idle);
    assert!(api.detail_calls().is_empty());

    session.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Live ride lifecycle
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn ride_lifecycle_accumulates_positions_and_ends() {
    let (mut session, server, mut view, _api) = start_default(MockRideApi::empty());

    server.push(ride_started_json(5, 0));
    server.push(position_update_json(5, 10));
    server.push(position_update_json(5, 20));
    server.push(ride_ended_json(5, 30));

    let snapshot = wait_for_view(&mut view, |v| {
        v.ride.current_ride().is_some_and(|r| r.is_ended())
    })
    .await;

    let ride = snapshot.ride.current_ride().unwrap();
    assert_eq!(ride.id, 5);
    assert_eq!(ride.end_time, Some(at(30)));
    assert_eq!(snapshot.ride.ride_positions(), &[pos(0), pos(10), pos(20)]);
    assert_eq!(
        snapshot.ride.stats().unwrap().duration,
        Some(chrono::Duration::seconds(30))
    );

    session.shutdown().await;
}

#[tokio::test]
async fn legacy_frame_spelling_drives_the_same_transitions() {
    let (mut session, server, mut view, _api) = start_default(MockRideApi::empty());

    server.push(ride_started_legacy_json(2, 0));
    server.push(
        serde_json::json!({
            "type": "ride_position_added",
            "payload": { "ride_id": 2, "position": pos(15) },
        })
        .to_string(),
    );
    server.push(
        serde_json::json!({
            "type": "ride_ended",
            "payload": { "ride_id": 2, "end_time": at(40) },
        })
        .to_string(),
    );

    let snapshot = wait_for_view(&mut view, |v| {
        v.ride.current_ride().is_some_and(|r| r.is_ended())
    })
    .await;
    assert_eq!(snapshot.ride.ride_positions(), &[pos(0), pos(15)]);

    session.shutdown().await;
}

#[tokio::test]
async fn stale_update_from_superseded_ride_is_ignored() {
    let (mut session, server, mut view, _api) = start_default(MockRideApi::empty());

    server.push(ride_started_json(4, 0));
    server.push(position_update_json(4, 5));
    server.push(ride_started_json(5, 10));
    server.push(position_update_json(4, 12));
    server.push(ride_ended_json(4, 13));
    server.push(position_update_json(5, 20));

    let snapshot = wait_for_view(&mut view, |v| {
        v.ride.current_ride_id() == Some(5) && v.ride.ride_positions().len() == 2
    })
    .await;

    let ride = snapshot.ride.current_ride().unwrap();
    assert_eq!(ride.id, 5);
    assert!(!ride.is_ended());
    assert_eq!(snapshot.ride.ride_positions(), &[pos(10), pos(20)]);

    session.shutdown().await;
}

#[tokio::test]
async fn undecodable_frames_do_not_interrupt_the_stream() {
    let (mut session, server, mut view, _api) = start_default(MockRideApi::empty());

    server.push(ride_started_json(5, 0));
    server.push(position_update_json(5, 10));
    server.push("this is not json");
    server.push(r#"{"no_type": true}"#);
    server.push(r#"{"type":"RIDE_POSITION_UPDATE","payload":{"ride_id":"five"}}"#);
    server.push(r#"{"type":"lock_status","payload":{"status":"LOCKED"}}"#);
    server.push(position_update_json(5, 20));

    let snapshot = wait_for_view(&mut view, |v| v.ride.ride_positions().len() == 3).await;
    assert_eq!(snapshot.ride.ride_positions(), &[pos(0), pos(10), pos(20)]);
    assert_eq!(session.status(), ConnectionStatus::Open);

    session.shutdown().await;
}

#[tokio::test]
async fn location_trail_builds_without_a_ride_and_resets_on_start() {
    let (mut session, server, mut view, _api) = start_default(MockRideApi::empty());

    server.push(current_location_json(&pos(1)));
    server.push(current_location_json(&pos(2)));
    let snapshot = wait_for_view(&mut view, |v| v.ride.location().trail().len() == 2).await;
    assert_eq!(snapshot.display_source(), DisplaySource::LiveLocation);
    assert_eq!(snapshot.displayed_positions(), &[pos(1), pos(2)]);

    server.push(ride_started_json(6, 3));
    server.push(current_location_json(&pos(4)));
    let snapshot = wait_for_view(&mut view, |v| v.ride.location().latest() == Some(&pos(4))).await;
    assert_eq!(snapshot.ride.location().trail(), &[pos(3)]);
    assert_eq!(snapshot.ride.ride_positions(), &[pos(3)]);

    session.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Ride list
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn initial_query_loads_the_first_page() {
    let (mut session, _server, mut view, api) = start_default(MockRideApi::new(vec![
        ride_detail(3, 300, &[]),
        ride_detail(2, 200, &[]),
        ride_detail(1, 100, &[]),
    ]));

    let snapshot = wait_for_view(&mut view, |v| v.rides.rides().len() == 3).await;
    let ids: Vec<_> = snapshot.rides.rides().iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![3, 2, 1]);
    assert!(api.list_calls().contains(&RideListQuery::default()));

    session.shutdown().await;
}

#[tokio::test]
async fn live_events_patch_the_list_and_agree_with_the_reducer() {
    let (mut session, server, mut view, _api) = start_default(MockRideApi::new(vec![
        ride_detail(2, 200, &[]),
        ride_detail(1, 100, &[]),
    ]));
    wait_for_view(&mut view, |v| v.rides.rides().len() == 2).await;

    server.push(ride_started_json(3, 300));
    server.push(ride_ended_json(3, 360));
    server.push(ride_ended_json(77, 400));

    let snapshot = wait_for_view(&mut view, |v| {
        v.rides.get(3).is_some_and(|r| r.is_ended())
    })
    .await;

    let ids: Vec<_> = snapshot.rides.rides().iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![3, 2, 1]);
    assert_eq!(snapshot.rides.get(3).unwrap().end_time, Some(at(360)));
    assert_eq!(
        snapshot.ride.current_ride().unwrap().end_time,
        snapshot.rides.get(3).unwrap().end_time
    );

    session.shutdown().await;
}

#[tokio::test]
async fn page_loaded_after_ride_ended_adopts_the_end_time() {
    let api = Arc::new(MockRideApi::new(vec![ride_detail(5, 0, &[])]).gated());
    let config = ReconcilerConfig::default().with_fetch_fallback_on_start(false);
    let (mut session, server, mut view) = start_session(Arc::clone(&api), config);
    wait_for_view(&mut view, |v| v.rides.is_loading()).await;

    server.push(ride_started_json(5, 0));
    server.push(ride_ended_json(5, 30));
    wait_for_view(&mut view, |v| {
        v.ride.current_ride().is_some_and(|r| r.is_ended())
    })
    .await;

    // The page was read before the ride ended, so it lists ride 5 as ongoing.
    api.release(1);
    let snapshot = wait_for_view(&mut view, |v| list_settled(v) && v.rides.get(5).is_some()).await;

    assert!(snapshot.rides.last_error().is_none());
    assert_eq!(snapshot.rides.get(5).unwrap().end_time, Some(at(30)));
    assert_eq!(
        snapshot.rides.get(5).unwrap().end_time,
        snapshot.ride.current_ride().unwrap().end_time
    );

    session.shutdown().await;
}

#[tokio::test]
async fn requery_replaces_the_page_and_drops_live_patches() {
    let details = (1..=5).rev().map(|id| ride_detail(id, id * 100, &[])).collect();
    let (mut session, server, mut view, _api) = start_default(MockRideApi::new(details));
    wait_for_view(&mut view, |v| v.rides.rides().len() == 5).await;

    server.push(ride_started_json(6, 600));
    wait_for_view(&mut view, |v| v.rides.rides().len() == 6).await;

    let page_two = RideListQuery::new(2, 2);
    assert!(session.query_rides(page_two.clone()).await.unwrap());
    let snapshot = wait_for_view(&mut view, |v| {
        v.rides.query() == &page_two && list_settled(v)
    })
    .await;

    let ids: Vec<_> = snapshot.rides.rides().iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![3, 2]);

    session.shutdown().await;
}

#[tokio::test]
async fn second_list_query_is_rejected_while_one_is_in_flight() {
    let api = MockRideApi::new(vec![ride_detail(1, 100, &[])]).gated();
    let (mut session, _server, mut view, api) = start_default(api);

    wait_for_view(&mut view, |v| v.rides.is_loading()).await;
    assert!(!session.query_rides(RideListQuery::new(2, 10)).await.unwrap());

    api.release(10);
    wait_for_view(&mut view, |v| list_settled(v) && !v.rides.rides().is_empty()).await;
    assert!(session.query_rides(RideListQuery::new(2, 10)).await.unwrap());

    // The rejected query never reached the API.
    let page_two_calls = api.list_calls().iter().filter(|q| q.page == 2).count();
    assert_eq!(page_two_calls, 1);

    session.shutdown().await;
}

#[tokio::test]
async fn failed_list_query_keeps_the_previous_page() {
    let (mut session, _server, mut view, api) =
        start_default(MockRideApi::new(vec![ride_detail(1, 100, &[])]));
    wait_for_view(&mut view, |v| v.rides.rides().len() == 1).await;

    api.set_failing(true);
    assert!(session.query_rides(RideListQuery::new(2, 50)).await.unwrap());
    let snapshot = wait_for_view(&mut view, |v| v.rides.last_error().is_some()).await;

    assert_eq!(snapshot.rides.rides().len(), 1);
    assert_eq!(snapshot.rides.query(), &RideListQuery::default());

    session.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Ride detail focus
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn focused_ride_detail_follows_live_events() {
    let (mut session, server, mut view, _api) =
        start_default(MockRideApi::new(vec![ride_detail(7, 0, &[1, 2])]));

    session.focus_ride(Some(7)).unwrap();
    wait_for_view(&mut view, |v| v.detail.detail().is_some()).await;

    server.push(position_update_json(7, 3));
    server.push(position_update_json(8, 4));
    server.push(ride_ended_json(7, 5));

    let snapshot = wait_for_view(&mut view, |v| {
        v.detail.detail().is_some_and(|d| d.summary.is_ended())
    })
    .await;
    let detail = snapshot.detail.detail().unwrap();
    assert_eq!(detail.positions, vec![pos(1), pos(2), pos(3)]);
    assert_eq!(detail.effective_end_time(), Some(at(5)));

    session.focus_ride(None).unwrap();
    let snapshot = wait_for_view(&mut view, |v| v.detail.focus().is_none()).await;
    assert!(snapshot.detail.detail().is_none());

    session.shutdown().await;
}

#[tokio::test]
async fn switching_focus_abandons_the_previous_fetch() {
    let api = MockRideApi::new(vec![ride_detail(1, 0, &[1]), ride_detail(2, 0, &[2])]).gated();
    let config = ReconcilerConfig::default().with_fetch_fallback_on_start(false);
    let api = Arc::new(api);
    let (mut session, _server, mut view) = start_session(Arc::clone(&api), config);

    session.focus_ride(Some(1)).unwrap();
    session.focus_ride(Some(2)).unwrap();
    wait_for_view(&mut view, |v| v.detail.focus() == Some(2)).await;

    api.release(10);
    let snapshot = wait_for_view(&mut view, |v| v.detail.detail().is_some()).await;
    assert_eq!(snapshot.detail.detail().unwrap().id(), 2);

    session.shutdown().await;
}

#[tokio::test]
async fn focusing_a_missing_ride_reports_the_failure() {
    let (mut session, _server, mut view, _api) = start_default(MockRideApi::empty());

    session.focus_ride(Some(42)).unwrap();
    let snapshot = wait_for_view(&mut view, |v| {
        matches!(v.detail.state(), b3_ride_tracker::detail::DetailState::Failed(_))
    })
    .await;
    assert_eq!(snapshot.detail.focus(), Some(42));

    session.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Channel, send and teardown
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn status_is_published_and_send_reaches_the_backend() {
    let (mut session, server, mut view, _api) = start_default(MockRideApi::empty());

    wait_for_view(&mut view, |v| v.status == ConnectionStatus::Open).await;
    session.send("lock").unwrap();
    session.send(vec![1u8, 2]).unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        server.sent(),
        vec![Outbound::Text("lock".into()), Outbound::Binary(vec![1, 2])]
    );

    session.shutdown().await;
}

#[tokio::test]
async fn backend_hang_up_closes_without_reconnecting() {
    let (mut session, server, mut view, _api) = start_default(MockRideApi::empty());

    server.push(ride_started_json(5, 0));
    server.hang_up();

    let snapshot = wait_for_view(&mut view, |v| v.status == ConnectionStatus::Closed).await;
    assert_eq!(snapshot.ride.current_ride_id(), Some(5));
    assert!(matches!(
        session.send("late"),
        Err(RideTrackerError::NotOpen { .. })
    ));

    // History still answers on a closed stream.
    wait_for_view(&mut view, list_settled).await;
    assert!(session.query_rides(RideListQuery::new(1, 5)).await.unwrap());

    session.shutdown().await;
}

#[tokio::test]
async fn shutdown_abandons_in_flight_fetches() {
    let api = MockRideApi::new(vec![ride_detail(1, 0, &[10])]).gated();
    let (mut session, server, mut view, api) = start_default(api);
    wait_for_view(&mut view, |v| v.fallback.is_in_flight() && v.rides.is_loading()).await;

    session.shutdown().await;
    assert!(server.is_closed());

    api.release(10);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snapshot = session.view();
    assert!(snapshot.fallback.is_in_flight());
    assert!(snapshot.rides.rides().is_empty());
    assert_eq!(snapshot.status, ConnectionStatus::Closed);
}

#[tokio::test]
async fn nothing_is_applied_while_the_channel_is_closing() {
    let api = Arc::new(MockRideApi::new(vec![ride_detail(1, 0, &[10])]).gated());
    let (transport, server) = live_pair();
    let transport = transport.with_close_delay(Duration::from_millis(300));
    let (channel, inbound) =
        ConnectionChannel::open(async move { Ok(transport) }, ChannelConfig::default());
    let mut session = RideReconciler::start(
        channel,
        inbound,
        Arc::clone(&api) as Arc<_>,
        ReconcilerConfig::default(),
    );
    let mut view = session.subscribe();
    wait_for_view(&mut view, |v| {
        v.status == ConnectionStatus::Open && v.fallback.is_in_flight() && v.rides.is_loading()
    })
    .await;

    // Fetch results and a live frame show up mid-close.
    tokio::join!(session.shutdown(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        api.release(10);
        server.push(ride_started_json(9, 0));
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(server.is_closed());
    let snapshot = session.view();
    assert!(snapshot.fallback.is_in_flight());
    assert!(snapshot.fallback.detail().is_none());
    assert!(snapshot.rides.rides().is_empty());
    assert!(snapshot.ride.current_ride().is_none());
    assert_eq!(snapshot.status, ConnectionStatus::Closed);
}

#[tokio::test]
async fn commands_after_shutdown_report_session_closed() {
    let (mut session, _server, _view, _api) = start_default(MockRideApi::empty());
    session.shutdown().await;
    session.shutdown().await;

    assert!(matches!(
        session.send("x"),
        Err(RideTrackerError::SessionClosed)
    ));
    assert!(matches!(
        session.query_rides(RideListQuery::default()).await,
        Err(RideTrackerError::SessionClosed)
    ));
    assert!(matches!(
        session.retry_fallback().await,
        Err(RideTrackerError::SessionClosed)
    ));
    assert!(matches!(
        session.focus_ride(Some(1)),
        Err(RideTrackerError::SessionClosed)
    ));
}
