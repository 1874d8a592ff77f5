#![cfg(feature = "http-api")]
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    clippy::float_cmp
)]
//! `HttpRideApi` against a mocked REST backend.

use std::time::Duration;

use b3_ride_tracker::fallback::fetch_latest_ride;
use b3_ride_tracker::protocol::RideListQuery;
use b3_ride_tracker::{ApiConfig, HttpRideApi, RideApi, RideTrackerError};
use chrono::NaiveDate;
use serde_json::json;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn api_for(server: &MockServer) -> HttpRideApi {
    HttpRideApi::new(ApiConfig::new(format!("{}/api", server.uri()))).unwrap()
}

fn ride_json(id: i64, end_time: &str) -> serde_json::Value {
    json!({
        "id": id,
        "name": format!("Ride {id}"),
        "start_time": "2025-06-01T08:00:00Z",
        "end_time": end_time,
    })
}

#[tokio::test]
async fn list_rides_sends_paging_parameters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/rides"))
        .and(query_param("page", "2"))
        .and(query_param("limit", "10"))
        .and(query_param_is_missing("date"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            ride_json(12, "0001-01-01T00:00:00Z"),
            ride_json(11, "2025-06-01T09:00:00Z"),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let rides = api_for(&server)
        .await
        .list_rides(&RideListQuery::new(2, 10))
        .await
        .unwrap();

    assert_eq!(rides.len(), 2);
    assert_eq!(rides[0].id, 12);
    assert!(rides[0].end_time.is_none(), "zero time means ongoing");
    assert!(rides[1].is_ended());
}

#[tokio::test]
async fn list_rides_sends_date_filter() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/rides"))
        .and(query_param("date", "2025-06-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let query = RideListQuery::default().with_date(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());
    let rides = api_for(&server).await.list_rides(&query).await.unwrap();
    assert!(rides.is_empty());
}

#[tokio::test]
async fn ride_detail_decodes_positions() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/rides/4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 4,
            "name": "Ride 4",
            "start_time": "2025-06-01T08:00:00Z",
            "end_time": "0001-01-01T00:00:00Z",
            "positions": [
                {"latitude": 37.77, "longitude": -122.41, "timestamp": "2025-06-01T08:00:10Z"},
                {"latitude": 37.78, "longitude": -122.42, "timestamp": "2025-06-01T08:05:00Z", "speed_knots": 9.1},
            ],
        })))
        .mount(&server)
        .await;

    let detail = api_for(&server).await.ride_detail(4).await.unwrap();
    assert_eq!(detail.id(), 4);
    assert_eq!(detail.positions.len(), 2);
    assert_eq!(
        detail.effective_end_time().unwrap().to_rfc3339(),
        "2025-06-01T08:05:00+00:00"
    );
}

#[tokio::test]
async fn missing_ride_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/rides/99"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Ride not found"))
        .mount(&server)
        .await;

    let err = api_for(&server).await.ride_detail(99).await.unwrap_err();
    assert!(matches!(err, RideTrackerError::RideNotFound { ride_id: 99 }));
}

#[tokio::test]
async fn server_error_carries_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/rides"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Failed to fetch rides"))
        .mount(&server)
        .await;

    let err = api_for(&server)
        .await
        .list_rides(&RideListQuery::default())
        .await
        .unwrap_err();
    match err {
        RideTrackerError::Http { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "Failed to fetch rides");
        }
        other => panic!("expected Http error, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_body_is_a_serialization_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/rides"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
        .mount(&server)
        .await;

    let err = api_for(&server)
        .await
        .list_rides(&RideListQuery::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RideTrackerError::Serialization(_)));
}

#[tokio::test]
async fn request_timeout_maps_to_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/rides/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(ride_json(1, "0001-01-01T00:00:00Z"))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let api = HttpRideApi::new(
        ApiConfig::new(format!("{}/api", server.uri()))
            .with_request_timeout(Duration::from_millis(50)),
    )
    .unwrap();
    assert!(matches!(
        api.ride_detail(1).await,
        Err(RideTrackerError::Timeout)
    ));
}

#[tokio::test]
async fn latest_ride_is_first_of_a_single_item_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/rides"))
        .and(query_param("page", "1"))
        .and(query_param("limit", "1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([ride_json(7, "0001-01-01T00:00:00Z")])),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/rides/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 7,
            "name": "Ride 7",
            "start_time": "2025-06-01T08:00:00Z",
            "positions": [
                {"latitude": 1.0, "longitude": 2.0, "timestamp": "2025-06-01T08:00:01Z"},
            ],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = api_for(&server).await;
    let latest = fetch_latest_ride(&api).await.unwrap().unwrap();
    assert_eq!(latest.id(), 7);
    assert_eq!(latest.last_position().unwrap().latitude, 1.0_f64);
}
