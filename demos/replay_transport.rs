//! # Replay Transport Example
//!
//! Shows how to implement the [`Transport`] and [`RideApi`] traits to run a
//! session without a backend. A recorded ride is replayed frame by frame,
//! including a stale update from a previous ride and a corrupt frame, and the
//! resulting view is printed at the end.
//!
//! ## Running
//!
//! ```sh
//! cargo run --example replay_transport
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use b3_ride_tracker::protocol::{Position, RideDetail, RideId, RideListQuery, RideSummary};
use b3_ride_tracker::{
    ChannelConfig, ConnectionChannel, Outbound, ReconcilerConfig, RideApi, RideReconciler,
    RideTrackerError, Transport,
};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

// ─────────────────────────────────────────────────────────────────────
// Step 1: A transport that replays recorded frames
// ─────────────────────────────────────────────────────────────────────

/// Yields each recorded frame after `pace`, then reports the connection closed.
struct ReplayTransport {
    frames: VecDeque<String>,
    pace: Duration,
}

#[async_trait]
impl Transport for ReplayTransport {
    async fn send(&mut self, frame: Outbound) -> Result<(), RideTrackerError> {
        tracing::info!(len = frame.len(), "replay ignores outbound frame");
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, RideTrackerError>> {
        tokio::time::sleep(self.pace).await;
        self.frames.pop_front().map(Ok)
    }

    async fn close(&mut self) -> Result<(), RideTrackerError> {
        self.frames.clear();
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: A ride history with one finished ride
// ─────────────────────────────────────────────────────────────────────

struct StaticHistory {
    ride: RideDetail,
}

#[async_trait]
impl RideApi for StaticHistory {
    async fn list_rides(&self, query: &RideListQuery) -> b3_ride_tracker::Result<Vec<RideSummary>> {
        if query.page > 1 {
            return Ok(Vec::new());
        }
        Ok(vec![self.ride.summary.clone()])
    }

    async fn ride_detail(&self, ride_id: RideId) -> b3_ride_tracker::Result<RideDetail> {
        if ride_id == self.ride.id() {
            Ok(self.ride.clone())
        } else {
            Err(RideTrackerError::RideNotFound { ride_id })
        }
    }
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_750_000_000, 0).single().unwrap_or_default() + chrono::Duration::seconds(secs)
}

fn fix(secs: i64, knots: f64) -> Position {
    Position::new(37.7749 + secs as f64 * 2e-5, -122.4194, at(secs)).with_speed_knots(knots)
}

fn recording() -> VecDeque<String> {
    let mut frames = VecDeque::new();
    frames.push_back(json!({"type": "current_location", "payload": fix(0, 0.0)}).to_string());
    frames.push_back(
        json!({
            "type": "RIDE_STARTED",
            "payload": {"ride_id": 2, "ride_name": "Ride 2", "timestamp": at(5), "position": fix(5, 3.0)},
        })
        .to_string(),
    );
    for secs in [10, 15, 20] {
        frames.push_back(
            json!({"type": "RIDE_POSITION_UPDATE", "payload": {"ride_id": 2, "position": fix(secs, 8.0)}})
                .to_string(),
        );
    }
    // Late update for the previous ride.
    frames.push_back(
        json!({"type": "RIDE_POSITION_UPDATE", "payload": {"ride_id": 1, "position": fix(21, 5.0)}})
            .to_string(),
    );
    frames.push_back("{truncated".to_string());
    frames.push_back(
        json!({"type": "RIDE_POSITION_UPDATE", "payload": {"ride_id": 2, "position": fix(25, 11.0)}})
            .to_string(),
    );
    frames.push_back(json!({"type": "RIDE_ENDED", "payload": {"ride_id": 2, "timestamp": at(30)}}).to_string());
    frames
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: Run the session and inspect the final view
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let history = StaticHistory {
        ride: RideDetail::new(
            RideSummary::new(1, "Ride 1", at(-3600)),
            vec![fix(-3600, 4.0), fix(-3000, 6.0)],
        ),
    };
    let transport = ReplayTransport {
        frames: recording(),
        pace: Duration::from_millis(100),
    };

    let (channel, inbound) =
        ConnectionChannel::open(async move { Ok(transport) }, ChannelConfig::default());
    let mut session = RideReconciler::start(
        channel,
        inbound,
        Arc::new(history),
        ReconcilerConfig::default(),
    );

    let mut view = session.subscribe();
    let done = view
        .wait_for(|v| v.ride.current_ride().is_some_and(RideSummary::is_ended))
        .await
        .map(|v| v.clone());

    match done {
        Ok(view) => {
            let ride = view.displayed_ride().cloned();
            println!("source:    {:?}", view.display_source());
            println!("ride:      {ride:?}");
            println!("points:    {}", view.displayed_positions().len());
            if let Some(stats) = view.ride.stats() {
                println!("duration:  {:?}", stats.duration.map(|d| d.num_seconds()));
                println!("avg speed: {:?} mph", stats.average_speed_knots.map(b3_ride_tracker::protocol::knots_to_mph));
                println!("max speed: {:?} mph", stats.max_speed_knots.map(b3_ride_tracker::protocol::knots_to_mph));
            }
            let listed: Vec<_> = view.rides.rides().iter().map(|r| (r.id, r.is_ended())).collect();
            println!("history:   {listed:?}");
        }
        Err(_) => tracing::error!("session ended before the ride finished"),
    }

    session.shutdown().await;
    Ok(())
}
