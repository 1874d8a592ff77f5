#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for ride tracker integration tests.
//!
//! Provides a push-driven [`LiveTransport`] (the test plays the backend
//! through a [`LiveServer`]), a scripted [`MockRideApi`] whose calls can be
//! held back to stage races, and builders for inbound frame JSON.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use b3_ride_tracker::protocol::{Position, RideDetail, RideId, RideListQuery, RideSummary};
use b3_ride_tracker::{Outbound, RideApi, RideTrackerError, RideView, Transport};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use tokio::sync::{mpsc, Semaphore};

// ── Time and positions ──────────────────────────────────────────────

/// A fixed instant offset by `secs`.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_750_000_000 + secs, 0).unwrap()
}

/// A position recorded at `at(secs)`, drifting north with time.
pub fn pos(secs: i64) -> Position {
    Position::new(37.7749 + secs as f64 * 1e-4, -122.4194, at(secs))
}

pub fn summary(id: RideId, start_secs: i64) -> RideSummary {
    RideSummary::new(id, format!("Ride {id}"), at(start_secs))
}

// ── LiveTransport ───────────────────────────────────────────────────

/// Client half of an in-process stream. Frames pushed through the paired
/// [`LiveServer`] are returned from `recv` in order.
pub struct LiveTransport {
    rx: mpsc::UnboundedReceiver<Option<String>>,
    sent: Arc<StdMutex<Vec<Outbound>>>,
    closed: Arc<AtomicBool>,
    close_delay: Duration,
}

impl LiveTransport {
    /// Make `close` take `delay`, like a slow close handshake.
    #[must_use]
    pub fn with_close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = delay;
        self
    }
}

/// Backend half of an in-process stream.
pub struct LiveServer {
    tx: mpsc::UnboundedSender<Option<String>>,
    /// Frames the client sent.
    pub sent: Arc<StdMutex<Vec<Outbound>>>,
    /// Whether the client closed the transport.
    pub closed: Arc<AtomicBool>,
}

/// Create a connected `(transport, server)` pair.
pub fn live_pair() -> (LiveTransport, LiveServer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sent = Arc::new(StdMutex::new(Vec::new()));
    let closed = Arc::new(AtomicBool::new(false));
    let transport = LiveTransport {
        rx,
        sent: Arc::clone(&sent),
        closed: Arc::clone(&closed),
        close_delay: Duration::ZERO,
    };
    let server = LiveServer { tx, sent, closed };
    (transport, server)
}

impl LiveServer {
    /// Deliver one text frame to the client.
    pub fn push(&self, frame: impl Into<String>) {
        self.tx.send(Some(frame.into())).unwrap();
    }

    /// Close the connection from the backend side.
    pub fn hang_up(&self) {
        self.tx.send(None).unwrap();
    }

    pub fn sent(&self) -> Vec<Outbound> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for LiveTransport {
    async fn send(&mut self, frame: Outbound) -> Result<(), RideTrackerError> {
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, RideTrackerError>> {
        match self.rx.recv().await {
            Some(Some(text)) => Some(Ok(text)),
            Some(None) => None,
            // Server half dropped without hanging up: stay connected.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), RideTrackerError> {
        if !self.close_delay.is_zero() {
            tokio::time::sleep(self.close_delay).await;
        }
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── MockRideApi ─────────────────────────────────────────────────────

/// In-memory ride history.
///
/// `list_rides` pages through `rides` (kept most recent first) and honors
/// the date filter. A gated API holds every call until [`release`](Self::release)
/// hands out permits.
pub struct MockRideApi {
    rides: StdMutex<Vec<RideSummary>>,
    details: StdMutex<HashMap<RideId, RideDetail>>,
    failing: AtomicBool,
    gate: Option<Semaphore>,
    list_calls: StdMutex<Vec<RideListQuery>>,
    detail_calls: StdMutex<Vec<RideId>>,
}

impl MockRideApi {
    pub fn new(details: Vec<RideDetail>) -> Self {
        let rides = details.iter().map(|d| d.summary.clone()).collect();
        let details = details.into_iter().map(|d| (d.id(), d)).collect();
        Self {
            rides: StdMutex::new(rides),
            details: StdMutex::new(details),
            failing: AtomicBool::new(false),
            gate: None,
            list_calls: StdMutex::new(Vec::new()),
            detail_calls: StdMutex::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Hold every call until permits are released.
    #[must_use]
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    /// Let `calls` held calls proceed.
    pub fn release(&self, calls: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(calls);
        }
    }

    /// Make every call fail with HTTP 503 while `failing` is set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn list_calls(&self) -> Vec<RideListQuery> {
        self.list_calls.lock().unwrap().clone()
    }

    pub fn detail_calls(&self) -> Vec<RideId> {
        self.detail_calls.lock().unwrap().clone()
    }

    async fn pass_gate(&self) -> Result<(), RideTrackerError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.failing.load(Ordering::Relaxed) {
            return Err(RideTrackerError::Http {
                status: 503,
                body: "service unavailable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RideApi for MockRideApi {
    async fn list_rides(&self, query: &RideListQuery) -> b3_ride_tracker::Result<Vec<RideSummary>> {
        self.list_calls.lock().unwrap().push(query.clone());
        self.pass_gate().await?;

        let rides = self.rides.lock().unwrap();
        let skip = (query.page.saturating_sub(1) * query.limit) as usize;
        Ok(rides
            .iter()
            .filter(|r| query.date.map_or(true, |d| r.start_time.date_naive() == d))
            .skip(skip)
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    async fn ride_detail(&self, ride_id: RideId) -> b3_ride_tracker::Result<RideDetail> {
        self.detail_calls.lock().unwrap().push(ride_id);
        self.pass_gate().await?;

        self.details
            .lock()
            .unwrap()
            .get(&ride_id)
            .cloned()
            .ok_or(RideTrackerError::RideNotFound { ride_id })
    }
}

// ── View helpers ────────────────────────────────────────────────────

/// Wait until the published view satisfies `pred`, then return it.
pub async fn wait_for_view<F>(rx: &mut tokio::sync::watch::Receiver<RideView>, pred: F) -> RideView
where
    F: FnMut(&RideView) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(pred))
        .await
        .expect("view condition timed out")
        .expect("session dropped")
        .clone()
}

// ── Frame JSON ──────────────────────────────────────────────────────

pub fn current_location_json(position: &Position) -> String {
    json!({
        "type": "current_location",
        "payload": position,
        "timestamp": position.timestamp,
    })
    .to_string()
}

/// `RIDE_STARTED` frame, as the current backend sends it.
pub fn ride_started_json(ride_id: RideId, secs: i64) -> String {
    json!({
        "type": "RIDE_STARTED",
        "payload": {
            "ride_id": ride_id,
            "ride_name": format!("Ride {ride_id}"),
            "timestamp": at(secs),
            "position": pos(secs),
        },
    })
    .to_string()
}

/// `ride_started` frame in the older spelling.
pub fn ride_started_legacy_json(ride_id: RideId, secs: i64) -> String {
    json!({
        "type": "ride_started",
        "payload": {
            "ride_id": ride_id,
            "name": format!("Ride {ride_id}"),
            "start_time": at(secs),
            "initial_position": pos(secs),
        },
    })
    .to_string()
}

pub fn position_update_json(ride_id: RideId, secs: i64) -> String {
    json!({
        "type": "RIDE_POSITION_UPDATE",
        "payload": {
            "ride_id": ride_id,
            "timestamp": at(secs),
            "position": pos(secs),
        },
    })
    .to_string()
}

pub fn ride_ended_json(ride_id: RideId, secs: i64) -> String {
    json!({
        "type": "RIDE_ENDED",
        "payload": {
            "ride_id": ride_id,
            "timestamp": at(secs),
        },
    })
    .to_string()
}

pub fn ride_detail(id: RideId, start_secs: i64, position_secs: &[i64]) -> RideDetail {
    RideDetail::new(
        summary(id, start_secs),
        position_secs.iter().copied().map(pos).collect(),
    )
}
