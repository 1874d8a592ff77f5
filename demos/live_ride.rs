//! # Live Ride Example
//!
//! Follows the bike against a running backend:
//!
//! 1. Connect to the live stream and the ride history API
//! 2. Show the latest ride from history until live data arrives
//! 3. Print every change to the current ride or location
//! 4. Shut down gracefully on Ctrl+C
//!
//! ## Running
//!
//! ```sh
//! # Start the backend on localhost:8080, then:
//! cargo run --example live_ride
//!
//! # Override the endpoints:
//! B3_WS_URL=ws://bike.local:8080/ws B3_API_BASE_URL=http://bike.local:8080/api \
//!     cargo run --example live_ride
//! ```

use b3_ride_tracker::{DisplaySource, RideReconciler, RideView, TrackerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let config = TrackerConfig::from_env();
    tracing::info!(ws = %config.ws_url, api = %config.api.base_url, "starting ride session");

    // ── Connect ─────────────────────────────────────────────────────
    let mut session = RideReconciler::connect(config)?;
    let mut view = session.subscribe();

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    tracing::info!("session ended, exiting");
                    break;
                }
                let snapshot = view.borrow_and_update().clone();
                report(&snapshot);
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down");
                break;
            }
        }
    }

    session.shutdown().await;
    Ok(())
}

fn report(view: &RideView) {
    let source = view.display_source();
    let point = view.latest_point();

    match (source, view.displayed_ride()) {
        (DisplaySource::LiveRide, Some(ride)) => {
            let stats = view.ride.stats();
            tracing::info!(
                status = %view.status,
                ride_id = ride.id,
                name = %ride.name,
                ended = ride.is_ended(),
                points = view.ride.ride_positions().len(),
                duration_s = stats.and_then(|s| s.duration).map(|d| d.num_seconds()),
                "live ride"
            );
        }
        (DisplaySource::Fallback, Some(ride)) => {
            tracing::info!(ride_id = ride.id, name = %ride.name, "showing latest ride from history");
        }
        (DisplaySource::LiveLocation, _) => {
            tracing::info!(trail = view.ride.location().trail().len(), "live location, no ride");
        }
        _ => {
            if let Some(error) = view.fallback.error() {
                tracing::warn!("no ride to show, history unavailable: {error}");
            }
        }
    }

    if let Some(p) = point {
        let speed = p
            .speed_mph()
            .map_or_else(|| "-".to_string(), |mph| format!("{mph:.1} mph"));
        println!("{:.5}, {:.5}  {speed}  @ {}", p.latitude, p.longitude, p.timestamp);
    }
}
