//! # B3 Ride Tracker
//!
//! Live ride reconciliation client for the B3 bicycle tracker backend.
//!
//! The backend pushes location and ride lifecycle frames over a WebSocket and
//! serves ride history over REST. This crate merges the two into one
//! consistent view of "what is happening on this ride right now".
//!
//! ## Features
//!
//! - **Transport-agnostic** — implement the [`Transport`] trait for any backend
//! - **Both frame dialects** — `ride_started` and `RIDE_STARTED` style frames decode alike
//! - **Live beats history** — the latest ride from history is shown only until live data arrives
//! - **WebSocket built-in** — default `transport-websocket` feature provides `WebSocketTransport`
//! - **HTTP history built-in** — default `http-api` feature provides `HttpRideApi`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(all(feature = "transport-websocket", feature = "http-api"))]
//! # async fn example() -> b3_ride_tracker::Result<()> {
//! use b3_ride_tracker::{RideReconciler, TrackerConfig};
//!
//! let mut session = RideReconciler::connect(TrackerConfig::from_env())?;
//! let mut view = session.subscribe();
//!
//! while view.changed().await.is_ok() {
//!     let snapshot = view.borrow_and_update().clone();
//!     if let Some(point) = snapshot.latest_point() {
//!         println!("{:.5}, {:.5}", point.latitude, point.longitude);
//!     }
//! }
//!
//! session.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod channel;
pub mod config;
pub mod decoder;
pub mod detail;
pub mod error;
pub mod event_kind;
pub mod fallback;
pub mod protocol;
pub mod reconciler;
pub mod reducer;
pub mod rides;
pub mod transport;
pub mod transports;
pub mod view;

// Re-export primary types for ergonomic imports.
#[cfg(feature = "http-api")]
pub use api::HttpRideApi;
pub use api::{ApiConfig, RideApi};
pub use channel::{ChannelConfig, ConnectionChannel, ConnectionStatus};
pub use config::TrackerConfig;
pub use decoder::{DecodeError, DecodedEvent, EventDecoder};
pub use error::{Result, RideTrackerError};
pub use event_kind::EventKind;
pub use protocol::{Position, RideDetail, RideId, RideListQuery, RideStats, RideSummary};
pub use reconciler::{ReconcilerConfig, RideReconciler};
pub use reducer::RideState;
pub use transport::{Outbound, Transport};
#[cfg(feature = "transport-websocket")]
pub use transports::WebSocketTransport;
pub use view::{DisplaySource, RideView};
