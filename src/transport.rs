//! Transport abstraction for the ride tracker live stream.
//!
//! The [`Transport`] trait defines a bidirectional frame channel between the
//! client and the backend. The live stream carries one JSON object per text
//! frame; outbound frames may be text or binary. Implementations own the
//! framing (WebSocket frames, an in-process channel for tests, a recorded
//! replay, ...).
//!
//! # Connection Setup
//!
//! Connection setup is NOT part of this trait. Hand a future that produces a
//! connected transport to [`ConnectionChannel::open`](crate::channel::ConnectionChannel::open)
//! so the channel can report `Connecting` while it resolves.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use b3_ride_tracker::error::RideTrackerError;
//! use b3_ride_tracker::transport::{Outbound, Transport};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, frame: Outbound) -> Result<(), RideTrackerError> {
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, RideTrackerError>> {
//!         // Return None when the connection is closed
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), RideTrackerError> {
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::RideTrackerError;

/// A frame to send to the backend.
///
/// The backend defines no outbound protocol; this only carries the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Binary(Vec<u8>),
}

impl Outbound {
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Outbound {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Outbound {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Outbound {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

/// A bidirectional frame transport for the live ride stream.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because it is used
/// inside `tokio::select!`. If `recv` is cancelled before completion, calling it
/// again must not lose data.
///
/// # Errors and Closure
///
/// A receive error does not by itself end the stream. Once the underlying
/// connection is unusable, implementations must return `None` from `recv`
/// so the channel can observe the closure.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one frame to the backend.
    ///
    /// # Errors
    ///
    /// Returns [`RideTrackerError::TransportSend`] if the frame could not be sent.
    async fn send(&mut self, frame: Outbound) -> Result<(), RideTrackerError>;

    /// Receive the next text frame from the backend.
    ///
    /// Returns:
    /// - `Some(Ok(text))` — a complete frame was received
    /// - `Some(Err(e))` — a transport error occurred
    /// - `None` — the connection is closed
    async fn recv(&mut self) -> Option<Result<String, RideTrackerError>>;

    /// Close the transport connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations should
    /// still release resources even if the close handshake fails.
    async fn close(&mut self) -> Result<(), RideTrackerError>;
}
