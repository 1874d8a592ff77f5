//! Error types for the ride tracker client.

use thiserror::Error;

use crate::channel::ConnectionStatus;
use crate::decoder::DecodeError;
use crate::protocol::RideId;

/// Errors that can occur when using the ride tracker client.
#[derive(Debug, Error)]
pub enum RideTrackerError {
    /// Failed to send a frame through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a frame from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a JSON document.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An inbound frame could not be decoded into a ride event.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// An outbound send was attempted while the channel was not open.
    #[error("channel is not open (status: {status})")]
    NotOpen {
        /// Channel status at the time of the attempt.
        status: ConnectionStatus,
    },

    /// The reconciler session has been shut down.
    #[error("ride session closed")]
    SessionClosed,

    /// The HTTP request could not be performed.
    #[error("request failed: {0}")]
    Request(String),

    /// The backend answered with a non-success status.
    #[error("http {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body, as text.
        body: String,
    },

    /// The requested ride does not exist.
    #[error("ride {ride_id} not found")]
    RideNotFound {
        /// The id that was requested.
        ride_id: RideId,
    },

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for ride tracker operations.
pub type Result<T> = std::result::Result<T, RideTrackerError>;
