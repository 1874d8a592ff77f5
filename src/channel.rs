//! The live connection channel.
//!
//! [`ConnectionChannel`] owns one transport connection in a background task.
//! It reports the connection's [`ConnectionStatus`], forwards outbound frames,
//! and delivers every received text frame, in arrival order, to a single
//! consumer through a bounded channel. Delivery applies backpressure when the
//! consumer falls behind; frames are never dropped.
//!
//! There is no automatic reconnect. After the channel closes, open a new one.
//!
//! # Example
//!
//! ```rust,ignore
//! let (channel, mut frames) =
//!     ConnectionChannel::connect("ws://localhost:8080/ws", ChannelConfig::default());
//!
//! while let Some(frame) = frames.recv().await {
//!     println!("{frame}");
//! }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, warn};

use crate::error::{Result, RideTrackerError};
use crate::transport::{Outbound, Transport};

/// Default capacity of the bounded inbound frame channel.
const DEFAULT_MESSAGE_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Status ──────────────────────────────────────────────────────────

/// Externally observable state of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionStatus {
    /// The transport is being established.
    #[default]
    Connecting,
    /// Frames can be sent and received.
    Open,
    /// A close was requested and is in progress.
    Closing,
    /// The connection is gone. Terminal.
    Closed,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`ConnectionChannel`].
///
/// # Example
///
/// ```
/// use b3_ride_tracker::channel::ChannelConfig;
/// use std::time::Duration;
///
/// let config = ChannelConfig::default()
///     .with_message_channel_capacity(64)
///     .with_connect_timeout(Duration::from_secs(5));
/// assert_eq!(config.message_channel_capacity, 64);
/// ```
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Capacity of the bounded inbound frame channel.
    ///
    /// When full, the channel stops reading from the transport until the
    /// consumer catches up. Defaults to **256**. Values below 1 are clamped to 1.
    pub message_channel_capacity: usize,
    /// How long [`ConnectionChannel::shutdown`] waits for the close handshake
    /// before aborting the background task. Defaults to **1 second**.
    pub shutdown_timeout: Duration,
    /// Bound on establishing the connection. Defaults to none.
    pub connect_timeout: Option<Duration>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            message_channel_capacity: DEFAULT_MESSAGE_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            connect_timeout: None,
        }
    }
}

impl ChannelConfig {
    /// Set the capacity of the inbound frame channel. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_message_channel_capacity(mut self, capacity: usize) -> Self {
        self.message_channel_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

// ── Shared state ────────────────────────────────────────────────────

/// State shared between the handle and the channel loop.
struct ChannelState {
    status: watch::Sender<ConnectionStatus>,
    last_message: watch::Sender<Option<String>>,
}

impl ChannelState {
    fn new() -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Connecting);
        let (last_message, _) = watch::channel(None);
        Self {
            status,
            last_message,
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            debug!(from = %previous, to = %status, "channel status changed");
        }
    }
}

// ── Channel handle ──────────────────────────────────────────────────

/// Handle to a live connection.
///
/// Created via [`ConnectionChannel::open`] (or [`ConnectionChannel::connect`]),
/// which spawns the background loop and returns this handle together with
/// the receiver for inbound text frames.
pub struct ConnectionChannel {
    cmd_tx: mpsc::UnboundedSender<Outbound>,
    state: Arc<ChannelState>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl ConnectionChannel {
    /// Start the channel loop on the transport produced by `connect`.
    ///
    /// The status is `Connecting` until `connect` resolves, then `Open`. If
    /// `connect` fails the error is logged and the status becomes `Closed`.
    #[must_use = "the frame receiver must be used to receive frames"]
    pub fn open<F, T>(connect: F, config: ChannelConfig) -> (Self, mpsc::Receiver<String>)
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Transport,
    {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Outbound>();
        // tokio panics on a zero capacity.
        let capacity = config.message_channel_capacity.max(1);
        let (inbound_tx, inbound_rx) = mpsc::channel::<String>(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let state = Arc::new(ChannelState::new());
        let task = tokio::spawn(channel_loop(
            connect,
            cmd_rx,
            inbound_tx,
            Arc::clone(&state),
            shutdown_rx,
        ));

        let channel = Self {
            cmd_tx,
            state,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };

        (channel, inbound_rx)
    }

    /// Open a channel to the WebSocket endpoint at `url`.
    #[cfg(feature = "transport-websocket")]
    #[must_use = "the frame receiver must be used to receive frames"]
    pub fn connect(
        url: impl Into<String>,
        config: ChannelConfig,
    ) -> (Self, mpsc::Receiver<String>) {
        use crate::transports::WebSocketTransport;

        let url = url.into();
        let connect_timeout = config.connect_timeout;
        Self::open(
            async move {
                match connect_timeout {
                    Some(timeout) => WebSocketTransport::connect_with_timeout(&url, timeout).await,
                    None => WebSocketTransport::connect(&url).await,
                }
            },
            config,
        )
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        *self.state.status.borrow()
    }

    /// Subscribe to status changes.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.state.status.subscribe()
    }

    /// The most recently received text frame.
    pub fn last_message(&self) -> Option<String> {
        self.state.last_message.borrow().clone()
    }

    /// Queue a frame for sending.
    ///
    /// Nothing is queued or retried unless the channel is open.
    ///
    /// # Errors
    ///
    /// Returns [`RideTrackerError::NotOpen`] (and logs a warning) when the
    /// status is not `Open`.
    pub fn send(&self, payload: impl Into<Outbound>) -> Result<()> {
        let status = self.status();
        if !status.is_open() {
            warn!(%status, "cannot send, channel not open");
            return Err(RideTrackerError::NotOpen { status });
        }
        self.cmd_tx
            .send(payload.into())
            .map_err(|_| RideTrackerError::NotOpen {
                status: ConnectionStatus::Closed,
            })
    }

    /// Close the connection and stop the background task.
    ///
    /// The frame receiver yields `None` afterwards. Calling this more than
    /// once is harmless.
    pub async fn shutdown(&mut self) {
        debug!("ConnectionChannel: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("channel loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("channel loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("channel loop aborted: {join_err}");
                    }
                }
            }
        }

        self.state.set_status(ConnectionStatus::Closed);
    }
}

impl fmt::Debug for ConnectionChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionChannel")
            .field("status", &self.status())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for ConnectionChannel {
    fn drop(&mut self) {
        // No executor is available to drive a graceful close here.
        if let Some(task) = self.task.take() {
            task.abort();
            self.state.set_status(ConnectionStatus::Closed);
        }
    }
}

// ── Channel loop ────────────────────────────────────────────────────

/// Background loop: connect, then multiplex send/receive via `tokio::select!`.
///
/// Exits when:
/// - shutdown is requested or the handle is dropped
/// - the transport reports closure (`recv` returns `None`)
/// - the frame receiver is dropped
async fn channel_loop<F, T>(
    connect: F,
    mut cmd_rx: mpsc::UnboundedReceiver<Outbound>,
    inbound_tx: mpsc::Sender<String>,
    state: Arc<ChannelState>,
    mut shutdown_rx: oneshot::Receiver<()>,
) where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Transport,
{
    debug!("channel loop started");

    let mut transport = tokio::select! {
        connected = connect => match connected {
            Ok(transport) => transport,
            Err(e) => {
                error!("failed to open channel: {e}");
                state.set_status(ConnectionStatus::Closed);
                return;
            }
        },
        _ = &mut shutdown_rx => {
            debug!("shutdown requested while connecting");
            state.set_status(ConnectionStatus::Closed);
            return;
        }
    };

    state.set_status(ConnectionStatus::Open);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(frame) => {
                        debug!(len = frame.len(), "sending frame");
                        if let Err(e) = transport.send(frame).await {
                            error!("transport send error: {e}");
                        }
                    }
                    // Handle dropped.
                    None => {
                        debug!("command channel closed, closing transport");
                        close_transport(&mut transport, &state).await;
                        break;
                    }
                }
            }

            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                close_transport(&mut transport, &state).await;
                break;
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => {
                        state.last_message.send_replace(Some(text.clone()));
                        if inbound_tx.send(text).await.is_err() {
                            debug!("frame receiver dropped, closing transport");
                            close_transport(&mut transport, &state).await;
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                    }
                    None => {
                        debug!("transport closed by server");
                        state.set_status(ConnectionStatus::Closed);
                        break;
                    }
                }
            }
        }
    }

    debug!("channel loop exited");
}

async fn close_transport(transport: &mut impl Transport, state: &ChannelState) {
    state.set_status(ConnectionStatus::Closing);
    if let Err(e) = transport.close().await {
        warn!("transport close error: {e}");
    }
    state.set_status(ConnectionStatus::Closed);
}

// ── Tests ───────────────────────────────────────────────────────────

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
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Scripted transport: replays `incoming`, records sends.
    struct MockTransport {
        incoming: VecDeque<Option<std::result::Result<String, RideTrackerError>>>,
        sent: Arc<StdMutex<Vec<Outbound>>>,
        closed: Arc<AtomicBool>,
    }

    impl MockTransport {
        fn new(
            incoming: Vec<Option<std::result::Result<String, RideTrackerError>>>,
        ) -> (Self, Arc<StdMutex<Vec<Outbound>>>, Arc<AtomicBool>) {
            let sent = Arc::new(StdMutex::new(Vec::new()));
            let closed = Arc::new(AtomicBool::new(false));
            let transport = Self {
                incoming: VecDeque::from(incoming),
                sent: Arc::clone(&sent),
                closed: Arc::clone(&closed),
            };
            (transport, sent, closed)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, frame: Outbound) -> std::result::Result<(), RideTrackerError> {
            self.sent.lock().unwrap().push(frame);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, RideTrackerError>> {
            if let Some(item) = self.incoming.pop_front() {
                item
            } else {
                std::future::pending().await
            }
        }

        async fn close(&mut self) -> std::result::Result<(), RideTrackerError> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    fn open_mock(
        incoming: Vec<Option<std::result::Result<String, RideTrackerError>>>,
    ) -> (
        ConnectionChannel,
        mpsc::Receiver<String>,
        Arc<StdMutex<Vec<Outbound>>>,
        Arc<AtomicBool>,
    ) {
        let (transport, sent, closed) = MockTransport::new(incoming);
        let (channel, frames) =
            ConnectionChannel::open(async move { Ok(transport) }, ChannelConfig::default());
        (channel, frames, sent, closed)
    }

    async fn wait_for_status(channel: &ConnectionChannel, want: ConnectionStatus) {
        let mut rx = channel.watch_status();
        tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|s| *s == want))
            .await
            .expect("status change timed out")
            .expect("status sender dropped");
    }

    #[tokio::test]
    async fn frames_are_delivered_in_order() {
        let (mut channel, mut frames, _sent, _closed) = open_mock(vec![
            Some(Ok("one".into())),
            Some(Ok("two".into())),
            Some(Ok("three".into())),
        ]);

        assert_eq!(frames.recv().await.unwrap(), "one");
        assert_eq!(frames.recv().await.unwrap(), "two");
        assert_eq!(frames.recv().await.unwrap(), "three");
        assert_eq!(channel.last_message().as_deref(), Some("three"));

        channel.shutdown().await;
    }

    #[tokio::test]
    async fn last_message_survives_shutdown() {
        let (mut channel, mut frames, _sent, _closed) =
            open_mock(vec![Some(Ok("first".into()))]);
        wait_for_status(&channel, ConnectionStatus::Open).await;

        assert_eq!(frames.recv().await.unwrap(), "first");
        assert_eq!(channel.last_message().as_deref(), Some("first"));

        channel.shutdown().await;
        // Still readable after the channel has closed.
        assert_eq!(channel.last_message().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn status_is_connecting_until_transport_resolves() {
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (transport, _sent, _closed) = MockTransport::new(vec![]);
        let (mut channel, _frames) = ConnectionChannel::open(
            async move {
                let _ = release_rx.await;
                Ok(transport)
            },
            ChannelConfig::default(),
        );

        assert_eq!(channel.status(), ConnectionStatus::Connecting);
        release_tx.send(()).unwrap();
        wait_for_status(&channel, ConnectionStatus::Open).await;

        channel.shutdown().await;
        assert_eq!(channel.status(), ConnectionStatus::Closed);
    }

    #[tokio::test]
    async fn failed_connect_closes_channel() {
        let (channel, mut frames) = ConnectionChannel::open(
            async { Err::<MockTransport, _>(RideTrackerError::Timeout) },
            ChannelConfig::default(),
        );
        assert!(frames.recv().await.is_none());
        wait_for_status(&channel, ConnectionStatus::Closed).await;
    }

    #[tokio::test]
    async fn send_while_not_open_is_rejected_without_queueing() {
        let (_release_tx, release_rx) = oneshot::channel::<()>();
        let (transport, sent, _closed) = MockTransport::new(vec![]);
        let (mut channel, _frames) = ConnectionChannel::open(
            async move {
                let _ = release_rx.await;
                Ok(transport)
            },
            ChannelConfig::default(),
        );

        let err = channel.send("hello").unwrap_err();
        assert!(matches!(
            err,
            RideTrackerError::NotOpen {
                status: ConnectionStatus::Connecting
            }
        ));

        channel.shutdown().await;
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_when_open_reaches_transport() {
        let (mut channel, _frames, sent, _closed) = open_mock(vec![]);
        wait_for_status(&channel, ConnectionStatus::Open).await;

        channel.send("ping").unwrap();
        channel.send(vec![0u8, 1, 2]).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        {
            let sent = sent.lock().unwrap();
            assert_eq!(
                *sent,
                vec![Outbound::Text("ping".into()), Outbound::Binary(vec![0, 1, 2])]
            );
        }

        channel.shutdown().await;
    }

    #[tokio::test]
    async fn receive_error_is_logged_and_stream_continues() {
        let (mut channel, mut frames, _sent, _closed) = open_mock(vec![
            Some(Ok("before".into())),
            Some(Err(RideTrackerError::TransportReceive("blip".into()))),
            Some(Ok("after".into())),
        ]);

        assert_eq!(frames.recv().await.unwrap(), "before");
        assert_eq!(frames.recv().await.unwrap(), "after");
        assert_eq!(channel.status(), ConnectionStatus::Open);

        channel.shutdown().await;
    }

    #[tokio::test]
    async fn server_close_sets_closed_and_ends_stream() {
        let (channel, mut frames, _sent, _closed) =
            open_mock(vec![Some(Ok("last".into())), None]);

        assert_eq!(frames.recv().await.unwrap(), "last");
        assert!(frames.recv().await.is_none());
        assert_eq!(channel.status(), ConnectionStatus::Closed);
        assert!(channel.send("late").is_err());
    }

    #[tokio::test]
    async fn shutdown_closes_transport_once_and_is_idempotent() {
        let (mut channel, mut frames, _sent, closed) = open_mock(vec![]);
        wait_for_status(&channel, ConnectionStatus::Open).await;

        channel.shutdown().await;
        channel.shutdown().await;

        assert!(closed.load(Ordering::Relaxed));
        assert_eq!(channel.status(), ConnectionStatus::Closed);
        assert!(frames.recv().await.is_none());
    }

    #[tokio::test]
    async fn slow_consumer_gets_every_frame() {
        let incoming = (0..20).map(|i| Some(Ok(format!("f{i}")))).collect();
        let (transport, _sent, _closed) = MockTransport::new(incoming);
        let (mut channel, mut frames) = ConnectionChannel::open(
            async move { Ok(transport) },
            ChannelConfig::default().with_message_channel_capacity(1),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        for i in 0..20 {
            assert_eq!(frames.recv().await.unwrap(), format!("f{i}"));
        }

        channel.shutdown().await;
    }

    #[test]
    fn config_defaults_and_clamping() {
        let config = ChannelConfig::default();
        assert_eq!(config.message_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert!(config.connect_timeout.is_none());
        assert_eq!(
            ChannelConfig::default()
                .with_message_channel_capacity(0)
                .message_channel_capacity,
            1
        );
    }

    #[test]
    fn status_strings() {
        assert_eq!(ConnectionStatus::Connecting.to_string(), "CONNECTING");
        assert_eq!(ConnectionStatus::Closed.as_str(), "CLOSED");
        assert!(ConnectionStatus::Open.is_open());
        assert!(!ConnectionStatus::Closing.is_open());
    }
}
