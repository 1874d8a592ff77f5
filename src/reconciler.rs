//! The reconciling session.
//!
//! [`RideReconciler`] owns a [`ConnectionChannel`] and a [`RideApi`] and runs
//! one background task that is the only writer of the [`RideView`]. Inbound
//! frames are decoded and applied one at a time in arrival order. Fetches run
//! as separate tasks whose results come back to the same loop, so every
//! mutation happens on one sequential path.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = TrackerConfig::from_env();
//! let mut session = RideReconciler::connect(config)?;
//! let mut view = session.subscribe();
//!
//! while view.changed().await.is_ok() {
//!     let snapshot = view.borrow_and_update().clone();
//!     if let Some(point) = snapshot.latest_point() {
//!         println!("{:.5}, {:.5}", point.latitude, point.longitude);
//!     }
//! }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::RideApi;
use crate::channel::{ConnectionChannel, ConnectionStatus};
use crate::decoder::{DecodedEvent, EventDecoder};
use crate::error::{Result, RideTrackerError};
use crate::fallback::fetch_latest_ride;
use crate::protocol::{RideDetail, RideId, RideListQuery, RideSummary};
use crate::transport::Outbound;
use crate::view::RideView;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`RideReconciler`].
///
/// # Example
///
/// ```
/// use b3_ride_tracker::protocol::RideListQuery;
/// use b3_ride_tracker::reconciler::ReconcilerConfig;
///
/// let config = ReconcilerConfig::default()
///     .with_initial_query(RideListQuery::new(1, 20))
///     .with_fetch_fallback_on_start(false);
/// assert_eq!(config.initial_query.limit, 20);
/// ```
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// The ride list query issued at start. Defaults to page 1, limit 50.
    pub initial_query: RideListQuery,
    /// Whether to fetch the latest ride from history at start while nothing
    /// live has arrived. Defaults to `true`.
    pub fetch_fallback_on_start: bool,
    /// How long [`RideReconciler::shutdown`] waits for the session task before
    /// aborting it. Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            initial_query: RideListQuery::default(),
            fetch_fallback_on_start: true,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl ReconcilerConfig {
    #[must_use]
    pub fn with_initial_query(mut self, query: RideListQuery) -> Self {
        self.initial_query = query;
        self
    }

    #[must_use]
    pub fn with_fetch_fallback_on_start(mut self, enabled: bool) -> Self {
        self.fetch_fallback_on_start = enabled;
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

// ── Messages ────────────────────────────────────────────────────────

/// Requests from the handle to the session loop.
enum Command {
    RetryFallback { reply: oneshot::Sender<bool> },
    QueryRides {
        query: RideListQuery,
        reply: oneshot::Sender<bool>,
    },
    FocusRide { ride_id: Option<RideId> },
}

/// Results of fetch tasks.
enum Completion {
    Fallback(Result<Option<RideDetail>>),
    RideList {
        query: RideListQuery,
        result: Result<Vec<RideSummary>>,
    },
    Detail {
        ride_id: RideId,
        result: Result<RideDetail>,
    },
}

// ── Handle ──────────────────────────────────────────────────────────

/// Handle to a running reconciling session.
///
/// Created via [`RideReconciler::start`] (or [`RideReconciler::connect`]).
/// Dropping the handle aborts the session task and every fetch it started.
pub struct RideReconciler {
    channel: ConnectionChannel,
    cmd_tx: mpsc::UnboundedSender<Command>,
    view_tx: Arc<watch::Sender<RideView>>,
    view_rx: watch::Receiver<RideView>,
    task: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
    closed: bool,
}

impl RideReconciler {
    /// Start a session over an open `channel` and its frame receiver.
    ///
    /// The initial ride list query is issued immediately, as is the fallback
    /// fetch when enabled.
    pub fn start(
        channel: ConnectionChannel,
        inbound: mpsc::Receiver<String>,
        api: Arc<dyn RideApi>,
        config: ReconcilerConfig,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let mut initial = RideView::new(config.initial_query.clone());
        initial.status = channel.status();
        let (view_tx, view_rx) = watch::channel(initial);
        let view_tx = Arc::new(view_tx);

        let session = Session {
            api,
            view: Arc::clone(&view_tx),
            decoder: EventDecoder::new(),
            done_tx,
            fetches: Fetches::default(),
        };
        let task = tokio::spawn(session_loop(
            session,
            Inputs {
                cmd_rx,
                inbound,
                status_rx: channel.watch_status(),
                done_rx,
                shutdown_rx,
            },
            config.clone(),
        ));

        Self {
            channel,
            cmd_tx,
            view_tx,
            view_rx,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
            closed: false,
        }
    }

    /// Connect to the backend described by `config` over WebSocket and HTTP.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built. Connection
    /// failures are reported through [`status`](Self::status), not here.
    #[cfg(all(feature = "transport-websocket", feature = "http-api"))]
    pub fn connect(config: crate::config::TrackerConfig) -> Result<Self> {
        let api = crate::api::HttpRideApi::new(config.api)?;
        let (channel, inbound) = ConnectionChannel::connect(config.ws_url, config.channel);
        Ok(Self::start(channel, inbound, Arc::new(api), config.reconciler))
    }

    /// A snapshot of the current view.
    pub fn view(&self) -> RideView {
        self.view_rx.borrow().clone()
    }

    /// A receiver notified after every change to the view.
    pub fn subscribe(&self) -> watch::Receiver<RideView> {
        self.view_rx.clone()
    }

    /// The live channel's status.
    pub fn status(&self) -> ConnectionStatus {
        self.channel.status()
    }

    /// Send a frame over the live channel.
    ///
    /// # Errors
    ///
    /// Returns [`RideTrackerError::SessionClosed`] after shutdown and
    /// [`RideTrackerError::NotOpen`] while the channel is not open.
    pub fn send(&self, payload: impl Into<Outbound>) -> Result<()> {
        if self.closed {
            return Err(RideTrackerError::SessionClosed);
        }
        self.channel.send(payload)
    }

    /// Fetch the fallback ride again after a failed attempt.
    ///
    /// Returns `Ok(false)` if the fallback is not in the failed state, or
    /// if live data has arrived since.
    ///
    /// # Errors
    ///
    /// Returns [`RideTrackerError::SessionClosed`] after shutdown.
    pub async fn retry_fallback(&self) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::RetryFallback { reply })?;
        rx.await.map_err(|_| RideTrackerError::SessionClosed)
    }

    /// Replace the ride list with the result of `query`.
    ///
    /// Returns `Ok(false)` (and logs a warning) if a list query is already
    /// in flight.
    ///
    /// # Errors
    ///
    /// Returns [`RideTrackerError::SessionClosed`] after shutdown.
    pub async fn query_rides(&self, query: RideListQuery) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::QueryRides { query, reply })?;
        rx.await.map_err(|_| RideTrackerError::SessionClosed)
    }

    /// Follow one ride's detail, or stop following with `None`.
    ///
    /// # Errors
    ///
    /// Returns [`RideTrackerError::SessionClosed`] after shutdown.
    pub fn focus_ride(&self, ride_id: Option<RideId>) -> Result<()> {
        self.command(Command::FocusRide { ride_id })
    }

    /// Stop the session task, then close the channel.
    ///
    /// In-flight fetches are abandoned; their results are never applied, and
    /// frames still arriving while the channel closes are not decoded. The
    /// final `Closed` status is the last change published. Calling this more
    /// than once is harmless.
    pub async fn shutdown(&mut self) {
        debug!("RideReconciler: shutdown requested");
        self.closed = true;

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("session loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("session loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("session loop aborted: {join_err}");
                    }
                }
            }
        }

        // The loop is gone; only the handle writes the view from here on.
        self.channel.shutdown().await;
        let status = self.channel.status();
        self.view_tx.send_if_modified(|view| {
            if view.status == status {
                return false;
            }
            view.status = status;
            true
        });
    }

    fn command(&self, cmd: Command) -> Result<()> {
        if self.closed {
            return Err(RideTrackerError::SessionClosed);
        }
        self.cmd_tx
            .send(cmd)
            .map_err(|_| RideTrackerError::SessionClosed)
    }
}

impl std::fmt::Debug for RideReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RideReconciler")
            .field("status", &self.status())
            .field("closed", &self.closed)
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for RideReconciler {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Session loop ────────────────────────────────────────────────────

struct Inputs {
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    inbound: mpsc::Receiver<String>,
    status_rx: watch::Receiver<ConnectionStatus>,
    done_rx: mpsc::UnboundedReceiver<Completion>,
    shutdown_rx: oneshot::Receiver<()>,
}

/// Fetch tasks owned by the session. Aborted when dropped.
#[derive(Default)]
struct Fetches {
    fallback: Option<JoinHandle<()>>,
    list: Option<JoinHandle<()>>,
    detail: Option<JoinHandle<()>>,
}

impl Fetches {
    fn abort_all(&mut self) {
        for handle in [&mut self.fallback, &mut self.list, &mut self.detail] {
            if let Some(task) = handle.take() {
                task.abort();
            }
        }
    }
}

impl Drop for Fetches {
    fn drop(&mut self) {
        self.abort_all();
    }
}

struct Session {
    api: Arc<dyn RideApi>,
    view: Arc<watch::Sender<RideView>>,
    decoder: EventDecoder,
    done_tx: mpsc::UnboundedSender<Completion>,
    fetches: Fetches,
}

/// Background loop: the single writer of the view.
///
/// Exits when shutdown is requested or the handle is dropped. The end of the
/// inbound stream does not stop it; queries keep working on a closed channel.
async fn session_loop(mut session: Session, mut inputs: Inputs, config: ReconcilerConfig) {
    debug!("session loop started");

    session.sync_status(&mut inputs.status_rx);
    if config.fetch_fallback_on_start {
        session.maybe_start_fallback();
    }
    session.start_list_query(config.initial_query);

    let mut inbound_open = true;
    let mut status_open = true;

    loop {
        tokio::select! {
            _ = &mut inputs.shutdown_rx => {
                debug!("shutdown signal received");
                break;
            }

            cmd = inputs.cmd_rx.recv() => {
                match cmd {
                    Some(cmd) => session.handle_command(cmd),
                    None => {
                        debug!("command channel closed");
                        break;
                    }
                }
            }

            frame = inputs.inbound.recv(), if inbound_open => {
                match frame {
                    Some(raw) => session.handle_frame(&raw),
                    None => {
                        debug!("inbound stream ended");
                        inbound_open = false;
                    }
                }
            }

            Some(done) = inputs.done_rx.recv() => {
                session.handle_completion(done);
            }

            changed = inputs.status_rx.changed(), if status_open => {
                match changed {
                    Ok(()) => session.sync_status(&mut inputs.status_rx),
                    Err(_) => status_open = false,
                }
            }
        }
    }

    session.fetches.abort_all();
    debug!("session loop exited");
}

impl Session {
    fn sync_status(&self, status_rx: &mut watch::Receiver<ConnectionStatus>) {
        let status = *status_rx.borrow_and_update();
        self.view.send_if_modified(|view| {
            if view.status == status {
                return false;
            }
            view.status = status;
            true
        });
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::RetryFallback { reply } => {
                let rearmed = self.view.send_if_modified(|view| view.fallback.retry());
                if rearmed {
                    self.maybe_start_fallback();
                } else {
                    debug!("fallback retry ignored, no failed attempt to retry");
                }
                let _ = reply.send(rearmed);
            }
            Command::QueryRides { query, reply } => {
                let _ = reply.send(self.start_list_query(query));
            }
            Command::FocusRide { ride_id } => self.focus_ride(ride_id),
        }
    }

    fn handle_frame(&mut self, raw: &str) {
        let event = match self.decoder.decode(raw).map_err(RideTrackerError::from) {
            Ok(event) => event,
            Err(e) => {
                warn!(len = raw.len(), "dropping frame: {e}");
                return;
            }
        };
        if let DecodedEvent::Unrecognized { kind } = &event {
            debug!(%kind, "ignoring unrecognized event");
            return;
        }

        let mut superseded = false;
        self.view.send_if_modified(|view| {
            let mut changed = false;
            if event.is_live_signal() && view.fallback.supersede() {
                superseded = true;
                changed = true;
            }
            changed |= view.ride.apply(&event).is_change();
            changed |= view.rides.apply(&event).is_change();
            changed |= view.detail.apply(&event);
            changed |= align_end_times(view);
            changed
        });

        if superseded {
            if let Some(task) = self.fetches.fallback.take() {
                task.abort();
            }
        }
    }

    fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::Fallback(result) => {
                self.fetches.fallback = None;
                self.view
                    .send_if_modified(|view| view.fallback.complete(result));
            }
            Completion::RideList { query, result } => {
                let accepted = self.view.send_if_modified(|view| {
                    let accepted = view.rides.complete_query(&query, result);
                    if accepted {
                        align_end_times(view);
                    }
                    accepted
                });
                if accepted {
                    self.fetches.list = None;
                }
            }
            Completion::Detail { ride_id, result } => {
                let accepted = self
                    .view
                    .send_if_modified(|view| view.detail.complete(ride_id, result));
                if accepted {
                    self.fetches.detail = None;
                }
            }
        }
    }

    fn maybe_start_fallback(&mut self) {
        let started = self
            .view
            .send_if_modified(|view| view.fallback.begin(&view.ride));
        if !started {
            return;
        }
        let api = Arc::clone(&self.api);
        self.fetches.fallback = Some(self.spawn_fetch(async move {
            Completion::Fallback(fetch_latest_ride(api.as_ref()).await)
        }));
    }

    fn start_list_query(&mut self, query: RideListQuery) -> bool {
        let accepted = self
            .view
            .send_if_modified(|view| view.rides.begin_query(query.clone()));
        if !accepted {
            warn!(page = query.page, limit = query.limit, "ride list query already in flight, rejecting");
            return false;
        }
        let api = Arc::clone(&self.api);
        self.fetches.list = Some(self.spawn_fetch(async move {
            let result = api.list_rides(&query).await;
            Completion::RideList { query, result }
        }));
        true
    }

    fn focus_ride(&mut self, ride_id: Option<RideId>) {
        let mut needs_fetch = false;
        let changed = self.view.send_if_modified(|view| {
            let previous = view.detail.focus();
            needs_fetch = view.detail.set_focus(ride_id);
            needs_fetch || previous != view.detail.focus()
        });
        if !changed {
            return;
        }
        if let Some(task) = self.fetches.detail.take() {
            task.abort();
        }
        if let (true, Some(ride_id)) = (needs_fetch, ride_id) {
            let api = Arc::clone(&self.api);
            self.fetches.detail = Some(self.spawn_fetch(async move {
                let result = api.ride_detail(ride_id).await;
                Completion::Detail { ride_id, result }
            }));
        }
    }

    fn spawn_fetch<F>(&self, fetch: F) -> JoinHandle<()>
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            // The loop may already be gone.
            let _ = done_tx.send(fetch.await);
        })
    }
}

/// Make the list and the reducer agree on whether the current ride has
/// ended. An end time known to either side is copied to the other.
fn align_end_times(view: &mut RideView) -> bool {
    let Some(ride) = view.ride.current_ride() else {
        return false;
    };
    let (ride_id, own_end) = (ride.id, ride.end_time);
    let Some(listed_end) = view.rides.get(ride_id).map(|r| r.end_time) else {
        return false;
    };
    match (own_end, listed_end) {
        (Some(end), None) => view.rides.mark_ended(ride_id, end),
        (None, Some(end)) => view.ride.adopt_end_time(ride_id, end),
        _ => false,
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
    use crate::protocol::Position;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn config_defaults() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.initial_query, RideListQuery::new(1, 50));
        assert!(config.fetch_fallback_on_start);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
    }

    #[test]
    fn align_copies_reducer_end_time_to_list() {
        let mut view = RideView::default();
        let query = RideListQuery::default();
        view.rides.begin_query(query.clone());
        view.rides
            .complete_query(&query, Ok(vec![RideSummary::new(5, "r", at(0))]));
        view.ride.apply(&DecodedEvent::RideStarted {
            ride: RideSummary::new(5, "r", at(0)),
            initial_position: Position::new(0.0, 0.0, at(0)),
        });
        view.ride.adopt_end_time(5, at(60));

        assert!(align_end_times(&mut view));
        assert_eq!(view.rides.get(5).unwrap().end_time, Some(at(60)));
        assert!(!align_end_times(&mut view));
    }

    #[test]
    fn align_copies_listed_end_time_to_reducer() {
        let mut view = RideView::default();
        view.ride.apply(&DecodedEvent::RideStarted {
            ride: RideSummary::new(5, "r", at(0)),
            initial_position: Position::new(0.0, 0.0, at(0)),
        });
        let query = RideListQuery::default();
        let mut listed = RideSummary::new(5, "r", at(0));
        listed.mark_ended(at(90));
        view.rides.begin_query(query.clone());
        view.rides.complete_query(&query, Ok(vec![listed]));

        assert!(align_end_times(&mut view));
        assert_eq!(view.ride.current_ride().unwrap().end_time, Some(at(90)));
    }

    #[test]
    fn align_without_listed_ride_is_noop() {
        let mut view = RideView::default();
        view.ride.apply(&DecodedEvent::RideStarted {
            ride: RideSummary::new(5, "r", at(0)),
            initial_position: Position::new(0.0, 0.0, at(0)),
        });
        view.ride.adopt_end_time(5, at(60));
        assert!(!align_end_times(&mut view));
    }
}
