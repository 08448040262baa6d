//! The reconnecting acquisition loop.
//!
//! ```text
//!  DISCONNECTED ──▶ CONNECTING ──ok──▶ STREAMING
//!                      ▲   │               │
//!                      │   └─fail─┐  read failure
//!                      │          ▼        │
//!                      └────── BACKOFF ◀───┘
//! ```
//!
//! A stop request ends the loop from any state. The device handle is
//! released on every exit from STREAMING, including read failures.

use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use super::{TelemetryClient, TelemetryConnector};
use crate::data::duration::format_duration;
use crate::error::ClientError;
use crate::events::{AcquisitionEvent, ConnectionState, EventSender};

/// Delay between polls of an open connection.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Minimum spacing between two forwarded frames.
pub const DEFAULT_EMIT_INTERVAL: Duration = Duration::from_millis(100);

/// Fixed delay before a reconnect attempt.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(1500);

/// Connection parameters and pacing for the acquisition loop.
#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    /// Device address handed to the connector.
    pub address: String,
    /// Polling frequency requested from the telemetry client, in Hz.
    pub frequency_hz: f64,
    pub poll_interval: Duration,
    pub emit_interval: Duration,
    pub backoff: Duration,
}

impl AcquisitionConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            frequency_hz: 10.0,
            poll_interval: DEFAULT_POLL_INTERVAL,
            emit_interval: DEFAULT_EMIT_INTERVAL,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

/// Where the loop currently is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Disconnected,
    Connecting,
    Streaming,
    Backoff,
}

impl LinkPhase {
    pub fn label(&self) -> &'static str {
        match self {
            LinkPhase::Disconnected => "disconnected",
            LinkPhase::Connecting => "connecting",
            LinkPhase::Streaming => "streaming",
            LinkPhase::Backoff => "backoff",
        }
    }
}

/// Why a streaming session ended.
enum SessionEnd {
    Stopped,
    Failed(ClientError),
}

/// Releases the device handle however the session ends.
struct Session {
    client: Box<dyn TelemetryClient>,
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.client.disconnect() {
            debug!("Telemetry disconnect failed: {}", err);
        }
    }
}

/// Producer side of the pipeline.
///
/// Owns the connector (and through it the device handle) and forwards
/// [`AcquisitionEvent`]s to the consumer. Runs on a dedicated thread since
/// the telemetry client blocks on network I/O.
pub struct AcquisitionLoop<C> {
    connector: C,
    config: AcquisitionConfig,
    events: EventSender,
    stop: watch::Receiver<bool>,
    phase: LinkPhase,
}

impl<C: TelemetryConnector> AcquisitionLoop<C> {
    /// Create a loop together with the sender that stops it.
    pub fn new(
        connector: C,
        config: AcquisitionConfig,
        events: EventSender,
    ) -> (Self, watch::Sender<bool>) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let this = Self {
            connector,
            config,
            events,
            stop: stop_rx,
            phase: LinkPhase::Disconnected,
        };
        (this, stop_tx)
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> LinkPhase {
        self.phase
    }

    /// Run until a stop is requested, the consumer goes away, or the client
    /// turns out to be unavailable.
    pub fn run(&mut self) {
        if let Err(err) = self.connector.check_available() {
            self.report_unavailable(&err);
            return;
        }

        while !self.stop_requested() {
            self.transition(LinkPhase::Connecting);
            let outcome = match self.connector.connect(
                &self.config.address,
                self.config.frequency_hz,
                &self.stop,
            ) {
                Ok(client) => {
                    let mut session = Session { client };
                    info!(
                        "Connected to {} via {}",
                        self.config.address,
                        self.connector.description()
                    );
                    if !self.emit(AcquisitionEvent::Connection(ConnectionState::connected())) {
                        break;
                    }
                    self.transition(LinkPhase::Streaming);
                    self.stream(&mut session)
                }
                Err(ClientError::Cancelled) => SessionEnd::Stopped,
                Err(err) => SessionEnd::Failed(err),
            };

            match outcome {
                SessionEnd::Stopped => break,
                SessionEnd::Failed(err @ ClientError::Unavailable(_)) => {
                    self.report_unavailable(&err);
                    break;
                }
                SessionEnd::Failed(err) => {
                    warn!(
                        "Telemetry link to {} failed: {}; reconnecting in {}",
                        self.config.address,
                        err,
                        format_duration(self.config.backoff)
                    );
                    let message = format!("reconnecting: {}", err);
                    if !self.emit(AcquisitionEvent::Connection(ConnectionState::disconnected(
                        message,
                    ))) {
                        break;
                    }
                }
            }

            self.transition(LinkPhase::Backoff);
            if !self.pause(self.config.backoff) {
                break;
            }
        }

        self.transition(LinkPhase::Disconnected);
        debug!("Acquisition loop for {} exited", self.config.address);
    }

    /// Spawn a loop on its own thread and return the handle that stops it.
    pub fn start(
        connector: C,
        config: AcquisitionConfig,
        events: EventSender,
    ) -> std::io::Result<AcquisitionHandle>
    where
        C: 'static,
    {
        let (mut acquisition, stop_tx) = Self::new(connector, config, events);
        let (done_tx, done_rx) = oneshot::channel();
        let thread = thread::Builder::new()
            .name("acquisition".to_string())
            .spawn(move || {
                let _done = DoneSignal(Some(done_tx));
                acquisition.run();
            })?;

        Ok(AcquisitionHandle {
            stop_tx,
            done_rx,
            thread,
        })
    }

    /// Poll the open session until stopped or a read fails.
    fn stream(&mut self, session: &mut Session) -> SessionEnd {
        let mut last_emit: Option<Instant> = None;

        while !self.stop_requested() {
            let frame = match session.client.read_frame() {
                Ok(frame) => frame,
                Err(err) => return SessionEnd::Failed(err),
            };

            let now = Instant::now();
            let due = last_emit
                .map_or(true, |at| now.duration_since(at) >= self.config.emit_interval);
            if due {
                if !self.emit(AcquisitionEvent::Telemetry(frame)) {
                    return SessionEnd::Stopped;
                }
                last_emit = Some(now);
            }

            thread::sleep(self.config.poll_interval);
        }

        SessionEnd::Stopped
    }

    /// Sleep for `total`, waking every poll interval to honour a stop.
    /// Returns false if a stop was requested.
    fn pause(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        loop {
            if self.stop_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(self.config.poll_interval));
        }
    }

    /// One notification, no retry.
    fn report_unavailable(&self, err: &ClientError) {
        warn!("{}; acquisition will not retry", err);
        self.emit(AcquisitionEvent::Connection(ConnectionState::disconnected(
            err.to_string(),
        )));
    }

    fn stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    /// Returns false once the consumer has gone away.
    fn emit(&self, event: AcquisitionEvent) -> bool {
        if self.events.send(event).is_err() {
            debug!("Event receiver dropped, stopping acquisition");
            return false;
        }
        true
    }

    fn transition(&mut self, next: LinkPhase) {
        if self.phase != next {
            debug!("Acquisition {} -> {}", self.phase.label(), next.label());
            self.phase = next;
        }
    }
}

/// Fires when the acquisition thread exits, even by panic.
struct DoneSignal(Option<oneshot::Sender<()>>);

impl Drop for DoneSignal {
    fn drop(&mut self) {
        if let Some(tx) = self.0.take() {
            // The handle may already have given up waiting.
            tx.send(()).ok();
        }
    }
}

/// Handle for stopping a spawned acquisition loop.
pub struct AcquisitionHandle {
    stop_tx: watch::Sender<bool>,
    done_rx: oneshot::Receiver<()>,
    thread: thread::JoinHandle<()>,
}

impl AcquisitionHandle {
    /// Whether the acquisition thread has already exited.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Request a stop and wait up to `grace` for the thread to confirm.
    ///
    /// Returns false if confirmation did not arrive in time; the thread is
    /// then left to finish on its own.
    pub async fn shutdown(self, grace: Duration) -> bool {
        if self.stop_tx.send(true).is_err() {
            debug!("Acquisition loop already stopped");
        }

        match tokio::time::timeout(grace, self.done_rx).await {
            Ok(_) => {
                if self.thread.join().is_err() {
                    warn!("Acquisition thread panicked");
                }
                true
            }
            Err(_) => false,
        }
    }
}
