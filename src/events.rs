//! Notifications passed from the acquisition loop to the consumer.
//!
//! The producer never touches consumer state directly; it only sends these
//! immutable values through an unbounded FIFO channel.

use cobot_types::TelemetryFrame;
use tokio::sync::mpsc;

/// Connected flag plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub connected: bool,
    pub message: String,
}

impl ConnectionState {
    pub fn connected() -> Self {
        Self {
            connected: true,
            message: "Connected".to_string(),
        }
    }

    pub fn disconnected(message: impl Into<String>) -> Self {
        Self {
            connected: false,
            message: message.into(),
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::disconnected("Disconnected")
    }
}

/// A single notification from the acquisition loop.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionEvent {
    /// The link to the device came up or went down.
    Connection(ConnectionState),
    /// A throttled telemetry frame.
    Telemetry(TelemetryFrame),
}

impl AcquisitionEvent {
    /// Returns true for a connection notification with `connected == true`.
    pub fn is_connected(&self) -> bool {
        matches!(self, AcquisitionEvent::Connection(state) if state.connected)
    }

    /// Returns true for a connection notification with `connected == false`.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, AcquisitionEvent::Connection(state) if !state.connected)
    }
}

pub type EventSender = mpsc::UnboundedSender<AcquisitionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<AcquisitionEvent>;

/// Create the producer/consumer channel.
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
