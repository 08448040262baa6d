//! Telemetry acquisition from the cobot controller.
//!
//! This module defines the call contract of the telemetry client (the
//! black box that speaks the controller's wire protocol) and the
//! [`AcquisitionLoop`] that drives it: connect, poll, throttle, and
//! reconnect after any failure.
//!
//! ## Implementations
//!
//! - [`BridgeConnector`]: newline-delimited JSON frames from a telemetry
//!   bridge over TCP
//! - [`ScriptedConnector`]: deterministic, scripted behaviour for tests

pub mod acquisition;
mod bridge;
pub mod scripted;

pub use acquisition::{AcquisitionConfig, AcquisitionHandle, AcquisitionLoop, LinkPhase};
pub use bridge::{BridgeClient, BridgeConnector};
pub use scripted::{ScriptedConnector, ScriptedSession};

use cobot_types::{
    TelemetryFrame, ACCEPTED_REGISTER, REJECTED_REGISTER, TOTAL_REGISTER,
};

use tokio::sync::watch;

use crate::error::ClientError;

/// An open connection to the controller's telemetry interface.
///
/// Every call may fail with a transport error; callers treat all of them
/// as recoverable.
pub trait TelemetryClient {
    /// Current robot-mode code.
    fn get_robot_mode(&mut self) -> Result<i32, ClientError>;

    /// Current runtime-state code.
    fn get_runtime_state(&mut self) -> Result<i32, ClientError>;

    /// Value of an integer output register.
    fn get_output_register(&mut self, index: u32) -> Result<i64, ClientError>;

    /// Release the connection. Called exactly once per successful connect.
    fn disconnect(&mut self) -> Result<(), ClientError>;

    /// Read one complete frame: mode, runtime state and the three counters.
    fn read_frame(&mut self) -> Result<TelemetryFrame, ClientError> {
        let robot_mode = self.get_robot_mode()?;
        let runtime_state = self.get_runtime_state()?;
        let accepted = self.get_output_register(ACCEPTED_REGISTER)?;
        let rejected = self.get_output_register(REJECTED_REGISTER)?;
        let total = self.get_output_register(TOTAL_REGISTER)?;
        Ok(TelemetryFrame::new(
            robot_mode,
            runtime_state,
            accepted,
            rejected,
            total,
        ))
    }
}

/// Factory for telemetry clients.
///
/// The acquisition loop owns one connector for its whole lifetime and asks
/// it for a fresh client on every (re)connect.
pub trait TelemetryConnector: Send {
    /// Check once, before any connect attempt, that the client can be used
    /// at all. A failure here is reported once and never retried.
    fn check_available(&self) -> Result<(), ClientError> {
        Ok(())
    }

    /// Open a client for the device at `address`, polling at `frequency` Hz.
    ///
    /// A connector that may block for long must watch `stop` and return
    /// [`ClientError::Cancelled`] once it turns true.
    fn connect(
        &mut self,
        address: &str,
        frequency: f64,
        stop: &watch::Receiver<bool>,
    ) -> Result<Box<dyn TelemetryClient>, ClientError>;

    /// Returns a human-readable description of the connector.
    fn description(&self) -> &str;
}
