//! Telemetry frames - one polled snapshot of controller state.

use core::fmt;

/// Runtime-state code reported while a program is executing.
pub const RUNTIME_STATE_RUNNING: i32 = 2;

/// Output register holding the accepted-part counter.
pub const ACCEPTED_REGISTER: u32 = 0;

/// Output register holding the rejected-part counter.
pub const REJECTED_REGISTER: u32 = 1;

/// Output register holding the total-part counter.
pub const TOTAL_REGISTER: u32 = 2;

/// Controller robot mode, decoded from the raw mode code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RobotMode {
    NoController,
    Booting,
    Standby,
    Ready,
    Running,
    Paused,
    Error,
    /// A code this library does not know about.
    Other(i32),
}

impl RobotMode {
    /// Decode a raw robot-mode code.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => RobotMode::NoController,
            1 => RobotMode::Booting,
            2 => RobotMode::Standby,
            3 => RobotMode::Ready,
            4 => RobotMode::Running,
            5 => RobotMode::Paused,
            6 => RobotMode::Error,
            other => RobotMode::Other(other),
        }
    }
}

impl fmt::Display for RobotMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RobotMode::NoController => f.write_str("NO CTRL"),
            RobotMode::Booting => f.write_str("BOOT"),
            RobotMode::Standby => f.write_str("STANDBY"),
            RobotMode::Ready => f.write_str("READY"),
            RobotMode::Running => f.write_str("RUNNING"),
            RobotMode::Paused => f.write_str("PAUSED"),
            RobotMode::Error => f.write_str("ERROR"),
            RobotMode::Other(code) => write!(f, "MODE {}", code),
        }
    }
}

/// A single polled snapshot of controller state.
///
/// Frames are transient: they travel from the acquisition loop to the
/// consumer and are never persisted as-is.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TelemetryFrame {
    /// Raw robot-mode code.
    pub robot_mode: i32,

    /// Raw runtime-state code.
    pub runtime_state: i32,

    /// Accepted-part counter register.
    pub accepted: i64,

    /// Rejected-part counter register.
    pub rejected: i64,

    /// Total-part counter register, 0 when the program does not maintain it.
    pub total_register: i64,

    /// Unix timestamp in milliseconds when this frame was captured.
    pub captured_at_ms: u64,
}

impl TelemetryFrame {
    /// Create a frame captured now.
    pub fn new(
        robot_mode: i32,
        runtime_state: i32,
        accepted: i64,
        rejected: i64,
        total_register: i64,
    ) -> Self {
        Self {
            robot_mode,
            runtime_state,
            accepted,
            rejected,
            total_register,
            captured_at_ms: crate::current_timestamp_ms(),
        }
    }

    /// The total-part count.
    ///
    /// A zero total register means the controller program does not report a
    /// total, in which case it is accepted + rejected.
    pub fn total(&self) -> i64 {
        if self.total_register != 0 {
            self.total_register
        } else {
            self.accepted.saturating_add(self.rejected)
        }
    }

    /// Decoded robot mode.
    pub fn mode(&self) -> RobotMode {
        RobotMode::from_code(self.robot_mode)
    }

    /// Whether the controller reports a program as executing.
    pub fn is_running(&self) -> bool {
        self.runtime_state == RUNTIME_STATE_RUNNING
    }

    /// Short status line, e.g. `RUNNING • READY` or `IDLE • PAUSED`.
    pub fn status_line(&self) -> String {
        let run = if self.is_running() { "RUNNING" } else { "IDLE" };
        format!("{} • {}", run, self.mode())
    }
}
