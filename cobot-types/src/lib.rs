//! # cobot-types
//!
//! Core types shared by the cobot production logger. A controller is polled
//! for [`TelemetryFrame`]s; the logger derives [`Sample`]s from them and files
//! those samples under a user-defined [`Job`].
//!
//! ## Features
//!
//! - `serde`: JSON (or any serde format) serialization of every type
//!
//! ## Example
//!
//! ```rust
//! use cobot_types::{RobotMode, TelemetryFrame};
//!
//! let frame = TelemetryFrame::new(4, 2, 40, 2, 0);
//!
//! // A zero total register counts as "not reported"
//! assert_eq!(frame.total(), 42);
//! assert!(frame.is_running());
//! assert_eq!(frame.mode(), RobotMode::Running);
//! ```

mod frame;
mod job;

pub use frame::*;
pub use job::*;

/// Milliseconds since the Unix epoch, or 0 if the clock is before it.
pub fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
