//! # cobot-logger
//!
//! Production-rate and liveness logger for networked cobot controllers.
//!
//! A controller's telemetry interface is polled for part counters; the
//! logger turns them into a rolling hourly rate, watches for stalled data
//! and stalled production, and files one sample per second under a
//! user-defined job in SQLite.
//!
//! ## Architecture
//!
//! ```text
//!  producer thread                         consumer (tokio)
//! ┌──────────────────┐   AcquisitionEvent  ┌───────────────────────────┐
//! │ AcquisitionLoop  │────────────────────▶│ Monitor                   │
//! │  connect / poll  │    (FIFO channel)   │  ├─ RateEstimator          │
//! │  throttle / retry│                     │  ├─ HealthMonitor          │
//! └────────┬─────────┘                     │  └─ SampleLog ──▶ SQLite   │
//!          │                               └───────────▲───────────────┘
//!          ▼                                           │ 1 Hz ticks
//!   TelemetryClient                           health / log / refresh
//! ```
//!
//! - **[`source`]**: telemetry client contract ([`TelemetryConnector`],
//!   [`TelemetryClient`]) and the reconnecting [`AcquisitionLoop`]
//! - **[`data`]**: pure derived state - [`RateEstimator`] and [`HealthMonitor`]
//! - **[`store`]**: the job-scoped [`SampleLog`] and CSV export
//! - **[`app`]**: the consumer - [`Monitor`] and its tick loop
//! - **[`events`]**: messages from producer to consumer
//! - **[`config`]**: layered [`Settings`]
//!
//! ## Usage
//!
//! ```
//! use std::time::{Duration, Instant};
//! use cobot_logger::RateEstimator;
//!
//! let mut rate = RateEstimator::default();
//! let t0 = Instant::now();
//! rate.update_at(100, t0);
//! rate.update_at(103, t0 + Duration::from_secs(30));
//! rate.update_at(106, t0 + Duration::from_secs(90));
//!
//! // 6 parts between the first and last increase, one minute apart
//! assert_eq!(rate.hourly_rate_at(t0 + Duration::from_secs(90)), 360.0);
//! ```
//!
//! ### Logging samples
//!
//! ```
//! use cobot_logger::{Monitor, MonitorConfig, SampleLog};
//! use cobot_logger::events::AcquisitionEvent;
//! use cobot_types::TelemetryFrame;
//!
//! let log = SampleLog::new_in_memory().unwrap();
//! let mut monitor = Monitor::new(log, MonitorConfig::default());
//! monitor.create_job("Line2_ValveCaps").unwrap();
//!
//! monitor.handle_event(AcquisitionEvent::Telemetry(TelemetryFrame::new(7, 2, 118, 3, 121)));
//! let sample = monitor.log_tick().unwrap().unwrap();
//! assert_eq!(sample.total, 121);
//! ```

pub mod app;
pub mod config;
pub mod data;
pub mod error;
pub mod events;
pub mod source;
pub mod store;

// Re-export main types for convenience
pub use app::{Kpis, Monitor, MonitorConfig, Snapshot};
pub use config::Settings;
pub use data::{HealthMonitor, HealthState, HealthStatus, HealthThresholds, RateEstimator};
pub use error::{ClientError, StoreError};
pub use source::{
    AcquisitionConfig, AcquisitionHandle, AcquisitionLoop, BridgeConnector, TelemetryClient,
    TelemetryConnector,
};
pub use store::SampleLog;
