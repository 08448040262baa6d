//! Derived state computed from telemetry.
//!
//! Everything here is pure: no I/O, no clocks read behind the caller's
//! back in the `*_at` variants.
//!
//! ## Submodules
//!
//! - [`duration`]: Parsing and formatting of duration strings (e.g., "5s", "800ms")
//! - [`rate`]: Sliding-window hourly rate ([`RateEstimator`])
//! - [`health`]: Data and cycle timeouts ([`HealthMonitor`], [`HealthStatus`])
//!
//! ## Data Flow
//!
//! ```text
//! TelemetryFrame
//!        │
//!        ├──▶ RateEstimator::update()        ──▶ hourly rate
//!        │
//!        └──▶ HealthMonitor::record_sample() ──▶ evaluate() once per tick
//! ```

pub mod duration;
pub mod health;
pub mod rate;

pub use health::{HealthMonitor, HealthState, HealthStatus, HealthThresholds};
pub use rate::RateEstimator;
