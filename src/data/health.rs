//! Device liveness from two timeout clocks.
//!
//! The data clock restarts on connect and on every telemetry frame; the
//! cycle clock restarts whenever the part counter goes up. A stale data
//! clock wins over a stale cycle clock.

use std::time::{Duration, Instant};

/// Liveness verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    Ok,
    CycleTimeout,
    DataTimeout,
}

impl HealthStatus {
    /// Returns a short symbol for display.
    pub fn symbol(&self) -> &'static str {
        match self {
            HealthStatus::Ok => "OK",
            HealthStatus::CycleTimeout => "NO CYCLES",
            HealthStatus::DataTimeout => "DATA TIMEOUT",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, HealthStatus::Ok)
    }
}

/// Status plus the message shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthState {
    pub status: HealthStatus,
    pub message: String,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            status: HealthStatus::Ok,
            message: HealthStatus::Ok.symbol().to_string(),
        }
    }
}

/// Timeout thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthThresholds {
    /// No telemetry for longer than this is a data timeout.
    pub data_timeout: Duration,
    /// No counter increase for longer than this is a cycle timeout.
    pub cycle_timeout: Duration,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            data_timeout: Duration::from_secs(5),
            cycle_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HealthMonitor {
    thresholds: HealthThresholds,
    last_data: Option<Instant>,
    last_cycle: Option<Instant>,
    last_total: Option<i64>,
}

impl HealthMonitor {
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self {
            thresholds,
            ..Self::default()
        }
    }

    pub fn thresholds(&self) -> HealthThresholds {
        self.thresholds
    }

    /// Takes effect on the next evaluation.
    pub fn set_thresholds(&mut self, thresholds: HealthThresholds) {
        self.thresholds = thresholds;
    }

    pub fn last_data(&self) -> Option<Instant> {
        self.last_data
    }

    pub fn last_cycle(&self) -> Option<Instant> {
        self.last_cycle
    }

    /// Start the data clock when a connection comes up.
    pub fn mark_connected_at(&mut self, now: Instant) {
        self.last_data = Some(now);
    }

    /// Record a telemetry frame carrying `total`.
    ///
    /// The first frame also starts the cycle clock.
    pub fn record_sample_at(&mut self, total: i64, now: Instant) {
        self.last_data = Some(now);
        if self.last_total.map_or(true, |last| total > last) {
            self.last_cycle = Some(now);
        }
        self.last_total = Some(total);
    }

    pub fn evaluate(&self) -> HealthState {
        self.evaluate_at(Instant::now())
    }

    /// Resolve both clocks into one state as of `now`.
    pub fn evaluate_at(&self, now: Instant) -> HealthState {
        let HealthThresholds {
            data_timeout,
            cycle_timeout,
        } = self.thresholds;

        if exceeded(self.last_data, now, data_timeout) {
            return HealthState {
                status: HealthStatus::DataTimeout,
                message: format!("DATA TIMEOUT > {:.1}s", data_timeout.as_secs_f64()),
            };
        }
        if exceeded(self.last_cycle, now, cycle_timeout) {
            return HealthState {
                status: HealthStatus::CycleTimeout,
                message: format!("NO CYCLES > {:.1}s", cycle_timeout.as_secs_f64()),
            };
        }
        HealthState::default()
    }
}

fn exceeded(since: Option<Instant>, now: Instant, limit: Duration) -> bool {
    since.map_or(false, |at| now.saturating_duration_since(at) > limit)
}
