//! Rolling hourly production rate.
//!
//! The estimator watches a part counter that should only ever grow, but
//! may reset when the controller reboots or the program restarts. Every
//! unit of increase becomes one event; the rate is the number of events
//! inside a trailing time window, scaled to one hour.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Default trailing window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(3600);

const SECS_PER_HOUR: f64 = 3600.0;

/// Converts a part counter into an hourly rate over a sliding window.
///
/// Increases of `k` in one observation are stored as a single burst of `k`
/// coincident events, so memory grows with the number of observations in
/// the window rather than with the number of parts.
#[derive(Debug, Clone)]
pub struct RateEstimator {
    window: Duration,
    /// (timestamp, events at that timestamp), oldest first.
    bursts: VecDeque<(Instant, u64)>,
    event_count: u64,
    last_total: Option<i64>,
}

impl Default for RateEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl RateEstimator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            bursts: VecDeque::new(),
            event_count: 0,
            last_total: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Last observed counter value, if any.
    pub fn last_total(&self) -> Option<i64> {
        self.last_total
    }

    /// Number of events currently held in the window.
    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    /// Event timestamps in insertion order, one entry per event.
    pub fn events(&self) -> Vec<Instant> {
        self.bursts
            .iter()
            .flat_map(|&(at, count)| std::iter::repeat(at).take(count as usize))
            .collect()
    }

    /// Observe a counter value now. Returns the number of new events.
    pub fn update(&mut self, total: i64) -> u64 {
        self.update_at(total, Instant::now())
    }

    /// Observe a counter value at `now`. Returns the number of new events.
    ///
    /// The first observation only sets the baseline. A value at or below
    /// the baseline (reset, reboot, wraparound) moves the baseline without
    /// recording anything.
    pub fn update_at(&mut self, total: i64, now: Instant) -> u64 {
        let added = match self.last_total {
            Some(last) if total > last => total.abs_diff(last),
            _ => 0,
        };
        // Saturate so the burst counts always sum to `event_count`.
        let added = added.min(u64::MAX - self.event_count);
        self.last_total = Some(total);

        if added > 0 {
            match self.bursts.back_mut() {
                Some((at, count)) if *at == now => *count += added,
                _ => self.bursts.push_back((now, added)),
            }
            self.event_count += added;
        }

        self.trim_at(now);
        added
    }

    /// Drop events older than the window, measured back from `now`.
    pub fn trim_at(&mut self, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.window) else {
            return;
        };
        while let Some(&(at, count)) = self.bursts.front() {
            if at >= cutoff {
                break;
            }
            self.bursts.pop_front();
            self.event_count -= count;
        }
    }

    /// Current events per hour, rounded to two decimals.
    pub fn hourly_rate(&mut self) -> f64 {
        self.hourly_rate_at(Instant::now())
    }

    /// Events per hour as of `now`, rounded to two decimals.
    ///
    /// With fewer than two events the count is spread over the whole
    /// window; otherwise it is divided by the span between the oldest and
    /// newest retained event.
    pub fn hourly_rate_at(&mut self, now: Instant) -> f64 {
        self.trim_at(now);

        let count = self.event_count as f64;
        let rate = if self.event_count <= 1 {
            let window_hours = self.window.as_secs_f64() / SECS_PER_HOUR;
            if window_hours > 0.0 {
                count / window_hours
            } else {
                0.0
            }
        } else {
            match (self.bursts.front(), self.bursts.back()) {
                (Some(&(oldest, _)), Some(&(newest, _))) => {
                    let elapsed_hours = newest.duration_since(oldest).as_secs_f64() / SECS_PER_HOUR;
                    if elapsed_hours > 0.0 {
                        count / elapsed_hours
                    } else {
                        0.0
                    }
                }
                _ => 0.0,
            }
        };

        round2(rate)
    }

    /// Forget all events and the baseline.
    pub fn reset(&mut self) {
        self.bursts.clear();
        self.event_count = 0;
        self.last_total = None;
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
