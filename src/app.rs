//! The consumer context: derived state and the periodic ticks.
//!
//! [`Monitor`] is the only owner of the rate window, the health clocks, the
//! sample log and the active job. It changes only when an
//! [`AcquisitionEvent`] arrives or a tick fires, so none of it needs a lock.

use std::collections::VecDeque;
use std::future::Future;
use std::time::{Duration, Instant};

use cobot_types::{Job, JobId, Sample, TelemetryFrame};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::data::{HealthMonitor, HealthState, HealthThresholds, RateEstimator};
use crate::error::StoreError;
use crate::events::{AcquisitionEvent, ConnectionState, EventReceiver};
use crate::store::{SampleLog, DEFAULT_REPLAY_LIMIT};

/// Rate points kept for plotting.
pub const RATE_HISTORY_LEN: usize = 600;

/// Tuning for the consumer.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub thresholds: HealthThresholds,
    pub rate_window: Duration,
    /// Parts per hour the line is expected to reach.
    pub target_per_hour: f64,
    /// Samples replayed when a job is selected.
    pub replay_limit: usize,
    pub health_every: Duration,
    pub log_every: Duration,
    pub refresh_every: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            thresholds: HealthThresholds::default(),
            rate_window: crate::data::rate::DEFAULT_WINDOW,
            target_per_hour: 120.0,
            replay_limit: DEFAULT_REPLAY_LIMIT,
            health_every: Duration::from_secs(1),
            log_every: Duration::from_secs(1),
            refresh_every: Duration::from_secs(1),
        }
    }
}

/// Latest counter values and rate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Kpis {
    pub accepted: i64,
    pub rejected: i64,
    pub total: i64,
    /// Parts per hour.
    pub rate: f64,
}

impl From<&Sample> for Kpis {
    fn from(sample: &Sample) -> Self {
        Self {
            accepted: sample.accepted,
            rejected: sample.rejected,
            total: sample.total,
            rate: sample.rate,
        }
    }
}

/// One point of the rate plot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatePoint {
    /// Unix timestamp in milliseconds.
    pub at_ms: u64,
    pub rate: f64,
}

/// Read-only view of the derived state, for presentation.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub job: Option<Job>,
    pub kpis: Kpis,
    pub target_per_hour: f64,
    pub on_target: bool,
    pub connection: ConnectionState,
    pub device_status: Option<String>,
    pub health: HealthState,
}

/// Owner of all derived state.
pub struct Monitor {
    config: MonitorConfig,
    log: SampleLog,
    rate: RateEstimator,
    health: HealthMonitor,
    health_state: HealthState,
    connection: ConnectionState,
    device_status: Option<String>,
    active_job: Option<Job>,
    /// Shown to the operator; also restored from the log on job selection.
    kpis: Kpis,
    /// Cached from live telemetry; what the log tick writes.
    latest: Option<Kpis>,
    rate_history: VecDeque<RatePoint>,
}

impl Monitor {
    pub fn new(log: SampleLog, config: MonitorConfig) -> Self {
        Self {
            rate: RateEstimator::new(config.rate_window),
            health: HealthMonitor::new(config.thresholds),
            config,
            log,
            health_state: HealthState::default(),
            connection: ConnectionState::default(),
            device_status: None,
            active_job: None,
            kpis: Kpis::default(),
            latest: None,
            rate_history: VecDeque::with_capacity(RATE_HISTORY_LEN),
        }
    }

    /// Create a monitor and make the most recent job active.
    pub fn open(log: SampleLog, config: MonitorConfig) -> Result<Self, StoreError> {
        let mut monitor = Self::new(log, config);
        monitor.select_latest_job()?;
        Ok(monitor)
    }

    pub fn log(&self) -> &SampleLog {
        &self.log
    }

    pub fn active_job(&self) -> Option<&Job> {
        self.active_job.as_ref()
    }

    pub fn kpis(&self) -> Kpis {
        self.kpis
    }

    pub fn health(&self) -> &HealthState {
        &self.health_state
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn device_status(&self) -> Option<&str> {
        self.device_status.as_deref()
    }

    pub fn rate_history(&self) -> &VecDeque<RatePoint> {
        &self.rate_history
    }

    pub fn on_target(&self) -> bool {
        self.kpis.rate >= self.config.target_per_hour
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            job: self.active_job.clone(),
            kpis: self.kpis,
            target_per_hour: self.config.target_per_hour,
            on_target: self.on_target(),
            connection: self.connection.clone(),
            device_status: self.device_status.clone(),
            health: self.health_state.clone(),
        }
    }

    /// Takes effect on the next health tick.
    pub fn set_thresholds(&mut self, thresholds: HealthThresholds) {
        self.config.thresholds = thresholds;
        self.health.set_thresholds(thresholds);
    }

    pub fn handle_event(&mut self, event: AcquisitionEvent) {
        self.handle_event_at(event, Instant::now());
    }

    pub fn handle_event_at(&mut self, event: AcquisitionEvent, now: Instant) {
        match event {
            AcquisitionEvent::Connection(state) => self.on_connection_at(state, now),
            AcquisitionEvent::Telemetry(frame) => self.on_frame_at(&frame, now),
        }
    }

    fn on_connection_at(&mut self, state: ConnectionState, now: Instant) {
        if state.connected {
            self.health.mark_connected_at(now);
            info!("Telemetry connected");
        } else {
            warn!("Telemetry disconnected: {}", state.message);
        }
        self.connection = state;
    }

    fn on_frame_at(&mut self, frame: &TelemetryFrame, now: Instant) {
        let total = frame.total();
        self.health.record_sample_at(total, now);
        self.rate.update_at(total, now);
        let rate = self.rate.hourly_rate_at(now);

        let kpis = Kpis {
            accepted: frame.accepted,
            rejected: frame.rejected,
            total,
            rate,
        };
        self.kpis = kpis;
        self.latest = Some(kpis);
        self.device_status = Some(frame.status_line());
        self.push_rate_point(RatePoint {
            at_ms: frame.captured_at_ms,
            rate,
        });
    }

    fn push_rate_point(&mut self, point: RatePoint) {
        if self.rate_history.len() == RATE_HISTORY_LEN {
            self.rate_history.pop_front();
        }
        self.rate_history.push_back(point);
    }

    pub fn health_tick(&mut self) -> &HealthState {
        self.health_tick_at(Instant::now())
    }

    /// Re-evaluate liveness, logging when the status changes.
    pub fn health_tick_at(&mut self, now: Instant) -> &HealthState {
        let next = self.health.evaluate_at(now);
        if next.status != self.health_state.status {
            if next.status.is_ok() {
                info!("Health recovered");
            } else {
                warn!("Health: {}", next.message);
            }
        }
        self.health_state = next;
        &self.health_state
    }

    /// Write the cached latest values under the active job.
    ///
    /// Without an active job, or before any telemetry has arrived, this is
    /// a no-op returning `Ok(None)`.
    pub fn log_tick(&mut self) -> Result<Option<Sample>, StoreError> {
        let (Some(job), Some(kpis)) = (&self.active_job, self.latest) else {
            return Ok(None);
        };
        let sample =
            self.log
                .append_sample(job.id, kpis.accepted, kpis.rejected, kpis.total, kpis.rate)?;
        Ok(Some(sample))
    }

    pub fn refresh_tick(&mut self) {
        self.refresh_tick_at(Instant::now());
    }

    /// Age out old events so the rate decays while no parts are made.
    pub fn refresh_tick_at(&mut self, now: Instant) {
        if self.latest.is_none() {
            return;
        }
        let rate = self.rate.hourly_rate_at(now);
        self.kpis.rate = rate;
        if let Some(latest) = self.latest.as_mut() {
            latest.rate = rate;
        }
    }

    /// Create a job and make it active.
    pub fn create_job(&mut self, name: &str) -> Result<Job, StoreError> {
        let job = self.log.create_job(name)?;
        info!("Logging to job {} ({})", job.name, job.id);
        self.activate(job.clone())?;
        Ok(job)
    }

    /// Make an existing job active, restoring its recent history.
    pub fn select_job(&mut self, id: JobId) -> Result<Job, StoreError> {
        let job = self.log.job(id)?.ok_or(StoreError::UnknownJob(id))?;
        self.activate(job.clone())?;
        Ok(job)
    }

    /// Make the most recent job active, if there is one.
    pub fn select_latest_job(&mut self) -> Result<Option<Job>, StoreError> {
        let Some(job) = self.log.latest_job()? else {
            self.active_job = None;
            return Ok(None);
        };
        self.activate(job.clone())?;
        Ok(Some(job))
    }

    fn activate(&mut self, job: Job) -> Result<(), StoreError> {
        let samples = self.log.load_recent(job.id, self.config.replay_limit)?;
        debug!("Replaying {} samples of job {}", samples.len(), job.id);

        self.rate_history.clear();
        for sample in &samples {
            self.push_rate_point(RatePoint {
                at_ms: sample.timestamp_ms,
                rate: sample.rate,
            });
        }
        if let Some(last) = samples.last() {
            self.kpis = Kpis::from(last);
        }
        self.active_job = Some(job);
        Ok(())
    }

    /// Commit pending samples and release the log.
    pub fn close(self) -> Result<(), StoreError> {
        self.log.close()
    }
}

/// Drive `monitor` until `shutdown` resolves.
///
/// Events are applied in arrival order; the three ticks fire at the
/// configured cadence. Persistence failures are logged and the loop keeps
/// going. If the producer goes away the ticks keep running.
///
/// ```
/// use std::time::Duration;
/// use cobot_logger::{app, events, Monitor, MonitorConfig, SampleLog};
///
/// # tokio_test::block_on(async {
/// let log = SampleLog::new_in_memory().unwrap();
/// let mut monitor = Monitor::new(log, MonitorConfig::default());
/// let (_tx, rx) = events::channel();
///
/// app::run(&mut monitor, rx, tokio::time::sleep(Duration::from_millis(10))).await;
/// assert!(monitor.health().status.is_ok());
/// # });
/// ```
pub async fn run<F>(monitor: &mut Monitor, mut events: EventReceiver, shutdown: F)
where
    F: Future<Output = ()>,
{
    let mut health_tick = interval(monitor.config.health_every);
    let mut log_tick = interval(monitor.config.log_every);
    let mut refresh_tick = interval(monitor.config.refresh_every);
    let mut events_open = true;

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                debug!("Shutdown requested");
                break;
            }
            event = events.recv(), if events_open => match event {
                Some(event) => monitor.handle_event(event),
                None => {
                    info!("Acquisition stopped sending events");
                    events_open = false;
                }
            },
            _ = health_tick.tick() => {
                monitor.health_tick();
            }
            _ = log_tick.tick() => {
                if let Err(err) = monitor.log_tick() {
                    error!("Failed to log sample: {}", err);
                }
            }
            _ = refresh_tick.tick() => monitor.refresh_tick(),
        }
    }
}

fn interval(period: Duration) -> time::Interval {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
