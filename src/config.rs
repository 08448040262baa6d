//! Layered settings.
//!
//! Sources, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. an optional TOML file
//! 3. environment variables prefixed `COBOT__`, sections separated by
//!    `__` (e.g. `COBOT__DEVICE__ADDRESS=10.0.0.5:30004`)
//!
//! Command-line flags are applied on top by the binary.
//!
//! ```toml
//! [device]
//! address = "192.168.0.48:30004"
//! backoff_ms = 1500
//!
//! [health]
//! data_timeout_secs = 5.0
//! cycle_timeout_secs = 60.0
//!
//! [storage]
//! path = "cobot_logger.db"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::app::MonitorConfig;
use crate::data::HealthThresholds;
use crate::source::AcquisitionConfig;

const ENV_PREFIX: &str = "COBOT";

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub device: DeviceSettings,
    pub health: HealthSettings,
    pub rate: RateSettings,
    pub storage: StorageSettings,
    pub cadence: CadenceSettings,
}

/// Telemetry link.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub address: String,
    pub frequency_hz: f64,
    pub poll_interval_ms: u64,
    pub emit_interval_ms: u64,
    pub backoff_ms: u64,
    pub shutdown_grace_ms: u64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            address: "192.168.0.48:30004".to_string(),
            frequency_hz: 10.0,
            poll_interval_ms: 20,
            emit_interval_ms: 100,
            backoff_ms: 1500,
            shutdown_grace_ms: 800,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub data_timeout_secs: f64,
    pub cycle_timeout_secs: f64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            data_timeout_secs: 5.0,
            cycle_timeout_secs: 60.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RateSettings {
    pub window_secs: u64,
    /// Parts per hour the line is expected to reach.
    pub target_per_hour: f64,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            window_secs: 3600,
            target_per_hour: 120.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub path: PathBuf,
    pub commit_every: usize,
    pub replay_limit: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("cobot_logger.db"),
            commit_every: crate::store::DEFAULT_COMMIT_EVERY,
            replay_limit: crate::store::DEFAULT_REPLAY_LIMIT,
        }
    }
}

/// Periods of the consumer's ticks.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CadenceSettings {
    pub health_ms: u64,
    pub log_ms: u64,
    pub refresh_ms: u64,
}

impl Default for CadenceSettings {
    fn default() -> Self {
        Self {
            health_ms: 1000,
            log_ms: 1000,
            refresh_ms: 1000,
        }
    }
}

impl Settings {
    /// Load defaults, then `path` (if given), then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_from(path, None)
    }

    /// Like [`Settings::load`], reading variables from `env` instead of the
    /// process environment when given.
    pub fn load_from(path: Option<&Path>, env: Option<config::Map<String, String>>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .context("Failed to read configuration")?;

        let settings: Settings = config
            .try_deserialize()
            .context("Invalid configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.device.address.trim().is_empty() {
            bail!("device.address must not be empty");
        }
        if !(self.device.frequency_hz > 0.0) {
            bail!("device.frequency_hz must be positive");
        }
        if self.device.poll_interval_ms == 0 {
            bail!("device.poll_interval_ms must be positive");
        }
        positive_secs("health.data_timeout_secs", self.health.data_timeout_secs)?;
        positive_secs("health.cycle_timeout_secs", self.health.cycle_timeout_secs)?;
        if self.rate.window_secs == 0 {
            bail!("rate.window_secs must be positive");
        }
        if self.rate.target_per_hour < 0.0 {
            bail!("rate.target_per_hour must not be negative");
        }
        if self.storage.commit_every == 0 {
            bail!("storage.commit_every must be at least 1");
        }
        for (name, ms) in [
            ("cadence.health_ms", self.cadence.health_ms),
            ("cadence.log_ms", self.cadence.log_ms),
            ("cadence.refresh_ms", self.cadence.refresh_ms),
        ] {
            if ms == 0 {
                bail!("{} must be positive", name);
            }
        }
        Ok(())
    }

    pub fn acquisition(&self) -> AcquisitionConfig {
        AcquisitionConfig {
            address: self.device.address.clone(),
            frequency_hz: self.device.frequency_hz,
            poll_interval: Duration::from_millis(self.device.poll_interval_ms),
            emit_interval: Duration::from_millis(self.device.emit_interval_ms),
            backoff: Duration::from_millis(self.device.backoff_ms),
        }
    }

    pub fn health_thresholds(&self) -> HealthThresholds {
        HealthThresholds {
            data_timeout: secs(self.health.data_timeout_secs),
            cycle_timeout: secs(self.health.cycle_timeout_secs),
        }
    }

    pub fn monitor(&self) -> MonitorConfig {
        MonitorConfig {
            thresholds: self.health_thresholds(),
            rate_window: Duration::from_secs(self.rate.window_secs),
            target_per_hour: self.rate.target_per_hour,
            replay_limit: self.storage.replay_limit,
            health_every: Duration::from_millis(self.cadence.health_ms),
            log_every: Duration::from_millis(self.cadence.log_ms),
            refresh_every: Duration::from_millis(self.cadence.refresh_ms),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.device.shutdown_grace_ms)
    }
}

fn positive_secs(name: &str, value: f64) -> Result<()> {
    if !(value.is_finite() && value > 0.0) {
        bail!("{} must be a positive number of seconds", name);
    }
    Ok(())
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> Option<config::Map<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn defaults_without_sources() {
        let settings = Settings::load_from(None, env(&[])).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.device.backoff_ms, 1500);
        assert_eq!(settings.storage.commit_every, 10);
        assert_eq!(settings.storage.replay_limit, 600);
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[device]\naddress = \"10.0.0.5:30004\"\n\n[health]\ndata_timeout_secs = 2.5"
        )
        .unwrap();

        let settings = Settings::load_from(Some(file.path()), env(&[])).unwrap();
        assert_eq!(settings.device.address, "10.0.0.5:30004");
        assert_eq!(settings.device.frequency_hz, 10.0);
        assert_eq!(
            settings.health_thresholds().data_timeout,
            Duration::from_millis(2500)
        );
    }

    #[test]
    fn environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[device]\nbackoff_ms = 3000").unwrap();

        let settings = Settings::load_from(
            Some(file.path()),
            env(&[
                ("COBOT__DEVICE__BACKOFF_MS", "250"),
                ("COBOT__STORAGE__PATH", "/var/lib/cobot/line2.db"),
            ]),
        )
        .unwrap();
        assert_eq!(settings.device.backoff_ms, 250);
        assert_eq!(settings.storage.path, PathBuf::from("/var/lib/cobot/line2.db"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = Settings::load_from(None, env(&[("COBOT__HEALTH__DATA_TIMEOUT_SECS", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("data_timeout_secs"));
    }

    #[test]
    fn derived_configs() {
        let settings = Settings::default();
        let acquisition = settings.acquisition();
        assert_eq!(acquisition.backoff, Duration::from_millis(1500));
        assert_eq!(acquisition.emit_interval, Duration::from_millis(100));

        let monitor = settings.monitor();
        assert_eq!(monitor.rate_window, Duration::from_secs(3600));
        assert_eq!(monitor.health_every, Duration::from_secs(1));
        assert_eq!(settings.shutdown_grace(), Duration::from_millis(800));
    }
}
