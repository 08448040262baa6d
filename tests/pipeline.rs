//! Producer, consumer and sample log wired together.

use std::time::{Duration, Instant};

use cobot_logger::events::{self, AcquisitionEvent, ConnectionState};
use cobot_logger::source::{AcquisitionConfig, AcquisitionLoop, ScriptedConnector, ScriptedSession};
use cobot_logger::{app, HealthStatus, Monitor, MonitorConfig, SampleLog};
use cobot_types::TelemetryFrame;
use tempfile::TempDir;

fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn fast_monitor_config() -> MonitorConfig {
    MonitorConfig {
        health_every: Duration::from_millis(50),
        log_every: Duration::from_millis(50),
        refresh_every: Duration::from_millis(50),
        ..MonitorConfig::default()
    }
}

#[tokio::test]
async fn acquired_frames_are_logged_under_active_job() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cobot_logger.db");

    let frames: Vec<TelemetryFrame> = (0..500)
        .map(|n| TelemetryFrame::new(7, 2, n / 10, 0, 0))
        .collect();
    let connector = ScriptedConnector::new(vec![ScriptedSession::frames(frames)]);
    let acquisition = AcquisitionConfig {
        poll_interval: Duration::from_millis(5),
        emit_interval: Duration::from_millis(25),
        ..AcquisitionConfig::new("10.0.0.5:30004")
    };

    let log = SampleLog::open(&path).unwrap();
    let mut monitor = Monitor::open(log, fast_monitor_config()).unwrap();
    let job = monitor.create_job("Line2_ValveCaps").unwrap();

    let (tx, rx) = events::channel();
    let handle = AcquisitionLoop::start(connector, acquisition, tx).unwrap();
    app::run(&mut monitor, rx, tokio::time::sleep(Duration::from_millis(600))).await;
    assert!(handle.shutdown(Duration::from_millis(800)).await);

    assert!(monitor.connection().connected);
    assert!(monitor.health().status.is_ok());
    assert_eq!(monitor.device_status(), Some("RUNNING • MODE 7"));
    monitor.close().unwrap();

    let log = SampleLog::open(&path).unwrap();
    let samples = log.export(job.id).unwrap();
    assert!(samples.len() >= 5, "only {} samples logged", samples.len());
    for pair in samples.windows(2) {
        assert!(pair[0].timestamp_ms <= pair[1].timestamp_ms);
        assert!(pair[0].total <= pair[1].total);
    }
    assert!(samples.iter().all(|s| s.rate >= 0.0));
}

#[tokio::test]
async fn nothing_is_logged_without_a_job() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cobot_logger.db");

    let connector = ScriptedConnector::new(vec![ScriptedSession::frames(vec![
        TelemetryFrame::new(7, 2, 1, 0, 1),
    ])]);
    let log = SampleLog::open(&path).unwrap();
    let mut monitor = Monitor::open(log, fast_monitor_config()).unwrap();
    assert!(monitor.active_job().is_none());

    let (tx, rx) = events::channel();
    let handle = AcquisitionLoop::start(connector, AcquisitionConfig::new("10.0.0.5"), tx).unwrap();
    app::run(&mut monitor, rx, tokio::time::sleep(Duration::from_millis(300))).await;
    assert!(handle.shutdown(Duration::from_millis(800)).await);

    assert_eq!(monitor.kpis().total, 1);
    monitor.close().unwrap();

    let log = SampleLog::open(&path).unwrap();
    assert!(log.list_jobs().unwrap().is_empty());
}

#[tokio::test]
async fn stalled_device_raises_data_timeout() {
    init_test_logging();
    let config = MonitorConfig {
        thresholds: cobot_logger::HealthThresholds {
            data_timeout: Duration::from_millis(200),
            cycle_timeout: Duration::from_secs(60),
        },
        ..fast_monitor_config()
    };
    let mut monitor = Monitor::new(SampleLog::new_in_memory().unwrap(), config);

    // A connect and one frame, then silence.
    let (tx, rx) = events::channel();
    tx.send(AcquisitionEvent::Connection(ConnectionState::connected()))
        .unwrap();
    tx.send(AcquisitionEvent::Telemetry(TelemetryFrame::new(7, 2, 1, 0, 1)))
        .unwrap();

    app::run(&mut monitor, rx, tokio::time::sleep(Duration::from_millis(500))).await;
    drop(tx);

    assert_eq!(monitor.health().status, HealthStatus::DataTimeout);
    assert_eq!(monitor.health().message, "DATA TIMEOUT > 0.2s");
}

#[test]
fn counter_sequence_drives_rate_and_log() {
    let mut monitor = Monitor::new(SampleLog::new_in_memory().unwrap(), MonitorConfig::default());
    let job = monitor.create_job("Line2_ValveCaps").unwrap();
    let t0 = Instant::now();

    for (i, total) in [0, 0, 5, 5, 12].into_iter().enumerate() {
        let frame = TelemetryFrame::new(7, 2, total, 0, total);
        monitor.handle_event_at(
            AcquisitionEvent::Telemetry(frame),
            t0 + Duration::from_secs(i as u64),
        );
        monitor.log_tick().unwrap();
    }

    // 12 parts between t=2s and t=4s
    assert_eq!(monitor.kpis().rate, 21600.0);

    let samples = monitor.log().load_recent(job.id, 600).unwrap();
    let totals: Vec<i64> = samples.iter().map(|s| s.total).collect();
    assert_eq!(totals, vec![0, 0, 5, 5, 12]);
    assert_eq!(samples.last().map(|s| s.rate), Some(21600.0));
}

#[test]
fn reselecting_job_restores_kpis() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cobot_logger.db");
    let t0 = Instant::now();

    let job = {
        let mut monitor = Monitor::open(SampleLog::open(&path).unwrap(), MonitorConfig::default())
            .unwrap();
        let job = monitor.create_job("Line2_ValveCaps").unwrap();
        for n in 0..3 {
            let frame = TelemetryFrame::new(7, 2, 40 + n, 2, 0);
            monitor.handle_event_at(
                AcquisitionEvent::Telemetry(frame),
                t0 + Duration::from_secs(n as u64),
            );
            monitor.log_tick().unwrap();
        }
        monitor.close().unwrap();
        job
    };

    let monitor = Monitor::open(SampleLog::open(&path).unwrap(), MonitorConfig::default()).unwrap();
    assert_eq!(monitor.active_job().map(|j| j.id), Some(job.id));
    assert_eq!(monitor.kpis().accepted, 42);
    assert_eq!(monitor.kpis().total, 44);
    assert_eq!(monitor.rate_history().len(), 3);
}
