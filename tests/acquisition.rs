//! End-to-end behaviour of the acquisition loop against a scripted client
//! and a local telemetry bridge.

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use cobot_logger::events::{self, AcquisitionEvent};
use cobot_logger::source::{
    AcquisitionConfig, AcquisitionLoop, BridgeConnector, ScriptedConnector, ScriptedSession,
};
use cobot_types::TelemetryFrame;

fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn frames(count: i64) -> Vec<TelemetryFrame> {
    (0..count).map(|n| TelemetryFrame::new(7, 2, n, 0, n)).collect()
}

#[tokio::test]
async fn three_refusals_then_connect() {
    init_test_logging();
    let connector = ScriptedConnector::new(vec![
        ScriptedSession::refuse("connection refused"),
        ScriptedSession::refuse("connection refused"),
        ScriptedSession::refuse("no route to host"),
        ScriptedSession::frames(frames(10)),
    ]);
    let attempts = connector.attempts();
    let disconnects = connector.disconnects();
    let (tx, mut rx) = events::channel();

    // Default pacing: 1.5s fixed backoff.
    let config = AcquisitionConfig::new("10.0.0.5:30004");
    let handle = AcquisitionLoop::start(connector, config, tx).unwrap();

    let mut connections = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        let event = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("acquisition went quiet")
            .expect("acquisition stopped early");
        if let AcquisitionEvent::Connection(state) = event {
            let connected = state.connected;
            connections.push(state);
            if connected {
                break;
            }
        }
    }

    assert!(handle.shutdown(Duration::from_millis(800)).await);

    assert_eq!(connections.len(), 4);
    assert!(connections[..3].iter().all(|state| !state.connected));
    assert!(connections[3].connected);
    assert!(connections[0].message.contains("connection refused"));
    assert!(connections[2].message.contains("no route to host"));

    let attempts = attempts.lock().clone();
    assert_eq!(attempts.len(), 4);
    for pair in attempts.windows(2) {
        let gap = pair[1].duration_since(pair[0]);
        assert!(
            gap >= Duration::from_millis(1400) && gap < Duration::from_millis(2500),
            "backoff gap {:?}",
            gap
        );
    }

    // Only the successful session held a handle.
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stop_while_streaming_is_prompt() {
    init_test_logging();
    let connector = ScriptedConnector::new(vec![ScriptedSession::frames(frames(1000))]);
    let disconnects = connector.disconnects();
    let (tx, mut rx) = events::channel();
    let handle = AcquisitionLoop::start(connector, AcquisitionConfig::new("10.0.0.5"), tx).unwrap();

    // Wait for streaming to be under way.
    loop {
        match rx.recv().await {
            Some(AcquisitionEvent::Telemetry(_)) => break,
            Some(_) => continue,
            None => panic!("acquisition stopped before streaming"),
        }
    }

    let started = Instant::now();
    assert!(handle.shutdown(Duration::from_millis(800)).await);
    assert!(started.elapsed() < Duration::from_millis(200));
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn telemetry_is_throttled_to_ten_hertz() {
    init_test_logging();
    let connector = ScriptedConnector::new(vec![ScriptedSession::frames(frames(10_000))]);
    let (tx, mut rx) = events::channel();
    let handle = AcquisitionLoop::start(connector, AcquisitionConfig::new("10.0.0.5"), tx).unwrap();

    tokio::time::sleep(Duration::from_millis(1050)).await;
    assert!(handle.shutdown(Duration::from_millis(800)).await);

    let mut telemetry = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let AcquisitionEvent::Telemetry(frame) = event {
            telemetry.push(frame);
        }
    }
    assert!(
        (5..=12).contains(&telemetry.len()),
        "forwarded {} frames in about a second",
        telemetry.len()
    );

    // Frames arrive in the order they were polled.
    let totals: Vec<i64> = telemetry.iter().map(|f| f.total()).collect();
    let mut sorted = totals.clone();
    sorted.sort();
    assert_eq!(totals, sorted);
}

#[tokio::test]
async fn unavailable_client_is_reported_without_retry() {
    init_test_logging();
    let connector = ScriptedConnector::unavailable("telemetry driver not installed");
    let attempts = connector.attempts();
    let (tx, mut rx) = events::channel();
    let handle = AcquisitionLoop::start(connector, AcquisitionConfig::new("10.0.0.5"), tx).unwrap();

    let event = rx.recv().await.unwrap();
    assert!(event.is_disconnected());
    // The loop has exited, so the channel closes.
    assert!(rx.recv().await.is_none());
    assert!(attempts.lock().is_empty());
    assert!(handle.shutdown(Duration::from_millis(800)).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_while_connecting_to_a_silent_bridge_is_prompt() {
    init_test_logging();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    // Accept, then never send a frame.
    let _bridge = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(stream);
    });

    let connector = BridgeConnector::new(tokio::runtime::Handle::current());
    let (tx, mut rx) = events::channel();
    let handle = AcquisitionLoop::start(connector, AcquisitionConfig::new(address), tx).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let started = Instant::now();
    assert!(handle.shutdown(Duration::from_millis(800)).await);
    assert!(started.elapsed() < Duration::from_millis(200));

    // Cancelled before connecting, so no connection was ever reported.
    while let Ok(event) = rx.try_recv() {
        assert!(!event.is_connected(), "unexpected {:?}", event);
    }
}
