//! Scripted telemetry connector for tests.
//!
//! Each connect attempt consumes the next [`ScriptedSession`]: a refused
//! connection, a client that turns out to be unavailable, or a stream of
//! frames optionally ending in a read failure. A stream without a failure repeats its last frame forever.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use cobot_types::TelemetryFrame;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::{TelemetryClient, TelemetryConnector};
use crate::error::ClientError;

/// Script for a single connect attempt.
#[derive(Debug, Clone)]
pub struct ScriptedSession {
    refusal: Option<ClientError>,
    frames: Vec<TelemetryFrame>,
    failure: Option<String>,
}

impl ScriptedSession {
    /// A connect attempt that fails with `message`.
    pub fn refuse(message: &str) -> Self {
        Self {
            refusal: Some(ClientError::Transport(message.to_string())),
            frames: Vec::new(),
            failure: None,
        }
    }

    /// A connect attempt that reports the client as unusable.
    pub fn unavailable(reason: &str) -> Self {
        Self {
            refusal: Some(ClientError::Unavailable(reason.to_string())),
            frames: Vec::new(),
            failure: None,
        }
    }

    /// A connection that serves `frames` in order.
    pub fn frames(frames: Vec<TelemetryFrame>) -> Self {
        Self {
            refusal: None,
            frames,
            failure: None,
        }
    }

    /// Fail every read once the scripted frames are used up.
    pub fn then_fail(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }
}

/// A [`TelemetryConnector`] that replays scripted sessions.
#[derive(Debug)]
pub struct ScriptedConnector {
    sessions: VecDeque<ScriptedSession>,
    unavailable: Option<String>,
    attempts: Arc<Mutex<Vec<Instant>>>,
    disconnects: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub fn new(sessions: Vec<ScriptedSession>) -> Self {
        Self {
            sessions: sessions.into(),
            unavailable: None,
            attempts: Arc::new(Mutex::new(Vec::new())),
            disconnects: Arc::new(AtomicUsize::new(0)),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A connector whose client library cannot be loaded.
    pub fn unavailable(reason: &str) -> Self {
        Self {
            unavailable: Some(reason.to_string()),
            ..Self::new(Vec::new())
        }
    }

    /// Instants of every connect attempt, shared with the test.
    pub fn attempts(&self) -> Arc<Mutex<Vec<Instant>>> {
        self.attempts.clone()
    }

    /// Number of `disconnect` calls across all clients.
    pub fn disconnects(&self) -> Arc<AtomicUsize> {
        self.disconnects.clone()
    }

    /// Number of frames read across all clients.
    pub fn reads(&self) -> Arc<AtomicUsize> {
        self.reads.clone()
    }
}

impl TelemetryConnector for ScriptedConnector {
    fn check_available(&self) -> Result<(), ClientError> {
        match &self.unavailable {
            Some(reason) => Err(ClientError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    fn connect(
        &mut self,
        _address: &str,
        _frequency: f64,
        _stop: &watch::Receiver<bool>,
    ) -> Result<Box<dyn TelemetryClient>, ClientError> {
        self.attempts.lock().push(Instant::now());

        let session = self
            .sessions
            .pop_front()
            .ok_or_else(|| ClientError::Transport("no scripted session left".to_string()))?;
        if let Some(err) = session.refusal {
            return Err(err);
        }

        Ok(Box::new(ScriptedClient {
            frames: session.frames.into(),
            current: None,
            failure: session.failure,
            disconnects: self.disconnects.clone(),
            reads: self.reads.clone(),
        }))
    }

    fn description(&self) -> &str {
        "scripted"
    }
}

/// Client handed out by [`ScriptedConnector`].
///
/// Each frame starts with a robot-mode read, which advances the script.
struct ScriptedClient {
    frames: VecDeque<TelemetryFrame>,
    current: Option<TelemetryFrame>,
    failure: Option<String>,
    disconnects: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
}

impl ScriptedClient {
    fn current(&self) -> Result<&TelemetryFrame, ClientError> {
        self.current
            .as_ref()
            .ok_or_else(|| ClientError::Transport("no frame scripted".to_string()))
    }
}

impl TelemetryClient for ScriptedClient {
    fn get_robot_mode(&mut self) -> Result<i32, ClientError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        match self.frames.pop_front() {
            Some(next) => self.current = Some(next),
            None => {
                if let Some(message) = &self.failure {
                    return Err(ClientError::Transport(message.clone()));
                }
            }
        }
        Ok(self.current()?.robot_mode)
    }

    fn get_runtime_state(&mut self) -> Result<i32, ClientError> {
        Ok(self.current()?.runtime_state)
    }

    fn get_output_register(&mut self, index: u32) -> Result<i64, ClientError> {
        let frame = self.current()?;
        match index {
            cobot_types::ACCEPTED_REGISTER => Ok(frame.accepted),
            cobot_types::REJECTED_REGISTER => Ok(frame.rejected),
            cobot_types::TOTAL_REGISTER => Ok(frame.total_register),
            _ => Ok(0),
        }
    }

    fn disconnect(&mut self) -> Result<(), ClientError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[test]
    fn refused_session_fails_connect() {
        let mut connector = ScriptedConnector::new(vec![ScriptedSession::refuse("refused")]);
        let err = connector.connect("10.0.0.5", 10.0, &idle()).err().unwrap();
        assert_eq!(err.to_string(), "refused");
        assert_eq!(connector.attempts().lock().len(), 1);
    }

    #[test]
    fn exhausted_script_fails_connect() {
        let mut connector = ScriptedConnector::new(Vec::new());
        assert!(connector.connect("10.0.0.5", 10.0, &idle()).is_err());
    }

    #[test]
    fn frames_repeat_last_without_failure() {
        let mut connector = ScriptedConnector::new(vec![ScriptedSession::frames(vec![
            TelemetryFrame::new(4, 2, 1, 0, 1),
            TelemetryFrame::new(4, 2, 2, 0, 2),
        ])]);
        let mut client = connector.connect("10.0.0.5", 10.0, &idle()).unwrap();

        assert_eq!(client.read_frame().unwrap().total(), 1);
        assert_eq!(client.read_frame().unwrap().total(), 2);
        assert_eq!(client.read_frame().unwrap().total(), 2);
        assert_eq!(connector.reads().load(Ordering::SeqCst), 3);
    }

    #[test]
    fn failure_follows_frames() {
        let mut connector = ScriptedConnector::new(vec![ScriptedSession::frames(vec![
            TelemetryFrame::new(4, 2, 1, 0, 1),
        ])
        .then_fail("socket reset")]);
        let mut client = connector.connect("10.0.0.5", 10.0, &idle()).unwrap();

        assert!(client.read_frame().is_ok());
        let err = client.read_frame().unwrap_err();
        assert_eq!(err.to_string(), "socket reset");

        client.disconnect().unwrap();
        assert_eq!(connector.disconnects().load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unavailable_session_fails_connect() {
        let mut connector =
            ScriptedConnector::new(vec![ScriptedSession::unavailable("library missing")]);
        let err = connector.connect("10.0.0.5", 10.0, &idle()).err().unwrap();
        assert!(matches!(err, ClientError::Unavailable(_)));
    }

    #[test]
    fn unavailable_connector_reports_reason() {
        let connector = ScriptedConnector::unavailable("missing driver");
        let err = connector.check_available().unwrap_err();
        assert!(matches!(err, ClientError::Unavailable(_)));
        assert!(err.to_string().contains("missing driver"));
    }
}
