//! Telemetry bridge client.
//!
//! Speaks newline-delimited JSON over TCP to a bridge process that sits next
//! to the controller. After connecting the client sends one request line,
//! `{"frequency": <hz>}`, and the bridge then streams one frame per line:
//!
//! ```json
//! {"robot_mode": 7, "runtime_state": 2, "registers": [118, 3, 121]}
//! ```
//!
//! The socket and its reader task live on a tokio runtime. The reader keeps
//! the most recent frame; the getters read from a snapshot taken by
//! [`TelemetryClient::get_robot_mode`] so that one polled frame is always
//! internally consistent.

use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::debug;

use super::{TelemetryClient, TelemetryConnector};
use crate::error::ClientError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const STALE_AFTER: Duration = Duration::from_secs(2);

/// One line of the bridge stream.
#[derive(Debug, Clone, Deserialize)]
struct WireFrame {
    robot_mode: i32,
    runtime_state: i32,
    #[serde(default)]
    registers: Vec<i64>,
}

/// What the reader task has seen so far.
#[derive(Debug, Default)]
struct Link {
    latest: Option<WireFrame>,
    error: Option<String>,
}

/// Opens [`BridgeClient`]s on a tokio runtime.
///
/// `connect` blocks the calling thread on that runtime, so it must be called
/// from outside it (the acquisition thread does).
#[derive(Debug, Clone)]
pub struct BridgeConnector {
    runtime: Handle,
    connect_timeout: Duration,
    stale_after: Duration,
}

impl BridgeConnector {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            connect_timeout: CONNECT_TIMEOUT,
            stale_after: STALE_AFTER,
        }
    }

    /// Treat the link as failed when no line arrives for this long.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}

impl TelemetryConnector for BridgeConnector {
    fn connect(
        &mut self,
        address: &str,
        frequency: f64,
        stop: &watch::Receiver<bool>,
    ) -> Result<Box<dyn TelemetryClient>, ClientError> {
        let mut stop = stop.clone();
        let attempt =
            BridgeClient::connect(address, frequency, self.connect_timeout, self.stale_after);
        let client = self.runtime.block_on(async {
            tokio::select! {
                client = attempt => client,
                _ = stop_requested(&mut stop) => Err(ClientError::Cancelled),
            }
        })?;
        Ok(Box::new(client))
    }

    fn description(&self) -> &str {
        "telemetry bridge"
    }
}

/// Resolves once `stop` turns true. Never resolves if its sender is gone.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    if stop.wait_for(|stopped| *stopped).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// A live connection to the telemetry bridge.
pub struct BridgeClient {
    link: watch::Receiver<Link>,
    reader: JoinHandle<()>,
    writer: Option<OwnedWriteHalf>,
    snapshot: Option<WireFrame>,
}

impl BridgeClient {
    async fn connect(
        address: &str,
        frequency: f64,
        connect_timeout: Duration,
        stale_after: Duration,
    ) -> Result<Self, ClientError> {
        let mut stream = timeout(connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| ClientError::Transport(format!("connect to {} timed out", address)))??;
        stream.set_nodelay(true)?;

        let request = format!("{}\n", serde_json::json!({ "frequency": frequency }));
        stream.write_all(request.as_bytes()).await?;

        let (read_half, write_half) = stream.into_split();
        let (link_tx, link_rx) = watch::channel(Link::default());
        let reader = tokio::spawn(read_frames(read_half, link_tx, stale_after));

        // From here on, dropping the client (on error or cancellation)
        // aborts the reader.
        let mut client = Self {
            link: link_rx,
            reader,
            writer: Some(write_half),
            snapshot: None,
        };
        client.wait_for_first_frame(connect_timeout).await?;
        Ok(client)
    }

    async fn wait_for_first_frame(&mut self, limit: Duration) -> Result<(), ClientError> {
        let ready = self
            .link
            .wait_for(|link| link.latest.is_some() || link.error.is_some());
        match timeout(limit, ready).await {
            Ok(Ok(link)) => match (&link.latest, &link.error) {
                (Some(_), _) => Ok(()),
                (None, error) => Err(ClientError::Transport(
                    error
                        .clone()
                        .unwrap_or_else(|| "telemetry bridge reader stopped".to_string()),
                )),
            },
            Ok(Err(_)) => Err(ClientError::Transport(
                "telemetry bridge reader stopped".to_string(),
            )),
            Err(_) => Err(ClientError::Transport(
                "bridge sent no telemetry after connect".to_string(),
            )),
        }
    }

    fn snapshot(&self) -> Result<&WireFrame, ClientError> {
        self.snapshot
            .as_ref()
            .ok_or_else(|| ClientError::Transport("no frame read yet".to_string()))
    }

    fn close(&mut self) {
        self.reader.abort();
        // Dropping the write half sends FIN.
        if self.writer.take().is_some() {
            debug!("Bridge connection closed");
        }
    }
}

impl TelemetryClient for BridgeClient {
    fn get_robot_mode(&mut self) -> Result<i32, ClientError> {
        let frame = {
            let link = self.link.borrow();
            if let Some(err) = &link.error {
                return Err(ClientError::Transport(err.clone()));
            }
            link.latest.clone()
        };
        self.snapshot = frame;
        Ok(self.snapshot()?.robot_mode)
    }

    fn get_runtime_state(&mut self) -> Result<i32, ClientError> {
        Ok(self.snapshot()?.runtime_state)
    }

    fn get_output_register(&mut self, index: u32) -> Result<i64, ClientError> {
        let frame = self.snapshot()?;
        Ok(frame.registers.get(index as usize).copied().unwrap_or(0))
    }

    fn disconnect(&mut self) -> Result<(), ClientError> {
        self.close();
        Ok(())
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        self.close();
    }
}

/// Read frames line by line until the stream ends, fails or goes silent.
async fn read_frames(stream: OwnedReadHalf, link: watch::Sender<Link>, stale_after: Duration) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();

    let error = loop {
        line.clear();
        match timeout(stale_after, reader.read_line(&mut line)).await {
            Err(_) => break "telemetry bridge went silent".to_string(),
            Ok(Ok(0)) => break "telemetry bridge closed the connection".to_string(),
            Ok(Ok(_)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<WireFrame>(trimmed) {
                    Ok(frame) => link.send_modify(|link| link.latest = Some(frame)),
                    Err(err) => debug!("Skipping malformed bridge line: {}", err),
                }
            }
            Ok(Err(err)) => break format!("bridge read error: {}", err),
        }
    };

    link.send_modify(|link| link.error = Some(error));
}
