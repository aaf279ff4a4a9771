//! Test helpers for integration tests
//!
//! Provides a mock gateway server that hands each accepted WebSocket to the
//! test, plus utilities for waiting on client events.

use std::borrow::Cow;
use std::io::Write;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::Uri;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use nyx_gateway::GatewayEvent;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How long any single wait in a test may take
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Install a tracing subscriber once; later calls are ignored
pub fn init_test_tracing() {
    let _ = nyx_common::try_init_tracing();
}

/// Mock gateway server
///
/// Serves WebSocket upgrades on `/` and `/resume` and queues every accepted
/// socket for the test to drive.
pub struct MockGateway {
    pub addr: SocketAddr,
    sockets: mpsc::UnboundedReceiver<MockSocket>,
    _handle: JoinHandle<()>,
}

impl MockGateway {
    /// Start a mock gateway on an ephemeral port
    pub async fn start() -> Result<Self> {
        let (tx, sockets) = mpsc::unbounded_channel();
        let app = Router::new()
            .route("/", get(upgrade))
            .route("/resume", get(upgrade))
            .with_state(tx);

        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = listener.local_addr()?;

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Ok(Self {
            addr,
            sockets,
            _handle: handle,
        })
    }

    /// URL handed out as the connect URL
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// URL handed out as the resume URL in READY
    pub fn resume_url(&self) -> String {
        format!("ws://{}/resume", self.addr)
    }

    /// Wait for the client to open the next socket
    pub async fn accept(&mut self) -> Result<MockSocket> {
        tokio::time::timeout(TEST_TIMEOUT, self.sockets.recv())
            .await
            .context("Timed out waiting for a connection")?
            .ok_or_else(|| anyhow!("Mock gateway stopped"))
    }
}

async fn upgrade(
    ws: WebSocketUpgrade,
    uri: Uri,
    State(tx): State<mpsc::UnboundedSender<MockSocket>>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let _ = tx.send(MockSocket {
            path: uri.path().to_string(),
            query: uri.query().unwrap_or_default().to_string(),
            socket,
            compressor: None,
        });
    })
}

/// One accepted client socket
pub struct MockSocket {
    pub path: String,
    pub query: String,
    socket: WebSocket,
    compressor: Option<ZlibEncoder<Vec<u8>>>,
}

impl MockSocket {
    /// Compress every following frame as one zlib stream
    pub fn enable_zlib(&mut self) {
        self.compressor = Some(ZlibEncoder::new(Vec::new(), Compression::default()));
    }

    /// Send a payload as JSON, zlib-compressed when enabled
    pub async fn send_json(&mut self, payload: &Value) -> Result<()> {
        let text = serde_json::to_string(payload)?;
        let message = match self.compressor.as_mut() {
            Some(encoder) => {
                encoder.write_all(text.as_bytes())?;
                encoder.flush()?;
                Message::Binary(std::mem::take(encoder.get_mut()))
            }
            None => Message::Text(text),
        };
        self.socket.send(message).await?;
        Ok(())
    }

    /// Send a raw text frame, bypassing JSON encoding
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.socket.send(Message::Text(text.to_string())).await?;
        Ok(())
    }

    /// Receive the next payload sent by the client
    pub async fn recv_json(&mut self) -> Result<Value> {
        loop {
            let message = tokio::time::timeout(TEST_TIMEOUT, self.socket.recv())
                .await
                .context("Timed out waiting for a client payload")?
                .ok_or_else(|| anyhow!("Socket closed"))??;

            match message {
                Message::Text(text) => return Ok(serde_json::from_str(&text)?),
                Message::Binary(bytes) => return Ok(serde_json::from_slice(&bytes)?),
                Message::Close(frame) => {
                    bail!("Client closed with {:?}", frame.map(|f| f.code));
                }
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    }

    /// Receive payloads until one with `op` arrives
    ///
    /// Heartbeats are skipped unless `op` is the heartbeat op.
    pub async fn recv_op(&mut self, op: u64) -> Result<Value> {
        loop {
            let payload = self.recv_json().await?;
            if payload["op"] == op {
                return Ok(payload);
            }
        }
    }

    /// Wait for the client's close frame and return its code
    pub async fn recv_close(&mut self) -> Result<Option<u16>> {
        loop {
            let message = tokio::time::timeout(TEST_TIMEOUT, self.socket.recv())
                .await
                .context("Timed out waiting for a close frame")?;
            match message {
                Some(Ok(Message::Close(frame))) => return Ok(frame.map(|f| f.code)),
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return Ok(None),
            }
        }
    }

    /// Close the socket from the server side
    pub async fn close(&mut self, code: u16) -> Result<()> {
        self.socket
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: Cow::Borrowed("mock close"),
            })))
            .await?;
        Ok(())
    }
}

/// Wait for the first event matching `predicate`, skipping others
pub async fn wait_for_event<F>(
    events: &mut mpsc::UnboundedReceiver<GatewayEvent>,
    mut predicate: F,
) -> Result<GatewayEvent>
where
    F: FnMut(&GatewayEvent) -> bool,
{
    tokio::time::timeout(TEST_TIMEOUT, async {
        while let Some(event) = events.recv().await {
            if predicate(&event) {
                return Ok(event);
            }
        }
        bail!("Event stream ended")
    })
    .await
    .context("Timed out waiting for event")?
}
