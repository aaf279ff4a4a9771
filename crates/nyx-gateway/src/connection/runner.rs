//! Shard runner
//!
//! One task per shard owns the socket, the heartbeat controller, the session
//! and the decompressor. Everything that touches those runs inside a single
//! `select!` loop, so no locking is needed around them.

use super::{gateway_url, ConnectionState, ShardStatus};
use crate::client::GatewayOptions;
use crate::codec::{CodecError, Decompressor, EncodingCodec};
use crate::error::{GatewayError, GatewayResult};
use crate::events::GatewayEvent;
use crate::heartbeat::{HeartbeatController, HeartbeatEvent, TickOutcome};
use crate::protocol::{
    CloseAction, CloseCode, GatewayPayload, IdentifyPayload, OpCode, CLOSE_NORMAL,
    CLOSE_RESUMABLE, EVENT_READY, EVENT_RESUMED,
};
use crate::rest::MetadataProvider;
use crate::session::SessionManager;
use crate::shard::{IdentifyQueue, ShardDescriptor};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::future::Future;
use std::num::NonZeroU32;
use std::pin::Pin;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

/// How long to wait for Hello after the socket opens
const HELLO_TIMEOUT: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type IdentifyTurn = Pin<Box<dyn Future<Output = ()> + Send>>;

/// An application command, already encoded
#[derive(Debug)]
pub(crate) struct OutboundFrame {
    pub op: OpCode,
    pub bytes: Vec<u8>,
}

/// State shared by every runner of one client
pub(crate) struct RunnerContext {
    pub options: GatewayOptions,
    pub provider: Arc<dyn MetadataProvider>,
    pub identify_queue: Arc<IdentifyQueue>,
    pub events: mpsc::UnboundedSender<GatewayEvent>,
    /// Close code to use when the runner is cancelled
    pub close_code: Arc<AtomicU16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handshake {
    Identify,
    Resume,
}

/// How a socket ended
#[derive(Debug)]
enum SocketEnd {
    Cancelled,
    Reconnect { resume: bool },
    Fatal(GatewayError),
}

/// Per-shard connection task
pub(crate) struct ShardRunner {
    shard: ShardDescriptor,
    ctx: Arc<RunnerContext>,
    gateway_url: String,
    codec: EncodingCodec,
    session: SessionManager,
    heartbeat: HeartbeatController,
    heartbeat_events: mpsc::UnboundedReceiver<HeartbeatEvent>,
    commands: mpsc::UnboundedReceiver<OutboundFrame>,
    /// Command held back by the rate limiter; survives reconnects
    pending: Option<OutboundFrame>,
    limiter: DefaultDirectRateLimiter,
    status: watch::Sender<ShardStatus>,
    cancel: CancellationToken,
    state: ConnectionState,
    attempts: u32,
    connected_before: bool,
}

impl ShardRunner {
    pub(crate) fn new(
        shard: ShardDescriptor,
        ctx: Arc<RunnerContext>,
        gateway_url: String,
        commands: mpsc::UnboundedReceiver<OutboundFrame>,
        status: watch::Sender<ShardStatus>,
        cancel: CancellationToken,
    ) -> Self {
        let options = &ctx.options;
        let (heartbeat, heartbeat_events) = HeartbeatController::new(options.max_missed_heartbeats);
        let per_minute = NonZeroU32::new(options.commands_per_minute).unwrap_or(NonZeroU32::MIN);

        Self {
            shard,
            codec: EncodingCodec::new(options.encoding, options.max_payload_size),
            ctx,
            gateway_url,
            session: SessionManager::new(),
            heartbeat,
            heartbeat_events,
            commands,
            pending: None,
            limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
            status,
            cancel,
            state: ConnectionState::Disconnected,
            attempts: 0,
            connected_before: false,
        }
    }

    /// Run until cancelled or a fatal error
    pub(crate) async fn run(mut self) -> GatewayResult<()> {
        let shard_id = self.shard.id;
        let mut handshake = Handshake::Identify;
        let mut url = self.gateway_url.clone();

        let result = loop {
            if self.cancel.is_cancelled() {
                break Ok(());
            }

            let end = self.run_socket(&url, handshake).await;
            self.heartbeat.destroy();
            self.relay_heartbeat_events();
            self.set_state(ConnectionState::Disconnected);

            let resume = match end {
                SocketEnd::Cancelled => break Ok(()),
                SocketEnd::Fatal(err) => break Err(err),
                SocketEnd::Reconnect { resume } => resume,
            };

            let resume_url = self.session.resume_url().map(str::to_string);
            handshake = match resume_url {
                Some(resume_url) if resume && self.session.can_resume() => {
                    url = resume_url;
                    Handshake::Resume
                }
                _ => {
                    self.end_session();
                    Handshake::Identify
                }
            };

            if !self.ctx.options.reconnect.allows(self.attempts) {
                break Err(GatewayError::MaxReconnectAttempts {
                    shard_id,
                    attempts: self.attempts,
                });
            }
            if !self.backoff(handshake == Handshake::Resume).await {
                break Ok(());
            }
            if handshake == Handshake::Identify {
                match self.refresh_gateway_url().await {
                    Some(refreshed) => url = refreshed,
                    None => break Ok(()),
                }
            }
        };

        if let Err(err) = &result {
            tracing::error!(shard_id, error = %err, "Shard stopped");
            self.emit(GatewayEvent::error(shard_id, err.to_string()));
        } else {
            tracing::info!(shard_id, "Shard stopped");
        }
        self.discard_queued();
        self.end_session();
        self.set_state(ConnectionState::Disconnected);
        result
    }

    /// Stop accepting commands and report any that were never written
    fn discard_queued(&mut self) {
        let mut dropped = usize::from(self.pending.take().is_some());
        self.commands.close();
        while self.commands.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::warn!(shard_id = self.shard.id, dropped, "Queued commands discarded");
            self.emit(GatewayEvent::warn(
                self.shard.id,
                format!("{dropped} queued command(s) discarded"),
            ));
        }
    }

    /// Open one socket and drive it until it ends
    async fn run_socket(&mut self, base: &str, handshake: Handshake) -> SocketEnd {
        let shard_id = self.shard.id;
        let options = &self.ctx.options;
        let url = match gateway_url(base, options.version, options.encoding, options.compression) {
            Ok(url) => url,
            Err(err) => return SocketEnd::Fatal(err),
        };

        self.set_state(ConnectionState::Connecting);
        tracing::info!(shard_id, url = %url, ?handshake, "Connecting");
        self.emit(GatewayEvent::Connecting {
            shard_id,
            url: url.to_string(),
        });

        let connected = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return SocketEnd::Cancelled,
            result = connect_async(url.as_str()) => result,
        };
        let ws = match connected {
            Ok((ws, _response)) => ws,
            Err(err) => {
                tracing::warn!(shard_id, error = %err, "Failed to open socket");
                self.emit(GatewayEvent::warn(shard_id, format!("failed to open socket: {err}")));
                return SocketEnd::Reconnect { resume: false };
            }
        };

        self.emit(GatewayEvent::Connected { shard_id });
        if self.connected_before {
            self.emit(GatewayEvent::ShardReconnect { shard_id });
        }
        self.connected_before = true;
        self.set_state(match handshake {
            Handshake::Identify => ConnectionState::Identifying,
            Handshake::Resume => ConnectionState::Resuming,
        });

        let mut decompressor = self.ctx.options.compression.map(Decompressor::new);
        if let Some(decompressor) = decompressor.as_mut() {
            if let Err(err) = decompressor.initialize() {
                return SocketEnd::Fatal(err.into());
            }
        }

        let (mut sink, mut stream) = ws.split();
        let mut identify_turn: Option<IdentifyTurn> = None;
        let hello_deadline = Instant::now() + HELLO_TIMEOUT;
        let mut hello_received = false;

        let end = loop {
            let timer = if hello_received {
                self.heartbeat.next_deadline()
            } else {
                Some(hello_deadline)
            };
            let ready = self.state == ConnectionState::Ready;
            let has_pending = self.pending.is_some();

            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    let code = self.ctx.close_code.load(Ordering::Relaxed);
                    self.close(&mut sink, code, "client destroyed").await;
                    break SocketEnd::Cancelled;
                }

                () = sleep_until(timer) => {
                    if !hello_received {
                        tracing::warn!(shard_id, "No Hello received");
                        self.close(&mut sink, CLOSE_RESUMABLE, "hello timeout").await;
                        break SocketEnd::Reconnect { resume: true };
                    }
                    match self.heartbeat.tick(Instant::now()) {
                        TickOutcome::Beat => {
                            if let Err(err) = self.send_heartbeat(&mut sink).await {
                                break self.send_failed(&mut sink, err).await;
                            }
                        }
                        TickOutcome::Zombied => {
                            self.relay_heartbeat_events();
                            self.close(&mut sink, CLOSE_RESUMABLE, "zombied connection").await;
                            break SocketEnd::Reconnect { resume: true };
                        }
                        TickOutcome::Idle => {}
                    }
                    self.relay_heartbeat_events();
                }

                () = next_turn(&mut identify_turn) => {
                    identify_turn = None;
                    if let Err(err) = self.send_identify(&mut sink).await {
                        break self.send_failed(&mut sink, err).await;
                    }
                }

                () = self.limiter.until_ready(), if ready && has_pending => {
                    if let Some(frame) = self.pending.take() {
                        if let Err(err) = self.send_command(&mut sink, frame).await {
                            break self.send_failed(&mut sink, err).await;
                        }
                    }
                }

                Some(frame) = self.commands.recv(), if ready && !has_pending => {
                    if self.limiter.check().is_ok() {
                        if let Err(err) = self.send_command(&mut sink, frame).await {
                            break self.send_failed(&mut sink, err).await;
                        }
                    } else {
                        tracing::debug!(shard_id, "Command rate limit reached, delaying");
                        self.pending = Some(frame);
                    }
                }

                message = stream.next() => {
                    let payload = match message {
                        Some(Ok(Message::Text(text))) => self
                            .codec
                            .decode(text.as_bytes())
                            .map(Some)
                            .map_err(GatewayError::from),
                        Some(Ok(Message::Binary(bytes))) => self.decode_binary(&bytes, decompressor.as_mut()),
                        Some(Ok(Message::Close(frame))) => {
                            let code = frame.as_ref().map(|f| u16::from(f.code));
                            let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                            break self.on_close(code, reason);
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(err)) => {
                            tracing::warn!(shard_id, error = %err, "Socket error");
                            self.emit(GatewayEvent::warn(shard_id, format!("socket error: {err}")));
                            self.disconnected(None, err.to_string());
                            break SocketEnd::Reconnect { resume: true };
                        }
                        None => {
                            tracing::warn!(shard_id, "Socket stream ended");
                            self.disconnected(None, "stream ended".to_string());
                            break SocketEnd::Reconnect { resume: true };
                        }
                    };

                    match payload {
                        Ok(Some(payload)) => {
                            let next = self
                                .handle_payload(payload, &mut sink, &mut identify_turn, &mut hello_received, handshake)
                                .await;
                            if let Some(end) = next {
                                break end;
                            }
                        }
                        Ok(None) => {}
                        Err(err) => {
                            tracing::warn!(shard_id, error = %err, "Failed to decode inbound frame");
                            self.emit(GatewayEvent::warn(shard_id, format!("inbound frame rejected: {err}")));
                            self.close(&mut sink, CLOSE_RESUMABLE, "decode error").await;
                            break SocketEnd::Reconnect { resume: true };
                        }
                    }
                }
            }
        };

        if let Some(mut decompressor) = decompressor {
            decompressor.destroy();
        }
        end
    }

    fn decode_binary(
        &self,
        bytes: &[u8],
        decompressor: Option<&mut Decompressor>,
    ) -> GatewayResult<Option<GatewayPayload>> {
        match decompressor {
            Some(decompressor) => match decompressor.decompress(bytes)? {
                Some(inflated) => Ok(Some(self.codec.decode(&inflated)?)),
                None => Ok(None),
            },
            None => Ok(Some(self.codec.decode(bytes)?)),
        }
    }

    /// Apply one inbound payload; `Some` ends the socket
    async fn handle_payload(
        &mut self,
        payload: GatewayPayload,
        sink: &mut WsSink,
        identify_turn: &mut Option<IdentifyTurn>,
        hello_received: &mut bool,
        handshake: Handshake,
    ) -> Option<SocketEnd> {
        let shard_id = self.shard.id;
        tracing::trace!(shard_id, op = %payload.op, "Received payload");

        match payload.op {
            OpCode::Hello => {
                let Some(hello) = payload.as_hello() else {
                    self.emit(GatewayEvent::warn(shard_id, "malformed Hello"));
                    self.close(sink, CLOSE_RESUMABLE, "malformed hello").await;
                    return Some(SocketEnd::Reconnect { resume: true });
                };
                *hello_received = true;

                if let Err(err) = self.heartbeat.start(hello.heartbeat_interval) {
                    self.close(sink, CLOSE_NORMAL, "invalid heartbeat interval").await;
                    return Some(SocketEnd::Fatal(err.into()));
                }
                self.relay_heartbeat_events();

                if handshake == Handshake::Resume && self.session.can_resume() {
                    if let Err(err) = self.send_resume(sink).await {
                        return Some(self.send_failed(sink, err).await);
                    }
                } else {
                    self.set_state(ConnectionState::Identifying);
                    let queue = Arc::clone(&self.ctx.identify_queue);
                    *identify_turn = Some(Box::pin(async move { queue.wait_turn(shard_id).await }));
                }
                None
            }

            OpCode::Dispatch => {
                self.handle_dispatch(payload);
                None
            }

            OpCode::Heartbeat => {
                tracing::debug!(shard_id, "Server requested a heartbeat");
                match self.send_heartbeat(sink).await {
                    Ok(()) => None,
                    Err(err) => Some(self.send_failed(sink, err).await),
                }
            }

            OpCode::HeartbeatAck => {
                self.heartbeat.acknowledge(Instant::now());
                self.relay_heartbeat_events();
                None
            }

            OpCode::InvalidSession => {
                let resumable = payload.as_invalid_session().unwrap_or(false);
                tracing::info!(shard_id, resumable, "Invalid session");
                self.emit(GatewayEvent::SessionInvalid { shard_id, resumable });

                if resumable && self.session.can_resume() {
                    self.close(sink, CLOSE_RESUMABLE, "invalid session").await;
                    Some(SocketEnd::Reconnect { resume: true })
                } else {
                    self.session.invalidate();
                    self.end_session();
                    self.close(sink, CLOSE_NORMAL, "invalid session").await;
                    Some(SocketEnd::Reconnect { resume: false })
                }
            }

            OpCode::Reconnect => {
                tracing::info!(shard_id, "Server requested reconnect");
                self.emit(GatewayEvent::debug(shard_id, "server requested reconnect"));
                self.end_session();
                self.close(sink, CLOSE_NORMAL, "reconnect requested").await;
                Some(SocketEnd::Reconnect { resume: false })
            }

            op => {
                tracing::debug!(shard_id, op = %op, "Ignoring unexpected op code");
                None
            }
        }
    }

    fn handle_dispatch(&mut self, payload: GatewayPayload) {
        let shard_id = self.shard.id;
        if let Some(sequence) = payload.s {
            self.session.update_sequence(sequence);
        }

        if payload.is_event(EVENT_READY) {
            match payload.as_ready() {
                Some(ready) => {
                    tracing::info!(shard_id, session_id = %ready.session_id, "Session started");
                    self.session
                        .register_session(ready.session_id.clone(), payload.s, ready.resume_gateway_url);
                    self.attempts = 0;
                    self.set_state(ConnectionState::Ready);
                    self.emit(GatewayEvent::SessionStart {
                        shard_id,
                        session_id: ready.session_id,
                    });
                    self.emit(GatewayEvent::ShardReady { shard_id });
                }
                None => {
                    tracing::warn!(shard_id, "READY without a session ID");
                    self.emit(GatewayEvent::warn(shard_id, "READY without a session ID"));
                }
            }
        } else if payload.is_event(EVENT_RESUMED) {
            let session_id = self.session.session_id().unwrap_or_default().to_string();
            tracing::info!(shard_id, session_id = %session_id, "Session resumed");
            self.attempts = 0;
            self.set_state(ConnectionState::Ready);
            self.emit(GatewayEvent::SessionResumed {
                shard_id,
                session_id,
            });
            self.emit(GatewayEvent::ShardReady { shard_id });
        } else {
            self.publish_status();
        }

        self.emit(GatewayEvent::Dispatch {
            shard_id,
            event: payload.t.unwrap_or_default(),
            sequence: payload.s,
            data: payload.d,
        });
    }

    fn on_close(&mut self, code: Option<u16>, reason: String) -> SocketEnd {
        let shard_id = self.shard.id;
        tracing::info!(shard_id, code = ?code, reason = %reason, "Socket closed by server");
        self.disconnected(code, reason.clone());

        match CloseAction::for_code(code) {
            CloseAction::Resume => SocketEnd::Reconnect { resume: true },
            CloseAction::Reidentify => {
                self.session.invalidate();
                self.end_session();
                SocketEnd::Reconnect { resume: false }
            }
            CloseAction::Fatal => {
                let code = code.unwrap_or_default();
                let reason = CloseCode::from_u16(code)
                    .map_or(reason, |c| c.description().to_string());
                SocketEnd::Fatal(GatewayError::FatalClose {
                    shard_id,
                    code,
                    reason,
                })
            }
        }
    }

    /// Classify a failed write
    ///
    /// Encoding failures are bugs and stop the shard; transport failures
    /// reconnect.
    async fn send_failed(&mut self, sink: &mut WsSink, err: GatewayError) -> SocketEnd {
        let shard_id = self.shard.id;
        if err.is_transient() {
            tracing::warn!(shard_id, error = %err, "Write failed");
            self.emit(GatewayEvent::warn(shard_id, format!("write failed: {err}")));
            self.disconnected(None, err.to_string());
            SocketEnd::Reconnect { resume: true }
        } else {
            self.close(sink, CLOSE_NORMAL, "client error").await;
            SocketEnd::Fatal(err)
        }
    }

    async fn send_heartbeat(&mut self, sink: &mut WsSink) -> GatewayResult<()> {
        let sequence = self.session.sequence();
        self.write(sink, &GatewayPayload::heartbeat(sequence)).await?;
        self.heartbeat.send_heartbeat(Instant::now());
        self.relay_heartbeat_events();
        self.emit(GatewayEvent::HeartbeatSent {
            shard_id: self.shard.id,
            sequence,
        });
        Ok(())
    }

    fn identify_payload(&self) -> IdentifyPayload {
        let options = &self.ctx.options;
        IdentifyPayload {
            token: options.normalized_token().to_string(),
            properties: options.properties.clone(),
            compress: false,
            large_threshold: options.large_threshold,
            shard: Some(self.shard.identify_pair()),
            presence: options.presence.clone(),
            intents: options.intents.bits(),
        }
    }

    async fn send_identify(&mut self, sink: &mut WsSink) -> GatewayResult<()> {
        let payload = GatewayPayload::identify(&self.identify_payload())
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        tracing::info!(shard_id = self.shard.id, total = self.shard.total, "Identifying");
        self.write(sink, &payload).await
    }

    async fn send_resume(&mut self, sink: &mut WsSink) -> GatewayResult<()> {
        let Some(resume) = self.session.resume_payload(self.ctx.options.normalized_token()) else {
            return Err(GatewayError::Protocol("no resumable session".to_string()));
        };
        tracing::info!(
            shard_id = self.shard.id,
            session_id = %resume.session_id,
            seq = resume.seq,
            "Resuming"
        );
        self.set_state(ConnectionState::Resuming);
        let payload =
            GatewayPayload::resume(&resume).map_err(|e| CodecError::Encode(e.to_string()))?;
        self.write(sink, &payload).await
    }

    async fn send_command(&mut self, sink: &mut WsSink, frame: OutboundFrame) -> GatewayResult<()> {
        tracing::trace!(shard_id = self.shard.id, op = %frame.op, "Sending command");
        self.write_bytes(sink, frame.bytes).await
    }

    async fn write(&mut self, sink: &mut WsSink, payload: &GatewayPayload) -> GatewayResult<()> {
        let bytes = self.codec.encode(payload)?;
        self.write_bytes(sink, bytes).await
    }

    async fn write_bytes(&mut self, sink: &mut WsSink, bytes: Vec<u8>) -> GatewayResult<()> {
        let message = if self.codec.encoding().is_binary() {
            Message::Binary(bytes.into())
        } else {
            let text = String::from_utf8(bytes).map_err(|e| CodecError::Encode(e.to_string()))?;
            Message::Text(text.into())
        };
        sink.send(message).await?;
        Ok(())
    }

    /// Send a close frame and report the disconnect
    async fn close(&mut self, sink: &mut WsSink, code: u16, reason: &'static str) {
        self.set_state(ConnectionState::Closing);
        let frame = CloseFrame {
            code: code.into(),
            reason: reason.into(),
        };
        if let Err(err) = sink.send(Message::Close(Some(frame))).await {
            tracing::debug!(shard_id = self.shard.id, error = %err, "Close frame not delivered");
        }
        self.disconnected(Some(code), reason.to_string());
    }

    fn disconnected(&mut self, code: Option<u16>, reason: String) {
        let shard_id = self.shard.id;
        self.emit(GatewayEvent::Close {
            shard_id,
            code,
            reason,
        });
        self.emit(GatewayEvent::ShardDisconnect { shard_id, code });
    }

    /// Forget the current session, reporting it if one existed
    fn end_session(&mut self) {
        if let Some(session_id) = self.session.session_id() {
            self.emit(GatewayEvent::SessionEnd {
                shard_id: self.shard.id,
                session_id: Some(session_id.to_string()),
            });
        }
        self.session.reset();
        self.publish_status();
    }

    /// Wait out the backoff delay; false if cancelled meanwhile
    async fn backoff(&mut self, resume: bool) -> bool {
        let delay = self.ctx.options.reconnect.delay_for(self.attempts);
        self.attempts += 1;
        tracing::info!(
            shard_id = self.shard.id,
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            resume,
            "Reconnecting after backoff"
        );
        self.emit(GatewayEvent::Reconnecting {
            shard_id: self.shard.id,
            attempt: self.attempts,
            delay,
            resume,
        });
        self.publish_status();

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    /// Fetch a fresh connect URL, keeping the old one on failure
    ///
    /// Returns `None` when cancelled while the lookup is in flight.
    async fn refresh_gateway_url(&mut self) -> Option<String> {
        let fetched = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return None,
            result = self.ctx.provider.connection_metadata() => result,
        };
        match fetched {
            Ok(metadata) => {
                self.gateway_url = metadata.url;
            }
            Err(err) => {
                tracing::warn!(shard_id = self.shard.id, error = %err, "Metadata refresh failed");
                self.emit(GatewayEvent::warn(
                    self.shard.id,
                    format!("metadata refresh failed: {err}"),
                ));
            }
        }
        Some(self.gateway_url.clone())
    }

    /// Re-publish controller events on the client stream
    fn relay_heartbeat_events(&mut self) {
        let shard_id = self.shard.id;
        while let Ok(event) = self.heartbeat_events.try_recv() {
            let relayed = match event {
                HeartbeatEvent::Started { interval, .. } => Some(GatewayEvent::debug(
                    shard_id,
                    format!("heartbeat started every {}ms", interval.as_millis()),
                )),
                HeartbeatEvent::Sent => None,
                HeartbeatEvent::Acknowledged { latency } => {
                    Some(GatewayEvent::HeartbeatAck { shard_id, latency })
                }
                HeartbeatEvent::Missed { missed } => Some(GatewayEvent::warn(
                    shard_id,
                    format!("{missed} heartbeat(s) not acknowledged"),
                )),
                HeartbeatEvent::Zombied { missed } => {
                    Some(GatewayEvent::HeartbeatTimeout { shard_id, missed })
                }
            };
            if let Some(event) = relayed {
                self.emit(event);
            }
        }
        self.publish_status();
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::debug!(shard_id = self.shard.id, from = %self.state, to = %state, "State change");
            self.state = state;
        }
        self.publish_status();
    }

    fn publish_status(&self) {
        self.status.send_replace(ShardStatus {
            state: self.state,
            latency: self.heartbeat.latency(),
            missed: self.heartbeat.missed(),
            session_id: self.session.session_id().map(str::to_string),
            sequence: self.session.sequence(),
            attempts: self.attempts,
        });
    }

    fn emit(&self, event: GatewayEvent) {
        let _ = self.ctx.events.send(event);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn next_turn(turn: &mut Option<IdentifyTurn>) {
    match turn.as_mut() {
        Some(turn) => turn.await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{GatewayIntents, UpdatePresence};
    use crate::rest::StaticMetadataProvider;

    fn runner(options: GatewayOptions) -> (ShardRunner, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(RunnerContext {
            options,
            provider: Arc::new(StaticMetadataProvider::new("ws://127.0.0.1:1", 1, 1)),
            identify_queue: Arc::new(IdentifyQueue::new(1, Duration::from_secs(5))),
            events,
            close_code: Arc::new(AtomicU16::new(CLOSE_NORMAL)),
        });
        let shard = ShardDescriptor {
            id: 1,
            total: 2,
            bucket: 0,
            guild_estimate: 0,
        };
        let (_commands_tx, commands) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(ShardStatus::default());
        let runner = ShardRunner::new(
            shard,
            ctx,
            "ws://127.0.0.1:1".to_string(),
            commands,
            status,
            CancellationToken::new(),
        );
        (runner, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<GatewayEvent>) -> Vec<GatewayEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_identify_payload() {
        let mut options = GatewayOptions::new("Bot a.b.c", GatewayIntents::GUILDS);
        options.presence = Some(UpdatePresence::status("idle"));
        let (runner, _rx) = runner(options);

        let identify = runner.identify_payload();
        assert_eq!(identify.token, "a.b.c");
        assert_eq!(identify.shard, Some([1, 2]));
        assert_eq!(identify.intents, 1);
        assert_eq!(identify.large_threshold, 50);
        assert_eq!(identify.presence.unwrap().status, "idle");
    }

    #[test]
    fn test_ready_registers_session() {
        let (mut runner, mut rx) = runner(GatewayOptions::new("a.b.c", GatewayIntents::GUILDS));
        runner.attempts = 3;

        runner.handle_dispatch(GatewayPayload::dispatch(
            EVENT_READY,
            1,
            serde_json::json!({"session_id": "abc", "resume_gateway_url": "wss://x"}),
        ));

        assert_eq!(runner.session.session_id(), Some("abc"));
        assert_eq!(runner.session.resume_url(), Some("wss://x"));
        assert!(runner.session.can_resume());
        assert_eq!(runner.attempts, 0);
        assert_eq!(runner.state, ConnectionState::Ready);

        let events = drain(&mut rx);
        assert!(events.contains(&GatewayEvent::ShardReady { shard_id: 1 }));
        assert!(events.iter().any(|e| matches!(e, GatewayEvent::Dispatch { event, .. } if event == "READY")));
    }

    #[test]
    fn test_dispatch_sequence_is_monotonic() {
        let (mut runner, _rx) = runner(GatewayOptions::new("a.b.c", GatewayIntents::GUILDS));
        runner.handle_dispatch(GatewayPayload::dispatch("MESSAGE_CREATE", 42, serde_json::Value::Null));
        runner.handle_dispatch(GatewayPayload::dispatch("MESSAGE_CREATE", 41, serde_json::Value::Null));
        assert_eq!(runner.session.sequence(), Some(42));
    }

    #[test]
    fn test_close_policy() {
        let (mut runner, _rx) = runner(GatewayOptions::new("a.b.c", GatewayIntents::GUILDS));
        runner.session.register_session("abc", Some(42), Some("wss://x".to_string()));

        assert!(matches!(
            runner.on_close(Some(4000), String::new()),
            SocketEnd::Reconnect { resume: true }
        ));
        assert!(runner.session.can_resume());

        assert!(matches!(
            runner.on_close(Some(4004), String::new()),
            SocketEnd::Reconnect { resume: false }
        ));
        assert!(!runner.session.can_resume());
        assert_eq!(runner.session.session_id(), None);

        match runner.on_close(Some(4014), String::new()) {
            SocketEnd::Fatal(GatewayError::FatalClose { code, reason, .. }) => {
                assert_eq!(code, 4014);
                assert_eq!(reason, "Disallowed intents");
            }
            other => panic!("expected fatal close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_heartbeat_events_are_relayed() {
        let (mut runner, mut rx) = runner(GatewayOptions::new("a.b.c", GatewayIntents::GUILDS));
        runner.heartbeat.start(41_250).unwrap();
        runner.relay_heartbeat_events();

        let events = drain(&mut rx);
        assert!(matches!(events.as_slice(), [GatewayEvent::Debug { .. }]));
    }

    #[test]
    fn test_held_command_is_reported_when_discarded() {
        let (mut runner, mut rx) = runner(GatewayOptions::new("a.b.c", GatewayIntents::GUILDS));
        runner.pending = Some(OutboundFrame {
            op: OpCode::PresenceUpdate,
            bytes: b"{}".to_vec(),
        });

        runner.discard_queued();
        assert!(runner.pending.is_none());

        let events = drain(&mut rx);
        match events.as_slice() {
            [GatewayEvent::Warn { shard_id, message }] => {
                assert_eq!(*shard_id, Some(1));
                assert!(message.starts_with("1 queued"));
            }
            other => panic!("expected one warning, got {other:?}"),
        }

        runner.discard_queued();
        assert!(drain(&mut rx).is_empty());
    }
}
