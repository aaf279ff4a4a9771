//! Gateway client
//!
//! Plans shards, spawns one runner per shard and routes application
//! commands to them. Runner state is observed through `watch` channels; the
//! client itself holds no socket.

use super::{GatewayOptions, ShardMode};
use crate::codec::EncodingCodec;
use crate::connection::runner::{OutboundFrame, RunnerContext, ShardRunner};
use crate::connection::{ConnectionState, ShardStatus};
use crate::error::{GatewayError, GatewayResult};
use crate::events::GatewayEvent;
use crate::protocol::{
    snowflake, GatewayPayload, OpCode, RequestGuildMembers, UpdatePresence, UpdateVoiceState,
    CLOSE_NORMAL,
};
use crate::rest::{ConnectionMetadata, MetadataProvider};
use crate::shard::{
    check_session_start_limit, shard_for_guild, IdentifyQueue, ShardCoordinator, ShardDescriptor,
};
use dashmap::DashMap;
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use validator::Validate;

/// Client-side view of a running shard
struct ShardHandle {
    descriptor: ShardDescriptor,
    commands: mpsc::UnboundedSender<OutboundFrame>,
    status: watch::Receiver<ShardStatus>,
    task: Arc<AsyncMutex<Option<JoinHandle<GatewayResult<()>>>>>,
}

/// Sharded gateway client
pub struct Gateway {
    options: GatewayOptions,
    provider: Arc<dyn MetadataProvider>,
    events: mpsc::UnboundedSender<GatewayEvent>,
    codec: EncodingCodec,
    shards: DashMap<u32, ShardHandle>,
    shard_total: AtomicU32,
    cancel: CancellationToken,
    close_code: Arc<AtomicU16>,
    connected: AtomicBool,
    destroyed: AtomicBool,
    relay: Mutex<Option<JoinHandle<()>>>,
}

impl Gateway {
    /// Validate `options` and create a client with its event stream
    pub fn new(
        options: GatewayOptions,
        provider: Arc<dyn MetadataProvider>,
    ) -> GatewayResult<(Self, mpsc::UnboundedReceiver<GatewayEvent>)> {
        options.validate()?;

        let (events, rx) = mpsc::unbounded_channel();
        let gateway = Self {
            codec: EncodingCodec::new(options.encoding, options.max_payload_size),
            options,
            provider,
            events,
            shards: DashMap::new(),
            shard_total: AtomicU32::new(0),
            cancel: CancellationToken::new(),
            close_code: Arc::new(AtomicU16::new(CLOSE_NORMAL)),
            connected: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            relay: Mutex::new(None),
        };
        Ok((gateway, rx))
    }

    /// Plan shards, spawn their runners and wait until every socket is open
    ///
    /// If a runner stops with an error before its socket opens, the whole
    /// client is destroyed with a normal close and that error is returned.
    /// The client cannot be connected again afterwards.
    pub async fn connect(&self) -> GatewayResult<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(GatewayError::Destroyed);
        }
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(GatewayError::AlreadyConnected);
        }

        let (metadata, coordinator, shards) = match self.plan().await {
            Ok(plan) => plan,
            Err(err) => {
                self.connected.store(false, Ordering::SeqCst);
                return Err(err);
            }
        };
        let limit = metadata.session_start_limit;

        let total = coordinator.total();
        self.shard_total.store(total, Ordering::SeqCst);
        tracing::info!(
            url = %metadata.url,
            total,
            spawning = shards.len(),
            max_concurrency = limit.max_concurrency,
            "Connecting gateway"
        );

        let (runner_events, relay_rx) = mpsc::unbounded_channel();
        let relay = tokio::spawn(relay_events(
            relay_rx,
            self.events.clone(),
            shards.iter().map(|s| s.id).collect(),
        ));
        if let Ok(mut slot) = self.relay.lock() {
            *slot = Some(relay);
        }

        let ctx = Arc::new(RunnerContext {
            options: self.options.clone(),
            provider: Arc::clone(&self.provider),
            identify_queue: Arc::new(IdentifyQueue::new(
                limit.max_concurrency,
                self.options.identify_delay,
            )),
            events: runner_events,
            close_code: Arc::clone(&self.close_code),
        });

        let mut watchers = Vec::with_capacity(shards.len());
        for descriptor in shards {
            let (commands_tx, commands_rx) = mpsc::unbounded_channel();
            let (status_tx, status_rx) = watch::channel(ShardStatus::default());
            let runner = ShardRunner::new(
                descriptor,
                Arc::clone(&ctx),
                metadata.url.clone(),
                commands_rx,
                status_tx,
                self.cancel.child_token(),
            );
            let task = tokio::spawn(runner.run());

            watchers.push((descriptor.id, status_rx.clone()));
            self.shards.insert(
                descriptor.id,
                ShardHandle {
                    descriptor,
                    commands: commands_tx,
                    status: status_rx,
                    task: Arc::new(AsyncMutex::new(Some(task))),
                },
            );
        }
        drop(ctx);

        for (shard_id, mut status) in watchers {
            if status.wait_for(|s| s.state.is_open()).await.is_err() {
                // The runner dropped its status sender: it has finished.
                if let Some(Err(err)) = self.join_shard(shard_id).await {
                    self.destroy(CLOSE_NORMAL).await;
                    return Err(err);
                }
            }
        }

        tracing::info!(shards = self.shards.len(), "Gateway connected");
        Ok(())
    }

    /// Encode `data` and queue it on `shard_id`'s socket
    pub fn send<T: Serialize + ?Sized>(
        &self,
        shard_id: u32,
        op: OpCode,
        data: &T,
    ) -> GatewayResult<()> {
        if !op.is_sendable() || op.is_handshake() {
            return Err(GatewayError::NotSendable(op));
        }

        let shard = self
            .shards
            .get(&shard_id)
            .ok_or(GatewayError::UnknownShard(shard_id))?;
        if !shard.status.borrow().state.is_open() {
            return Err(GatewayError::NotConnected(shard_id));
        }

        let payload = GatewayPayload::new(op, self.codec.to_data(data)?);
        let bytes = self.codec.encode(&payload)?;
        shard
            .commands
            .send(OutboundFrame { op, bytes })
            .map_err(|_| GatewayError::NotConnected(shard_id))
    }

    /// Update the presence on every shard
    pub fn update_presence(&self, presence: &UpdatePresence) -> GatewayResult<()> {
        presence.validate()?;
        for shard_id in self.shard_ids() {
            self.send(shard_id, OpCode::PresenceUpdate, presence)?;
        }
        Ok(())
    }

    /// Join, move or leave a voice channel
    pub fn update_voice_state(&self, state: &UpdateVoiceState) -> GatewayResult<()> {
        state.validate()?;
        let shard_id = self.shard_for(&state.guild_id);
        self.send(shard_id, OpCode::VoiceStateUpdate, state)
    }

    /// Ask for a guild's member list
    pub fn request_guild_members(&self, request: &RequestGuildMembers) -> GatewayResult<()> {
        request.validate()?;
        let shard_id = self.shard_for(&request.guild_id);
        self.send(shard_id, OpCode::RequestGuildMembers, request)
    }

    /// Close every shard with `code` and drop their sessions
    ///
    /// Safe to call more than once; later calls do nothing.
    pub async fn destroy(&self, code: u16) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(code, "Destroying gateway");

        self.close_code.store(code, Ordering::SeqCst);
        self.cancel.cancel();

        for shard_id in self.shard_ids() {
            if let Some(Err(err)) = self.join_shard(shard_id).await {
                tracing::debug!(shard_id, error = %err, "Shard ended with error before destroy");
            }
        }
        self.shards.clear();

        let relay = self.relay.lock().ok().and_then(|mut slot| slot.take());
        if let Some(relay) = relay {
            let _ = relay.await;
        }
    }

    /// Wait for every shard runner to finish
    ///
    /// Returns as soon as any shard stops with an error.
    pub async fn wait(&self) -> GatewayResult<()> {
        let mut runners: FuturesUnordered<_> = self
            .shard_ids()
            .into_iter()
            .map(|shard_id| self.join_shard(shard_id))
            .collect();

        while let Some(result) = runners.next().await {
            if let Some(Err(err)) = result {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Whether every shard is open, responsive and fast enough
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        if self.shards.is_empty() {
            return false;
        }
        self.shards.iter().all(|shard| {
            let status = shard.status.borrow();
            status.state.is_open()
                && status.missed < self.options.max_missed_heartbeats
                && status
                    .latency
                    .is_none_or(|latency| latency < self.options.latency_ceiling)
        })
    }

    /// Latest status of one shard
    #[must_use]
    pub fn shard_status(&self, shard_id: u32) -> Option<ShardStatus> {
        self.shards.get(&shard_id).map(|s| s.status.borrow().clone())
    }

    /// Connection state of one shard
    #[must_use]
    pub fn shard_state(&self, shard_id: u32) -> Option<ConnectionState> {
        self.shards.get(&shard_id).map(|s| s.status.borrow().state)
    }

    /// Descriptor of one shard
    #[must_use]
    pub fn shard(&self, shard_id: u32) -> Option<ShardDescriptor> {
        self.shards.get(&shard_id).map(|s| s.descriptor)
    }

    /// Shards run by this client
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard total sent in Identify, 0 before `connect`
    #[must_use]
    pub fn shard_total(&self) -> u32 {
        self.shard_total.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    /// Fetch metadata and lay out the shards to spawn
    async fn plan(
        &self,
    ) -> GatewayResult<(ConnectionMetadata, ShardCoordinator, Vec<ShardDescriptor>)> {
        let metadata = self.provider.connection_metadata().await?;
        let limit = metadata.session_start_limit;
        let mut coordinator = ShardCoordinator::new(self.options.guilds_per_shard);

        let shards = match &self.options.shard_mode {
            ShardMode::Auto => {
                let guilds = if self.options.guilds_per_shard.is_some() {
                    self.provider.resource_count().await?
                } else {
                    0
                };
                coordinator.spawn(guilds, limit.max_concurrency, metadata.shards)?
            }
            ShardMode::Fixed { ids, total } => {
                coordinator.spawn_fixed(ids, *total, limit.max_concurrency, 0)?
            }
            ShardMode::Single => coordinator.spawn_fixed(&[0], 1, limit.max_concurrency, 0)?,
        };
        check_session_start_limit(&limit, shards.len())?;
        Ok((metadata, coordinator, shards))
    }

    fn shard_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.shards.iter().map(|s| *s.key()).collect();
        ids.sort_unstable();
        ids
    }

    fn shard_for(&self, guild_id: &str) -> u32 {
        shard_for_guild(snowflake(guild_id), self.shard_total())
    }

    /// Await a shard's runner, `None` if already joined
    ///
    /// The handle stays in place until the runner finishes, so a cancelled
    /// wait can be resumed by `destroy`.
    async fn join_shard(&self, shard_id: u32) -> Option<GatewayResult<()>> {
        // Never hold a map guard across the await.
        let task = Arc::clone(&self.shards.get(&shard_id)?.task);
        let mut slot = task.lock().await;
        let result = match slot.as_mut()?.await {
            Ok(result) => result,
            Err(err) => Err(GatewayError::Protocol(format!(
                "shard {shard_id} task failed: {err}"
            ))),
        };
        *slot = None;
        Some(result)
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("shards", &self.shard_ids())
            .field("shard_total", &self.shard_total())
            .field("destroyed", &self.destroyed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Forward runner events and announce `Ready` once every shard is ready
async fn relay_events(
    mut rx: mpsc::UnboundedReceiver<GatewayEvent>,
    events: mpsc::UnboundedSender<GatewayEvent>,
    expected: HashSet<u32>,
) {
    let mut ready = HashSet::with_capacity(expected.len());
    let mut announced = false;

    while let Some(event) = rx.recv().await {
        let shard_ready = match &event {
            GatewayEvent::ShardReady { shard_id } => Some(*shard_id),
            _ => None,
        };
        if events.send(event).is_err() {
            tracing::debug!("Event receiver dropped");
        }

        if let Some(shard_id) = shard_ready {
            ready.insert(shard_id);
            if !announced && ready.is_superset(&expected) {
                announced = true;
                let shard_count = u32::try_from(expected.len()).unwrap_or(u32::MAX);
                tracing::info!(shard_count, "All shards ready");
                let _ = events.send(GatewayEvent::Ready { shard_count });
            }
        }
    }
}
