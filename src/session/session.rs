use crate::{
    client::ClientConn,
    opts::Opts,
    protocol::{
        game::{
            EntityDataFlags, GamePacket, GameRulesChanged, LevelChunk, LevelEvent, MovePlayer,
            SetActorData, SetDifficulty, SetPlayerGameType,
        },
        game,
        position::ChunkPos,
    },
    server::{conn::CONNECT_TIMEOUT, Conn, Discovery},
    session::{
        animation::{Animation, Dimension},
        chunk, handler,
        processor::{Context, NopProcessor, Processor},
        Registry, Tracker,
    },
    transport::Transport,
};
use anyhow::{anyhow, bail, Context as _};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Arc, Mutex as StdMutex, RwLock as StdRwLock, Weak,
    },
    time::Duration,
};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

struct ServerSlot {
    addr: String,
    conn: Arc<Conn>,
}

/// A player session within the proxy, owning the client connection and, at
/// any time, one downstream server connection. Manages login, transfers,
/// fallbacks and teardown.
pub struct Session {
    weak: Weak<Session>,
    client: Arc<dyn ClientConn>,

    server: RwLock<Option<ServerSlot>>,
    server_latency: AtomicI64,
    cache: StdMutex<Vec<u8>>,

    registry: Arc<Registry>,
    discovery: Arc<dyn Discovery>,
    transport: Arc<dyn Transport>,
    opts: Opts,

    animation: Mutex<Box<dyn Animation>>,
    processor: StdRwLock<Box<dyn Processor>>,
    tracker: Tracker,

    logged_in: AtomicBool,
    transferring: AtomicBool,
    in_fallback: AtomicBool,
    closed: AtomicBool,

    ctx: CancellationToken,
}

/// Clears an in-progress flag on scope exit.
struct FlagGuard<'a>(&'a AtomicBool);

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Session {
    /// Creates a new session for the provided client connection. The session
    /// does nothing until [`Session::login`] is called.
    pub fn new(
        client: Arc<dyn ClientConn>,
        registry: Arc<Registry>,
        discovery: Arc<dyn Discovery>,
        opts: Opts,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            client,

            server: RwLock::new(None),
            server_latency: AtomicI64::new(0),
            cache: StdMutex::new(Vec::new()),

            registry,
            discovery,
            transport,
            opts,

            animation: Mutex::new(Box::new(Dimension)),
            processor: StdRwLock::new(Box::new(NopProcessor)),
            tracker: Tracker::new(),

            logged_in: AtomicBool::new(false),
            transferring: AtomicBool::new(false),
            in_fallback: AtomicBool::new(false),
            closed: AtomicBool::new(false),

            ctx: CancellationToken::new(),
        })
    }

    /// Initiates the login sequence with the default timeout.
    pub async fn login(&self) -> anyhow::Result<()> {
        self.login_timeout(CONNECT_TIMEOUT).await
    }

    /// Initiates the login sequence: server discovery, the connection
    /// sequence against the discovered server, and spawning the player.
    pub async fn login_timeout(&self, timeout: Duration) -> anyhow::Result<()> {
        let addr = self
            .discovery
            .discover(self.client.as_ref())
            .await
            .context("discovery failed")?;

        let conn = self.dial(&addr).await.context("dialer failed")?;
        if let Err(err) = conn.connect_timeout(timeout).await {
            conn.close_with_error(anyhow!("login failed"));
            return Err(err.context("connection sequence failed"));
        }

        let mut game_data = conn.game_data();
        self.with_processor(|processor| {
            let mut ctx = Context::new();
            processor.process_start_game(&mut ctx, &mut game_data);
        });
        self.client
            .start_game(&game_data)
            .await
            .context("start game sequence failed")?;

        *self.server.write().await = Some(ServerSlot { addr, conn });
        self.logged_in.store(true, Ordering::SeqCst);

        let this = self.weak.upgrade().context("session dropped")?;
        handler::spawn_pumps(Arc::clone(&this));

        let identity = self.client.identity();
        self.registry.add_session(identity.xuid, this);
        tracing::info!(username = %identity.display_name, "logged in session");
        Ok(())
    }

    /// Initiates a transfer to a different server with the default timeout.
    pub async fn transfer(&self, addr: &str) -> anyhow::Result<()> {
        self.transfer_timeout(addr, CONNECT_TIMEOUT).await
    }

    /// Initiates a transfer to the server at `addr`. Only one transfer may
    /// run at a time; a concurrent call fails without side effects.
    pub async fn transfer_timeout(&self, addr: &str, timeout: Duration) -> anyhow::Result<()> {
        if self
            .transferring
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            bail!("already transferring");
        }
        let _transferring = FlagGuard(&self.transferring);

        let origin = self
            .server()
            .await
            .map(|(addr, _)| addr)
            .unwrap_or_default();
        let cancelled = self.with_processor(|processor| {
            let mut ctx = Context::new();
            processor.process_pre_transfer(&mut ctx, &origin, addr);
            ctx.cancelled()
        });
        if cancelled {
            bail!("processor cancelled the transfer");
        }

        let mut slot = self.server.write().await;
        if slot.as_ref().is_some_and(|slot| slot.addr == addr) {
            bail!("already connected to this server");
        }

        // Freeze the player locally; client-side prediction must not drift
        // while no server is authoritative.
        self.send_metadata(true).await;

        let connected = async {
            let conn = self.dial(addr).await.context("dialer failed")?;
            if let Err(err) = conn.connect_timeout(timeout).await {
                conn.close_with_error(anyhow!("transfer failed"));
                return Err(err.context("connection sequence failed"));
            }
            Ok(conn)
        }
        .await;

        let conn = match connected {
            Ok(conn) => conn,
            Err(err) => {
                self.send_metadata(false).await;
                drop(slot);
                self.with_processor(|processor| {
                    let mut ctx = Context::new();
                    processor.process_transfer_failure(&mut ctx, &origin, addr);
                });
                return Err(err);
            }
        };

        if let Some(old) = slot.take() {
            old.conn
                .close_with_error(anyhow!("transferred to another server"));
        }

        let game_data = conn.game_data();
        let animation = self.animation.lock().await;
        animation.play(self.client.as_ref(), &game_data).await;

        let chunk = chunk::empty_chunk(game_data.dimension);
        let center = ChunkPos::containing(game_data.player_position);
        for x in center.x - 4..=center.x + 4 {
            for z in center.z - 4..=center.z + 4 {
                let _ = self
                    .client
                    .write_packet(&GamePacket::LevelChunk(LevelChunk {
                        dimension: game_data.dimension,
                        position: ChunkPos { x, z },
                        sub_chunk_count: 1,
                        cache_enabled: false,
                        payload: chunk.clone(),
                    }))
                    .await;
            }
        }

        self.tracker.clear_all(self.client.as_ref()).await;

        let _ = self
            .client
            .write_packet(&GamePacket::MovePlayer(MovePlayer {
                entity_runtime_id: game_data.entity_runtime_id,
                position: game_data.player_position,
                pitch: game_data.pitch,
                yaw: game_data.yaw,
                head_yaw: game_data.yaw,
                mode: MovePlayer::MODE_RESET,
                ..Default::default()
            }))
            .await;
        let _ = self
            .client
            .write_packet(&GamePacket::LevelEvent(LevelEvent {
                event_type: LevelEvent::STOP_RAINING,
                event_data: 10_000,
                ..Default::default()
            }))
            .await;
        let _ = self
            .client
            .write_packet(&GamePacket::LevelEvent(LevelEvent {
                event_type: LevelEvent::STOP_THUNDERSTORM,
                ..Default::default()
            }))
            .await;
        let _ = self
            .client
            .write_packet(&GamePacket::SetDifficulty(SetDifficulty {
                difficulty: game_data.difficulty,
            }))
            .await;
        let _ = self
            .client
            .write_packet(&GamePacket::SetPlayerGameType(SetPlayerGameType {
                game_type: game_data.player_game_mode,
            }))
            .await;
        let _ = self
            .client
            .write_packet(&GamePacket::GameRulesChanged(GameRulesChanged {
                game_rules: game_data.game_rules.clone(),
            }))
            .await;

        animation.clear(self.client.as_ref(), &game_data).await;
        drop(animation);

        *slot = Some(ServerSlot {
            addr: addr.to_string(),
            conn,
        });
        drop(slot);

        self.with_processor(|processor| {
            let mut ctx = Context::new();
            processor.process_post_transfer(&mut ctx, &origin, addr);
        });
        tracing::debug!(
            username = %self.client.identity().display_name,
            addr,
            "transferred session"
        );
        Ok(())
    }

    /// Attempts to transfer the session to a fallback server supplied by
    /// the discovery. At most one fallback runs at a time, independently of
    /// explicit transfers.
    pub(crate) async fn fallback(&self) -> anyhow::Result<()> {
        if self
            .in_fallback
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            bail!("fallback already in progress");
        }
        let _in_fallback = FlagGuard(&self.in_fallback);

        let addr = self.discovery.discover_fallback(self.client.as_ref()).await?;
        self.transfer(&addr).await?;
        tracing::debug!(
            username = %self.client.identity().display_name,
            %addr,
            "transferred session to a fallback server"
        );
        Ok(())
    }

    /// The client connection.
    pub fn client(&self) -> &Arc<dyn ClientConn> {
        &self.client
    }

    /// The current server address and connection.
    pub async fn server(&self) -> Option<(String, Arc<Conn>)> {
        self.server
            .read()
            .await
            .as_ref()
            .map(|slot| (slot.addr.clone(), Arc::clone(&slot.conn)))
    }

    /// Whether `conn` is still the session's current downstream connection.
    pub(crate) async fn is_current(&self, conn: &Arc<Conn>) -> bool {
        self.server
            .read()
            .await
            .as_ref()
            .is_some_and(|slot| Arc::ptr_eq(&slot.conn, conn))
    }

    /// The total latency experienced by the session: the client's round
    /// trip (twice the RakNet half-RTT) plus the server-reported latency.
    pub fn latency(&self) -> i64 {
        self.client.latency().as_millis() as i64 * 2 + self.server_latency.load(Ordering::SeqCst)
    }

    pub(crate) fn record_server_latency(&self, latency: i64) {
        self.server_latency.store(latency, Ordering::SeqCst);
    }

    /// The server-supplied cache blob forwarded on the next transfer.
    pub fn cache(&self) -> Vec<u8> {
        self.cache.lock().unwrap().clone()
    }

    pub fn set_cache(&self, cache: Vec<u8>) {
        *self.cache.lock().unwrap() = cache;
    }

    pub fn set_processor(&self, processor: Box<dyn Processor>) {
        *self.processor.write().unwrap() = processor;
    }

    pub(crate) fn with_processor<R>(&self, f: impl FnOnce(&dyn Processor) -> R) -> R {
        let processor = self.processor.read().unwrap();
        f(processor.as_ref())
    }

    /// Replaces the animation played during transfers.
    pub async fn set_animation(&self, animation: Box<dyn Animation>) {
        *self.animation.lock().await = animation;
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub(crate) fn opts(&self) -> &Opts {
        &self.opts
    }

    pub(crate) fn ctx(&self) -> &CancellationToken {
        &self.ctx
    }

    /// Sends a Disconnect with the given message and closes the session.
    pub async fn disconnect(&self, message: &str) -> anyhow::Result<()> {
        self.close(message).await
    }

    pub(crate) async fn close_with_error(&self, err: anyhow::Error) {
        let _ = self.close(&format!("{err:#}")).await;
    }

    /// Closes the session and both of its connections. Idempotent; the
    /// second and later calls return a benign error.
    async fn close(&self, reason: &str) -> anyhow::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            bail!("session already closed");
        }

        self.ctx.cancel();
        self.with_processor(|processor| {
            let mut ctx = Context::new();
            processor.process_disconnection(&mut ctx, reason);
        });

        let _ = self
            .client
            .write_packet(&GamePacket::Disconnect(game::Disconnect {
                message: reason.to_string(),
                ..Default::default()
            }))
            .await;
        let _ = self.client.close().await;

        if let Some(slot) = self.server.write().await.take() {
            slot.conn.close_with_error(anyhow!("{reason}"));
        }

        let identity = self.client.identity();
        self.registry.remove_session(&identity.xuid);
        if self.logged_in.load(Ordering::SeqCst) {
            tracing::info!(username = %identity.display_name, "closed session");
        } else {
            tracing::debug!(username = %identity.display_name, "closed unlogged session");
        }
        Ok(())
    }

    /// Toggles the player's immobility during transfers, preventing
    /// position mismatches between the client and the new server.
    async fn send_metadata(&self, no_ai: bool) {
        let mut flags = EntityDataFlags::BREATHING | EntityDataFlags::HAS_GRAVITY;
        if no_ai {
            flags |= EntityDataFlags::NO_AI;
        }
        let _ = self
            .client
            .write_packet(&GamePacket::SetActorData(SetActorData {
                entity_runtime_id: self.client.game_data().entity_runtime_id,
                flags,
            }))
            .await;
    }

    /// Dials `addr` and wraps the stream in a new downstream connection.
    async fn dial(&self, addr: &str) -> anyhow::Result<Arc<Conn>> {
        let stream = self.transport.dial(addr).await?;
        Ok(Conn::new(
            stream,
            Arc::clone(&self.client),
            self.opts.sync_protocol,
            self.opts.token.clone(),
            self.cache(),
            &self.ctx,
        ))
    }
}
