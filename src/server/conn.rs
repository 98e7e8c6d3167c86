//! A connection to a downstream server.
//!
//! On the wire, every packet is one frame (see [`crate::framing`]) holding a
//! decode-marker byte followed by a Snappy-compressed body: `0x00` means the
//! body is a full game packet (header plus body), `0x01` means the body is
//! an already-encoded blob forwarded verbatim. Any other marker is a fatal
//! protocol error.
//!
//! A freshly created connection runs the connection sequence in a background
//! task:
//!
//! ```text
//! -> ConnectionRequest
//! <- ConnectionResponse      records the player's runtime/unique id
//! <- StartGame               populates the game data
//! -> RequestChunkRadius
//! <- ItemRegistry            (newer downstream protocols only)
//! <- ChunkRadiusUpdated
//! <- PlayStatus
//! -> SetLocalPlayerAsInitialised
//! ```
//!
//! Packets received out of this order are pushed onto a deferred queue that
//! [`Conn::read_packet`] drains, in arrival order, before reading live
//! packets.

use crate::{
    client::{ClientConn, GameData, Translator},
    framing::{FrameReader, FrameWriter},
    protocol::{
        self,
        game::{self, GamePacket, ItemEntry, Pool, RequestChunkRadius, SetLocalPlayerAsInitialised},
        Decoder, Encoder, Header, Packet,
    },
    server::packet::{
        self, ConnectionRequest, ConnectionResponse, Flush, Latency, Transfer, UpdateCache,
    },
    transport::BoxedStream,
};
use anyhow::{anyhow, bail, Context as _};
use std::{
    collections::VecDeque,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex, OnceLock,
    },
    time::Duration,
};
use tokio::{
    io::{self, ReadHalf, WriteHalf},
    select,
    sync::Mutex,
    task,
};
use tokio_util::sync::CancellationToken;

const DECODE_NEEDED: u8 = 0x00;
const DECODE_NOT_NEEDED: u8 = 0x01;

/// Default timeout of the connection sequence.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

const CHUNK_RADIUS: i32 = 16;

/// A message read from a downstream server: one of the proxy's control
/// packets, a decoded game packet, or an opaque passthrough blob destined
/// for the client.
#[derive(Debug)]
pub enum ServerMessage {
    /// Connection-sequence only; never surfaced by [`Conn::read_packet`]
    /// once the sequence finished.
    ConnectionResponse(ConnectionResponse),
    Latency(Latency),
    Transfer(Transfer),
    Flush,
    UpdateCache(UpdateCache),
    Game(GamePacket),
    Raw(Vec<u8>),
}

impl ServerMessage {
    fn id(&self) -> Option<u32> {
        match self {
            Self::ConnectionResponse(_) => Some(packet::ID_CONNECTION_RESPONSE),
            Self::Latency(_) => Some(packet::ID_LATENCY),
            Self::Transfer(_) => Some(packet::ID_TRANSFER),
            Self::Flush => Some(packet::ID_FLUSH),
            Self::UpdateCache(_) => Some(packet::ID_UPDATE_CACHE),
            Self::Game(pk) => Some(pk.id()),
            Self::Raw(_) => None,
        }
    }
}

#[derive(Default)]
struct SequenceState {
    runtime_id: u64,
    unique_id: i64,
    game_data: GameData,
    shield_id: i32,
}

/// A connection to a downstream server, managing packet reading and writing
/// over the byte stream a [`crate::transport::Transport`] dialed.
pub struct Conn {
    ctx: CancellationToken,
    connected: CancellationToken,
    closed: AtomicBool,
    close_cause: OnceLock<String>,

    reader: Mutex<FrameReader<ReadHalf<BoxedStream>>>,
    writer: Mutex<FrameWriter<WriteHalf<BoxedStream>>>,

    client: Arc<dyn ClientConn>,
    pool: Pool,
    translator: Option<Arc<dyn Translator>>,
    protocol_id: i32,
    token: String,
    cache: Vec<u8>,

    state: StdMutex<SequenceState>,
    deferred: StdMutex<VecDeque<ServerMessage>>,
    expected: StdMutex<Vec<u32>>,
}

impl Conn {
    /// Creates a new connection over `stream` and starts its connection
    /// sequence task. The connection's lifetime is tied to `parent`: when
    /// that token is cancelled the connection closes.
    pub fn new(
        stream: BoxedStream,
        client: Arc<dyn ClientConn>,
        sync_protocol: bool,
        token: String,
        cache: Vec<u8>,
        parent: &CancellationToken,
    ) -> Arc<Self> {
        let (reader, writer) = io::split(stream);
        let (protocol_id, translator) = if sync_protocol {
            (client.protocol_id(), client.translator())
        } else {
            (protocol::PROTOCOL_VERSION, None)
        };

        let conn = Arc::new(Self {
            ctx: parent.child_token(),
            connected: CancellationToken::new(),
            closed: AtomicBool::new(false),
            close_cause: OnceLock::new(),

            reader: Mutex::new(FrameReader::new(reader)),
            writer: Mutex::new(FrameWriter::new(writer)),

            client,
            pool: Pool::from_server(),
            translator,
            protocol_id,
            token,
            cache,

            state: StdMutex::new(SequenceState::default()),
            deferred: StdMutex::new(VecDeque::new()),
            expected: StdMutex::new(Vec::new()),
        });

        task::spawn(Arc::clone(&conn).run_connect_sequence());
        conn
    }

    /// Initiates the connection sequence with the default timeout.
    pub async fn connect(&self) -> anyhow::Result<()> {
        self.connect_timeout(CONNECT_TIMEOUT).await
    }

    /// Initiates the connection sequence, resolving when the sequence
    /// completes, the timeout expires, or the connection closes.
    pub async fn connect_timeout(&self, timeout: Duration) -> anyhow::Result<()> {
        self.expect(&[packet::ID_CONNECTION_RESPONSE]);
        self.send_connection_request().await?;

        select! {
            _ = self.connected.cancelled() => Ok(()),
            _ = self.ctx.cancelled() => Err(self.closed_error()),
            _ = tokio::time::sleep(timeout) => Err(anyhow!("connection sequence timed out")),
        }
    }

    /// Reads the next message from the connection. Messages deferred during
    /// the connection sequence are returned first, in arrival order. Not
    /// meant to be called concurrently.
    pub async fn read_packet(&self) -> anyhow::Result<ServerMessage> {
        if let Some(message) = self.deferred.lock().unwrap().pop_front() {
            return Ok(message);
        }
        self.read_message().await
    }

    /// Encodes and writes the provided packet to the underlying connection.
    pub async fn write_packet(&self, pk: &dyn Packet) -> anyhow::Result<()> {
        if self.ctx.is_cancelled() {
            return Err(self.closed_error());
        }

        let mut body = Vec::new();
        let mut encoder = Encoder::new(&mut body);
        Header::new(pk.id()).encode(&mut encoder);
        pk.encode_body(&mut encoder);

        let mut frame = vec![DECODE_NEEDED];
        frame.extend(snap::raw::Encoder::new().compress_vec(&body)?);
        self.writer.lock().await.write_frame(&frame).await
    }

    /// Writes an already-encoded packet blob to the underlying connection,
    /// to be forwarded to the player verbatim.
    pub async fn write_raw(&self, payload: &[u8]) -> anyhow::Result<()> {
        if self.ctx.is_cancelled() {
            return Err(self.closed_error());
        }

        let mut frame = vec![DECODE_NOT_NEEDED];
        frame.extend(snap::raw::Encoder::new().compress_vec(payload)?);
        self.writer.lock().await.write_frame(&frame).await
    }

    /// The game data populated by the connection sequence.
    pub fn game_data(&self) -> GameData {
        self.state.lock().unwrap().game_data.clone()
    }

    /// The runtime id of the shield item, if the downstream server announced
    /// one.
    pub fn shield_id(&self) -> i32 {
        self.state.lock().unwrap().shield_id
    }

    pub fn is_closed(&self) -> bool {
        self.ctx.is_cancelled()
    }

    /// Closes the underlying connection.
    pub fn close(&self) {
        self.close_with_error(anyhow!("closed by application"));
    }

    /// Closes the underlying connection, recording `err` as the cause.
    pub fn close_with_error(&self, err: anyhow::Error) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.close_cause.set(format!("{err:#}"));
        self.ctx.cancel();
    }

    fn closed_error(&self) -> anyhow::Error {
        match self.close_cause.get() {
            Some(cause) => anyhow!("connection closed: {cause}"),
            None => anyhow!("connection closed"),
        }
    }

    /// Runs until the connection sequence finishes, deferring every packet
    /// that is not currently expected.
    async fn run_connect_sequence(self: Arc<Self>) {
        loop {
            if self.ctx.is_cancelled() || self.connected.is_cancelled() {
                break;
            }

            let message = match self.read_message().await {
                Ok(message) => message,
                Err(err) => {
                    if !self.ctx.is_cancelled() {
                        tracing::error!("failed to read connection sequence packet: {err:#}");
                    }
                    self.close_with_error(
                        err.context("failed to read connection sequence packet"),
                    );
                    break;
                }
            };

            for message in self.translate(message) {
                if let Err(err) = self.handle_sequence_message(message).await {
                    tracing::error!("failed to handle connection sequence packet: {err:#}");
                    self.close_with_error(
                        err.context("failed to handle connection sequence packet"),
                    );
                    return;
                }
            }
        }
    }

    /// Applies protocol-version translation to inbound game packets, when
    /// enabled.
    fn translate(&self, message: ServerMessage) -> Vec<ServerMessage> {
        match (message, &self.translator) {
            (ServerMessage::Game(pk), Some(translator)) => translator
                .convert_to_latest(pk)
                .into_iter()
                .map(ServerMessage::Game)
                .collect(),
            (message, _) => vec![message],
        }
    }

    async fn handle_sequence_message(&self, message: ServerMessage) -> anyhow::Result<()> {
        let expected = match message.id() {
            Some(id) => self.expected.lock().unwrap().contains(&id),
            None => false,
        };
        if !expected {
            self.defer(message);
            return Ok(());
        }

        match message {
            ServerMessage::ConnectionResponse(pk) => self.handle_connection_response(pk),
            ServerMessage::Game(GamePacket::StartGame(pk)) => self.handle_start_game(pk).await?,
            ServerMessage::Game(GamePacket::ItemRegistry(pk)) => self.handle_item_registry(pk),
            ServerMessage::Game(GamePacket::ChunkRadiusUpdated(pk)) => {
                self.handle_chunk_radius_updated(pk)
            }
            ServerMessage::Game(GamePacket::PlayStatus(pk)) => self.handle_play_status(pk).await?,
            message => self.defer(message),
        }
        Ok(())
    }

    fn handle_connection_response(&self, pk: ConnectionResponse) {
        {
            let mut state = self.state.lock().unwrap();
            state.runtime_id = pk.runtime_id;
            state.unique_id = pk.unique_id;
        }
        self.expect(&[game::id::START_GAME]);
        tracing::debug!("received connection_response, expecting start_game");
    }

    async fn handle_start_game(&self, pk: game::StartGame) -> anyhow::Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(shield_id) = locate_shield(&pk.items) {
                state.shield_id = shield_id;
            }
            state.game_data = GameData {
                entity_unique_id: state.unique_id,
                entity_runtime_id: state.runtime_id,
                difficulty: pk.difficulty,
                world_name: pk.world_name,
                world_seed: pk.world_seed,
                player_game_mode: pk.player_game_mode,
                base_game_version: pk.base_game_version,
                player_position: pk.player_position,
                pitch: pk.pitch,
                yaw: pk.yaw,
                dimension: pk.dimension,
                world_spawn: pk.world_spawn,
                game_rules: pk.game_rules,
                time: pk.time,
                world_game_mode: pk.world_game_mode,
                hardcore: pk.hardcore,
                items: pk.items,
                chunk_radius: 0,
            };
        }

        self.expect(&[game::id::ITEM_REGISTRY, game::id::CHUNK_RADIUS_UPDATED]);
        self.write_packet(&RequestChunkRadius {
            chunk_radius: CHUNK_RADIUS,
            max_chunk_radius: CHUNK_RADIUS as u8,
        })
        .await?;
        tracing::debug!("received start_game, expecting item_registry or chunk_radius_updated");
        Ok(())
    }

    fn handle_item_registry(&self, pk: game::ItemRegistry) {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(shield_id) = locate_shield(&pk.items) {
                state.shield_id = shield_id;
            }
            state.game_data.items = pk.items.clone();
        }
        self.expect(&[game::id::CHUNK_RADIUS_UPDATED]);
        self.defer(ServerMessage::Game(GamePacket::ItemRegistry(pk)));
        tracing::debug!("received item_registry, expecting chunk_radius_updated");
    }

    fn handle_chunk_radius_updated(&self, pk: game::ChunkRadiusUpdated) {
        self.state.lock().unwrap().game_data.chunk_radius = pk.chunk_radius;
        self.expect(&[game::id::PLAY_STATUS]);
        self.defer(ServerMessage::Game(GamePacket::ChunkRadiusUpdated(pk)));
        tracing::debug!("received chunk_radius_updated, expecting play_status");
    }

    /// Handles the final packet of the connection sequence, responding with
    /// SetLocalPlayerAsInitialised to spawn the player on the server.
    async fn handle_play_status(&self, pk: game::PlayStatus) -> anyhow::Result<()> {
        self.defer(ServerMessage::Game(GamePacket::PlayStatus(pk)));
        let entity_runtime_id = self.state.lock().unwrap().runtime_id;
        self.write_packet(&SetLocalPlayerAsInitialised { entity_runtime_id })
            .await?;
        tracing::debug!("received play_status, finalizing connection sequence");
        self.connected.cancel();
        Ok(())
    }

    async fn send_connection_request(&self) -> anyhow::Result<()> {
        let identity_data = serde_json::to_vec(&self.client.identity())?;
        self.write_packet(&ConnectionRequest {
            addr: self.client.remote_addr(),
            token: self.token.clone(),
            client_data: self.client.client_data(),
            identity_data,
            protocol_id: self.protocol_id,
            cache: self.cache.clone(),
        })
        .await?;
        tracing::debug!("sent connection_request, expecting connection_response");
        Ok(())
    }

    /// Reads and decodes one message from the wire.
    async fn read_message(&self) -> anyhow::Result<ServerMessage> {
        let frame = {
            let mut reader = self.reader.lock().await;
            select! {
                _ = self.ctx.cancelled() => return Err(self.closed_error()),
                frame = reader.read_frame() => frame?,
            }
        };
        self.decode_message(&frame)
    }

    fn decode_message(&self, frame: &[u8]) -> anyhow::Result<ServerMessage> {
        let Some((&marker, body)) = frame.split_first() else {
            bail!("empty frame");
        };
        if marker != DECODE_NEEDED && marker != DECODE_NOT_NEEDED {
            bail!("unknown decode byte marker {marker:#04x}");
        }

        if snap::raw::decompress_len(body)? > protocol::BUFFER_LIMIT {
            bail!("decompressed packet exceeds maximum allowed size");
        }
        let decompressed = snap::raw::Decoder::new().decompress_vec(body)?;
        if marker == DECODE_NOT_NEEDED {
            return Ok(ServerMessage::Raw(decompressed));
        }

        // A decoder fault must not tear the process down; contain it to the
        // offending packet.
        catch_unwind(AssertUnwindSafe(|| self.decode_game(&decompressed)))
            .map_err(|_| anyhow!("panic while decoding packet"))?
    }

    fn decode_game(&self, payload: &[u8]) -> anyhow::Result<ServerMessage> {
        let mut decoder = Decoder::new(payload);
        let header = Header::decode(&mut decoder)?;
        let message = match header.id {
            packet::ID_CONNECTION_RESPONSE => {
                ServerMessage::ConnectionResponse(ConnectionResponse::decode(&mut decoder)?)
            }
            packet::ID_LATENCY => ServerMessage::Latency(Latency::decode(&mut decoder)?),
            packet::ID_TRANSFER => ServerMessage::Transfer(Transfer::decode(&mut decoder)?),
            packet::ID_FLUSH => {
                Flush::decode(&mut decoder)?;
                ServerMessage::Flush
            }
            packet::ID_UPDATE_CACHE => {
                ServerMessage::UpdateCache(UpdateCache::decode(&mut decoder)?)
            }
            id => ServerMessage::Game(
                self.pool
                    .decode(header, &mut decoder)
                    .with_context(|| format!("failed to decode packet {id}"))?,
            ),
        };
        Ok(message)
    }

    /// Defers a message to be returned later by [`Conn::read_packet`].
    fn defer(&self, message: ServerMessage) {
        self.deferred.lock().unwrap().push_back(message);
    }

    /// Replaces the set of packet ids the connection sequence will handle
    /// next; anything else read in the meantime is deferred.
    fn expect(&self, ids: &[u32]) {
        *self.expected.lock().unwrap() = ids.to_vec();
    }
}

fn locate_shield(items: &[ItemEntry]) -> Option<i32> {
    items
        .iter()
        .find(|item| item.name == "minecraft:shield")
        .map(|item| i32::from(item.runtime_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        client::IdentityData,
        protocol::position::{BlockPos, Vec3},
    };
    use std::future;
    use tokio::io::DuplexStream;

    struct NullClient;

    #[async_trait::async_trait]
    impl ClientConn for NullClient {
        fn identity(&self) -> IdentityData {
            IdentityData {
                xuid: "2535416".into(),
                display_name: "Steve".into(),
                identity: "6a331b3a-0000-4000-8000-2a9d11aa0ac3".into(),
            }
        }

        fn client_data(&self) -> Vec<u8> {
            b"{}".to_vec()
        }

        fn remote_addr(&self) -> String {
            "203.0.113.9:52311".into()
        }

        fn latency(&self) -> Duration {
            Duration::from_millis(20)
        }

        fn game_data(&self) -> GameData {
            GameData::default()
        }

        async fn read_bytes(&self) -> anyhow::Result<Vec<u8>> {
            future::pending().await
        }

        async fn write_packet(&self, _packet: &GamePacket) -> anyhow::Result<()> {
            Ok(())
        }

        async fn write_raw(&self, _payload: &[u8]) -> anyhow::Result<()> {
            Ok(())
        }

        async fn flush(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn start_game(&self, _data: &GameData) -> anyhow::Result<()> {
            Ok(())
        }

        async fn close(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// The downstream server's end of a connection, for driving the
    /// sequence by hand.
    struct FakeServer {
        reader: FrameReader<ReadHalf<DuplexStream>>,
        writer: FrameWriter<WriteHalf<DuplexStream>>,
    }

    impl FakeServer {
        fn new(stream: DuplexStream) -> Self {
            let (reader, writer) = io::split(stream);
            Self {
                reader: FrameReader::new(reader),
                writer: FrameWriter::new(writer),
            }
        }

        async fn write_packet(&mut self, pk: &dyn Packet) {
            let mut body = Vec::new();
            let mut encoder = Encoder::new(&mut body);
            Header::new(pk.id()).encode(&mut encoder);
            pk.encode_body(&mut encoder);
            let mut frame = vec![DECODE_NEEDED];
            frame.extend(snap::raw::Encoder::new().compress_vec(&body).unwrap());
            self.writer.write_frame(&frame).await.unwrap();
        }

        /// Reads one frame from the proxy, returning the decoded header id
        /// and the body decoder input.
        async fn read_frame(&mut self) -> (u32, Vec<u8>) {
            let frame = self.reader.read_frame().await.unwrap();
            assert_eq!(frame[0], DECODE_NEEDED);
            let body = snap::raw::Decoder::new().decompress_vec(&frame[1..]).unwrap();
            let mut decoder = Decoder::new(&body);
            let header = Header::decode(&mut decoder).unwrap();
            (header.id, decoder.buffer().to_vec())
        }
    }

    fn start_game() -> game::StartGame {
        game::StartGame {
            difficulty: 2,
            world_name: "hub".into(),
            player_game_mode: 1,
            player_position: Vec3 {
                x: 8.5,
                y: 65.0,
                z: -3.5,
            },
            pitch: 0.0,
            yaw: 90.0,
            dimension: game::DIMENSION_OVERWORLD,
            world_spawn: BlockPos { x: 8, y: 64, z: -4 },
            ..Default::default()
        }
    }

    fn new_conn() -> (Arc<Conn>, FakeServer) {
        let (near, far) = tokio::io::duplex(1024 * 256);
        let conn = Conn::new(
            Box::new(near),
            Arc::new(NullClient),
            false,
            "secret".into(),
            Vec::new(),
            &CancellationToken::new(),
        );
        (conn, FakeServer::new(far))
    }

    #[tokio::test]
    async fn sequence_completes_and_defers_in_order() {
        let (conn, mut server) = new_conn();

        let driver = tokio::spawn(async move {
            let (id, body) = server.read_frame().await;
            assert_eq!(id, packet::ID_CONNECTION_REQUEST);
            let request = ConnectionRequest::decode(&mut Decoder::new(&body)).unwrap();
            assert_eq!(request.token, "secret");
            assert_eq!(request.addr, "203.0.113.9:52311");

            server
                .write_packet(&ConnectionResponse {
                    runtime_id: 42,
                    unique_id: -7,
                })
                .await;
            server.write_packet(&start_game()).await;
            server
                .write_packet(&game::ItemRegistry {
                    items: vec![ItemEntry {
                        name: "minecraft:shield".into(),
                        runtime_id: 355,
                        component_based: false,
                    }],
                })
                .await;
            server
                .write_packet(&game::ChunkRadiusUpdated { chunk_radius: 16 })
                .await;
            server.write_packet(&game::PlayStatus { status: 0 }).await;

            let (id, body) = server.read_frame().await;
            assert_eq!(id, game::id::REQUEST_CHUNK_RADIUS);
            let mut decoder = Decoder::new(&body);
            assert_eq!(decoder.read_var_i32().unwrap(), 16);

            let (id, body) = server.read_frame().await;
            assert_eq!(id, game::id::SET_LOCAL_PLAYER_AS_INITIALISED);
            let mut decoder = Decoder::new(&body);
            assert_eq!(decoder.read_var_u64().unwrap(), 42);
        });

        conn.connect().await.unwrap();
        driver.await.unwrap();

        let data = conn.game_data();
        assert_eq!(data.entity_runtime_id, 42);
        assert_eq!(data.entity_unique_id, -7);
        assert_eq!(data.world_name, "hub");
        assert_eq!(data.chunk_radius, 16);
        assert_eq!(conn.shield_id(), 355);

        for expected in [
            game::id::ITEM_REGISTRY,
            game::id::CHUNK_RADIUS_UPDATED,
            game::id::PLAY_STATUS,
        ] {
            match conn.read_packet().await.unwrap() {
                ServerMessage::Game(pk) => assert_eq!(pk.id(), expected),
                other => panic!("unexpected message {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn unexpected_packets_are_deferred_in_arrival_order() {
        let (conn, mut server) = new_conn();

        let driver = tokio::spawn(async move {
            let _ = server.read_frame().await; // connection request

            // Neither of these is expected before ConnectionResponse.
            server
                .write_packet(&game::AddActor {
                    entity_unique_id: 11,
                    entity_runtime_id: 11,
                    rest: Vec::new(),
                })
                .await;
            server
                .write_packet(&Latency {
                    latency: 35,
                    timestamp: 0,
                })
                .await;

            server
                .write_packet(&ConnectionResponse {
                    runtime_id: 1,
                    unique_id: 1,
                })
                .await;
            server.write_packet(&start_game()).await;
            server
                .write_packet(&game::ChunkRadiusUpdated { chunk_radius: 8 })
                .await;
            server.write_packet(&game::PlayStatus { status: 0 }).await;
            let _ = server.read_frame().await; // request chunk radius
            let _ = server.read_frame().await; // set local player as initialised
        });

        conn.connect().await.unwrap();
        driver.await.unwrap();

        assert!(matches!(
            conn.read_packet().await.unwrap(),
            ServerMessage::Game(GamePacket::AddActor(_))
        ));
        assert!(matches!(
            conn.read_packet().await.unwrap(),
            ServerMessage::Latency(Latency { latency: 35, .. })
        ));
        assert!(matches!(
            conn.read_packet().await.unwrap(),
            ServerMessage::Game(GamePacket::ChunkRadiusUpdated(_))
        ));
        assert!(matches!(
            conn.read_packet().await.unwrap(),
            ServerMessage::Game(GamePacket::PlayStatus(_))
        ));
    }

    #[tokio::test]
    async fn older_protocol_skips_item_registry() {
        let (conn, mut server) = new_conn();

        let driver = tokio::spawn(async move {
            let _ = server.read_frame().await;
            server
                .write_packet(&ConnectionResponse {
                    runtime_id: 2,
                    unique_id: 2,
                })
                .await;

            // Older downstream revisions carry the items in StartGame and
            // never send an ItemRegistry.
            let mut pk = start_game();
            pk.items = vec![ItemEntry {
                name: "minecraft:shield".into(),
                runtime_id: 280,
                component_based: false,
            }];
            server.write_packet(&pk).await;
            server
                .write_packet(&game::ChunkRadiusUpdated { chunk_radius: 16 })
                .await;
            server.write_packet(&game::PlayStatus { status: 0 }).await;
            let _ = server.read_frame().await;
            let _ = server.read_frame().await;
        });

        conn.connect().await.unwrap();
        driver.await.unwrap();
        assert_eq!(conn.shield_id(), 280);

        assert!(matches!(
            conn.read_packet().await.unwrap(),
            ServerMessage::Game(GamePacket::ChunkRadiusUpdated(_))
        ));
        assert!(matches!(
            conn.read_packet().await.unwrap(),
            ServerMessage::Game(GamePacket::PlayStatus(_))
        ));
    }

    #[tokio::test]
    async fn unknown_decode_marker_is_fatal() {
        let (conn, mut server) = new_conn();

        tokio::spawn(async move {
            let _ = server.read_frame().await;
            server.writer.write_frame(&[0x02, 1, 2, 3]).await.unwrap();
            // Keep the far end open so the failure comes from the marker,
            // not an EOF.
            future::pending::<()>().await;
        });

        assert!(conn.connect().await.is_err());
        assert!(conn.is_closed());
    }
}
