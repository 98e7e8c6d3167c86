//! Shared test doubles: a recording client connection and an in-memory,
//! scripted downstream transport.

#![allow(dead_code)]

use async_trait::async_trait;
use bedrock_relay::{
    client::{ClientConn, GameData, IdentityData},
    framing::{FrameReader, FrameWriter},
    protocol::{
        game::{self, GamePacket, ItemEntry},
        position::Vec3,
        Decoder, Encoder, Header, Packet,
    },
    server::packet as control,
    transport::{BoxedStream, Transport},
};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncWrite, DuplexStream},
    sync::{mpsc, Mutex, Notify},
    time::sleep,
};
use tokio_util::sync::CancellationToken;

/// A [`ClientConn`] that records everything written to it.
pub struct RecordingClient {
    identity: IdentityData,
    game_data: StdMutex<GameData>,
    packets: StdMutex<Vec<GamePacket>>,
    raw: StdMutex<Vec<Vec<u8>>>,
    flushes: StdMutex<usize>,
    incoming: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    incoming_tx: mpsc::UnboundedSender<Vec<u8>>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl RecordingClient {
    pub fn new(display_name: &str, xuid: &str) -> Arc<Self> {
        let (incoming_tx, incoming) = mpsc::unbounded_channel();
        Arc::new(Self {
            identity: IdentityData {
                xuid: xuid.into(),
                display_name: display_name.into(),
                identity: "11111111-2222-3333-4444-555555555555".into(),
            },
            game_data: StdMutex::new(GameData::default()),
            packets: StdMutex::new(Vec::new()),
            raw: StdMutex::new(Vec::new()),
            flushes: StdMutex::new(0),
            incoming: Mutex::new(incoming),
            incoming_tx,
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Every packet written to the client so far.
    pub fn packets(&self) -> Vec<GamePacket> {
        self.packets.lock().unwrap().clone()
    }

    pub fn packet_count(&self) -> usize {
        self.packets.lock().unwrap().len()
    }

    /// Every passthrough blob written to the client so far.
    pub fn raw(&self) -> Vec<Vec<u8>> {
        self.raw.lock().unwrap().clone()
    }

    pub fn flushes(&self) -> usize {
        *self.flushes.lock().unwrap()
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Feeds one raw client-to-server packet into the client pump.
    pub fn inject(&self, payload: Vec<u8>) {
        let _ = self.incoming_tx.send(payload);
    }
}

#[async_trait]
impl ClientConn for RecordingClient {
    fn identity(&self) -> IdentityData {
        self.identity.clone()
    }

    fn client_data(&self) -> Vec<u8> {
        b"{}".to_vec()
    }

    fn remote_addr(&self) -> String {
        "203.0.113.7:54211".into()
    }

    fn latency(&self) -> Duration {
        Duration::from_millis(20)
    }

    fn game_data(&self) -> GameData {
        self.game_data.lock().unwrap().clone()
    }

    async fn read_bytes(&self) -> anyhow::Result<Vec<u8>> {
        self.incoming
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| anyhow::anyhow!("client connection closed"))
    }

    async fn write_packet(&self, packet: &GamePacket) -> anyhow::Result<()> {
        self.packets.lock().unwrap().push(packet.clone());
        Ok(())
    }

    async fn write_raw(&self, payload: &[u8]) -> anyhow::Result<()> {
        self.raw.lock().unwrap().push(payload.to_vec());
        Ok(())
    }

    async fn flush(&self) -> anyhow::Result<()> {
        *self.flushes.lock().unwrap() += 1;
        Ok(())
    }

    async fn start_game(&self, data: &GameData) -> anyhow::Result<()> {
        *self.game_data.lock().unwrap() = data.clone();
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Behaviour of one scripted downstream server address.
#[derive(Clone)]
pub struct ServerScript {
    pub runtime_id: u64,
    pub unique_id: i64,
    pub dimension: i32,
    pub position: Vec3,
    pub shield_runtime_id: Option<i16>,
    /// When set, the server waits for a notification before answering the
    /// connection request.
    pub gate: Option<Arc<Notify>>,
}

impl Default for ServerScript {
    fn default() -> Self {
        Self {
            runtime_id: 42,
            unique_id: -7,
            dimension: game::DIMENSION_OVERWORLD,
            position: Vec3 {
                x: 8.5,
                y: 65.0,
                z: -3.5,
            },
            shield_runtime_id: Some(355),
            gate: None,
        }
    }
}

/// A packet the test pushes from a scripted server to the proxy.
pub enum ServerPush {
    Latency(i64),
    Transfer(String),
    Flush,
    UpdateCache(Vec<u8>),
    Raw(Vec<u8>),
}

/// One served connection of a scripted downstream.
pub struct ServerHandle {
    received_ids: StdMutex<Vec<u32>>,
    latency: StdMutex<Vec<i64>>,
    raw_frames: StdMutex<Vec<Vec<u8>>>,
    connection_request: StdMutex<Option<control::ConnectionRequest>>,
    out_tx: mpsc::UnboundedSender<ServerPush>,
    kill: CancellationToken,
}

impl ServerHandle {
    fn new(out_tx: mpsc::UnboundedSender<ServerPush>) -> Self {
        Self {
            received_ids: StdMutex::new(Vec::new()),
            latency: StdMutex::new(Vec::new()),
            raw_frames: StdMutex::new(Vec::new()),
            connection_request: StdMutex::new(None),
            out_tx,
            kill: CancellationToken::new(),
        }
    }

    /// Drops the connection, as if the server died.
    pub fn kill(&self) {
        self.kill.cancel();
    }

    /// Sends a packet from the server to the proxy.
    pub fn push(&self, push: ServerPush) {
        let _ = self.out_tx.send(push);
    }

    /// Packet ids received from the proxy, in order.
    pub fn received_ids(&self) -> Vec<u32> {
        self.received_ids.lock().unwrap().clone()
    }

    /// Latency values reported by the proxy's latency pump.
    pub fn latency_reports(&self) -> Vec<i64> {
        self.latency.lock().unwrap().clone()
    }

    /// Passthrough payloads received from the proxy, decompressed.
    pub fn raw_frames(&self) -> Vec<Vec<u8>> {
        self.raw_frames.lock().unwrap().clone()
    }

    /// The connection request this server accepted.
    pub fn connection_request(&self) -> Option<control::ConnectionRequest> {
        self.connection_request.lock().unwrap().clone()
    }
}

/// A [`Transport`] backed by in-memory duplex streams and scripted servers.
#[derive(Default)]
pub struct MockTransport {
    scripts: StdMutex<HashMap<String, ServerScript>>,
    servers: StdMutex<HashMap<String, Vec<Arc<ServerHandle>>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Installs the script served at `addr`.
    pub fn install(&self, addr: &str, script: ServerScript) {
        self.scripts.lock().unwrap().insert(addr.into(), script);
    }

    /// The handles of every connection served for `addr`, oldest first.
    pub fn handles(&self, addr: &str) -> Vec<Arc<ServerHandle>> {
        self.servers
            .lock()
            .unwrap()
            .get(addr)
            .cloned()
            .unwrap_or_default()
    }

    pub fn latest_handle(&self, addr: &str) -> Option<Arc<ServerHandle>> {
        self.handles(addr).last().cloned()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn dial(&self, addr: &str) -> anyhow::Result<BoxedStream> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(addr)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("connection refused: {addr}"))?;

        let (near, far) = tokio::io::duplex(1024 * 512);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let handle = Arc::new(ServerHandle::new(out_tx));
        self.servers
            .lock()
            .unwrap()
            .entry(addr.to_string())
            .or_default()
            .push(Arc::clone(&handle));

        tokio::spawn(serve(script, Arc::clone(&handle), out_rx, far));
        Ok(Box::new(near))
    }
}

/// Drives one scripted downstream connection: performs the connection
/// sequence, then serves pushes and records whatever the proxy sends until
/// killed.
async fn serve(
    script: ServerScript,
    handle: Arc<ServerHandle>,
    mut out_rx: mpsc::UnboundedReceiver<ServerPush>,
    stream: DuplexStream,
) {
    let (reader, writer) = tokio::io::split(stream);
    let mut reader = FrameReader::new(reader);
    let mut writer = FrameWriter::new(writer);

    if let Some(gate) = &script.gate {
        gate.notified().await;
    }

    // Connection request.
    let Ok(Some(id)) = read_one(&mut reader, &handle).await else {
        return;
    };
    assert_eq!(id, control::ID_CONNECTION_REQUEST);

    write_packet(
        &mut writer,
        &control::ConnectionResponse {
            runtime_id: script.runtime_id,
            unique_id: script.unique_id,
        },
    )
    .await;
    write_packet(
        &mut writer,
        &game::StartGame {
            difficulty: 2,
            world_name: "hub".into(),
            player_game_mode: 1,
            player_position: script.position,
            pitch: 0.0,
            yaw: 90.0,
            dimension: script.dimension,
            ..Default::default()
        },
    )
    .await;
    if let Some(runtime_id) = script.shield_runtime_id {
        write_packet(
            &mut writer,
            &game::ItemRegistry {
                items: vec![ItemEntry {
                    name: "minecraft:shield".into(),
                    runtime_id,
                    component_based: false,
                }],
            },
        )
        .await;
    }
    write_packet(&mut writer, &game::ChunkRadiusUpdated { chunk_radius: 16 }).await;
    write_packet(&mut writer, &game::PlayStatus { status: 0 }).await;

    loop {
        tokio::select! {
            _ = handle.kill.cancelled() => return,
            push = out_rx.recv() => {
                let Some(push) = push else { return };
                match push {
                    ServerPush::Latency(latency) => {
                        write_packet(&mut writer, &control::Latency { latency, timestamp: 0 }).await;
                    }
                    ServerPush::Transfer(addr) => {
                        write_packet(&mut writer, &control::Transfer { addr }).await;
                    }
                    ServerPush::Flush => {
                        write_packet(&mut writer, &control::Flush).await;
                    }
                    ServerPush::UpdateCache(cache) => {
                        write_packet(&mut writer, &control::UpdateCache { cache }).await;
                    }
                    ServerPush::Raw(payload) => {
                        let mut frame = vec![0x01];
                        frame.extend(snap::raw::Encoder::new().compress_vec(&payload).unwrap());
                        writer.write_frame(&frame).await.unwrap();
                    }
                }
            }
            result = read_one(&mut reader, &handle) => {
                if result.is_err() {
                    return;
                }
            }
        }
    }
}

/// Reads one frame from the proxy and records it on the handle. Returns the
/// packet id, or `None` for a passthrough frame.
async fn read_one<R>(
    reader: &mut FrameReader<R>,
    handle: &ServerHandle,
) -> anyhow::Result<Option<u32>>
where
    R: AsyncRead + Unpin,
{
    let frame = reader.read_frame().await?;
    anyhow::ensure!(!frame.is_empty(), "empty frame");
    let body = snap::raw::Decoder::new().decompress_vec(&frame[1..])?;
    if frame[0] != 0x00 {
        handle.raw_frames.lock().unwrap().push(body);
        return Ok(None);
    }

    let mut decoder = Decoder::new(&body);
    let header = Header::decode(&mut decoder)?;
    handle.received_ids.lock().unwrap().push(header.id);
    match header.id {
        control::ID_LATENCY => {
            let pk = control::Latency::decode(&mut decoder)?;
            handle.latency.lock().unwrap().push(pk.latency);
        }
        control::ID_CONNECTION_REQUEST => {
            let pk = control::ConnectionRequest::decode(&mut decoder)?;
            *handle.connection_request.lock().unwrap() = Some(pk);
        }
        _ => {}
    }
    Ok(Some(header.id))
}

async fn write_packet<W>(writer: &mut FrameWriter<W>, pk: &dyn Packet)
where
    W: AsyncWrite + Unpin,
{
    let mut body = Vec::new();
    let mut encoder = Encoder::new(&mut body);
    Header::new(pk.id()).encode(&mut encoder);
    pk.encode_body(&mut encoder);

    let mut frame = vec![0x00];
    frame.extend(snap::raw::Encoder::new().compress_vec(&body).unwrap());
    writer.write_frame(&frame).await.unwrap();
}

/// Encodes a game packet the way a client connection frames it: header then
/// body, uncompressed.
pub fn encode_client_packet(pk: &dyn Packet) -> Vec<u8> {
    let mut payload = Vec::new();
    let mut encoder = Encoder::new(&mut payload);
    Header::new(pk.id()).encode(&mut encoder);
    pk.encode_body(&mut encoder);
    payload
}

/// Polls `predicate` until it holds or roughly a second passes.
pub async fn wait_until(mut predicate: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if predicate() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    predicate()
}
