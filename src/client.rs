//! Boundary to the externally supplied RakNet / game-protocol library.
//!
//! The proxy core never speaks RakNet or performs Mojang authentication
//! itself; an embedder supplies an object implementing [`ClientConn`] for
//! every accepted player, typically backed by a full game-protocol
//! implementation. The core only needs the narrow surface below.

use crate::protocol::{
    self,
    game::{GamePacket, GameRule, ItemEntry},
    position::{BlockPos, Vec3},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};

/// The bundle of world information needed to spawn a player, populated from
/// a downstream server's StartGame during the connection sequence.
#[derive(Debug, Clone, Default)]
pub struct GameData {
    pub entity_unique_id: i64,
    pub entity_runtime_id: u64,
    pub difficulty: u32,
    pub world_name: String,
    pub world_seed: i64,
    pub player_game_mode: i32,
    pub base_game_version: String,
    pub player_position: Vec3,
    pub pitch: f32,
    pub yaw: f32,
    pub dimension: i32,
    pub world_spawn: BlockPos,
    pub game_rules: Vec<GameRule>,
    pub time: i64,
    pub world_game_mode: i32,
    pub hardcore: bool,
    pub items: Vec<ItemEntry>,
    pub chunk_radius: i32,
}

/// Identity data of a logged-in player, verified by the external library
/// during the XBL login.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityData {
    /// The player's XUID, the primary registry key. Opaque to the proxy.
    pub xuid: String,
    pub display_name: String,
    /// The player's identity UUID, as a string.
    pub identity: String,
}

/// Translates packets from an older protocol revision to the latest one the
/// proxy understands. Supplied by the external game-protocol library when
/// protocol synchronisation is enabled; one input packet may translate to
/// zero or more outputs.
pub trait Translator: Send + Sync {
    fn protocol_id(&self) -> i32;
    fn convert_to_latest(&self, packet: GamePacket) -> Vec<GamePacket>;
}

/// The player's connection, owned by the external RakNet library.
#[async_trait]
pub trait ClientConn: Send + Sync {
    fn identity(&self) -> IdentityData;
    /// The player's raw client data blob, forwarded verbatim to downstream
    /// servers.
    fn client_data(&self) -> Vec<u8>;
    fn remote_addr(&self) -> String;
    /// Half of the RakNet round-trip time.
    fn latency(&self) -> Duration;
    fn protocol_id(&self) -> i32 {
        protocol::PROTOCOL_VERSION
    }
    /// The translator for the client's protocol revision, if it is not the
    /// latest.
    fn translator(&self) -> Option<Arc<dyn Translator>> {
        None
    }
    /// The game data the client was spawned with.
    fn game_data(&self) -> GameData;

    /// Reads one raw, already-framed game packet from the client.
    async fn read_bytes(&self) -> anyhow::Result<Vec<u8>>;
    async fn write_packet(&self, packet: &GamePacket) -> anyhow::Result<()>;
    /// Writes an already-encoded packet blob to the client verbatim.
    async fn write_raw(&self, payload: &[u8]) -> anyhow::Result<()>;
    /// Cuts the current packet batch, flushing buffered packets to the wire.
    async fn flush(&self) -> anyhow::Result<()>;
    /// Completes the player's join with the given game data.
    async fn start_game(&self, data: &GameData) -> anyhow::Result<()>;
    async fn close(&self) -> anyhow::Result<()>;
}

/// Source of accepted client connections, owned by the external RakNet
/// library.
#[async_trait]
pub trait ClientListener: Send + Sync {
    async fn accept(&self) -> anyhow::Result<Arc<dyn ClientConn>>;
    async fn close(&self) -> anyhow::Result<()>;
    fn addr(&self) -> String;
}
