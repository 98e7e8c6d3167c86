//! Enumerates the game packets the proxy works with.
//!
//! Full parsing of packets is _not_ implemented. Only the fields the proxy
//! inspects (world-state tracking, the connection sequence, the transfer
//! reset script) are decoded. The remainder of each packet is kept as a
//! `Vec<u8>` with the rest of the packet's bytes, so packets re-encode
//! without loss of information. Packets the proxy has no interest in at all
//! decode to [`GamePacket::Unknown`], which carries the whole body verbatim.

use crate::protocol::{
    decoder::{self, Decoder},
    position::{BlockPos, ChunkPos, Vec3},
    Encoder, Header, Packet,
};
use std::collections::HashMap;
use uuid::Uuid;

/// Identifiers of the game packets known to the proxy.
pub mod id {
    pub const PLAY_STATUS: u32 = 0x02;
    pub const DISCONNECT: u32 = 0x05;
    pub const START_GAME: u32 = 0x0b;
    pub const ADD_PLAYER: u32 = 0x0c;
    pub const ADD_ACTOR: u32 = 0x0d;
    pub const REMOVE_ACTOR: u32 = 0x0e;
    pub const ADD_ITEM_ACTOR: u32 = 0x0f;
    pub const MOVE_PLAYER: u32 = 0x13;
    pub const ADD_PAINTING: u32 = 0x16;
    pub const LEVEL_EVENT: u32 = 0x19;
    pub const MOB_EFFECT: u32 = 0x1c;
    pub const PLAYER_ACTION: u32 = 0x24;
    pub const SET_ACTOR_DATA: u32 = 0x27;
    pub const LEVEL_CHUNK: u32 = 0x3a;
    pub const SET_DIFFICULTY: u32 = 0x3c;
    pub const CHANGE_DIMENSION: u32 = 0x3d;
    pub const SET_PLAYER_GAME_TYPE: u32 = 0x3e;
    pub const PLAYER_LIST: u32 = 0x3f;
    pub const REQUEST_CHUNK_RADIUS: u32 = 0x45;
    pub const CHUNK_RADIUS_UPDATED: u32 = 0x46;
    pub const GAME_RULES_CHANGED: u32 = 0x48;
    pub const BOSS_EVENT: u32 = 0x4a;
    pub const STOP_SOUND: u32 = 0x57;
    pub const REMOVE_OBJECTIVE: u32 = 0x6a;
    pub const SET_DISPLAY_OBJECTIVE: u32 = 0x6b;
    pub const SET_LOCAL_PLAYER_AS_INITIALISED: u32 = 0x71;
    pub const ITEM_REGISTRY: u32 = 0xa2;
}

pub const DIMENSION_OVERWORLD: i32 = 0;
pub const DIMENSION_NETHER: i32 = 1;
pub const DIMENSION_END: i32 = 2;

bitflags::bitflags! {
    /// Flags carried in the actor metadata flag field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EntityDataFlags: u64 {
        const NO_AI = 1 << 16;
        const BREATHING = 1 << 35;
        const HAS_GRAVITY = 1 << 46;
    }
}

/// Key of the actor metadata flag field.
const DATA_KEY_FLAGS: u32 = 0;
/// Metadata type tag of a varint64 value.
const DATA_TYPE_LONG: u32 = 7;

/// A single game rule with its value.
#[derive(Debug, Clone, PartialEq)]
pub struct GameRule {
    pub name: String,
    pub can_be_modified: bool,
    pub value: GameRuleValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GameRuleValue {
    Bool(bool),
    Int(u32),
    Float(f32),
}

impl GameRule {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_string(&self.name);
        encoder.write_bool(self.can_be_modified);
        match &self.value {
            GameRuleValue::Bool(x) => {
                encoder.write_var_u32(1);
                encoder.write_bool(*x);
            }
            GameRuleValue::Int(x) => {
                encoder.write_var_u32(2);
                encoder.write_var_u32(*x);
            }
            GameRuleValue::Float(x) => {
                encoder.write_var_u32(3);
                encoder.write_f32(*x);
            }
        }
    }

    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        let name = decoder.read_string()?;
        let can_be_modified = decoder.read_bool()?;
        let value = match decoder.read_var_u32()? {
            1 => GameRuleValue::Bool(decoder.read_bool()?),
            2 => GameRuleValue::Int(decoder.read_var_u32()?),
            3 => GameRuleValue::Float(decoder.read_f32()?),
            tag => {
                return Err(decoder::DecodeError::Other(anyhow::anyhow!(
                    "unknown game rule value type {tag}"
                )))
            }
        };
        Ok(Self {
            name,
            can_be_modified,
            value,
        })
    }
}

fn encode_game_rules(rules: &[GameRule], encoder: &mut Encoder) {
    encoder.write_var_u32(rules.len() as u32);
    for rule in rules {
        rule.encode(encoder);
    }
}

fn decode_game_rules(decoder: &mut Decoder) -> decoder::Result<Vec<GameRule>> {
    let count = decoder.read_var_u32()?;
    let mut rules = Vec::with_capacity(usize::min(count as usize, 64));
    for _ in 0..count {
        rules.push(GameRule::decode(decoder)?);
    }
    Ok(rules)
}

/// An entry of the item registry.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemEntry {
    pub name: String,
    pub runtime_id: i16,
    pub component_based: bool,
}

impl ItemEntry {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_string(&self.name);
        encoder.write_i16(self.runtime_id);
        encoder.write_bool(self.component_based);
    }

    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            name: decoder.read_string()?,
            runtime_id: decoder.read_i16()?,
            component_based: decoder.read_bool()?,
        })
    }
}

fn encode_items(items: &[ItemEntry], encoder: &mut Encoder) {
    encoder.write_var_u32(items.len() as u32);
    for item in items {
        item.encode(encoder);
    }
}

fn decode_items(decoder: &mut Decoder) -> decoder::Result<Vec<ItemEntry>> {
    let count = decoder.read_var_u32()?;
    let mut items = Vec::with_capacity(usize::min(count as usize, 1024));
    for _ in 0..count {
        items.push(ItemEntry::decode(decoder)?);
    }
    Ok(items)
}

macro_rules! impl_packet {
    ($name:ident, $id:expr) => {
        impl Packet for $name {
            fn id(&self) -> u32 {
                $id
            }

            fn encode_body(&self, encoder: &mut Encoder) {
                self.encode(encoder);
            }
        }
    };
}

/// Sent by the server as the final packet of each connection stage.
#[derive(Debug, Clone, Default)]
pub struct PlayStatus {
    pub status: i32,
}

impl PlayStatus {
    pub const LOGIN_SUCCESS: i32 = 0;
    pub const PLAYER_SPAWN: i32 = 3;

    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_i32(self.status);
    }

    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            status: decoder.read_i32()?,
        })
    }
}
impl_packet!(PlayStatus, id::PLAY_STATUS);

/// Sent to the client to close its connection with a message.
#[derive(Debug, Clone, Default)]
pub struct Disconnect {
    pub reason: i32,
    pub hide_disconnection_screen: bool,
    pub message: String,
}

impl Disconnect {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_i32(self.reason);
        encoder.write_bool(self.hide_disconnection_screen);
        encoder.write_string(&self.message);
    }

    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            reason: decoder.read_var_i32()?,
            hide_disconnection_screen: decoder.read_bool()?,
            message: decoder.read_string()?,
        })
    }
}
impl_packet!(Disconnect, id::DISCONNECT);

/// Sent by the server to start the game for the player. Populates the
/// session's game data during the connection sequence.
#[derive(Debug, Clone, Default)]
pub struct StartGame {
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
    /// Item registry entries, for downstream protocol revisions that carry
    /// them here rather than in a separate ItemRegistry packet.
    pub items: Vec<ItemEntry>,
    pub rest: Vec<u8>,
}

impl StartGame {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_u32(self.difficulty);
        encoder.write_string(&self.world_name);
        encoder.write_i64(self.world_seed);
        encoder.write_var_i32(self.player_game_mode);
        encoder.write_string(&self.base_game_version);
        encoder.write_vec3(&self.player_position);
        encoder.write_f32(self.pitch);
        encoder.write_f32(self.yaw);
        encoder.write_var_i32(self.dimension);
        encoder.write_block_pos(&self.world_spawn);
        encode_game_rules(&self.game_rules, encoder);
        encoder.write_var_i64(self.time);
        encoder.write_var_i32(self.world_game_mode);
        encoder.write_bool(self.hardcore);
        encode_items(&self.items, encoder);
        encoder.write_slice(&self.rest);
    }

    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            difficulty: decoder.read_var_u32()?,
            world_name: decoder.read_string()?,
            world_seed: decoder.read_i64()?,
            player_game_mode: decoder.read_var_i32()?,
            base_game_version: decoder.read_string()?,
            player_position: decoder.read_vec3()?,
            pitch: decoder.read_f32()?,
            yaw: decoder.read_f32()?,
            dimension: decoder.read_var_i32()?,
            world_spawn: decoder.read_block_pos()?,
            game_rules: decode_game_rules(decoder)?,
            time: decoder.read_var_i64()?,
            world_game_mode: decoder.read_var_i32()?,
            hardcore: decoder.read_bool()?,
            items: decode_items(decoder)?,
            rest: decoder.consume_rest(),
        })
    }
}
impl_packet!(StartGame, id::START_GAME);

/// Sent by newer servers after StartGame with the full item registry.
#[derive(Debug, Clone, Default)]
pub struct ItemRegistry {
    pub items: Vec<ItemEntry>,
}

impl ItemRegistry {
    fn encode(&self, encoder: &mut Encoder) {
        encode_items(&self.items, encoder);
    }

    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            items: decode_items(decoder)?,
        })
    }
}
impl_packet!(ItemRegistry, id::ITEM_REGISTRY);

/// Sent by the proxy to request the initial chunk radius.
#[derive(Debug, Clone, Default)]
pub struct RequestChunkRadius {
    pub chunk_radius: i32,
    pub max_chunk_radius: u8,
}

impl RequestChunkRadius {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_i32(self.chunk_radius);
        encoder.write_u8(self.max_chunk_radius);
    }

    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            chunk_radius: decoder.read_var_i32()?,
            max_chunk_radius: decoder.read_u8()?,
        })
    }
}
impl_packet!(RequestChunkRadius, id::REQUEST_CHUNK_RADIUS);

/// Sent by the server in response to RequestChunkRadius.
#[derive(Debug, Clone, Default)]
pub struct ChunkRadiusUpdated {
    pub chunk_radius: i32,
}

impl ChunkRadiusUpdated {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_i32(self.chunk_radius);
    }

    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            chunk_radius: decoder.read_var_i32()?,
        })
    }
}
impl_packet!(ChunkRadiusUpdated, id::CHUNK_RADIUS_UPDATED);

/// Sent by the proxy to finalise the connection sequence and spawn the
/// player on the downstream server.
#[derive(Debug, Clone, Default)]
pub struct SetLocalPlayerAsInitialised {
    pub entity_runtime_id: u64,
}

impl SetLocalPlayerAsInitialised {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_u64(self.entity_runtime_id);
    }

    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            entity_runtime_id: decoder.read_var_u64()?,
        })
    }
}
impl_packet!(
    SetLocalPlayerAsInitialised,
    id::SET_LOCAL_PLAYER_AS_INITIALISED
);

/// Spawns an entity on the client.
#[derive(Debug, Clone, Default)]
pub struct AddActor {
    pub entity_unique_id: i64,
    pub entity_runtime_id: u64,
    pub rest: Vec<u8>,
}

impl AddActor {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_i64(self.entity_unique_id);
        encoder.write_var_u64(self.entity_runtime_id);
        encoder.write_slice(&self.rest);
    }

    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            entity_unique_id: decoder.read_var_i64()?,
            entity_runtime_id: decoder.read_var_u64()?,
            rest: decoder.consume_rest(),
        })
    }
}
impl_packet!(AddActor, id::ADD_ACTOR);

/// Spawns an item entity on the client.
#[derive(Debug, Clone, Default)]
pub struct AddItemActor {
    pub entity_unique_id: i64,
    pub entity_runtime_id: u64,
    pub rest: Vec<u8>,
}

impl AddItemActor {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_i64(self.entity_unique_id);
        encoder.write_var_u64(self.entity_runtime_id);
        encoder.write_slice(&self.rest);
    }

    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            entity_unique_id: decoder.read_var_i64()?,
            entity_runtime_id: decoder.read_var_u64()?,
            rest: decoder.consume_rest(),
        })
    }
}
impl_packet!(AddItemActor, id::ADD_ITEM_ACTOR);

/// Spawns a painting on the client.
#[derive(Debug, Clone, Default)]
pub struct AddPainting {
    pub entity_unique_id: i64,
    pub entity_runtime_id: u64,
    pub rest: Vec<u8>,
}

impl AddPainting {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_i64(self.entity_unique_id);
        encoder.write_var_u64(self.entity_runtime_id);
        encoder.write_slice(&self.rest);
    }

    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            entity_unique_id: decoder.read_var_i64()?,
            entity_runtime_id: decoder.read_var_u64()?,
            rest: decoder.consume_rest(),
        })
    }
}
impl_packet!(AddPainting, id::ADD_PAINTING);

/// The ability data carried by AddPlayer, holding the player's unique id.
#[derive(Debug, Clone, Default)]
pub struct AbilityData {
    pub entity_unique_id: i64,
}

/// Spawns another player on the client.
#[derive(Debug, Clone, Default)]
pub struct AddPlayer {
    pub uuid: Uuid,
    pub username: String,
    pub ability_data: AbilityData,
    pub rest: Vec<u8>,
}

impl AddPlayer {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_uuid(&self.uuid);
        encoder.write_string(&self.username);
        encoder.write_i64(self.ability_data.entity_unique_id);
        encoder.write_slice(&self.rest);
    }

    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            uuid: decoder.read_uuid()?,
            username: decoder.read_string()?,
            ability_data: AbilityData {
                entity_unique_id: decoder.read_i64()?,
            },
            rest: decoder.consume_rest(),
        })
    }
}
impl_packet!(AddPlayer, id::ADD_PLAYER);

/// Despawns an entity from the client.
#[derive(Debug, Clone, Default)]
pub struct RemoveActor {
    pub entity_unique_id: i64,
}

impl RemoveActor {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_i64(self.entity_unique_id);
    }

    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            entity_unique_id: decoder.read_var_i64()?,
        })
    }
}
impl_packet!(RemoveActor, id::REMOVE_ACTOR);

/// Updates a boss bar on the client.
#[derive(Debug, Clone, Default)]
pub struct BossEvent {
    pub boss_entity_unique_id: i64,
    pub event_type: u32,
    pub rest: Vec<u8>,
}

impl BossEvent {
    pub const EVENT_SHOW: u32 = 0;
    pub const EVENT_HIDE: u32 = 2;

    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_i64(self.boss_entity_unique_id);
        encoder.write_var_u32(self.event_type);
        encoder.write_slice(&self.rest);
    }

    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            boss_entity_unique_id: decoder.read_var_i64()?,
            event_type: decoder.read_var_u32()?,
            rest: decoder.consume_rest(),
        })
    }
}
impl_packet!(BossEvent, id::BOSS_EVENT);

/// Applies or removes a mob effect on the client.
#[derive(Debug, Clone, Default)]
pub struct MobEffect {
    pub entity_runtime_id: u64,
    pub operation: u8,
    pub effect_type: i32,
    pub amplifier: i32,
    pub particles: bool,
    pub duration: i32,
}

impl MobEffect {
    pub const OPERATION_ADD: u8 = 1;
    pub const OPERATION_MODIFY: u8 = 2;
    pub const OPERATION_REMOVE: u8 = 3;

    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_u64(self.entity_runtime_id);
        encoder.write_u8(self.operation);
        encoder.write_var_i32(self.effect_type);
        encoder.write_var_i32(self.amplifier);
        encoder.write_bool(self.particles);
        encoder.write_var_i32(self.duration);
    }

    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            entity_runtime_id: decoder.read_var_u64()?,
            operation: decoder.read_u8()?,
            effect_type: decoder.read_var_i32()?,
            amplifier: decoder.read_var_i32()?,
            particles: decoder.read_bool()?,
            duration: decoder.read_var_i32()?,
        })
    }
}
impl_packet!(MobEffect, id::MOB_EFFECT);

/// An entry of the player list.
#[derive(Debug, Clone, Default)]
pub struct PlayerListEntry {
    pub uuid: Uuid,
    pub username: String,
    pub skin: Vec<u8>,
}

/// Adds entries to or removes entries from the client's player list.
#[derive(Debug, Clone, Default)]
pub struct PlayerList {
    pub action: u8,
    pub entries: Vec<PlayerListEntry>,
}

impl PlayerList {
    pub const ACTION_ADD: u8 = 0;
    pub const ACTION_REMOVE: u8 = 1;

    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_u8(self.action);
        encoder.write_var_u32(self.entries.len() as u32);
        for entry in &self.entries {
            encoder.write_uuid(&entry.uuid);
            if self.action == Self::ACTION_ADD {
                encoder.write_string(&entry.username);
                encoder.write_byte_slice(&entry.skin);
            }
        }
    }

    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        let action = decoder.read_u8()?;
        let count = decoder.read_var_u32()?;
        let mut entries = Vec::with_capacity(usize::min(count as usize, 256));
        for _ in 0..count {
            let uuid = decoder.read_uuid()?;
            let (username, skin) = if action == Self::ACTION_ADD {
                (decoder.read_string()?, decoder.read_byte_slice()?)
            } else {
                (String::new(), Vec::new())
            };
            entries.push(PlayerListEntry {
                uuid,
                username,
                skin,
            });
        }
        Ok(Self { action, entries })
    }
}
impl_packet!(PlayerList, id::PLAYER_LIST);

/// Shows a scoreboard objective on the client.
#[derive(Debug, Clone, Default)]
pub struct SetDisplayObjective {
    pub display_slot: String,
    pub objective_name: String,
    pub display_name: String,
    pub criteria_name: String,
    pub sort_order: i32,
}

impl SetDisplayObjective {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_string(&self.display_slot);
        encoder.write_string(&self.objective_name);
        encoder.write_string(&self.display_name);
        encoder.write_string(&self.criteria_name);
        encoder.write_var_i32(self.sort_order);
    }

    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            display_slot: decoder.read_string()?,
            objective_name: decoder.read_string()?,
            display_name: decoder.read_string()?,
            criteria_name: decoder.read_string()?,
            sort_order: decoder.read_var_i32()?,
        })
    }
}
impl_packet!(SetDisplayObjective, id::SET_DISPLAY_OBJECTIVE);

/// Removes a scoreboard objective from the client.
#[derive(Debug, Clone, Default)]
pub struct RemoveObjective {
    pub objective_name: String,
}

impl RemoveObjective {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_string(&self.objective_name);
    }

    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            objective_name: decoder.read_string()?,
        })
    }
}
impl_packet!(RemoveObjective, id::REMOVE_OBJECTIVE);

/// Sends a chunk column to the client.
#[derive(Debug, Clone, Default)]
pub struct LevelChunk {
    pub dimension: i32,
    pub position: ChunkPos,
    pub sub_chunk_count: u32,
    pub cache_enabled: bool,
    pub payload: Vec<u8>,
}

impl LevelChunk {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_i32(self.dimension);
        encoder.write_var_i32(self.position.x);
        encoder.write_var_i32(self.position.z);
        encoder.write_var_u32(self.sub_chunk_count);
        encoder.write_bool(self.cache_enabled);
        encoder.write_byte_slice(&self.payload);
    }

    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            dimension: decoder.read_var_i32()?,
            position: ChunkPos {
                x: decoder.read_var_i32()?,
                z: decoder.read_var_i32()?,
            },
            sub_chunk_count: decoder.read_var_u32()?,
            cache_enabled: decoder.read_bool()?,
            payload: decoder.read_byte_slice()?,
        })
    }
}
impl_packet!(LevelChunk, id::LEVEL_CHUNK);

/// Moves the player on the client.
#[derive(Debug, Clone, Default)]
pub struct MovePlayer {
    pub entity_runtime_id: u64,
    pub position: Vec3,
    pub pitch: f32,
    pub yaw: f32,
    pub head_yaw: f32,
    pub mode: u8,
    pub on_ground: bool,
    pub ridden_entity_runtime_id: u64,
}

impl MovePlayer {
    pub const MODE_NORMAL: u8 = 0;
    pub const MODE_RESET: u8 = 1;
    pub const MODE_TELEPORT: u8 = 2;

    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_u64(self.entity_runtime_id);
        encoder.write_vec3(&self.position);
        encoder.write_f32(self.pitch);
        encoder.write_f32(self.yaw);
        encoder.write_f32(self.head_yaw);
        encoder.write_u8(self.mode);
        encoder.write_bool(self.on_ground);
        encoder.write_var_u64(self.ridden_entity_runtime_id);
    }

    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            entity_runtime_id: decoder.read_var_u64()?,
            position: decoder.read_vec3()?,
            pitch: decoder.read_f32()?,
            yaw: decoder.read_f32()?,
            head_yaw: decoder.read_f32()?,
            mode: decoder.read_u8()?,
            on_ground: decoder.read_bool()?,
            ridden_entity_runtime_id: decoder.read_var_u64()?,
        })
    }
}
impl_packet!(MovePlayer, id::MOVE_PLAYER);

/// Triggers a world event on the client.
#[derive(Debug, Clone, Default)]
pub struct LevelEvent {
    pub event_type: i32,
    pub position: Vec3,
    pub event_data: i32,
}

impl LevelEvent {
    pub const STOP_RAINING: i32 = 3003;
    pub const STOP_THUNDERSTORM: i32 = 3004;

    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_i32(self.event_type);
        encoder.write_vec3(&self.position);
        encoder.write_var_i32(self.event_data);
    }

    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            event_type: decoder.read_var_i32()?,
            position: decoder.read_vec3()?,
            event_data: decoder.read_var_i32()?,
        })
    }
}
impl_packet!(LevelEvent, id::LEVEL_EVENT);

/// Updates the world difficulty on the client.
#[derive(Debug, Clone, Default)]
pub struct SetDifficulty {
    pub difficulty: u32,
}

impl SetDifficulty {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_u32(self.difficulty);
    }

    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            difficulty: decoder.read_var_u32()?,
        })
    }
}
impl_packet!(SetDifficulty, id::SET_DIFFICULTY);

/// Updates the player's game mode on the client.
#[derive(Debug, Clone, Default)]
pub struct SetPlayerGameType {
    pub game_type: i32,
}

impl SetPlayerGameType {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_i32(self.game_type);
    }

    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            game_type: decoder.read_var_i32()?,
        })
    }
}
impl_packet!(SetPlayerGameType, id::SET_PLAYER_GAME_TYPE);

/// Replaces the client's game rules.
#[derive(Debug, Clone, Default)]
pub struct GameRulesChanged {
    pub game_rules: Vec<GameRule>,
}

impl GameRulesChanged {
    fn encode(&self, encoder: &mut Encoder) {
        encode_game_rules(&self.game_rules, encoder);
    }

    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            game_rules: decode_game_rules(decoder)?,
        })
    }
}
impl_packet!(GameRulesChanged, id::GAME_RULES_CHANGED);

/// Updates actor metadata on the client. Only the flag field is modelled;
/// the proxy uses it to freeze the player during transfers.
#[derive(Debug, Clone, Default)]
pub struct SetActorData {
    pub entity_runtime_id: u64,
    pub flags: EntityDataFlags,
}

impl SetActorData {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_u64(self.entity_runtime_id);
        encoder.write_var_u32(1);
        encoder.write_var_u32(DATA_KEY_FLAGS);
        encoder.write_var_u32(DATA_TYPE_LONG);
        encoder.write_var_i64(self.flags.bits() as i64);
    }

    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        let entity_runtime_id = decoder.read_var_u64()?;
        let count = decoder.read_var_u32()?;
        let mut flags = EntityDataFlags::default();
        // Only flag entries are modelled; anything else cannot be consumed
        // (skipping would need the full metadata type table) and must fail
        // loudly rather than leave the stream misaligned.
        for _ in 0..count {
            let key = decoder.read_var_u32()?;
            let value_type = decoder.read_var_u32()?;
            if key != DATA_KEY_FLAGS || value_type != DATA_TYPE_LONG {
                return Err(decoder::DecodeError::Other(anyhow::anyhow!(
                    "unsupported actor metadata entry (key {key}, type {value_type})"
                )));
            }
            flags = EntityDataFlags::from_bits_retain(decoder.read_var_i64()? as u64);
        }
        Ok(Self {
            entity_runtime_id,
            flags,
        })
    }
}
impl_packet!(SetActorData, id::SET_ACTOR_DATA);

/// Moves the player to another dimension, showing the dimension change
/// screen.
#[derive(Debug, Clone, Default)]
pub struct ChangeDimension {
    pub dimension: i32,
    pub position: Vec3,
    pub respawn: bool,
}

impl ChangeDimension {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_i32(self.dimension);
        encoder.write_vec3(&self.position);
        encoder.write_bool(self.respawn);
    }

    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            dimension: decoder.read_var_i32()?,
            position: decoder.read_vec3()?,
            respawn: decoder.read_bool()?,
        })
    }
}
impl_packet!(ChangeDimension, id::CHANGE_DIMENSION);

/// Stops sounds playing on the client.
#[derive(Debug, Clone, Default)]
pub struct StopSound {
    pub sound_name: String,
    pub stop_all: bool,
}

impl StopSound {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_string(&self.sound_name);
        encoder.write_bool(self.stop_all);
    }

    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            sound_name: decoder.read_string()?,
            stop_all: decoder.read_bool()?,
        })
    }
}
impl_packet!(StopSound, id::STOP_SOUND);

/// Performs a player action.
#[derive(Debug, Clone, Default)]
pub struct PlayerAction {
    pub entity_runtime_id: u64,
    pub action_type: i32,
    pub block_position: BlockPos,
    pub result_position: BlockPos,
    pub block_face: i32,
}

impl PlayerAction {
    pub const DIMENSION_CHANGE_DONE: i32 = 36;

    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_u64(self.entity_runtime_id);
        encoder.write_var_i32(self.action_type);
        encoder.write_block_pos(&self.block_position);
        encoder.write_block_pos(&self.result_position);
        encoder.write_var_i32(self.block_face);
    }

    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            entity_runtime_id: decoder.read_var_u64()?,
            action_type: decoder.read_var_i32()?,
            block_position: decoder.read_block_pos()?,
            result_position: decoder.read_block_pos()?,
            block_face: decoder.read_var_i32()?,
        })
    }
}
impl_packet!(PlayerAction, id::PLAYER_ACTION);

/// A packet the proxy has no decoder for. Carries the header and the whole
/// undecoded body, so it forwards without loss.
#[derive(Debug, Clone, Default)]
pub struct Unknown {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet for Unknown {
    fn id(&self) -> u32 {
        self.header.id
    }

    fn encode_body(&self, encoder: &mut Encoder) {
        encoder.write_slice(&self.payload);
    }
}

/// The closed sum of game packets flowing through the proxy.
#[derive(Debug, Clone, strum::AsRefStr)]
pub enum GamePacket {
    PlayStatus(PlayStatus),
    Disconnect(Disconnect),
    StartGame(StartGame),
    ItemRegistry(ItemRegistry),
    RequestChunkRadius(RequestChunkRadius),
    ChunkRadiusUpdated(ChunkRadiusUpdated),
    SetLocalPlayerAsInitialised(SetLocalPlayerAsInitialised),
    AddActor(AddActor),
    AddItemActor(AddItemActor),
    AddPainting(AddPainting),
    AddPlayer(AddPlayer),
    RemoveActor(RemoveActor),
    BossEvent(BossEvent),
    MobEffect(MobEffect),
    PlayerList(PlayerList),
    SetDisplayObjective(SetDisplayObjective),
    RemoveObjective(RemoveObjective),
    LevelChunk(LevelChunk),
    MovePlayer(MovePlayer),
    LevelEvent(LevelEvent),
    SetDifficulty(SetDifficulty),
    SetPlayerGameType(SetPlayerGameType),
    GameRulesChanged(GameRulesChanged),
    SetActorData(SetActorData),
    ChangeDimension(ChangeDimension),
    StopSound(StopSound),
    PlayerAction(PlayerAction),
    Unknown(Unknown),
}

impl GamePacket {
    fn inner(&self) -> &dyn Packet {
        match self {
            Self::PlayStatus(pk) => pk,
            Self::Disconnect(pk) => pk,
            Self::StartGame(pk) => pk,
            Self::ItemRegistry(pk) => pk,
            Self::RequestChunkRadius(pk) => pk,
            Self::ChunkRadiusUpdated(pk) => pk,
            Self::SetLocalPlayerAsInitialised(pk) => pk,
            Self::AddActor(pk) => pk,
            Self::AddItemActor(pk) => pk,
            Self::AddPainting(pk) => pk,
            Self::AddPlayer(pk) => pk,
            Self::RemoveActor(pk) => pk,
            Self::BossEvent(pk) => pk,
            Self::MobEffect(pk) => pk,
            Self::PlayerList(pk) => pk,
            Self::SetDisplayObjective(pk) => pk,
            Self::RemoveObjective(pk) => pk,
            Self::LevelChunk(pk) => pk,
            Self::MovePlayer(pk) => pk,
            Self::LevelEvent(pk) => pk,
            Self::SetDifficulty(pk) => pk,
            Self::SetPlayerGameType(pk) => pk,
            Self::GameRulesChanged(pk) => pk,
            Self::SetActorData(pk) => pk,
            Self::ChangeDimension(pk) => pk,
            Self::StopSound(pk) => pk,
            Self::PlayerAction(pk) => pk,
            Self::Unknown(pk) => pk,
        }
    }
}

impl Packet for GamePacket {
    fn id(&self) -> u32 {
        self.inner().id()
    }

    fn encode_body(&self, encoder: &mut Encoder) {
        self.inner().encode_body(encoder);
    }
}

/// Decodes one packet body into a [`GamePacket`].
pub type PacketFactory = fn(&mut Decoder) -> decoder::Result<GamePacket>;

/// Builds a [`Pool`] from an explicit set of packet factories.
#[derive(Default)]
pub struct PoolBuilder {
    factories: HashMap<u32, PacketFactory>,
}

impl PoolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, id: u32, factory: PacketFactory) -> Self {
        self.factories.insert(id, factory);
        self
    }

    pub fn build(self) -> Pool {
        Pool {
            factories: self.factories,
        }
    }
}

/// Maps packet ids to decode factories. Ids without a factory decode to
/// [`GamePacket::Unknown`].
#[derive(Clone)]
pub struct Pool {
    factories: HashMap<u32, PacketFactory>,
}

impl Pool {
    /// The packets a downstream server sends to the proxy.
    pub fn from_server() -> Self {
        PoolBuilder::new()
            .register(id::PLAY_STATUS, |d| {
                PlayStatus::decode(d).map(GamePacket::PlayStatus)
            })
            .register(id::DISCONNECT, |d| {
                Disconnect::decode(d).map(GamePacket::Disconnect)
            })
            .register(id::START_GAME, |d| {
                StartGame::decode(d).map(GamePacket::StartGame)
            })
            .register(id::ITEM_REGISTRY, |d| {
                ItemRegistry::decode(d).map(GamePacket::ItemRegistry)
            })
            .register(id::CHUNK_RADIUS_UPDATED, |d| {
                ChunkRadiusUpdated::decode(d).map(GamePacket::ChunkRadiusUpdated)
            })
            .register(id::ADD_ACTOR, |d| {
                AddActor::decode(d).map(GamePacket::AddActor)
            })
            .register(id::ADD_ITEM_ACTOR, |d| {
                AddItemActor::decode(d).map(GamePacket::AddItemActor)
            })
            .register(id::ADD_PAINTING, |d| {
                AddPainting::decode(d).map(GamePacket::AddPainting)
            })
            .register(id::ADD_PLAYER, |d| {
                AddPlayer::decode(d).map(GamePacket::AddPlayer)
            })
            .register(id::REMOVE_ACTOR, |d| {
                RemoveActor::decode(d).map(GamePacket::RemoveActor)
            })
            .register(id::BOSS_EVENT, |d| {
                BossEvent::decode(d).map(GamePacket::BossEvent)
            })
            .register(id::MOB_EFFECT, |d| {
                MobEffect::decode(d).map(GamePacket::MobEffect)
            })
            .register(id::PLAYER_LIST, |d| {
                PlayerList::decode(d).map(GamePacket::PlayerList)
            })
            .register(id::SET_DISPLAY_OBJECTIVE, |d| {
                SetDisplayObjective::decode(d).map(GamePacket::SetDisplayObjective)
            })
            .register(id::REMOVE_OBJECTIVE, |d| {
                RemoveObjective::decode(d).map(GamePacket::RemoveObjective)
            })
            .register(id::LEVEL_CHUNK, |d| {
                LevelChunk::decode(d).map(GamePacket::LevelChunk)
            })
            .register(id::MOVE_PLAYER, |d| {
                MovePlayer::decode(d).map(GamePacket::MovePlayer)
            })
            .register(id::LEVEL_EVENT, |d| {
                LevelEvent::decode(d).map(GamePacket::LevelEvent)
            })
            .register(id::SET_DIFFICULTY, |d| {
                SetDifficulty::decode(d).map(GamePacket::SetDifficulty)
            })
            .register(id::SET_PLAYER_GAME_TYPE, |d| {
                SetPlayerGameType::decode(d).map(GamePacket::SetPlayerGameType)
            })
            .register(id::GAME_RULES_CHANGED, |d| {
                GameRulesChanged::decode(d).map(GamePacket::GameRulesChanged)
            })
            .register(id::CHANGE_DIMENSION, |d| {
                ChangeDimension::decode(d).map(GamePacket::ChangeDimension)
            })
            .register(id::STOP_SOUND, |d| {
                StopSound::decode(d).map(GamePacket::StopSound)
            })
            .build()
    }

    /// The packets a client sends to the proxy.
    pub fn from_client() -> Self {
        PoolBuilder::new()
            .register(id::REQUEST_CHUNK_RADIUS, |d| {
                RequestChunkRadius::decode(d).map(GamePacket::RequestChunkRadius)
            })
            .register(id::SET_LOCAL_PLAYER_AS_INITIALISED, |d| {
                SetLocalPlayerAsInitialised::decode(d).map(GamePacket::SetLocalPlayerAsInitialised)
            })
            .register(id::PLAYER_ACTION, |d| {
                PlayerAction::decode(d).map(GamePacket::PlayerAction)
            })
            .build()
    }

    pub fn get(&self, id: u32) -> Option<PacketFactory> {
        self.factories.get(&id).copied()
    }

    /// Decodes a packet body, falling back to [`GamePacket::Unknown`] for
    /// ids without a registered factory.
    pub fn decode(&self, header: Header, decoder: &mut Decoder) -> decoder::Result<GamePacket> {
        match self.get(header.id) {
            Some(factory) => factory(decoder),
            None => Ok(GamePacket::Unknown(Unknown {
                header,
                payload: decoder.consume_rest(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_packet(pk: &impl Packet) -> Vec<u8> {
        let mut buf = Vec::new();
        pk.encode_body(&mut Encoder::new(&mut buf));
        buf
    }

    #[test]
    fn pool_decodes_registered_packet() {
        let body = encode_packet(&RemoveActor {
            entity_unique_id: -42,
        });
        let pool = Pool::from_server();
        let decoded = pool
            .decode(Header::new(id::REMOVE_ACTOR), &mut Decoder::new(&body))
            .unwrap();
        match decoded {
            GamePacket::RemoveActor(pk) => assert_eq!(pk.entity_unique_id, -42),
            other => panic!("unexpected packet {}", other.as_ref()),
        }
    }

    #[test]
    fn pool_falls_back_to_unknown() {
        let pool = Pool::from_server();
        let header = Header::new(0x99);
        let decoded = pool
            .decode(header, &mut Decoder::new(&[1, 2, 3]))
            .unwrap();
        match decoded {
            GamePacket::Unknown(pk) => {
                assert_eq!(pk.header.id, 0x99);
                assert_eq!(pk.payload, vec![1, 2, 3]);
            }
            other => panic!("unexpected packet {}", other.as_ref()),
        }
    }

    #[test]
    fn start_game_keeps_undecoded_tail() {
        let pk = StartGame {
            world_name: "hub".into(),
            dimension: DIMENSION_OVERWORLD,
            game_rules: vec![GameRule {
                name: "doDaylightCycle".into(),
                can_be_modified: true,
                value: GameRuleValue::Bool(false),
            }],
            items: vec![ItemEntry {
                name: "minecraft:shield".into(),
                runtime_id: 355,
                component_based: false,
            }],
            rest: vec![0xde, 0xad, 0xbe, 0xef],
            ..Default::default()
        };
        let body = encode_packet(&pk);
        let decoded = StartGame::decode(&mut Decoder::new(&body)).unwrap();
        assert_eq!(decoded.world_name, "hub");
        assert_eq!(decoded.game_rules, pk.game_rules);
        assert_eq!(decoded.items, pk.items);
        assert_eq!(decoded.rest, pk.rest);
    }

    #[test]
    fn player_list_remove_roundtrip() {
        let pk = PlayerList {
            action: PlayerList::ACTION_REMOVE,
            entries: vec![
                PlayerListEntry {
                    uuid: Uuid::from_u128(7),
                    ..Default::default()
                },
                PlayerListEntry {
                    uuid: Uuid::from_u128(9),
                    ..Default::default()
                },
            ],
        };
        let body = encode_packet(&pk);
        let decoded = PlayerList::decode(&mut Decoder::new(&body)).unwrap();
        assert_eq!(decoded.action, PlayerList::ACTION_REMOVE);
        let uuids: Vec<_> = decoded.entries.iter().map(|e| e.uuid).collect();
        assert_eq!(uuids, vec![Uuid::from_u128(7), Uuid::from_u128(9)]);
    }

    #[test]
    fn set_actor_data_flags_roundtrip() {
        let pk = SetActorData {
            entity_runtime_id: 42,
            flags: EntityDataFlags::NO_AI | EntityDataFlags::BREATHING,
        };
        let body = encode_packet(&pk);
        let decoded = SetActorData::decode(&mut Decoder::new(&body)).unwrap();
        assert!(decoded.flags.contains(EntityDataFlags::NO_AI));
        assert!(decoded.flags.contains(EntityDataFlags::BREATHING));
        assert!(!decoded.flags.contains(EntityDataFlags::HAS_GRAVITY));
    }

    #[test]
    fn set_actor_data_rejects_unmodelled_metadata() {
        let mut body = Vec::new();
        let mut encoder = Encoder::new(&mut body);
        encoder.write_var_u64(42);
        encoder.write_var_u32(1);
        // A variant-type entry (key 4 is the nametag) the partial model
        // cannot skip over.
        encoder.write_var_u32(4);
        encoder.write_var_u32(4);
        assert!(SetActorData::decode(&mut Decoder::new(&body)).is_err());
    }

    #[test]
    fn set_actor_data_empty_metadata_consumes_the_dictionary() {
        let mut body = Vec::new();
        let mut encoder = Encoder::new(&mut body);
        encoder.write_var_u64(42);
        encoder.write_var_u32(0);
        let mut decoder = Decoder::new(&body);
        let decoded = SetActorData::decode(&mut decoder).unwrap();
        assert!(decoded.flags.is_empty());
        assert!(decoder.is_finished());
    }
}
