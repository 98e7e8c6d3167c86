//! Remembers what the client currently has on screen, so a transfer can
//! scrub it all before the new server takes over.

use crate::{
    client::ClientConn,
    protocol::game::{
        BossEvent, GamePacket, MobEffect, PlayerList, PlayerListEntry, RemoveActor,
        RemoveObjective,
    },
};
use std::collections::HashSet;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Sets {
    entities: HashSet<i64>,
    boss_bars: HashSet<i64>,
    effects: HashSet<i32>,
    players: HashSet<Uuid>,
    scoreboards: HashSet<String>,
}

/// Tracks the in-world state the client has been shown by the current
/// downstream server: entities, boss bars, mob effects, player-list entries
/// and scoreboard objectives.
#[derive(Default)]
pub struct Tracker {
    sets: Mutex<Sets>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspects a server-to-client packet and updates the tracked sets.
    /// Must be called before the packet is written to the client, so a
    /// concurrent [`Tracker::clear_all`] cannot miss state the client has
    /// already seen.
    pub async fn handle_packet(&self, packet: &GamePacket) {
        let mut sets = self.sets.lock().await;
        match packet {
            GamePacket::AddActor(pk) => {
                sets.entities.insert(pk.entity_unique_id);
            }
            GamePacket::AddItemActor(pk) => {
                sets.entities.insert(pk.entity_unique_id);
            }
            GamePacket::AddPainting(pk) => {
                sets.entities.insert(pk.entity_unique_id);
            }
            GamePacket::AddPlayer(pk) => {
                sets.entities.insert(pk.ability_data.entity_unique_id);
            }
            GamePacket::RemoveActor(pk) => {
                sets.entities.remove(&pk.entity_unique_id);
            }
            GamePacket::BossEvent(pk) => {
                sets.boss_bars.insert(pk.boss_entity_unique_id);
            }
            GamePacket::MobEffect(pk) => {
                if pk.operation == MobEffect::OPERATION_ADD {
                    sets.effects.insert(pk.effect_type);
                } else {
                    sets.effects.remove(&pk.effect_type);
                }
            }
            GamePacket::PlayerList(pk) => {
                for entry in &pk.entries {
                    if pk.action == PlayerList::ACTION_ADD {
                        sets.players.insert(entry.uuid);
                    } else {
                        sets.players.remove(&entry.uuid);
                    }
                }
            }
            GamePacket::SetDisplayObjective(pk) => {
                sets.scoreboards.insert(pk.objective_name.clone());
            }
            GamePacket::RemoveObjective(pk) => {
                sets.scoreboards.remove(&pk.objective_name);
            }
            _ => {}
        }
    }

    /// Emits one removal packet per tracked item and empties every set.
    /// Idempotent; tolerates client-side write errors.
    pub async fn clear_all(&self, client: &dyn ClientConn) {
        let mut sets = self.sets.lock().await;
        let entity_runtime_id = client.game_data().entity_runtime_id;

        for effect_type in sets.effects.drain() {
            let _ = client
                .write_packet(&GamePacket::MobEffect(MobEffect {
                    entity_runtime_id,
                    operation: MobEffect::OPERATION_REMOVE,
                    effect_type,
                    ..Default::default()
                }))
                .await;
        }

        for entity_unique_id in sets.entities.drain() {
            let _ = client
                .write_packet(&GamePacket::RemoveActor(RemoveActor { entity_unique_id }))
                .await;
        }

        for boss_entity_unique_id in sets.boss_bars.drain() {
            let _ = client
                .write_packet(&GamePacket::BossEvent(BossEvent {
                    boss_entity_unique_id,
                    event_type: BossEvent::EVENT_HIDE,
                    ..Default::default()
                }))
                .await;
        }

        let entries: Vec<PlayerListEntry> = sets
            .players
            .drain()
            .map(|uuid| PlayerListEntry {
                uuid,
                ..Default::default()
            })
            .collect();
        if !entries.is_empty() {
            let _ = client
                .write_packet(&GamePacket::PlayerList(PlayerList {
                    action: PlayerList::ACTION_REMOVE,
                    entries,
                }))
                .await;
        }

        for objective_name in sets.scoreboards.drain().collect::<Vec<_>>() {
            let _ = client
                .write_packet(&GamePacket::RemoveObjective(RemoveObjective {
                    objective_name,
                }))
                .await;
        }
    }
}
