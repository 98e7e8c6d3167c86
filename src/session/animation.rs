//! Animations shown to the client while a transfer is in progress, covering
//! the moment where the old world is gone and the new one has not arrived.

use crate::{
    client::{ClientConn, GameData},
    protocol::game::{
        self, ChangeDimension, GamePacket, PlayStatus, PlayerAction, StopSound,
    },
};
use async_trait::async_trait;

/// Played around the world swap of a transfer: `play` runs right before the
/// empty chunks are sent, `clear` right after the reset script.
#[async_trait]
pub trait Animation: Send + Sync {
    async fn play(&self, client: &dyn ClientConn, server_game_data: &GameData);
    async fn clear(&self, client: &dyn ClientConn, server_game_data: &GameData);
}

/// No animation at all.
#[derive(Debug, Default)]
pub struct NopAnimation;

#[async_trait]
impl Animation for NopAnimation {
    async fn play(&self, _client: &dyn ClientConn, _server_game_data: &GameData) {}

    async fn clear(&self, _client: &dyn ClientConn, _server_game_data: &GameData) {}
}

/// Displays the dimension change screen to the player. The default.
#[derive(Debug, Default)]
pub struct Dimension;

#[async_trait]
impl Animation for Dimension {
    async fn play(&self, client: &dyn ClientConn, server_game_data: &GameData) {
        // Any dimension other than the client's current one triggers the
        // change screen.
        let dimension = if client.game_data().dimension == game::DIMENSION_NETHER {
            game::DIMENSION_END
        } else {
            game::DIMENSION_NETHER
        };
        send_dimension(client, server_game_data, dimension, false).await;
    }

    async fn clear(&self, client: &dyn ClientConn, server_game_data: &GameData) {
        let _ = client
            .write_packet(&GamePacket::PlayStatus(PlayStatus {
                status: PlayStatus::PLAYER_SPAWN,
            }))
            .await;
        send_dimension(client, server_game_data, server_game_data.dimension, true).await;
    }
}

/// Updates the player's dimension and optionally force-spawns them.
async fn send_dimension(
    client: &dyn ClientConn,
    server_game_data: &GameData,
    dimension: i32,
    play_status: bool,
) {
    let _ = client
        .write_packet(&GamePacket::ChangeDimension(ChangeDimension {
            dimension,
            position: server_game_data.player_position,
            respawn: false,
        }))
        .await;
    let _ = client
        .write_packet(&GamePacket::StopSound(StopSound {
            sound_name: String::new(),
            stop_all: true,
        }))
        .await;
    let _ = client
        .write_packet(&GamePacket::PlayerAction(PlayerAction {
            entity_runtime_id: server_game_data.entity_runtime_id,
            action_type: PlayerAction::DIMENSION_CHANGE_DONE,
            ..Default::default()
        }))
        .await;
    if play_status {
        let _ = client
            .write_packet(&GamePacket::PlayStatus(PlayStatus {
                status: PlayStatus::PLAYER_SPAWN,
            }))
            .await;
    }
}
