//! Hooks for inspecting and rewriting traffic flowing through a session.

use crate::{client::GameData, protocol::game::GamePacket};

/// Carried through every hook invocation; a hook cancels the surrounding
/// operation by calling [`Context::cancel`]. Cancellation is not an error:
/// the affected packet or operation is silently dropped.
#[derive(Debug, Default)]
pub struct Context {
    cancelled: bool,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled
    }
}

/// Receives session events: packets in both directions, transfers, flushes
/// and disconnection. Every method defaults to a no-op; hooks that take a
/// mutable packet or payload are free to rewrite it, including replacing it
/// entirely.
#[allow(unused_variables)]
pub trait Processor: Send + Sync {
    /// Called with the game data of the first downstream server, before the
    /// player is spawned with it.
    fn process_start_game(&self, ctx: &mut Context, data: &mut GameData) {}

    /// Called for each decoded packet travelling from the server to the
    /// client.
    fn process_server(&self, ctx: &mut Context, packet: &mut GamePacket) {}

    /// Called for each passthrough blob travelling from the server to the
    /// client.
    fn process_server_encoded(&self, ctx: &mut Context, payload: &mut Vec<u8>) {}

    /// Called for each decoded packet travelling from the client to the
    /// server.
    fn process_client(&self, ctx: &mut Context, packet: &mut GamePacket) {}

    /// Called for each raw packet travelling from the client to the server
    /// without being decoded.
    fn process_client_encoded(&self, ctx: &mut Context, payload: &mut Vec<u8>) {}

    /// Called when the server asks the proxy to flush the client's buffer.
    fn process_flush(&self, ctx: &mut Context) {}

    /// Called when the server replaces the session's cache blob.
    fn process_cache(&self, ctx: &mut Context, cache: &mut Vec<u8>) {}

    /// Called before a transfer starts. Cancelling aborts the transfer.
    fn process_pre_transfer(&self, ctx: &mut Context, origin: &str, target: &str) {}

    /// Called after a transfer completed.
    fn process_post_transfer(&self, ctx: &mut Context, origin: &str, target: &str) {}

    /// Called when a transfer failed after the pre-transfer hook ran.
    fn process_transfer_failure(&self, ctx: &mut Context, origin: &str, target: &str) {}

    /// Called once when the session closes, with the close reason.
    fn process_disconnection(&self, ctx: &mut Context, reason: &str) {}
}

/// The processor every session starts with.
#[derive(Debug, Default)]
pub struct NopProcessor;

impl Processor for NopProcessor {}
