//! Control packets of the proxy-to-server protocol.
//!
//! These share the game packets' wire form (a header followed by the body)
//! but use identifiers above the vanilla range, so they never collide with
//! game packets.

use crate::protocol::{decoder, Decoder, Encoder, Packet};

pub const ID_CONNECTION_REQUEST: u32 = 200;
pub const ID_CONNECTION_RESPONSE: u32 = 201;
pub const ID_LATENCY: u32 = 202;
pub const ID_TRANSFER: u32 = 203;
pub const ID_FLUSH: u32 = 204;
pub const ID_UPDATE_CACHE: u32 = 205;

/// The initial packet sent by the proxy to the server. The server responds
/// with a [`ConnectionResponse`].
#[derive(Debug, Clone, Default)]
pub struct ConnectionRequest {
    /// The address of the player.
    pub addr: String,
    /// The token the proxy authenticates with.
    pub token: String,
    /// The player's raw client data blob.
    pub client_data: Vec<u8>,
    /// The player's raw identity data blob.
    pub identity_data: Vec<u8>,
    /// The protocol version identifier of the player.
    pub protocol_id: i32,
    /// Optional data supplied by a previous downstream server, forwarded so
    /// servers can share session state without re-fetching it.
    pub cache: Vec<u8>,
}

impl ConnectionRequest {
    pub fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            addr: decoder.read_string()?,
            token: decoder.read_string()?,
            client_data: decoder.read_byte_slice()?,
            identity_data: decoder.read_byte_slice()?,
            protocol_id: decoder.read_i32()?,
            cache: decoder.read_byte_slice()?,
        })
    }
}

impl Packet for ConnectionRequest {
    fn id(&self) -> u32 {
        ID_CONNECTION_REQUEST
    }

    fn encode_body(&self, encoder: &mut Encoder) {
        encoder.write_string(&self.addr);
        encoder.write_string(&self.token);
        encoder.write_byte_slice(&self.client_data);
        encoder.write_byte_slice(&self.identity_data);
        encoder.write_i32(self.protocol_id);
        encoder.write_byte_slice(&self.cache);
    }
}

/// Sent by the server in response to a [`ConnectionRequest`]. Both
/// identifiers remain unchanged throughout the player's session, ensuring
/// consistency across all servers the player transfers to.
#[derive(Debug, Clone, Default)]
pub struct ConnectionResponse {
    pub runtime_id: u64,
    pub unique_id: i64,
}

impl ConnectionResponse {
    pub fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            runtime_id: decoder.read_var_u64()?,
            unique_id: decoder.read_var_i64()?,
        })
    }
}

impl Packet for ConnectionResponse {
    fn id(&self) -> u32 {
        ID_CONNECTION_RESPONSE
    }

    fn encode_body(&self, encoder: &mut Encoder) {
        encoder.write_var_u64(self.runtime_id);
        encoder.write_var_i64(self.unique_id);
    }
}

/// Used for latency measurement between a client connected to the proxy and
/// the server: the proxy periodically sends its current timestamp and the
/// client's ping, and the server echoes back the total latency it measured.
#[derive(Debug, Clone, Default)]
pub struct Latency {
    /// The measured latency in milliseconds.
    pub latency: i64,
    /// The timestamp (in milliseconds) when the measurement was sent.
    pub timestamp: i64,
}

impl Latency {
    pub fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            latency: decoder.read_i64()?,
            timestamp: decoder.read_i64()?,
        })
    }
}

impl Packet for Latency {
    fn id(&self) -> u32 {
        ID_LATENCY
    }

    fn encode_body(&self, encoder: &mut Encoder) {
        encoder.write_i64(self.latency);
        encoder.write_i64(self.timestamp);
    }
}

/// Sent by the server to move the session to another server.
#[derive(Debug, Clone, Default)]
pub struct Transfer {
    /// The address of the new server.
    pub addr: String,
}

impl Transfer {
    pub fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            addr: decoder.read_string()?,
        })
    }
}

impl Packet for Transfer {
    fn id(&self) -> u32 {
        ID_TRANSFER
    }

    fn encode_body(&self, encoder: &mut Encoder) {
        encoder.write_string(&self.addr);
    }
}

/// Signals the proxy to flush the client's packet buffer. Servers with their
/// own batching send this at the end of a batch so the proxy does not add a
/// second batching delay on top.
#[derive(Debug, Clone, Default)]
pub struct Flush;

impl Flush {
    pub fn decode(_decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self)
    }
}

impl Packet for Flush {
    fn id(&self) -> u32 {
        ID_FLUSH
    }

    fn encode_body(&self, _encoder: &mut Encoder) {}
}

/// Sent by the server to replace the session's cache blob, which is
/// forwarded to the next server in the [`ConnectionRequest`] on transfer.
#[derive(Debug, Clone, Default)]
pub struct UpdateCache {
    pub cache: Vec<u8>,
}

impl UpdateCache {
    pub fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            cache: decoder.read_byte_slice()?,
        })
    }
}

impl Packet for UpdateCache {
    fn id(&self) -> u32 {
        ID_UPDATE_CACHE
    }

    fn encode_body(&self, encoder: &mut Encoder) {
        encoder.write_byte_slice(&self.cache);
    }
}
