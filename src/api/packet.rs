//! Packets of the admin control channel.
//!
//! Each frame holds a 4-byte little-endian packet id followed by the body.
//! Strings are prefixed with their length as a little-endian u32.

use anyhow::{bail, Context as _};
use std::collections::HashMap;

pub const ID_CONNECTION_REQUEST: u32 = 1;
pub const ID_CONNECTION_RESPONSE: u32 = 2;
pub const ID_KICK: u32 = 3;
pub const ID_TRANSFER: u32 = 4;

pub const RESPONSE_SUCCESS: u8 = 0;
pub const RESPONSE_UNAUTHORIZED: u8 = 1;
pub const RESPONSE_FAIL: u8 = 2;

/// Writes `s` prefixed with its length as a little-endian u32.
pub fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend((s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

/// Reads a string prefixed with its length as a little-endian u32,
/// advancing `input` past it.
pub fn read_string(input: &mut &[u8]) -> anyhow::Result<String> {
    if input.len() < 4 {
        bail!("buffer too short for string length");
    }
    let (length, rest) = input.split_at(4);
    let length = u32::from_le_bytes(length.try_into().unwrap()) as usize;
    if rest.len() < length {
        bail!("buffer too short for string of {length} bytes");
    }
    let (data, rest) = rest.split_at(length);
    *input = rest;
    String::from_utf8(data.to_vec()).context("string is not valid UTF-8")
}

/// Sent by a client to connect and authenticate with the service. The
/// service replies with a [`ConnectionResponse`].
#[derive(Debug, Clone, Default)]
pub struct ConnectionRequest {
    pub token: String,
}

impl ConnectionRequest {
    fn encode_body(&self, buf: &mut Vec<u8>) {
        write_string(buf, &self.token);
    }

    pub fn decode_body(input: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            token: read_string(input)?,
        })
    }
}

/// The service's reply to a [`ConnectionRequest`].
#[derive(Debug, Clone, Default)]
pub struct ConnectionResponse {
    pub response: u8,
}

impl ConnectionResponse {
    fn encode_body(&self, buf: &mut Vec<u8>) {
        buf.push(self.response);
    }

    pub fn decode_body(input: &mut &[u8]) -> anyhow::Result<Self> {
        let Some((&response, rest)) = input.split_first() else {
            bail!("buffer too short for response code");
        };
        *input = rest;
        Ok(Self { response })
    }
}

/// Removes a player from the proxy, showing `reason` on the disconnection
/// screen.
#[derive(Debug, Clone, Default)]
pub struct Kick {
    pub reason: String,
    pub username: String,
}

impl Kick {
    fn encode_body(&self, buf: &mut Vec<u8>) {
        write_string(buf, &self.reason);
        write_string(buf, &self.username);
    }

    pub fn decode_body(input: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            reason: read_string(input)?,
            username: read_string(input)?,
        })
    }
}

/// Moves a player to another downstream server.
#[derive(Debug, Clone, Default)]
pub struct Transfer {
    pub addr: String,
    pub username: String,
}

impl Transfer {
    fn encode_body(&self, buf: &mut Vec<u8>) {
        write_string(buf, &self.addr);
        write_string(buf, &self.username);
    }

    pub fn decode_body(input: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            addr: read_string(input)?,
            username: read_string(input)?,
        })
    }
}

/// The packets spoken on the admin channel.
#[derive(Debug, Clone)]
pub enum Packet {
    ConnectionRequest(ConnectionRequest),
    ConnectionResponse(ConnectionResponse),
    Kick(Kick),
    Transfer(Transfer),
}

impl Packet {
    pub fn id(&self) -> u32 {
        match self {
            Self::ConnectionRequest(_) => ID_CONNECTION_REQUEST,
            Self::ConnectionResponse(_) => ID_CONNECTION_RESPONSE,
            Self::Kick(_) => ID_KICK,
            Self::Transfer(_) => ID_TRANSFER,
        }
    }

    /// Encodes the packet to its frame payload: id followed by body.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = self.id().to_le_bytes().to_vec();
        match self {
            Self::ConnectionRequest(pk) => pk.encode_body(&mut buf),
            Self::ConnectionResponse(pk) => pk.encode_body(&mut buf),
            Self::Kick(pk) => pk.encode_body(&mut buf),
            Self::Transfer(pk) => pk.encode_body(&mut buf),
        }
        buf
    }
}

type Factory = fn(&mut &[u8]) -> anyhow::Result<Packet>;

/// Maps packet ids to decode factories.
#[derive(Debug)]
pub struct Pool {
    factories: HashMap<u32, Factory>,
}

impl Pool {
    pub fn new() -> Self {
        let mut factories: HashMap<u32, Factory> = HashMap::new();
        factories.insert(ID_CONNECTION_REQUEST, |input| {
            ConnectionRequest::decode_body(input).map(Packet::ConnectionRequest)
        });
        factories.insert(ID_CONNECTION_RESPONSE, |input| {
            ConnectionResponse::decode_body(input).map(Packet::ConnectionResponse)
        });
        factories.insert(ID_KICK, |input| {
            Kick::decode_body(input).map(Packet::Kick)
        });
        factories.insert(ID_TRANSFER, |input| {
            Transfer::decode_body(input).map(Packet::Transfer)
        });
        Self { factories }
    }

    /// Decodes a whole frame payload: the leading id plus the body.
    pub fn decode(&self, payload: &[u8]) -> anyhow::Result<Packet> {
        if payload.len() < 4 {
            bail!("frame too short for a packet id");
        }
        let (id, body) = payload.split_at(4);
        let id = u32::from_le_bytes(id.try_into().unwrap());
        let Some(factory) = self.factories.get(&id) else {
            bail!("unknown packet ID: {id}");
        };
        let mut body = body;
        factory(&mut body)
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kick_roundtrip() {
        let payload = Packet::Kick(Kick {
            reason: "bye".into(),
            username: "Alice".into(),
        })
        .encode();
        match Pool::new().decode(&payload).unwrap() {
            Packet::Kick(pk) => {
                assert_eq!(pk.reason, "bye");
                assert_eq!(pk.username, "Alice");
            }
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[test]
    fn unknown_id_is_an_error() {
        let payload = 0xdead_beef_u32.to_le_bytes().to_vec();
        assert!(Pool::new().decode(&payload).is_err());
    }

    #[test]
    fn truncated_string_is_an_error() {
        let mut payload = ID_KICK.to_le_bytes().to_vec();
        payload.extend(100u32.to_le_bytes());
        payload.extend(b"short");
        assert!(Pool::new().decode(&payload).is_err());
    }
}
