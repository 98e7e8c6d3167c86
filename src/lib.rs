//! Core of a reverse proxy for Minecraft: Bedrock Edition.
//!
//! The proxy terminates the player's RakNet session (through an externally
//! supplied [`client::ClientConn`]) and multiplexes the player onto one of a
//! fleet of downstream game servers over a pluggable binary transport
//! ([`transport::Tcp`] or [`transport::Quic`]). Players can be moved between
//! downstream servers while in game, without reconnecting.
//!
//! The connection of a logged-in player looks like this:
//!
//! Bedrock client => RakNet library => [`session::Session`] => length-prefixed,
//! Snappy-compressed frames over the transport => downstream server
//!
//! # Session lifecycle
//! A [`session::Session`] is created per player. On login it asks the
//! [`server::Discovery`] for a primary server address, dials it, runs the
//! connection sequence ([`server::Conn`]) and hands the resulting game data to
//! the client to spawn the player. Three pumps then run until either side
//! disconnects: server to client, client to server, and a periodic latency
//! report.
//!
//! A transfer dials the new server, freezes the player, wipes everything the
//! previous server put on the player's screen (tracked by
//! [`session::Tracker`]) and swaps the downstream connection atomically. When
//! the current downstream dies unexpectedly, the session falls back to a
//! server supplied by [`server::Discovery::discover_fallback`].
//!
//! Separately from the game path, [`api::Service`] exposes an authenticated
//! TCP control channel through which external services can kick or transfer
//! players.

pub mod api;
pub mod client;
pub mod framing;
pub mod opts;
pub mod protocol;
pub mod proxy;
pub mod server;
pub mod session;
pub mod transport;

pub use opts::Opts;
pub use proxy::Proxy;
