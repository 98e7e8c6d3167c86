use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The configuration options of the proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Opts {
    /// The address to listen on.
    pub addr: String,
    /// Whether accepted sessions log in automatically.
    pub auto_login: bool,
    /// Client packet identifiers that need to be decoded by the proxy; all
    /// other client packets are forwarded without decoding.
    pub client_decode: HashSet<u32>,
    /// The interval at which the latency of the connection is reported to
    /// the downstream server, in milliseconds. Lower intervals provide more
    /// accurate latency but use more bandwidth.
    pub latency_interval: u64,
    /// The message displayed to clients when the proxy shuts down.
    pub shutdown_message: String,
    /// Whether the proxy should speak the client's protocol version to
    /// downstream servers. When disabled, the proxy always uses the latest
    /// protocol version and translates inbound packets.
    pub sync_protocol: bool,
    /// The authentication token sent to downstream servers in every
    /// connection request.
    pub token: String,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            addr: ":19132".into(),
            auto_login: true,
            client_decode: HashSet::new(),
            latency_interval: 3000,
            shutdown_message: "Proxy closed.".into(),
            sync_protocol: false,
            token: String::new(),
        }
    }
}
