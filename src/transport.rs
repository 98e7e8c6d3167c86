//! Establishes byte streams to downstream servers.
//!
//! The session layer is parameterised over a [`Transport`]; everything above
//! this module sees an opaque bidirectional byte stream and holds no other
//! transport-specific knowledge.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

pub mod quic;
pub mod tcp;

pub use quic::Quic;
pub use tcp::Tcp;

/// Default timeout for a single dial.
pub(crate) const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Socket buffer size applied to TCP connections.
pub(crate) const SOCKET_BUFFER_SIZE: u32 = 1024 * 1024 * 8;

/// An opaque bidirectional byte stream to a downstream server.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Stream for T {}

pub type BoxedStream = Box<dyn Stream>;

/// Establishes connections to downstream servers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connects to the specified address and returns the resulting byte
    /// stream.
    async fn dial(&self, addr: &str) -> anyhow::Result<BoxedStream>;
}
