//! QUIC transport with per-address connection reuse.
//!
//! A single QUIC connection is kept per destination address; every dial
//! opens a fresh bidirectional stream on it, which avoids a full handshake
//! per session and reduces connection overhead. When the last stream of a
//! connection ends, the connection is closed and evicted from the table.

use crate::transport::{BoxedStream, Transport, DIAL_TIMEOUT};
use anyhow::Context as _;
use async_trait::async_trait;
use quinn::{ClientConfig, Connection, Endpoint, IdleTimeout, RecvStream, SendStream, VarInt};
use std::{
    collections::HashMap,
    net::SocketAddr,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    task::{Context, Poll},
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::lookup_host,
    task,
    time::timeout,
};

const ALPN: &[u8] = b"spectrum";
const MAX_IDLE_TIMEOUT: Duration = Duration::from_secs(10);
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(5);
const RECEIVE_WINDOW: u32 = 1024 * 1024 * 10;
const INITIAL_PACKET_SIZE: u16 = 1350;

/// Establishes connections to downstream servers over QUIC, maintaining a
/// single connection per server and a stream per dial.
pub struct Quic {
    endpoint: Endpoint,
    config: ClientConfig,
    connections: Arc<Mutex<HashMap<String, Arc<Pooled>>>>,
}

impl Quic {
    /// Creates a new QUIC transport. Must be called within a tokio runtime.
    pub fn new() -> anyhow::Result<Self> {
        let endpoint = Endpoint::client(SocketAddr::from(([0, 0, 0, 0], 0)))?;
        Ok(Self {
            endpoint,
            config: client_config()?,
            connections: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn get(&self, addr: &str) -> Option<Arc<Pooled>> {
        self.connections.lock().unwrap().get(addr).cloned()
    }

    fn remove(&self, addr: &str, stale: &Arc<Pooled>) {
        let mut connections = self.connections.lock().unwrap();
        if let Some(current) = connections.get(addr) {
            if Arc::ptr_eq(current, stale) {
                connections.remove(addr);
            }
        }
    }

    async fn open_connection(&self, addr: &str) -> anyhow::Result<Arc<Pooled>> {
        let socket_addr: SocketAddr = lookup_host(addr)
            .await?
            .next()
            .context("no addresses resolved")?;
        let host = addr
            .rsplit_once(':')
            .map_or(addr, |(host, _)| host)
            .trim_start_matches('[')
            .trim_end_matches(']');

        let connecting = self
            .endpoint
            .connect_with(self.config.clone(), socket_addr, host)?;
        let connection = timeout(DIAL_TIMEOUT, connecting)
            .await
            .context("dial timed out")??;

        let pooled = Arc::new(Pooled {
            connection,
            streams: StreamCount::default(),
        });
        self.connections
            .lock()
            .unwrap()
            .insert(addr.to_string(), Arc::clone(&pooled));

        tracing::debug!(addr, "established connection");

        // One supervisor per connection: evict the table entry once the
        // connection ends, whatever the reason.
        let connections = Arc::clone(&self.connections);
        let supervised = Arc::clone(&pooled);
        let addr = addr.to_string();
        task::spawn(async move {
            let reason = supervised.connection.closed().await;
            supervised.streams.close();
            let mut connections = connections.lock().unwrap();
            if let Some(current) = connections.get(&addr) {
                if Arc::ptr_eq(current, &supervised) {
                    connections.remove(&addr);
                }
            }
            drop(connections);
            tracing::debug!(%addr, %reason, "closed connection");
        });
        Ok(pooled)
    }
}

#[async_trait]
impl Transport for Quic {
    async fn dial(&self, addr: &str) -> anyhow::Result<BoxedStream> {
        if let Some(pooled) = self.get(addr) {
            match Arc::clone(&pooled).open_stream().await {
                Ok(stream) => return Ok(Box::new(stream)),
                // The pooled connection went away under us; evict it and
                // dial a fresh one below.
                Err(err) => {
                    self.remove(addr, &pooled);
                    tracing::debug!(addr, "discarded stale connection: {err:#}");
                }
            }
        }

        let pooled = self.open_connection(addr).await?;
        let stream = pooled.open_stream().await?;
        Ok(Box::new(stream))
    }
}

/// One reused connection plus the count of streams alive on it.
struct Pooled {
    connection: Connection,
    streams: StreamCount,
}

impl Pooled {
    async fn open_stream(self: Arc<Self>) -> anyhow::Result<PooledStream> {
        if !self.streams.try_acquire() {
            anyhow::bail!("connection closed");
        }
        let (send, recv) = match self.connection.open_bi().await {
            Ok(halves) => halves,
            Err(err) => {
                if self.streams.release() {
                    self.connection.close(VarInt::from_u32(0), b"no open streams");
                }
                return Err(err.into());
            }
        };
        Ok(PooledStream {
            recv,
            send,
            _guard: StreamGuard(self),
        })
    }
}

/// Tracks how many streams are alive on a pooled connection, and whether the
/// connection has been retired.
#[derive(Default)]
struct StreamCount {
    active: AtomicUsize,
    closed: AtomicBool,
}

impl StreamCount {
    /// Registers a new stream. Fails once the connection is retired.
    fn try_acquire(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        self.active.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Unregisters a stream. Returns true when this was the last stream, at
    /// which point the caller closes the connection.
    fn release(&self) -> bool {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.closed.store(true, Ordering::SeqCst);
            return true;
        }
        false
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Decrements the owning connection's stream count when the stream ends.
struct StreamGuard(Arc<Pooled>);

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if self.0.streams.release() {
            self.0
                .connection
                .close(VarInt::from_u32(0), b"no open streams");
        }
    }
}

/// The two halves of a pooled bidirectional stream, presented as the single
/// byte stream the rest of the proxy expects: reads come from the receive
/// half, writes go to the send half, and dropping the stream releases its
/// slot on the owning connection.
#[pin_project::pin_project]
struct PooledStream {
    #[pin]
    recv: RecvStream,
    #[pin]
    send: SendStream,
    _guard: StreamGuard,
}

impl AsyncRead for PooledStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        self.project().recv.poll_read(cx, buf)
    }
}

impl AsyncWrite for PooledStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.project().send.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.project().send.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.project().send.poll_shutdown(cx)
    }
}

fn client_config() -> anyhow::Result<ClientConfig> {
    let mut crypto = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
        .with_no_client_auth();
    crypto.alpn_protocols = vec![ALPN.to_vec()];

    let mut transport = quinn::TransportConfig::default();
    transport
        .max_idle_timeout(Some(IdleTimeout::try_from(MAX_IDLE_TIMEOUT)?))
        .keep_alive_interval(Some(KEEP_ALIVE_INTERVAL))
        .stream_receive_window(VarInt::from_u32(RECEIVE_WINDOW))
        .receive_window(VarInt::from_u32(RECEIVE_WINDOW))
        .initial_mtu(INITIAL_PACKET_SIZE);

    let mut config = ClientConfig::new(Arc::new(crypto));
    config.transport_config(Arc::new(transport));
    Ok(config)
}

/// Accepts any server certificate. Trust between the proxy and its
/// downstream servers is network-level, not TLS-level.
struct SkipServerVerification;

impl rustls::client::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}
