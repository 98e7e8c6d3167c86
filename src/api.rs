//! The admin control channel: a separate, authenticated TCP service through
//! which external services kick or transfer players.
//!
//! The wire format is the same length-prefixed framing as the downstream
//! protocol, carrying little-endian `id || body` packets (see
//! [`packet`]). After a successful [`packet::ConnectionRequest`] exchange,
//! every received packet is dispatched through a handler table keyed by
//! packet id; unknown ids are logged and ignored.

pub mod authentication;
pub mod client;
pub mod packet;

pub use authentication::{Authentication, HashedSecret, Secret};
pub use client::{dial, Client};

use crate::{
    framing::{FrameReader, FrameWriter},
    session::Registry,
};
use anyhow::{bail, Context as _};
use std::{
    collections::HashMap,
    future::Future,
    net::SocketAddr,
    pin::Pin,
    sync::{Arc, OnceLock, RwLock},
    time::Duration,
};
use tokio::{
    net::{lookup_host, TcpListener, TcpSocket, TcpStream},
    select, task,
};
use tokio_util::sync::CancellationToken;

/// The future returned by a packet [`Handler`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Handles one admin packet: receives the registry and the packet body
/// (after the id).
pub type Handler = Arc<dyn Fn(Arc<Registry>, Vec<u8>) -> HandlerFuture + Send + Sync>;

/// The admin control service. Dispatches authenticated packets into the
/// session registry.
pub struct Service {
    authentication: Option<Arc<dyn Authentication>>,
    registry: Arc<Registry>,
    handlers: Arc<RwLock<HashMap<u32, Handler>>>,
    listener: OnceLock<TcpListener>,
    ctx: CancellationToken,
}

impl Service {
    /// Creates a new service with the built-in Kick and Transfer handlers
    /// installed. `authentication` of `None` accepts any token.
    pub fn new(registry: Arc<Registry>, authentication: Option<Arc<dyn Authentication>>) -> Self {
        let service = Self {
            authentication,
            registry,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            listener: OnceLock::new(),
            ctx: CancellationToken::new(),
        };
        service.register(
            packet::ID_KICK,
            Arc::new(|registry: Arc<Registry>, body: Vec<u8>| -> HandlerFuture {
                Box::pin(async move {
                    let pk = packet::Kick::decode_body(&mut body.as_slice())?;
                    if let Some(session) = registry.get_session_by_username(&pk.username) {
                        let _ = session.disconnect(&pk.reason).await;
                    }
                    Ok(())
                })
            }),
        );
        service.register(
            packet::ID_TRANSFER,
            Arc::new(|registry: Arc<Registry>, body: Vec<u8>| -> HandlerFuture {
                Box::pin(async move {
                    let pk = packet::Transfer::decode_body(&mut body.as_slice())?;
                    if let Some(session) = registry.get_session_by_username(&pk.username) {
                        session.transfer(&pk.addr).await?;
                    }
                    Ok(())
                })
            }),
        );
        service
    }

    /// Registers a handler for the given packet id, replacing any previous
    /// one. External services can add their own packets this way.
    pub fn register(&self, id: u32, handler: Handler) {
        self.handlers.write().unwrap().insert(id, handler);
    }

    /// Binds the service's TCP listener.
    pub async fn listen(&self, addr: &str) -> anyhow::Result<()> {
        let addr: SocketAddr = lookup_host(addr)
            .await?
            .next()
            .context("no addresses resolved")?;
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        // Accepted sockets inherit the listener's buffer sizes.
        socket.set_send_buffer_size(crate::transport::SOCKET_BUFFER_SIZE)?;
        socket.set_recv_buffer_size(crate::transport::SOCKET_BUFFER_SIZE)?;
        socket.bind(addr)?;

        let listener = socket.listen(1024)?;
        tracing::info!(addr = %listener.local_addr()?, "api service listening");
        self.listener
            .set(listener)
            .map_err(|_| anyhow::anyhow!("already listening"))?;
        Ok(())
    }

    /// The bound address, once [`Service::listen`] succeeded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.get()?.local_addr().ok()
    }

    /// Accepts one admin client and serves it on a background task. Call in
    /// a loop.
    pub async fn accept(&self) -> anyhow::Result<()> {
        let listener = self.listener.get().context("not listening")?;
        let (stream, remote) = select! {
            _ = self.ctx.cancelled() => bail!("service closed"),
            accepted = listener.accept() => accepted?,
        };
        stream.set_nodelay(true)?;
        stream.set_linger(Some(Duration::ZERO))?;

        let registry = Arc::clone(&self.registry);
        let handlers = Arc::clone(&self.handlers);
        let authentication = self.authentication.clone();
        let ctx = self.ctx.child_token();
        task::spawn(async move {
            if let Err(err) = handle_client(stream, remote, registry, handlers, authentication, ctx).await
            {
                tracing::debug!(%remote, "api connection ended: {err:#}");
            }
        });
        Ok(())
    }

    /// Stops accepting clients and ends the running ones.
    pub fn close(&self) {
        self.ctx.cancel();
    }
}

async fn handle_client(
    stream: TcpStream,
    remote: SocketAddr,
    registry: Arc<Registry>,
    handlers: Arc<RwLock<HashMap<u32, Handler>>>,
    authentication: Option<Arc<dyn Authentication>>,
    ctx: CancellationToken,
) -> anyhow::Result<()> {
    let (reader, writer) = stream.into_split();
    let mut reader = FrameReader::new(reader);
    let mut writer = FrameWriter::new(writer);
    let pool = packet::Pool::new();

    let first = reader
        .read_frame()
        .await
        .context("failed to read connection request")?;
    let request = match pool.decode(&first) {
        Ok(packet::Packet::ConnectionRequest(request)) => request,
        _ => {
            respond(&mut writer, packet::RESPONSE_FAIL).await?;
            bail!("expected connection request");
        }
    };

    if let Some(authentication) = &authentication {
        if !authentication.authenticate(&request.token) {
            respond(&mut writer, packet::RESPONSE_UNAUTHORIZED).await?;
            tracing::error!(%remote, "closed unauthenticated connection");
            bail!("unauthorized");
        }
    }
    respond(&mut writer, packet::RESPONSE_SUCCESS).await?;

    loop {
        let payload = select! {
            _ = ctx.cancelled() => return Ok(()),
            frame = reader.read_frame() => frame?,
        };
        if payload.len() < 4 {
            tracing::error!(%remote, "received a frame too short for a packet id");
            continue;
        }
        let id = u32::from_le_bytes(payload[..4].try_into().unwrap());

        let handler = handlers.read().unwrap().get(&id).cloned();
        match handler {
            Some(handler) => {
                if let Err(err) = handler(Arc::clone(&registry), payload[4..].to_vec()).await {
                    tracing::error!(%remote, "failed to handle packet {id}: {err:#}");
                }
            }
            None => tracing::error!(%remote, "unknown packet ID: {id}"),
        }
    }
}

async fn respond<W>(writer: &mut FrameWriter<W>, response: u8) -> anyhow::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    writer
        .write_frame(
            &packet::Packet::ConnectionResponse(packet::ConnectionResponse { response }).encode(),
        )
        .await
}
