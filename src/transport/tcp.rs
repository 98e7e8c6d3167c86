use crate::transport::{BoxedStream, Transport, DIAL_TIMEOUT, SOCKET_BUFFER_SIZE};
use anyhow::Context;
use async_trait::async_trait;
use std::{net::SocketAddr, time::Duration};
use tokio::{
    net::{lookup_host, TcpSocket},
    time::timeout,
};

/// Establishes connections to downstream servers over plain TCP, one
/// connection per dial.
#[derive(Debug, Default)]
pub struct Tcp;

impl Tcp {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for Tcp {
    async fn dial(&self, addr: &str) -> anyhow::Result<BoxedStream> {
        let addr: SocketAddr = lookup_host(addr)
            .await?
            .next()
            .context("no addresses resolved")?;

        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_send_buffer_size(SOCKET_BUFFER_SIZE)?;
        socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE)?;

        let stream = timeout(DIAL_TIMEOUT, socket.connect(addr))
            .await
            .context("dial timed out")??;
        stream.set_nodelay(true)?;
        stream.set_linger(Some(Duration::ZERO))?;
        Ok(Box::new(stream))
    }
}
