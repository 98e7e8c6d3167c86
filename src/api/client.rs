use crate::{
    api::packet::{self, ConnectionRequest, Packet, Pool},
    framing::{FrameReader, FrameWriter},
};
use anyhow::bail;
use tokio::{
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::Mutex,
};

/// An outbound connection to an admin control service, used by external
/// services that drive the proxy.
#[derive(Debug)]
pub struct Client {
    reader: Mutex<FrameReader<OwnedReadHalf>>,
    writer: Mutex<FrameWriter<OwnedWriteHalf>>,
    pool: Pool,
}

impl Client {
    fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: Mutex::new(FrameReader::new(reader)),
            writer: Mutex::new(FrameWriter::new(writer)),
            pool: Pool::new(),
        }
    }

    /// Reads and decodes the next packet from the connection.
    pub async fn read_packet(&self) -> anyhow::Result<Packet> {
        let payload = self.reader.lock().await.read_frame().await?;
        self.pool.decode(&payload)
    }

    /// Encodes and writes the provided packet to the connection.
    pub async fn write_packet(&self, packet: &Packet) -> anyhow::Result<()> {
        self.writer.lock().await.write_frame(&packet.encode()).await
    }
}

/// Establishes a connection to the admin control service at `addr`,
/// authenticating with `token`. Fails if the service rejects the token.
pub async fn dial(addr: &str, token: &str) -> anyhow::Result<Client> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let client = Client::new(stream);

    client
        .write_packet(&Packet::ConnectionRequest(ConnectionRequest {
            token: token.to_string(),
        }))
        .await?;

    match client.read_packet().await? {
        Packet::ConnectionResponse(response) => match response.response {
            packet::RESPONSE_SUCCESS => Ok(client),
            packet::RESPONSE_UNAUTHORIZED => bail!("connection unauthorized"),
            packet::RESPONSE_FAIL => bail!("connection failed"),
            code => bail!("received an unknown response code {code}"),
        },
        other => bail!("expected connection response, got {}", other.id()),
    }
}
