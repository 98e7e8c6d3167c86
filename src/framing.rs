//! Length-prefixed packet framing over an arbitrary byte stream.
//!
//! Every frame is a 4-byte big-endian length followed by that many payload
//! bytes. The reader reassembles frames from however many reads the stream
//! needs; the writer emits the prefix and payload as a single write so that
//! frames from concurrent writers (serialised by a lock around the writer)
//! never interleave.

use anyhow::bail;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on the bytes pulled from the stream in one read. Frames larger
/// than this are reassembled across multiple reads.
const READ_CHUNK_SIZE: usize = 1024 * 64;

/// Reads length-prefixed frames from a byte stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    stream: R,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(stream: R) -> Self {
        Self { stream }
    }

    /// Reads exactly one frame, returning its payload in a fresh buffer.
    /// Fails with the underlying I/O error, or if the stream ends inside a
    /// frame.
    pub async fn read_frame(&mut self) -> anyhow::Result<Vec<u8>> {
        let mut prefix = [0u8; 4];
        self.stream.read_exact(&mut prefix).await?;

        let length = u32::from_be_bytes(prefix) as usize;
        let mut payload = vec![0u8; length];
        let mut filled = 0;
        while filled < length {
            let upper = usize::min(filled + READ_CHUNK_SIZE, length);
            let n = self.stream.read(&mut payload[filled..upper]).await?;
            if n == 0 {
                bail!("stream closed mid-frame ({filled} of {length} bytes)");
            }
            filled += n;
        }
        Ok(payload)
    }
}

/// Writes length-prefixed frames to a byte stream.
///
/// The prefix and payload are copied into one scratch buffer and written with
/// a single `write_all`, so callers sharing a writer behind a lock get whole,
/// non-interleaved frames.
#[derive(Debug)]
pub struct FrameWriter<W> {
    stream: W,
    scratch: Vec<u8>,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(stream: W) -> Self {
        Self {
            stream,
            scratch: Vec::new(),
        }
    }

    /// Writes one frame containing `payload`.
    pub async fn write_frame(&mut self, payload: &[u8]) -> anyhow::Result<()> {
        let length = u32::try_from(payload.len())?;
        self.scratch.clear();
        self.scratch.extend_from_slice(&length.to_be_bytes());
        self.scratch.extend_from_slice(payload);
        self.stream.write_all(&self.scratch).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::task;

    #[tokio::test]
    async fn roundtrip_preserves_payload_sequence() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server);

        let payloads: Vec<Vec<u8>> = vec![
            vec![],
            vec![0x42],
            (0..255).collect(),
            vec![7; 1024],
        ];

        for payload in &payloads {
            writer.write_frame(payload).await.unwrap();
        }
        for payload in &payloads {
            assert_eq!(&reader.read_frame().await.unwrap(), payload);
        }
    }

    #[tokio::test]
    async fn reassembles_frames_larger_than_read_chunk() {
        // The duplex buffer is far smaller than the frame, forcing both sides
        // to work in pieces.
        let (client, server) = tokio::io::duplex(4096);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server);

        let payload: Vec<u8> = (0..READ_CHUNK_SIZE * 3 + 17).map(|i| i as u8).collect();
        let expected = payload.clone();
        let write = task::spawn(async move {
            writer.write_frame(&payload).await.unwrap();
        });

        assert_eq!(reader.read_frame().await.unwrap(), expected);
        write.await.unwrap();
    }

    #[tokio::test]
    async fn errors_when_stream_ends_mid_frame() {
        let (client, server) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(server);

        {
            let mut stream = client;
            stream.write_all(&100u32.to_be_bytes()).await.unwrap();
            stream.write_all(&[1, 2, 3]).await.unwrap();
            // `stream` drops here, ending the duplex.
        }

        assert!(reader.read_frame().await.is_err());
    }
}
