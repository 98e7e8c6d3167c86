use crate::protocol::position::{BlockPos, Vec3};
use std::{num::TryFromIntError, str::Utf8Error};
use uuid::Uuid;

/// An error while decoding packets.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("need at least {0} more bytes")]
    EndOfStream(usize),
    #[error("invalid boolean pattern {0} - expected either 0 or 1")]
    InvalidBool(u8),
    #[error("varint / varlong is too long")]
    VarIntTooLong,
    #[error("string exceeds max allowed length")]
    StringTooLong,
    #[error("byte slice exceeds max allowed length")]
    SliceTooLong,
    #[error(transparent)]
    Utf8(#[from] Utf8Error),
    #[error(transparent)]
    IntConversion(#[from] TryFromIntError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = DecodeError> = std::result::Result<T, E>;

const MAX_STRING_LENGTH: usize = i16::MAX as usize;

/// A raw decoder for a Bedrock bitstream. All fixed-width integers are
/// little-endian.
#[derive(Debug)]
pub struct Decoder<'a> {
    buffer: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Creates a decoder from the buffer it will read from.
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer }
    }

    /// Gets the remaining buffer.
    pub fn buffer(&self) -> &'a [u8] {
        self.buffer
    }

    /// Returns if there is no data left in the buffer.
    pub fn is_finished(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Consumes `n` bytes from the buffer, returning them as a slice.
    pub fn consume_slice(&mut self, n: usize) -> Result<&'a [u8]> {
        if n <= self.buffer.len() {
            let (data, buffer) = self.buffer.split_at(n);
            self.buffer = buffer;
            Ok(data)
        } else {
            Err(DecodeError::EndOfStream(n - self.buffer.len()))
        }
    }

    /// Consumes the remainder of the buffer.
    pub fn consume_rest(&mut self) -> Vec<u8> {
        let data = self.buffer.to_vec();
        self.buffer = &[];
        data
    }

    /// Consumes `N` bytes into an array.
    pub fn consume<const N: usize>(&mut self) -> Result<[u8; N]> {
        let data = self.consume_slice(N)?;
        Ok(<[u8; N]>::try_from(data).unwrap())
    }

    /// Reads an unsigned byte from the stream.
    pub fn read_u8(&mut self) -> Result<u8> {
        self.consume::<1>().map(|[x]| x)
    }

    /// Reads an unsigned short from the stream.
    pub fn read_u16(&mut self) -> Result<u16> {
        self.consume().map(u16::from_le_bytes)
    }

    /// Reads a signed short from the stream.
    pub fn read_i16(&mut self) -> Result<i16> {
        self.consume().map(i16::from_le_bytes)
    }

    /// Reads a signed int from the stream.
    pub fn read_i32(&mut self) -> Result<i32> {
        self.consume().map(i32::from_le_bytes)
    }

    /// Reads a signed long from the stream.
    pub fn read_i64(&mut self) -> Result<i64> {
        self.consume().map(i64::from_le_bytes)
    }

    /// Reads a float from the stream.
    pub fn read_f32(&mut self) -> Result<f32> {
        self.consume().map(f32::from_le_bytes)
    }

    /// Reads a boolean from the stream.
    pub fn read_bool(&mut self) -> Result<bool> {
        let x = self.read_u8()?;
        match x {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(DecodeError::InvalidBool(x)),
        }
    }

    /// Reads a variable-length unsigned int from the stream.
    pub fn read_var_u32(&mut self) -> Result<u32> {
        let mut result = 0u32;
        for i in 0..5 {
            let byte = self.read_u8()?;
            result |= u32::from(byte & 0b0111_1111).overflowing_shl(7 * i).0;
            if byte & 0b1000_0000 == 0 {
                return Ok(result);
            }
        }
        Err(DecodeError::VarIntTooLong)
    }

    /// Reads a variable-length unsigned long from the stream.
    pub fn read_var_u64(&mut self) -> Result<u64> {
        let mut result = 0u64;
        for i in 0..10 {
            let byte = self.read_u8()?;
            result |= u64::from(byte & 0b0111_1111).overflowing_shl(7 * i).0;
            if byte & 0b1000_0000 == 0 {
                return Ok(result);
            }
        }
        Err(DecodeError::VarIntTooLong)
    }

    /// Reads a zigzag-encoded variable-length int from the stream.
    pub fn read_var_i32(&mut self) -> Result<i32> {
        let x = self.read_var_u32()?;
        Ok((x >> 1) as i32 ^ -((x & 1) as i32))
    }

    /// Reads a zigzag-encoded variable-length long from the stream.
    pub fn read_var_i64(&mut self) -> Result<i64> {
        let x = self.read_var_u64()?;
        Ok((x >> 1) as i64 ^ -((x & 1) as i64))
    }

    /// Reads a varuint32-prefixed UTF-8 string from the stream.
    pub fn read_string(&mut self) -> Result<String> {
        let length = usize::try_from(self.read_var_u32()?)?;
        if length > MAX_STRING_LENGTH {
            return Err(DecodeError::StringTooLong);
        }
        let bytes = std::str::from_utf8(self.consume_slice(length)?)?;
        Ok(bytes.to_owned())
    }

    /// Reads a varuint32-prefixed byte slice from the stream.
    pub fn read_byte_slice(&mut self) -> Result<Vec<u8>> {
        let length = usize::try_from(self.read_var_u32()?)?;
        if length > crate::protocol::BUFFER_LIMIT {
            return Err(DecodeError::SliceTooLong);
        }
        Ok(self.consume_slice(length)?.to_vec())
    }

    /// Reads a UUID from its 16 raw bytes.
    pub fn read_uuid(&mut self) -> Result<Uuid> {
        Ok(Uuid::from_bytes(self.consume::<16>()?))
    }

    /// Reads a position as three floats.
    pub fn read_vec3(&mut self) -> Result<Vec3> {
        Ok(Vec3 {
            x: self.read_f32()?,
            y: self.read_f32()?,
            z: self.read_f32()?,
        })
    }

    /// Reads a block position: signed x and z, unsigned y.
    pub fn read_block_pos(&mut self) -> Result<BlockPos> {
        Ok(BlockPos {
            x: self.read_var_i32()?,
            y: self.read_var_u32()? as i32,
            z: self.read_var_i32()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Encoder;

    #[test]
    fn var_u32_roundtrip() {
        let mut buf = Vec::new();
        let mut encoder = Encoder::new(&mut buf);
        for x in [0u32, 1, 127, 128, 300, u32::MAX] {
            encoder.write_var_u32(x);
        }
        let mut decoder = Decoder::new(&buf);
        for x in [0u32, 1, 127, 128, 300, u32::MAX] {
            assert_eq!(decoder.read_var_u32().unwrap(), x);
        }
        assert!(decoder.is_finished());
    }

    #[test]
    fn zigzag_roundtrip() {
        let mut buf = Vec::new();
        let mut encoder = Encoder::new(&mut buf);
        for x in [0i64, -1, 1, -64, 63, i64::MIN, i64::MAX] {
            encoder.write_var_i64(x);
        }
        let mut decoder = Decoder::new(&buf);
        for x in [0i64, -1, 1, -64, 63, i64::MIN, i64::MAX] {
            assert_eq!(decoder.read_var_i64().unwrap(), x);
        }
    }

    #[test]
    fn small_negative_zigzag_is_compact() {
        // -1 zigzags to 1, which must fit in a single byte.
        let mut buf = Vec::new();
        Encoder::new(&mut buf).write_var_i32(-1);
        assert_eq!(buf, vec![0x01]);
    }

    #[test]
    fn string_roundtrip() {
        let mut buf = Vec::new();
        Encoder::new(&mut buf).write_string("minecraft:shield");
        assert_eq!(
            Decoder::new(&buf).read_string().unwrap(),
            "minecraft:shield"
        );
    }

    #[test]
    fn end_of_stream_reports_missing_bytes() {
        let mut decoder = Decoder::new(&[1, 2]);
        match decoder.read_i64() {
            Err(DecodeError::EndOfStream(missing)) => assert_eq!(missing, 6),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
