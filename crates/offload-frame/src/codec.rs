use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Header length: magic (2) + payload length (4) + channel (2).
pub const HEADER_SIZE: usize = 8;

/// Stream marker at the start of every frame.
pub const MAGIC: [u8; 2] = *b"OF";

/// Largest payload accepted unless configured otherwise: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// The fixed-size prefix of a frame.
///
/// ```text
/// +-----------+-------------------+--------------+-----------------+
/// | "OF" (2B) | payload len (4B)  | channel (2B) | payload         |
/// |           | little endian     | little endian| (len bytes)     |
/// +-----------+-------------------+--------------+-----------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub channel: u16,
    pub len: usize,
}

impl FrameHeader {
    pub fn new(channel: u16, len: usize) -> Self {
        Self { channel, len }
    }

    /// Parse a header, rejecting a bad marker or a length above `max_payload`.
    pub fn parse(bytes: &[u8; HEADER_SIZE], max_payload: usize) -> Result<Self> {
        let [m0, m1, l0, l1, l2, l3, c0, c1] = *bytes;
        if [m0, m1] != MAGIC {
            return Err(FrameError::InvalidMagic);
        }
        let len = u32::from_le_bytes([l0, l1, l2, l3]) as usize;
        check_len(len, max_payload)?;
        Ok(Self {
            channel: u16::from_le_bytes([c0, c1]),
            len,
        })
    }

    pub fn to_bytes(self) -> Result<[u8; HEADER_SIZE]> {
        let len = u32::try_from(self.len).map_err(|_| FrameError::PayloadTooLarge {
            size: self.len,
            max: u32::MAX as usize,
        })?;
        let mut out = [0u8; HEADER_SIZE];
        out[..2].copy_from_slice(&MAGIC);
        out[2..6].copy_from_slice(&len.to_le_bytes());
        out[6..].copy_from_slice(&self.channel.to_le_bytes());
        Ok(out)
    }
}

/// One message on one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub channel: u16,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(channel: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }

    pub fn header(&self) -> FrameHeader {
        FrameHeader::new(self.channel, self.payload.len())
    }

    /// Append the wire form of this frame to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        let header = self.header().to_bytes()?;
        dst.reserve(HEADER_SIZE + self.payload.len());
        dst.put_slice(&header);
        dst.put_slice(&self.payload);
        Ok(())
    }
}

/// Limits applied to frames in both directions.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

pub(crate) fn check_len(len: usize, max_payload: usize) -> Result<()> {
    if len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: max_payload,
        });
    }
    Ok(())
}
