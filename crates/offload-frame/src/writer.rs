use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use tracing::trace;

use crate::codec::{check_len, FrameConfig, FrameHeader};
use crate::error::{FrameError, Result};

/// Blocking frame writer over a pipe (a child's stdin, or our own stdout).
///
/// Every frame is written in one piece and flushed, so a reader on the other
/// end never waits on a frame that sits in our buffer.
pub struct FrameWriter<T> {
    inner: T,
    scratch: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            scratch: BytesMut::new(),
            config,
        }
    }

    /// Write `payload` as one frame on `channel`.
    pub fn send(&mut self, channel: u16, payload: &[u8]) -> Result<()> {
        check_len(payload.len(), self.config.max_payload_size)?;
        let header = FrameHeader::new(channel, payload.len()).to_bytes()?;

        self.scratch.clear();
        self.scratch.extend_from_slice(&header);
        self.scratch.extend_from_slice(payload);
        self.inner.write_all(&self.scratch).map_err(closed_or_io)?;
        self.inner.flush().map_err(closed_or_io)?;

        trace!(channel, size = payload.len(), "frame written");
        Ok(())
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

// A reader that went away shows up as a zero-length write or a broken pipe.
fn closed_or_io(err: std::io::Error) -> FrameError {
    match err.kind() {
        ErrorKind::WriteZero | ErrorKind::BrokenPipe => FrameError::Closed,
        _ => FrameError::Io(err),
    }
}
