use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use tracing::trace;

use crate::codec::{Frame, FrameConfig, FrameHeader, HEADER_SIZE};
use crate::error::{FrameError, Result};

/// Blocking frame reader over a pipe (a child's stdout, or our own stdin).
pub struct FrameReader<T> {
    inner: T,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Block until the next whole frame arrives.
    ///
    /// End of stream on a frame boundary is [`FrameError::Closed`]; anywhere
    /// else it is [`FrameError::Truncated`].
    pub fn read_frame(&mut self) -> Result<Frame> {
        let mut header = [0u8; HEADER_SIZE];
        match fill(&mut self.inner, &mut header)? {
            0 => return Err(FrameError::Closed),
            HEADER_SIZE => {}
            got => {
                return Err(FrameError::Truncated {
                    expected: HEADER_SIZE,
                    got,
                })
            }
        }
        let header = FrameHeader::parse(&header, self.config.max_payload_size)?;

        let mut payload = BytesMut::zeroed(header.len);
        let got = fill(&mut self.inner, &mut payload)?;
        if got < header.len {
            return Err(FrameError::Truncated {
                expected: header.len,
                got,
            });
        }

        trace!(channel = header.channel, size = header.len, "frame read");
        Ok(Frame {
            channel: header.channel,
            payload: payload.freeze(),
        })
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

/// Read until `buf` is full or the stream ends; returns the bytes read.
fn fill(src: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::channel::{CONTROL, ENVELOPE};

    fn frame(channel: u16, payload: &[u8]) -> Frame {
        Frame::new(channel, payload.to_vec())
    }

    fn wire(frames: &[Frame]) -> Vec<u8> {
        let mut out = BytesMut::new();
        for frame in frames {
            frame.encode(&mut out).unwrap();
        }
        out.to_vec()
    }

    #[test]
    fn reads_frames_then_reports_close() {
        let bytes = wire(&[
            frame(ENVELOPE, br#"{"id":1,"args":[]}"#),
            frame(CONTROL, br#"{"type":"shutdown"}"#),
        ]);
        let mut reader = FrameReader::new(Cursor::new(bytes));

        let first = reader.read_frame().unwrap();
        assert_eq!(first.channel, ENVELOPE);
        assert_eq!(first.payload.as_ref(), br#"{"id":1,"args":[]}"#);
        assert_eq!(reader.read_frame().unwrap().channel, CONTROL);
        assert!(matches!(reader.read_frame(), Err(FrameError::Closed)));
    }

    #[test]
    fn tolerates_short_and_interrupted_reads() {
        let mut reader = FrameReader::new(Trickle {
            bytes: wire(&[frame(ENVELOPE, b"slow")]),
            pos: 0,
            interrupt_next: true,
        });

        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.payload.as_ref(), b"slow");
    }

    #[test]
    fn large_payloads_arrive_whole() {
        let payload = vec![b'x'; 256 * 1024];
        let mut reader = FrameReader::new(Cursor::new(wire(&[frame(ENVELOPE, &payload)])));

        assert_eq!(reader.read_frame().unwrap().payload.len(), payload.len());
    }

    #[test]
    fn cut_off_header_is_truncated() {
        let mut bytes = wire(&[frame(ENVELOPE, b"abc")]);
        bytes.truncate(5);
        let mut reader = FrameReader::new(Cursor::new(bytes));

        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::Truncated {
                expected: HEADER_SIZE,
                got: 5
            })
        ));
    }

    #[test]
    fn cut_off_payload_is_truncated() {
        let mut bytes = wire(&[frame(ENVELOPE, b"abcdef")]);
        bytes.truncate(HEADER_SIZE + 2);
        let mut reader = FrameReader::new(Cursor::new(bytes));

        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::Truncated { expected: 6, got: 2 })
        ));
    }

    #[test]
    fn enforces_configured_limit() {
        let config = FrameConfig {
            max_payload_size: 4,
        };
        let mut reader =
            FrameReader::with_config(Cursor::new(wire(&[frame(ENVELOPE, b"too long")])), config);

        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::PayloadTooLarge { size: 8, max: 4 })
        ));
    }

    #[test]
    fn non_frame_output_is_invalid_magic() {
        let mut reader = FrameReader::new(Cursor::new(b"offload 0.1.0\n".to_vec()));
        assert!(matches!(reader.read_frame(), Err(FrameError::InvalidMagic)));
    }

    /// Yields one byte per read, with a single `Interrupted` up front.
    struct Trickle {
        bytes: Vec<u8>,
        pos: usize,
        interrupt_next: bool,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if std::mem::take(&mut self.interrupt_next) {
                return Err(ErrorKind::Interrupted.into());
            }
            let Some(byte) = self.bytes.get(self.pos) else {
                return Ok(0);
            };
            buf[0] = *byte;
            self.pos += 1;
            Ok(1)
        }
    }
}
