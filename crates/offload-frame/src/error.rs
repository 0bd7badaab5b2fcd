/// Errors raised while reading or writing frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The stream is not aligned on a frame, or is not a frame stream at all.
    #[error("invalid frame marker (expected \"OF\")")]
    InvalidMagic,

    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the stream between frames.
    #[error("stream closed")]
    Closed,

    /// The peer closed the stream part way through a frame.
    #[error("stream ended mid-frame ({got} of {expected} bytes)")]
    Truncated { expected: usize, got: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
