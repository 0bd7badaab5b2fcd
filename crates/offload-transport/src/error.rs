/// Errors that can occur while spawning or talking to an execution unit.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The host cannot provide this kind of execution unit.
    #[error("execution unit not supported: {0}")]
    Unsupported(&'static str),

    /// The execution unit could not be started.
    #[error("failed to spawn {what}: {source}")]
    Spawn {
        what: String,
        source: std::io::Error,
    },

    /// An I/O error occurred on the unit's channel.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing failed on a process unit's pipes.
    #[error("frame error: {0}")]
    Frame(#[from] offload_frame::FrameError),

    /// A message could not be encoded for the channel.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The unit stopped accepting messages on its own.
    #[error("execution unit closed")]
    Closed,

    /// The unit was disposed by its owner.
    #[error("execution unit disposed")]
    Disposed,
}

pub type Result<T> = std::result::Result<T, TransportError>;
