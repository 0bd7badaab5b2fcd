//! Length-prefixed framing for process workers.
//!
//! A process worker talks to its parent over stdin/stdout. Every message is
//! framed with:
//! - A 2-byte magic number ("OF") for stream synchronization
//! - A 4-byte little-endian payload length
//! - A 2-byte little-endian channel ID
//!
//! Readers and writers are blocking and deal in whole frames only.

pub mod channel;
pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use channel::{channel_name, CONTROL, ENVELOPE};
pub use codec::{Frame, FrameConfig, FrameHeader, DEFAULT_MAX_PAYLOAD, HEADER_SIZE, MAGIC};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
