//! Execution units for offload workers.
//!
//! An execution unit is an isolated concurrent worker that runs code and
//! exchanges JSON messages with its creator:
//! - [`ThreadUnit`] runs a [`Program`] on a dedicated thread with its own runtime
//! - [`ProcessUnit`] runs a pre-built executable speaking framed stdio
//!
//! This is the lowest layer of offload. The call protocol in `offload-rpc`
//! only sees the [`ExecutionUnit`] trait.

pub mod error;
pub mod process;
pub mod scope;
pub mod thread;
pub mod unit;

pub use error::{Result, TransportError};
pub use process::{stdio_scope, ProcessOptions, ProcessUnit};
pub use scope::{Outbox, PostMessage, WorkerScope};
pub use thread::{Program, ThreadUnit, UnitOptions};
pub use unit::{panic_message, ExecutionUnit, UnitFault, UnitListener};
