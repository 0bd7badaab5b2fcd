//! Offload function calls to isolated workers and await their results.
//!
//! A worker runs a target function on a dedicated thread or in a separate
//! process. The caller holds a [`Proxy`]: every call becomes an envelope with
//! a fresh id, and the matching result settles the call, in whatever order
//! results come back.
//!
//! # Crate Structure
//!
//! - [`frame`]: length-prefixed framing used by process workers
//! - [`transport`]: execution units (threads, child processes)
//! - [`rpc`]: envelopes, the caller-side proxy and the callee-side dispatcher
//!
//! ```no_run
//! use offload::{create_worker, sync_fn};
//! use serde_json::{json, Value};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let worker = create_worker(sync_fn(|args: Vec<Value>| {
//!     Ok(json!(args.len()))
//! }))?;
//! let count: usize = worker.call(vec![json!("a"), json!("b")]).await?;
//! assert_eq!(count, 2);
//! # Ok(())
//! # }
//! ```

/// Re-export frame types.
pub mod frame {
    pub use offload_frame::*;
}

/// Re-export transport types.
pub mod transport {
    pub use offload_transport::*;
}

/// Re-export call protocol types.
pub mod rpc {
    pub use offload_rpc::*;
}

pub use offload_rpc::{
    async_fn, create_worker, create_worker_from_program, create_worker_with_options, expose,
    serve_stdio, sync_fn, CallError, NormalizedError, PendingCall, ProcessOptions, Proxy,
    RemoteError, UnitOptions, WorkerFn,
};
