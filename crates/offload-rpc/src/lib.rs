//! Call-and-await proxy and dispatcher for offloaded worker functions.
//!
//! A [`Proxy`] multiplexes any number of concurrent calls over one execution
//! unit by tagging each [`CallEnvelope`] with a fresh id and matching the
//! [`ResultEnvelope`] that comes back. Inside the unit, [`expose`] runs the
//! target function once per envelope and normalizes every failure into a
//! [`NormalizedError`] before it crosses the channel.
//!
//! ```no_run
//! use offload_rpc::{create_worker, sync_fn};
//! use serde_json::{json, Value};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let worker = create_worker(sync_fn(|args: Vec<Value>| {
//!     Ok(json!(args.iter().filter_map(Value::as_i64).sum::<i64>()))
//! }))?;
//! let total: i64 = worker.call(vec![json!(1), json!(2), json!(3)]).await?;
//! assert_eq!(total, 6);
//! worker.terminate();
//! # Ok(())
//! # }
//! ```

pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod proxy;
pub mod uncaught;
pub mod worker;

pub use dispatcher::{
    async_fn, expose, serve_stdio, serve_stdio_with_config, sync_fn, AsyncFn, CallFuture, SyncFn,
    WorkerFn,
};
pub use envelope::{CallEnvelope, Inbound, NormalizedError, ResultEnvelope};
pub use error::{CallError, RemoteError, Result};
pub use offload_transport::{ProcessOptions, TransportError, UnitOptions};
pub use proxy::{PendingCall, Proxy};
pub use uncaught::{report_uncaught_panics, UncaughtGuard};
pub use worker::{create_worker, create_worker_from_program, create_worker_with_options};
