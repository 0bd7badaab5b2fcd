//! Callee side: runs the target function for every call envelope.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use offload_frame::{FrameConfig, FrameError};
use offload_transport::{stdio_scope, Outbox, TransportError, WorkerScope};
use serde_json::Value;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, trace, warn};

use crate::envelope::{call_id, NormalizedError, ResultEnvelope, DEFAULT_ERROR_NAME};
use crate::uncaught::{in_call, report_uncaught_panics};

/// The future a [`WorkerFn`] returns for one call.
pub type CallFuture = Pin<Box<dyn Future<Output = Result<Value, NormalizedError>> + Send>>;

/// A function that can be exposed inside a worker.
///
/// Each call receives the positional arguments of one call envelope. A
/// returned error, or a panic while the call runs, fails only that call.
pub trait WorkerFn: Send + Sync + 'static {
    fn call(&self, args: Vec<Value>) -> CallFuture;
}

/// A synchronous target function. See [`sync_fn`].
#[derive(Debug, Clone)]
pub struct SyncFn<F>(F);

/// Wrap a plain function as a [`WorkerFn`].
pub fn sync_fn<F>(function: F) -> SyncFn<F>
where
    F: Fn(Vec<Value>) -> Result<Value, NormalizedError> + Send + Sync + 'static,
{
    SyncFn(function)
}

impl<F> WorkerFn for SyncFn<F>
where
    F: Fn(Vec<Value>) -> Result<Value, NormalizedError> + Send + Sync + 'static,
{
    fn call(&self, args: Vec<Value>) -> CallFuture {
        Box::pin(std::future::ready((self.0)(args)))
    }
}

/// An asynchronous target function. See [`async_fn`].
#[derive(Debug, Clone)]
pub struct AsyncFn<F>(F);

/// Wrap an async function as a [`WorkerFn`]. Its calls may overlap.
pub fn async_fn<F, Fut>(function: F) -> AsyncFn<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, NormalizedError>> + Send + 'static,
{
    AsyncFn(function)
}

impl<F, Fut> WorkerFn for AsyncFn<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, NormalizedError>> + Send + 'static,
{
    fn call(&self, args: Vec<Value>) -> CallFuture {
        Box::pin((self.0)(args))
    }
}

/// Serve `target` over `scope` until the scope's owner goes away.
///
/// Every call envelope gets exactly one result envelope carrying its id; a
/// result too large for the channel is replaced by a `RangeError` failure.
/// Calls run as separate tasks, so asynchronous targets complete in whatever
/// order they finish. Messages that are not call envelopes are answered with
/// an id-less fault.
pub async fn expose<W>(mut scope: WorkerScope, target: W)
where
    W: WorkerFn,
{
    let target: Arc<dyn WorkerFn> = Arc::new(target);
    let outbox = scope.outbox();
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            message = scope.recv() => match message {
                Some(message) => dispatch(message, &target, &outbox, &mut in_flight),
                None => break,
            },
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                log_joined(joined);
            }
        }
    }

    while let Some(joined) = in_flight.join_next().await {
        log_joined(joined);
    }
    debug!("dispatcher stopped");
}

/// Serve `target` as a process worker over this process's stdin/stdout.
///
/// Blocks until the parent closes stdin or asks the worker to shut down.
pub fn serve_stdio<W>(target: W) -> Result<(), TransportError>
where
    W: WorkerFn,
{
    serve_stdio_with_config(target, FrameConfig::default())
}

/// [`serve_stdio`] with explicit framing limits.
pub fn serve_stdio_with_config<W>(target: W, config: FrameConfig) -> Result<(), TransportError>
where
    W: WorkerFn,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let scope = stdio_scope(config)?;
    let _uncaught = report_uncaught_panics(scope.outbox());
    debug!(pid = std::process::id(), "serving worker over stdio");
    runtime.block_on(expose(scope, target));
    Ok(())
}

fn dispatch(
    message: Value,
    target: &Arc<dyn WorkerFn>,
    outbox: &Outbox,
    in_flight: &mut JoinSet<()>,
) {
    let (id, args) = match parse_call(message) {
        Ok(call) => call,
        Err(envelope) => {
            reply(outbox, envelope);
            return;
        }
    };
    debug!(id, args = args.len(), "dispatching call");

    let target = Arc::clone(target);
    let outbox = outbox.clone();
    in_flight.spawn(async move {
        // A separate task keeps a panicking call from taking the dispatcher
        // down with it.
        let call = in_call(async move { target.call(args).await });
        let outcome = match tokio::spawn(call).await {
            Ok(outcome) => outcome,
            Err(err) => Err(call_task_failure(err)),
        };
        let envelope = match outcome {
            Ok(value) => ResultEnvelope::success(id, value),
            Err(error) => ResultEnvelope::failure(id, error),
        };
        reply(&outbox, envelope);
    });
}

fn parse_call(message: Value) -> Result<(u64, Vec<Value>), ResultEnvelope> {
    let malformed = || ResultEnvelope::fault(NormalizedError::worker_error());

    let Value::Object(mut fields) = message else {
        return Err(malformed());
    };
    let id = match fields.get("id") {
        Some(Value::Number(id)) => call_id(id),
        _ => None,
    };
    let Some(id) = id else {
        return Err(malformed());
    };

    match fields.remove("args") {
        Some(Value::Array(args)) => Ok((id, args)),
        _ => Err(ResultEnvelope::failure(
            id,
            NormalizedError::new("TypeError", "args is not iterable"),
        )),
    }
}

fn call_task_failure(err: JoinError) -> NormalizedError {
    match err.try_into_panic() {
        Ok(payload) => NormalizedError::from_panic(payload),
        Err(_) => NormalizedError::new(DEFAULT_ERROR_NAME, "call was cancelled"),
    }
}

// Panics outside a call are reported by the panic hook as they happen.
fn log_joined(joined: Result<(), JoinError>) {
    if let Err(err) = joined {
        trace!(error = %err, "reply task ended abnormally");
    }
}

/// Post `envelope`, degrading it when it cannot be delivered as is.
///
/// A call result that does not fit the channel becomes a failure of the same
/// call; if even that cannot be posted, an id-less fault goes out so the
/// caller is never left waiting.
pub(crate) fn reply(outbox: &Outbox, envelope: ResultEnvelope) {
    let err = match post(outbox, &envelope) {
        Ok(()) => return,
        Err(err) if owner_gone(&err) => {
            debug!(id = ?envelope.id, error = %err, "owner gone, reply dropped");
            return;
        }
        Err(err) => err,
    };
    warn!(id = ?envelope.id, error = %err, "reply could not be posted");

    let error = undeliverable(&err);
    if let Some(id) = envelope.id {
        if post(outbox, &ResultEnvelope::failure(id, error.clone())).is_ok() {
            return;
        }
    }
    if let Err(err) = post(outbox, &ResultEnvelope::fault(error)) {
        warn!(error = %err, "fault could not be posted");
    }
}

fn post(outbox: &Outbox, envelope: &ResultEnvelope) -> Result<(), TransportError> {
    outbox.post_message(serde_json::to_value(envelope)?)
}

fn owner_gone(err: &TransportError) -> bool {
    matches!(
        err,
        TransportError::Closed | TransportError::Disposed | TransportError::Frame(FrameError::Closed)
    )
}

fn undeliverable(err: &TransportError) -> NormalizedError {
    match err {
        TransportError::Frame(FrameError::PayloadTooLarge { size, max }) => NormalizedError::new(
            "RangeError",
            format!("result of {size} bytes exceeds max payload of {max} bytes"),
        ),
        other => NormalizedError::new(DEFAULT_ERROR_NAME, format!("result not delivered: {other}")),
    }
}
