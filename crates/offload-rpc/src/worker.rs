//! Convenience constructors pairing an execution unit with a [`Proxy`].

use std::path::Path;

use offload_transport::{
    ProcessOptions, ProcessUnit, Program, Result, ThreadUnit, UnitOptions,
};
use tracing::debug;

use crate::dispatcher::{expose, WorkerFn};
use crate::proxy::Proxy;
use crate::uncaught::report_uncaught_panics;

/// Run `target` on a new worker thread and return a proxy to it.
///
/// Panics on the worker thread outside any call, such as in a task the
/// target spawned and never joined, fail every pending call.
pub fn create_worker<W>(target: W) -> Result<Proxy>
where
    W: WorkerFn,
{
    create_worker_with_options(target, UnitOptions::default())
}

/// [`create_worker`] with explicit thread options.
pub fn create_worker_with_options<W>(target: W, options: UnitOptions) -> Result<Proxy>
where
    W: WorkerFn,
{
    let program = Program::new(move |scope| {
        // The entry point runs on the worker thread.
        let uncaught = report_uncaught_panics(scope.outbox());
        async move {
            expose(scope, target).await;
            drop(uncaught);
        }
    });
    let unit = ThreadUnit::spawn(program, options)?;
    Ok(Proxy::new(unit))
}

/// Start a pre-built worker executable and return a proxy to it.
///
/// The executable must serve its target over stdio, as
/// [`serve_stdio`](crate::serve_stdio) does.
pub fn create_worker_from_program(
    program: impl AsRef<Path>,
    options: ProcessOptions,
) -> Result<Proxy> {
    let unit = ProcessUnit::spawn(program, options)?;
    debug!(pid = unit.id(), "process worker ready");
    Ok(Proxy::new(unit))
}
