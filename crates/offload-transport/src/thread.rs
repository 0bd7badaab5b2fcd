use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::scope::{Outbox, PostMessage, WorkerScope};
use crate::unit::{panic_message, ExecutionUnit, ListenerSlot, UnitFault, UnitListener};

const DEFAULT_THREAD_NAME: &str = "offload-worker";

type ProgramFuture = Pin<Box<dyn Future<Output = ()>>>;

/// The code a [`ThreadUnit`] runs.
///
/// The entry point is moved onto the worker thread and polled there on a
/// single-threaded runtime, so the future it returns does not need to be `Send`.
pub struct Program {
    entry: Box<dyn FnOnce(WorkerScope) -> ProgramFuture + Send>,
}

impl Program {
    pub fn new<F, Fut>(entry: F) -> Self
    where
        F: FnOnce(WorkerScope) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        Self {
            entry: Box::new(move |scope| Box::pin(entry(scope))),
        }
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program").finish_non_exhaustive()
    }
}

/// Options for spawning a [`ThreadUnit`].
#[derive(Debug, Clone, Default)]
pub struct UnitOptions {
    /// OS thread name. Default: `offload-worker`.
    pub name: Option<String>,
    /// Stack size in bytes. Default: the platform default for spawned threads.
    pub stack_size: Option<usize>,
}

/// An execution unit backed by a dedicated OS thread.
///
/// Messages posted by the program are delivered to the listener on the
/// worker thread itself, in the order they were posted.
pub struct ThreadUnit {
    name: String,
    inbox: Mutex<Option<mpsc::UnboundedSender<Value>>>,
    slot: Arc<ListenerSlot>,
    cancel: CancellationToken,
}

impl ThreadUnit {
    /// Start `program` on a new thread.
    pub fn spawn(program: Program, options: UnitOptions) -> Result<Self> {
        #[cfg(target_family = "wasm")]
        {
            let _ = (program, options);
            return Err(TransportError::Unsupported(
                "thread units require OS threads",
            ));
        }

        #[cfg(not(target_family = "wasm"))]
        {
            let name = options
                .name
                .unwrap_or_else(|| DEFAULT_THREAD_NAME.to_string());
            let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
            let slot = Arc::new(ListenerSlot::default());
            let cancel = CancellationToken::new();
            let scope = WorkerScope::new(inbox_rx, Outbox::new(SlotOutbox(Arc::clone(&slot))));

            let mut builder = std::thread::Builder::new().name(name.clone());
            if let Some(stack_size) = options.stack_size {
                builder = builder.stack_size(stack_size);
            }

            let thread_name = name.clone();
            let thread_slot = Arc::clone(&slot);
            let thread_cancel = cancel.clone();
            builder
                .spawn(move || run_program(thread_name, program, scope, thread_slot, thread_cancel))
                .map_err(|source| TransportError::Spawn {
                    what: format!("thread unit '{name}'"),
                    source,
                })?;

            debug!(worker = %name, "thread unit started");
            Ok(Self {
                name,
                inbox: Mutex::new(Some(inbox_tx)),
                slot,
                cancel,
            })
        }
    }

    /// The worker thread's name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl ExecutionUnit for ThreadUnit {
    fn post(&self, message: Value) -> Result<()> {
        if self.slot.is_disposed() {
            return Err(TransportError::Disposed);
        }
        if self.slot.is_closed() {
            return Err(TransportError::Closed);
        }
        let inbox = self.inbox.lock().unwrap_or_else(PoisonError::into_inner);
        match inbox.as_ref() {
            Some(sender) => sender.send(message).map_err(|_| TransportError::Closed),
            None => Err(TransportError::Disposed),
        }
    }

    fn set_listener(&self, listener: Option<Arc<dyn UnitListener>>) {
        self.slot.set(listener);
    }

    fn dispose(&self) {
        if !self.slot.mark_disposed() {
            return;
        }
        self.slot.set(None);
        self.inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.cancel.cancel();
        debug!(worker = %self.name, "thread unit disposed");
    }

    fn is_disposed(&self) -> bool {
        self.slot.is_disposed()
    }
}

impl Drop for ThreadUnit {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for ThreadUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadUnit")
            .field("name", &self.name)
            .field("disposed", &self.slot.is_disposed())
            .field("closed", &self.slot.is_closed())
            .finish()
    }
}

struct SlotOutbox(Arc<ListenerSlot>);

impl PostMessage for SlotOutbox {
    fn post_message(&self, message: Value) -> Result<()> {
        if self.0.is_disposed() {
            return Err(TransportError::Disposed);
        }
        self.0.deliver_message(message);
        Ok(())
    }
}

fn run_program(
    name: String,
    program: Program,
    scope: WorkerScope,
    slot: Arc<ListenerSlot>,
    cancel: CancellationToken,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            slot.mark_closed();
            slot.deliver_fault(UnitFault::new(format!(
                "failed to start worker runtime: {err}"
            )));
            return;
        }
    };

    let entry = program.entry;
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        runtime.block_on(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = entry(scope) => {}
            }
        })
    }));
    // Dropping the runtime cancels every task the program left behind.
    drop(runtime);
    slot.mark_closed();

    if slot.is_disposed() {
        debug!(worker = %name, "worker stopped after dispose");
        return;
    }

    let fault = match outcome {
        Ok(()) => UnitFault::new("worker exited"),
        Err(payload) => UnitFault::new(format!(
            "worker panicked: {}",
            panic_message(payload.as_ref())
        )),
    };
    warn!(worker = %name, fault = %fault, "execution unit stopped unexpectedly");
    slot.deliver_fault(fault);
}
