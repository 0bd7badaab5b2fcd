//! Panics that escape every call.
//!
//! A target may spawn tasks it never joins. When one of those panics, tokio
//! keeps the runtime alive and drops the panic, so the calls waiting on that
//! work would never settle. A thread serving a dispatcher registers its
//! outbox here, and such panics go out as id-less faults instead.
//!
//! Panics raised while a call runs are not reported here: the dispatcher
//! already answers them as that call's failure.

use std::cell::RefCell;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::{self, PanicHookInfo};
use std::sync::Once;

use offload_transport::{panic_message, Outbox};
use tracing::warn;

use crate::dispatcher::reply;
use crate::envelope::{NormalizedError, ResultEnvelope, DEFAULT_ERROR_NAME};

tokio::task_local! {
    static IN_CALL: ();
}

thread_local! {
    static REPORTER: RefCell<Option<Outbox>> = const { RefCell::new(None) };
}

static INSTALL_HOOK: Once = Once::new();

/// Report panics on the current thread that happen outside any call as
/// id-less faults on `outbox`, until the returned guard is dropped.
///
/// [`create_worker`](crate::create_worker) and
/// [`serve_stdio`](crate::serve_stdio) do this for their own threads. Call
/// it when driving [`expose`](crate::expose) on a current-thread runtime of
/// your own.
pub fn report_uncaught_panics(outbox: Outbox) -> UncaughtGuard {
    INSTALL_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
            report(info);
            previous(info);
        }));
    });
    let previous = REPORTER.with(|slot| slot.replace(Some(outbox)));
    UncaughtGuard {
        previous,
        _not_send: PhantomData,
    }
}

/// Keeps uncaught panics on this thread reported; restores the previous
/// reporter when dropped.
#[must_use = "uncaught panics are only reported while the guard is alive"]
pub struct UncaughtGuard {
    previous: Option<Outbox>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for UncaughtGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        let _ = REPORTER.try_with(|slot| slot.replace(previous));
    }
}

/// Run `future` as part of one call: its panics belong to that call.
pub(crate) fn in_call<F: Future>(future: F) -> impl Future<Output = F::Output> {
    IN_CALL.scope((), future)
}

fn report(info: &PanicHookInfo<'_>) {
    if IN_CALL.try_with(|_| ()).is_ok() {
        return;
    }
    let outbox = REPORTER
        .try_with(|slot| slot.try_borrow().ok().and_then(|outbox| outbox.clone()))
        .ok()
        .flatten();
    let Some(outbox) = outbox else {
        return;
    };

    let error = NormalizedError::new(DEFAULT_ERROR_NAME, panic_message(info.payload()));
    warn!(error = %error, "uncaught panic in worker");
    reply(&outbox, ResultEnvelope::fault(error));
}
