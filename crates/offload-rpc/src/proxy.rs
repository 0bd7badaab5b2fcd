//! Caller side: turns function calls into envelopes and matches results.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use offload_transport::{ExecutionUnit, UnitFault, UnitListener};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use crate::envelope::{classify, CallEnvelope, Inbound, NormalizedError};
use crate::error::{CallError, RemoteError, Result};

type Completion = oneshot::Sender<Result<Value>>;

/// Caller-side handle to one execution unit.
///
/// Any number of calls may be in flight at once; each is tagged with a
/// fresh id and completed by the result carrying that id, in whatever order
/// results arrive. Dropping the proxy terminates it.
pub struct Proxy {
    table: Arc<CallTable>,
    unit: Box<dyn ExecutionUnit>,
}

impl Proxy {
    /// Take ownership of `unit` and start listening to it.
    pub fn new<U>(unit: U) -> Self
    where
        U: ExecutionUnit + 'static,
    {
        let table = Arc::new(CallTable::default());
        unit.set_listener(Some(Arc::clone(&table) as Arc<dyn UnitListener>));
        Self {
            table,
            unit: Box::new(unit),
        }
    }

    /// Invoke the target with `args`.
    ///
    /// The call is posted before this returns, so ids follow the order of
    /// `execute` calls even if the returned futures are awaited later.
    pub fn execute(&self, args: Vec<Value>) -> PendingCall {
        let (id, completion) = match self.table.register() {
            Some(entry) => entry,
            None => return PendingCall::failed(CallError::Terminated),
        };

        let message = match serde_json::to_value(CallEnvelope { id, args }) {
            Ok(message) => message,
            Err(err) => {
                self.table.forget(id);
                return PendingCall::failed(CallError::Encode(err));
            }
        };

        if let Err(err) = self.unit.post(message) {
            self.table.forget(id);
            let error = if self.table.is_terminated() {
                CallError::Terminated
            } else {
                debug!(id, error = %err, "call could not be posted");
                CallError::Send(err)
            };
            return PendingCall::failed(error);
        }

        trace!(id, "call posted");
        PendingCall {
            id: Some(id),
            state: PendingState::Waiting(completion),
        }
    }

    /// Invoke the target and decode its result as `T`.
    pub fn call<T>(&self, args: Vec<Value>) -> impl Future<Output = Result<T>>
    where
        T: DeserializeOwned,
    {
        let pending = self.execute(args);
        async move { serde_json::from_value(pending.await?).map_err(CallError::Decode) }
    }

    /// Fail every pending call with [`CallError::Cancelled`] and dispose the
    /// unit. Later calls fail with [`CallError::Terminated`]. Idempotent.
    pub fn terminate(&self) {
        let Some(drained) = self.table.close() else {
            return;
        };
        let cancelled = drained.len();
        for (_, completion) in drained {
            let _ = completion.send(Err(CallError::Cancelled));
        }
        self.unit.set_listener(None);
        self.unit.dispose();
        info!(cancelled, "worker terminated");
    }

    pub fn is_terminated(&self) -> bool {
        self.table.is_terminated()
    }

    /// Number of calls still waiting for a result.
    pub fn pending_calls(&self) -> usize {
        self.table.lock().pending.len()
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.table.lock();
        f.debug_struct("Proxy")
            .field("pending", &state.pending.len())
            .field("next_id", &state.next_id)
            .field("terminated", &state.terminated)
            .finish()
    }
}

/// The outcome of one call, resolved exactly once.
#[must_use = "a call's outcome is only observed by awaiting it"]
#[derive(Debug)]
pub struct PendingCall {
    id: Option<u64>,
    state: PendingState,
}

#[derive(Debug)]
enum PendingState {
    Failed(Option<CallError>),
    Waiting(oneshot::Receiver<Result<Value>>),
}

impl PendingCall {
    fn failed(error: CallError) -> Self {
        Self {
            id: None,
            state: PendingState::Failed(Some(error)),
        }
    }

    /// The correlation id, if the call was posted.
    pub fn id(&self) -> Option<u64> {
        self.id
    }
}

impl Future for PendingCall {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            PendingState::Failed(error) => {
                Poll::Ready(Err(error.take().unwrap_or(CallError::Abandoned)))
            }
            PendingState::Waiting(completion) => Pin::new(completion)
                .poll(cx)
                .map(|outcome| outcome.unwrap_or(Err(CallError::Abandoned))),
        }
    }
}

struct TableState {
    next_id: u64,
    pending: HashMap<u64, Completion>,
    terminated: bool,
}

impl Default for TableState {
    fn default() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
            terminated: false,
        }
    }
}

/// Pending calls keyed by id.
///
/// The unit delivers results on its own thread, so the table is locked; the
/// lock is never held while posting or completing a call.
#[derive(Default)]
struct CallTable {
    state: Mutex<TableState>,
}

impl CallTable {
    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self) -> Option<(u64, oneshot::Receiver<Result<Value>>)> {
        let mut state = self.lock();
        if state.terminated {
            return None;
        }
        let id = state.next_id;
        state.next_id += 1;
        let (completion, receiver) = oneshot::channel();
        state.pending.insert(id, completion);
        Some((id, receiver))
    }

    fn forget(&self, id: u64) {
        self.lock().pending.remove(&id);
    }

    fn is_terminated(&self) -> bool {
        self.lock().terminated
    }

    /// Mark terminated and take every pending call. `None` if already closed.
    fn close(&self) -> Option<HashMap<u64, Completion>> {
        let mut state = self.lock();
        if state.terminated {
            return None;
        }
        state.terminated = true;
        Some(std::mem::take(&mut state.pending))
    }

    fn complete(&self, id: u64, outcome: std::result::Result<Value, NormalizedError>) {
        let Some(completion) = self.lock().pending.remove(&id) else {
            trace!(id, "ignoring result for unknown call");
            return;
        };
        let outcome = outcome.map_err(|error| CallError::Remote(error.into()));
        if completion.send(outcome).is_err() {
            trace!(id, "caller stopped waiting for result");
        }
    }

    fn fail_all(&self, fault: RemoteError) {
        let drained = std::mem::take(&mut self.lock().pending);
        warn!(pending = drained.len(), fault = %fault, "worker fault");
        for (_, completion) in drained {
            let _ = completion.send(Err(CallError::Fault(fault.clone())));
        }
    }
}

impl UnitListener for CallTable {
    fn on_message(&self, message: Value) {
        match classify(message) {
            Inbound::Reply { id, outcome } => self.complete(id, outcome),
            Inbound::Fault(error) => self.fail_all(error.into()),
            Inbound::Ignored => trace!("ignoring message that is not a call result"),
        }
    }

    fn on_fault(&self, fault: UnitFault) {
        self.fail_all(fault.into());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use offload_transport::TransportError;
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct FakeState {
        posted: Mutex<Vec<Value>>,
        listener: Mutex<Option<Arc<dyn UnitListener>>>,
        disposals: AtomicUsize,
        reject_posts: AtomicBool,
    }

    impl FakeState {
        fn posted(&self) -> Vec<Value> {
            self.posted.lock().unwrap().clone()
        }

        fn listener(&self) -> Option<Arc<dyn UnitListener>> {
            self.listener.lock().unwrap().clone()
        }

        fn reply(&self, message: Value) {
            if let Some(listener) = self.listener() {
                listener.on_message(message);
            }
        }

        fn crash(&self, message: &str) {
            if let Some(listener) = self.listener() {
                listener.on_fault(UnitFault::new(message));
            }
        }
    }

    struct FakeUnit(Arc<FakeState>);

    impl ExecutionUnit for FakeUnit {
        fn post(&self, message: Value) -> offload_transport::Result<()> {
            if self.0.reject_posts.load(Ordering::SeqCst) {
                return Err(TransportError::Closed);
            }
            self.0.posted.lock().unwrap().push(message);
            Ok(())
        }

        fn set_listener(&self, listener: Option<Arc<dyn UnitListener>>) {
            *self.0.listener.lock().unwrap() = listener;
        }

        fn dispose(&self) {
            self.0.disposals.fetch_add(1, Ordering::SeqCst);
        }

        fn is_disposed(&self) -> bool {
            self.0.disposals.load(Ordering::SeqCst) > 0
        }
    }

    fn proxy() -> (Proxy, Arc<FakeState>) {
        let state = Arc::new(FakeState::default());
        (Proxy::new(FakeUnit(Arc::clone(&state))), state)
    }

    #[tokio::test]
    async fn ids_start_at_one_and_increase() {
        let (proxy, unit) = proxy();

        let first = proxy.execute(vec![json!(1), json!(2)]);
        let second = proxy.execute(vec![]);

        assert_eq!(first.id(), Some(1));
        assert_eq!(second.id(), Some(2));
        assert_eq!(
            unit.posted(),
            vec![json!({"id": 1, "args": [1, 2]}), json!({"id": 2, "args": []})]
        );
        assert_eq!(proxy.pending_calls(), 2);
    }

    #[tokio::test]
    async fn results_complete_calls_out_of_order() {
        let (proxy, unit) = proxy();
        let first = proxy.execute(vec![json!("slow")]);
        let second = proxy.execute(vec![json!("fast")]);

        unit.reply(json!({"id": 2, "ok": true, "value": "fast done"}));
        assert_eq!(second.await.unwrap(), json!("fast done"));
        assert_eq!(proxy.pending_calls(), 1);

        unit.reply(json!({"id": 1, "ok": true, "value": "slow done"}));
        assert_eq!(first.await.unwrap(), json!("slow done"));
        assert_eq!(proxy.pending_calls(), 0);
    }

    #[tokio::test]
    async fn unknown_and_duplicate_results_are_ignored() {
        let (proxy, unit) = proxy();
        let call = proxy.execute(vec![]);

        unit.reply(json!({"id": 99, "ok": true, "value": 1}));
        unit.reply(json!({"ok": true, "value": 1}));
        unit.reply(json!("noise"));
        assert_eq!(proxy.pending_calls(), 1);

        unit.reply(json!({"id": 1, "ok": true, "value": "first"}));
        unit.reply(json!({"id": 1, "ok": true, "value": "second"}));
        assert_eq!(call.await.unwrap(), json!("first"));
    }

    #[tokio::test]
    async fn failures_keep_name_message_and_stack() {
        let (proxy, unit) = proxy();
        let call = proxy.execute(vec![json!("x")]);

        unit.reply(json!({
            "id": 1,
            "ok": false,
            "error": {"name": "TypeError", "message": "bad input", "stack": "at sum (worker:3)"}
        }));

        let err = call.await.unwrap_err();
        let remote = match &err {
            CallError::Remote(remote) => remote,
            other => panic!("unexpected error: {other:?}"),
        };
        assert_eq!(remote.name(), "TypeError");
        assert_eq!(remote.message(), "bad input");
        assert_eq!(remote.stack(), Some("at sum (worker:3)"));
        assert_eq!(err.to_string(), "TypeError: bad input");
    }

    #[tokio::test]
    async fn missing_error_fields_fall_back_to_defaults() {
        let (proxy, unit) = proxy();
        let call = proxy.execute(vec![]);

        unit.reply(json!({"id": 1, "ok": false}));

        let err = call.await.unwrap_err();
        assert_eq!(err.remote().map(|e| e.to_string()).as_deref(), Some("Error: Worker error"));
    }

    #[tokio::test]
    async fn null_value_resolves_to_null() {
        let (proxy, unit) = proxy();
        let call = proxy.execute(vec![]);

        unit.reply(json!({"id": 1, "ok": true}));

        assert_eq!(call.await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn in_band_fault_fails_every_pending_call_and_proxy_stays_usable() {
        let (proxy, unit) = proxy();
        let first = proxy.execute(vec![]);
        let second = proxy.execute(vec![]);

        unit.reply(json!({"ok": false, "error": {"name": "Error", "message": "crashed"}}));

        for call in [first, second] {
            match call.await.unwrap_err() {
                CallError::Fault(fault) => assert_eq!(fault.message(), "crashed"),
                other => panic!("unexpected error: {other:?}"),
            }
        }
        assert!(!proxy.is_terminated());

        let third = proxy.execute(vec![]);
        assert_eq!(third.id(), Some(3));
        unit.reply(json!({"id": 3, "ok": true, "value": "ok"}));
        assert_eq!(third.await.unwrap(), json!("ok"));
    }

    #[tokio::test]
    async fn unit_fault_fails_every_pending_call() {
        let (proxy, unit) = proxy();
        let call = proxy.execute(vec![]);

        unit.crash("worker exited");

        match call.await.unwrap_err() {
            CallError::Fault(fault) => {
                assert_eq!(fault.name(), "Error");
                assert_eq!(fault.message(), "worker exited");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(proxy.pending_calls(), 0);
    }

    #[tokio::test]
    async fn terminate_cancels_pending_and_rejects_later_calls() {
        let (proxy, unit) = proxy();
        let pending = proxy.execute(vec![]);

        proxy.terminate();
        proxy.terminate();

        assert!(matches!(pending.await, Err(CallError::Cancelled)));
        assert!(proxy.is_terminated());
        assert_eq!(unit.disposals.load(Ordering::SeqCst), 1);
        assert!(unit.listener().is_none());

        let late = proxy.execute(vec![json!(1)]);
        assert_eq!(late.id(), None);
        assert!(matches!(late.await, Err(CallError::Terminated)));
        assert_eq!(unit.posted().len(), 1);
    }

    #[tokio::test]
    async fn post_failure_fails_only_that_call() {
        let (proxy, unit) = proxy();
        unit.reject_posts.store(true, Ordering::SeqCst);

        let call = proxy.execute(vec![]);

        assert!(matches!(
            call.await,
            Err(CallError::Send(TransportError::Closed))
        ));
        assert_eq!(proxy.pending_calls(), 0);
        assert!(!proxy.is_terminated());
    }

    #[tokio::test]
    async fn typed_calls_decode_results() {
        let (proxy, unit) = proxy();
        let sum = proxy.call::<i64>(vec![json!(1), json!(2), json!(3)]);
        let wrong = proxy.call::<i64>(vec![]);

        unit.reply(json!({"id": 1, "ok": true, "value": 6}));
        unit.reply(json!({"id": 2, "ok": true, "value": "six"}));

        assert_eq!(sum.await.unwrap(), 6);
        assert!(matches!(wrong.await, Err(CallError::Decode(_))));
    }

    #[tokio::test]
    async fn dropping_the_proxy_terminates_it() {
        let (proxy, unit) = proxy();
        let pending = proxy.execute(vec![]);

        drop(proxy);

        assert!(matches!(pending.await, Err(CallError::Cancelled)));
        assert_eq!(unit.disposals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn results_after_terminate_are_dropped() {
        let (proxy, unit) = proxy();
        let listener = unit.listener().unwrap();
        let pending = proxy.execute(vec![]);

        proxy.terminate();
        listener.on_message(json!({"id": 1, "ok": true, "value": 1}));

        assert!(matches!(pending.await, Err(CallError::Cancelled)));
    }
}
