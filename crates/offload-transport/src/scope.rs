use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;

/// Sink for messages leaving a worker.
///
/// A failed post means the message never left: it was too large for the
/// channel, could not be encoded, or the owner is gone.
pub trait PostMessage: Send + Sync {
    fn post_message(&self, message: Value) -> Result<()>;
}

impl<F> PostMessage for F
where
    F: Fn(Value) -> Result<()> + Send + Sync,
{
    fn post_message(&self, message: Value) -> Result<()> {
        self(message)
    }
}

/// Cloneable handle for posting messages back to the worker's owner.
#[derive(Clone)]
pub struct Outbox {
    sink: Arc<dyn PostMessage>,
}

impl Outbox {
    pub fn new(sink: impl PostMessage + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    pub fn post_message(&self, message: Value) -> Result<()> {
        self.sink.post_message(message)
    }
}

impl fmt::Debug for Outbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outbox").finish_non_exhaustive()
    }
}

/// The worker-side view of an execution unit's channel.
///
/// Code running inside a unit receives messages from its owner with
/// [`WorkerScope::recv`] and answers with [`WorkerScope::post_message`].
#[derive(Debug)]
pub struct WorkerScope {
    inbox: mpsc::UnboundedReceiver<Value>,
    outbox: Outbox,
}

impl WorkerScope {
    pub fn new(inbox: mpsc::UnboundedReceiver<Value>, outbox: Outbox) -> Self {
        Self { inbox, outbox }
    }

    /// Next message from the owner, or `None` once the owner is gone.
    pub async fn recv(&mut self) -> Option<Value> {
        self.inbox.recv().await
    }

    pub fn post_message(&self, message: Value) -> Result<()> {
        self.outbox.post_message(message)
    }

    /// A detached handle for posting from spawned tasks.
    pub fn outbox(&self) -> Outbox {
        self.outbox.clone()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::TransportError;

    #[tokio::test]
    async fn closure_outbox_and_inbox_round_trip() {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let mut scope = WorkerScope::new(
            in_rx,
            Outbox::new(move |message: Value| {
                out_tx.send(message).map_err(|_| TransportError::Closed)
            }),
        );

        in_tx.send(json!({"id": 3})).unwrap();
        let received = scope.recv().await.unwrap();
        scope.outbox().post_message(received).unwrap();

        assert_eq!(out_rx.recv().await, Some(json!({"id": 3})));

        drop(in_tx);
        assert_eq!(scope.recv().await, None);

        drop(out_rx);
        assert!(matches!(
            scope.post_message(json!({"id": 4})),
            Err(TransportError::Closed)
        ));
    }
}
