use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{debug, trace};

use crate::error::Result;

/// A transport-level fault reported by an execution unit.
///
/// Faults are not tied to any message: the unit crashed, exited, or its
/// channel broke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFault {
    pub message: String,
}

impl UnitFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for UnitFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Receives everything an execution unit sends back to its owner.
///
/// Both callbacks may run on a thread owned by the unit.
pub trait UnitListener: Send + Sync {
    /// A message posted by the code running inside the unit.
    fn on_message(&self, message: Value);

    /// A fault of the unit itself.
    fn on_fault(&self, fault: UnitFault);
}

/// An isolated worker that can be sent messages, observed, and disposed.
pub trait ExecutionUnit: Send + Sync {
    /// Post a message into the unit.
    ///
    /// Fails synchronously when the unit can no longer accept messages.
    fn post(&self, message: Value) -> Result<()>;

    /// Install (or with `None`, detach) the listener for messages and faults.
    fn set_listener(&self, listener: Option<Arc<dyn UnitListener>>);

    /// Stop the unit and release its resources. Idempotent.
    fn dispose(&self);

    /// Whether [`ExecutionUnit::dispose`] has been called.
    fn is_disposed(&self) -> bool;
}

/// Listener slot shared between a unit handle and its delivery thread.
#[derive(Default)]
pub(crate) struct ListenerSlot {
    state: Mutex<SlotState>,
    disposed: AtomicBool,
    closed: AtomicBool,
}

#[derive(Default)]
struct SlotState {
    listener: Option<Arc<dyn UnitListener>>,
    // The first fault raised while no listener was attached; handed to the
    // next listener so a unit that dies during startup is still reported.
    parked_fault: Option<UnitFault>,
}

impl ListenerSlot {
    pub(crate) fn set(&self, listener: Option<Arc<dyn UnitListener>>) {
        let replay = {
            let mut state = self.lock();
            state.listener = listener.clone();
            if listener.is_some() && !self.is_disposed() {
                state.parked_fault.take()
            } else {
                None
            }
        };
        if let (Some(listener), Some(fault)) = (listener, replay) {
            debug!(fault = %fault, "replaying fault raised before a listener was attached");
            listener.on_fault(fault);
        }
    }

    /// Marks the slot disposed. Returns `true` only for the first call.
    pub(crate) fn mark_disposed(&self) -> bool {
        !self.disposed.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// The unit's channel is gone: nothing it is posted will be answered.
    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn deliver_message(&self, message: Value) {
        if let Some(listener) = self.current() {
            listener.on_message(message);
        } else {
            trace!("dropping message with no listener attached");
        }
    }

    pub(crate) fn deliver_fault(&self, fault: UnitFault) {
        let listener = {
            let mut state = self.lock();
            if self.is_disposed() {
                return;
            }
            match state.listener.clone() {
                Some(listener) => listener,
                None => {
                    debug!(fault = %fault, "parking fault until a listener is attached");
                    state.parked_fault.get_or_insert(fault);
                    return;
                }
            }
        };
        listener.on_fault(fault);
    }

    // The lock is released before the listener runs so a listener may
    // detach itself from inside a callback.
    fn current(&self) -> Option<Arc<dyn UnitListener>> {
        if self.is_disposed() {
            return None;
        }
        self.lock().listener.clone()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        messages: Mutex<Vec<Value>>,
        faults: Mutex<Vec<UnitFault>>,
    }

    impl UnitListener for Recorder {
        fn on_message(&self, message: Value) {
            self.messages.lock().unwrap().push(message);
        }

        fn on_fault(&self, fault: UnitFault) {
            self.faults.lock().unwrap().push(fault);
        }
    }

    #[test]
    fn delivers_to_attached_listener() {
        let slot = ListenerSlot::default();
        let recorder = Arc::new(Recorder::default());
        slot.set(Some(recorder.clone()));

        slot.deliver_message(json!({"id": 1}));
        slot.deliver_fault(UnitFault::new("crashed"));

        assert_eq!(*recorder.messages.lock().unwrap(), vec![json!({"id": 1})]);
        assert_eq!(*recorder.faults.lock().unwrap(), vec![UnitFault::new("crashed")]);
    }

    #[test]
    fn nothing_is_delivered_after_detach_or_dispose() {
        let slot = ListenerSlot::default();
        let recorder = Arc::new(Recorder::default());
        slot.set(Some(recorder.clone()));
        slot.set(None);
        slot.deliver_message(json!(1));

        slot.set(Some(recorder.clone()));
        assert!(slot.mark_disposed());
        assert!(!slot.mark_disposed());
        slot.deliver_fault(UnitFault::new("late"));

        assert!(recorder.messages.lock().unwrap().is_empty());
        assert!(recorder.faults.lock().unwrap().is_empty());
    }

    #[test]
    fn fault_before_listener_is_replayed_once() {
        let slot = ListenerSlot::default();
        slot.deliver_fault(UnitFault::new("exited early"));
        slot.deliver_fault(UnitFault::new("second"));

        let recorder = Arc::new(Recorder::default());
        slot.set(Some(recorder.clone()));
        slot.set(Some(recorder.clone()));

        assert_eq!(
            *recorder.faults.lock().unwrap(),
            vec![UnitFault::new("exited early")]
        );
    }

    #[test]
    fn disposed_slot_parks_nothing() {
        let slot = ListenerSlot::default();
        slot.mark_disposed();
        slot.deliver_fault(UnitFault::new("late"));

        let recorder = Arc::new(Recorder::default());
        slot.set(Some(recorder.clone()));

        assert!(recorder.faults.lock().unwrap().is_empty());
    }

    #[test]
    fn panic_message_reads_str_and_string_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");

        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
