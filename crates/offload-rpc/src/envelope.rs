//! Message shapes exchanged between a proxy and its dispatcher.
//!
//! These are the compatibility-critical contract: any caller library and
//! any callee library that agree on them can interoperate.

use std::any::Any;
use std::error::Error;
use std::fmt;

use offload_transport::panic_message;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Error name used when a failure carries none.
pub const DEFAULT_ERROR_NAME: &str = "Error";

/// Error message used when a failure carries none.
pub const DEFAULT_ERROR_MESSAGE: &str = "Worker error";

/// Caller → callee: invoke the target with `args`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEnvelope {
    pub id: u64,
    pub args: Vec<Value>,
}

/// Callee → caller: the single outcome of one call.
///
/// An envelope without `id` is a channel-wide fault, not a call result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NormalizedError>,
}

impl ResultEnvelope {
    pub fn success(id: u64, value: Value) -> Self {
        Self {
            id: Some(id),
            ok: true,
            value: Some(value),
            error: None,
        }
    }

    pub fn failure(id: u64, error: NormalizedError) -> Self {
        Self {
            id: Some(id),
            ok: false,
            value: None,
            error: Some(error),
        }
    }

    /// A failure not attributable to any call.
    pub fn fault(error: NormalizedError) -> Self {
        Self {
            id: None,
            ok: false,
            value: None,
            error: Some(error),
        }
    }
}

/// Transmissible failure record: `{name, message, stack?}`.
///
/// Built explicitly at the channel boundary from whatever failed: an error
/// type, a plain value, or a panic payload. It deliberately does not
/// implement [`std::error::Error`], so any error converts into it with `?`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedError {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl NormalizedError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// `{name: "Error", message: "Worker error"}`.
    pub fn worker_error() -> Self {
        Self::new(DEFAULT_ERROR_NAME, DEFAULT_ERROR_MESSAGE)
    }

    /// Normalize a non-error value used as a failure.
    ///
    /// Strings become the message verbatim; anything else is rendered as JSON.
    pub fn thrown(value: impl Into<Value>) -> Self {
        let message = match value.into() {
            Value::String(text) => text,
            other => other.to_string(),
        };
        Self::new(DEFAULT_ERROR_NAME, message)
    }

    /// Normalize a panic payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self::new(DEFAULT_ERROR_NAME, panic_message(payload.as_ref()))
    }

    /// Rebuild a record from an arbitrary `error` field, filling defaults
    /// for anything missing or falsy. Non-string fields are rendered as JSON.
    pub fn from_wire(error: Option<&Value>) -> Self {
        let field = |key: &str| {
            error
                .and_then(|error| error.get(key))
                .filter(|value| is_truthy(value))
                .map(|value| match value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
        };
        Self {
            name: field("name").unwrap_or_else(|| DEFAULT_ERROR_NAME.to_string()),
            message: field("message").unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string()),
            stack: field("stack"),
        }
    }
}

impl<E> From<E> for NormalizedError
where
    E: Error,
{
    fn from(err: E) -> Self {
        Self {
            name: short_type_name::<E>().to_string(),
            message: err.to_string(),
            stack: source_chain(&err),
        }
    }
}

impl fmt::Display for NormalizedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

/// What a proxy should do with one incoming message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// The outcome of the call with this id.
    Reply {
        id: u64,
        outcome: Result<Value, NormalizedError>,
    },
    /// A fault that must fail every pending call.
    Fault(NormalizedError),
    /// Nothing actionable.
    Ignored,
}

/// Classify a message received from the callee.
///
/// Parsing is lenient on purpose: the callee may be any implementation of
/// the protocol, so missing fields fall back to defaults instead of failing.
pub fn classify(message: Value) -> Inbound {
    let Value::Object(mut fields) = message else {
        return Inbound::Ignored;
    };

    if let Some(Value::Number(id)) = fields.get("id") {
        // Numeric ids that could never have been issued match no call.
        let Some(id) = call_id(id) else {
            return Inbound::Ignored;
        };
        let outcome = if fields.get("ok").is_some_and(is_truthy) {
            Ok(fields.remove("value").unwrap_or(Value::Null))
        } else {
            Err(NormalizedError::from_wire(fields.get("error")))
        };
        return Inbound::Reply { id, outcome };
    }

    let error = fields.get("error").filter(|error| is_truthy(error));
    if fields.get("ok") == Some(&Value::Bool(false)) && error.is_some() {
        return Inbound::Fault(NormalizedError::from_wire(error));
    }
    Inbound::Ignored
}

/// A JSON number usable as a call id: a whole number ≥ 1.
pub fn call_id(number: &Number) -> Option<u64> {
    number
        .as_u64()
        .or_else(|| {
            number
                .as_f64()
                .filter(|id| id.fract() == 0.0 && *id >= 1.0 && *id <= u64::MAX as f64)
                .map(|id| id as u64)
        })
        .filter(|id| *id >= 1)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::String(text) => !text.is_empty(),
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        _ => true,
    }
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

fn source_chain(err: &dyn Error) -> Option<String> {
    let mut lines = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        lines.push(format!("caused by: {cause}"));
        source = cause.source();
    }
    (!lines.is_empty()).then(|| lines.join("\n"))
}
