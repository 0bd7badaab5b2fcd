use std::fmt;

use offload_transport::{TransportError, UnitFault};

use crate::envelope::{NormalizedError, DEFAULT_ERROR_MESSAGE, DEFAULT_ERROR_NAME};

/// A failure that happened on the other side of the channel, rebuilt locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    name: String,
    message: String,
    stack: Option<String>,
}

impl RemoteError {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }
}

impl From<NormalizedError> for RemoteError {
    fn from(error: NormalizedError) -> Self {
        Self {
            name: error.name,
            message: error.message,
            stack: error.stack,
        }
    }
}

impl From<UnitFault> for RemoteError {
    fn from(fault: UnitFault) -> Self {
        let message = if fault.message.is_empty() {
            DEFAULT_ERROR_MESSAGE.to_string()
        } else {
            fault.message
        };
        Self {
            name: DEFAULT_ERROR_NAME.to_string(),
            message,
            stack: None,
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for RemoteError {}

/// Errors that can complete a call.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The target function failed for this call.
    #[error(transparent)]
    Remote(RemoteError),

    /// The worker failed in a way not tied to one call; every pending call
    /// received the same fault.
    #[error("worker fault: {0}")]
    Fault(#[source] RemoteError),

    /// The call was issued after the proxy was terminated.
    #[error("worker is terminated")]
    Terminated,

    /// The call was still pending when the proxy was terminated.
    #[error("worker was terminated")]
    Cancelled,

    /// The call envelope could not be handed to the execution unit.
    #[error("failed to post call: {0}")]
    Send(#[source] TransportError),

    /// The call envelope could not be encoded.
    #[error("failed to encode call: {0}")]
    Encode(#[source] serde_json::Error),

    /// The result did not have the requested shape.
    #[error("failed to decode result: {0}")]
    Decode(#[source] serde_json::Error),

    /// The completion slot was dropped without an outcome.
    #[error("call abandoned before completion")]
    Abandoned,
}

impl CallError {
    /// The rebuilt remote error for call-scoped failures and faults.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            CallError::Remote(err) | CallError::Fault(err) => Some(err),
            _ => None,
        }
    }

    /// True for both termination outcomes.
    pub fn is_termination(&self) -> bool {
        matches!(self, CallError::Terminated | CallError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, CallError>;
