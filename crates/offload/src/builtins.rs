//! Functions the CLI can run inside a worker.

use std::time::Duration;

use clap::ValueEnum;
use offload::rpc::{CallFuture, NormalizedError, WorkerFn};
use serde_json::{json, Value};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Builtin {
    /// Add numeric arguments.
    Sum,
    /// Return the arguments unchanged.
    Echo,
    /// Fail with MESSAGE and optional NAME.
    Fail,
    /// Wait MILLIS milliseconds, then return MILLIS.
    Sleep,
    /// Panic with MESSAGE.
    Panic,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Sum => "sum",
            Builtin::Echo => "echo",
            Builtin::Fail => "fail",
            Builtin::Sleep => "sleep",
            Builtin::Panic => "panic",
        }
    }
}

impl WorkerFn for Builtin {
    fn call(&self, args: Vec<Value>) -> CallFuture {
        match self {
            Builtin::Sum => Box::pin(std::future::ready(sum(&args))),
            Builtin::Echo => Box::pin(std::future::ready(Ok(Value::Array(args)))),
            Builtin::Fail => Box::pin(std::future::ready(Err(fail(&args)))),
            Builtin::Sleep => Box::pin(sleep(args)),
            Builtin::Panic => {
                let message = text_arg(&args, 0).unwrap_or("panic requested").to_string();
                panic!("{message}");
            }
        }
    }
}

fn sum(args: &[Value]) -> Result<Value, NormalizedError> {
    let mut exact = Some(0i64);
    let mut approx = 0f64;
    for arg in args {
        let Value::Number(n) = arg else {
            return Err(NormalizedError::new(
                "TypeError",
                format!("cannot add {arg}"),
            ));
        };
        approx += n.as_f64().unwrap_or_default();
        exact = exact.and_then(|total| n.as_i64().and_then(|n| total.checked_add(n)));
    }
    Ok(match exact {
        Some(total) => json!(total),
        None => json!(approx),
    })
}

fn fail(args: &[Value]) -> NormalizedError {
    let message = text_arg(args, 0).unwrap_or("failure requested");
    match text_arg(args, 1) {
        Some(name) => NormalizedError::new(name, message),
        None => NormalizedError::thrown(message),
    }
}

async fn sleep(args: Vec<Value>) -> Result<Value, NormalizedError> {
    let millis = match args.first() {
        Some(Value::Number(n)) => n.as_u64(),
        None => Some(0),
        _ => None,
    }
    .ok_or_else(|| NormalizedError::new("TypeError", "sleep expects milliseconds"))?;
    tokio::time::sleep(Duration::from_millis(millis)).await;
    Ok(json!(millis))
}

fn text_arg(args: &[Value], index: usize) -> Option<&str> {
    args.get(index).and_then(Value::as_str)
}
