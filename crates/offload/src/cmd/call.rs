use std::ffi::OsString;
use std::time::Duration;

use offload::frame::FrameConfig;
use offload::rpc::{
    create_worker_from_program, create_worker_with_options, CallError, ProcessOptions, Proxy,
    UnitOptions,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::builtins::Builtin;
use crate::cmd::CallArgs;
use crate::exit::{
    call_error, io_error, transport_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT, USAGE,
};
use crate::output::{print_outcome, Outcome, OutputFormat};

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = args.timeout.as_deref().map(parse_duration).transpose()?;
    let call_args: Vec<Value> = args.args.iter().map(|raw| parse_arg(raw)).collect();
    let worker = start_worker(&args)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("failed to start runtime", err))?;

    debug!(function = args.function.name(), args = call_args.len(), "calling worker");
    let pending = worker.execute(call_args);
    let outcome = runtime.block_on(async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, pending).await.ok(),
            None => Some(pending.await),
        }
    });
    worker.terminate();

    let function = args.function.name();
    match outcome {
        Some(Ok(value)) => {
            print_outcome(function, &Outcome::Value(&value), format);
            Ok(SUCCESS)
        }
        Some(Err(CallError::Remote(err))) => {
            print_outcome(function, &Outcome::Failed(&err), format);
            Ok(FAILURE)
        }
        Some(Err(err)) => Err(call_error(&format!("{function} failed"), err)),
        None => {
            warn!(function, "call timed out, worker terminated");
            Err(CliError::new(
                TIMEOUT,
                format!("{function} did not finish in time"),
            ))
        }
    }
}

fn start_worker(args: &CallArgs) -> CliResult<Proxy> {
    if args.inline {
        let options = UnitOptions {
            name: Some(format!("offload-{}", args.function.name())),
            ..UnitOptions::default()
        };
        return create_worker_with_options(args.function, options)
            .map_err(|err| transport_error("failed to start worker thread", err));
    }

    let program = std::env::current_exe()
        .map_err(|err| io_error("failed to locate offload executable", err))?;
    let options = ProcessOptions {
        args: serve_args(args.function, args.max_payload),
        frame: FrameConfig {
            max_payload_size: args.max_payload,
        },
        ..ProcessOptions::default()
    };
    create_worker_from_program(program, options)
        .map_err(|err| transport_error("failed to start worker process", err))
}

fn serve_args(function: Builtin, max_payload: usize) -> Vec<OsString> {
    vec![
        "serve".into(),
        function.name().into(),
        "--max-payload".into(),
        max_payload.to_string().into(),
    ]
}

/// JSON if it parses, otherwise the raw text as a string.
fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        _ => Duration::from_secs(value),
    })
}
