use offload::frame::FrameConfig;
use offload::rpc::serve_stdio_with_config;
use tracing::{debug, info_span};

use crate::cmd::ServeArgs;
use crate::exit::{transport_error, CliResult, SUCCESS};

pub fn run(args: ServeArgs) -> CliResult<i32> {
    let config = FrameConfig {
        max_payload_size: args.max_payload,
    };
    // Worker logs share the caller's stderr; the span tells them apart.
    let span = info_span!("worker", pid = std::process::id(), function = args.function.name());
    let _entered = span.enter();

    debug!(max_payload = config.max_payload_size, "starting worker");
    serve_stdio_with_config(args.function, config)
        .map_err(|err| transport_error("serve failed", err))?;
    Ok(SUCCESS)
}
