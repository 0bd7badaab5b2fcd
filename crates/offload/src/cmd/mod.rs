use clap::{Args, Subcommand};
use offload::frame::DEFAULT_MAX_PAYLOAD;

use crate::builtins::Builtin;
use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod call;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve a built-in function as a process worker over stdin/stdout.
    Serve(ServeArgs),
    /// Run one call of a built-in function in a worker and print the outcome.
    Call(CallArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args),
        Command::Call(args) => call::run(args, format),
        Command::Version(args) => version::run(args, format),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Function to serve.
    #[arg(value_enum)]
    pub function: Builtin,
    /// Largest accepted frame payload in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_PAYLOAD)]
    pub max_payload: usize,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Function to call.
    #[arg(value_enum)]
    pub function: Builtin,
    /// Call arguments. Each is parsed as JSON, or passed as a string if it is not JSON.
    #[arg(value_name = "ARG", allow_negative_numbers = true)]
    pub args: Vec<String>,
    /// Run the worker on a thread in this process instead of a child process.
    #[arg(long)]
    pub inline: bool,
    /// Give up and terminate the worker after this long (e.g. 5s, 500ms).
    #[arg(long)]
    pub timeout: Option<String>,
    /// Largest accepted frame payload in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_PAYLOAD)]
    pub max_payload: usize,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
