mod builtins;
mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel, Role};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "offload", version, about = "Run functions in worker threads and processes")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(
        long,
        value_name = "FORMAT",
        default_value = "text",
        env = "OFFLOAD_LOG_FORMAT",
        global = true
    )]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        env = "OFFLOAD_LOG_LEVEL",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    let role = match cli.command {
        Command::Serve(_) => Role::Worker,
        _ => Role::Caller,
    };
    init_logging(role, cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_call_subcommand() {
        let cli = Cli::try_parse_from(["offload", "call", "sum", "1", "2", "3", "--inline"])
            .expect("call args should parse");

        match cli.command {
            Command::Call(args) => {
                assert_eq!(args.function, builtins::Builtin::Sum);
                assert_eq!(args.args, vec!["1", "2", "3"]);
                assert!(args.inline);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_serve_subcommand() {
        let cli = Cli::try_parse_from(["offload", "--log-level", "error", "serve", "echo"])
            .expect("serve args should parse");
        assert!(matches!(cli.command, Command::Serve(_)));
    }

    #[test]
    fn rejects_unknown_function() {
        let err = Cli::try_parse_from(["offload", "call", "nope"])
            .expect_err("unknown function should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }

    #[test]
    fn negative_numbers_are_call_arguments() {
        let cli = Cli::try_parse_from(["offload", "call", "sum", "-4", "10"])
            .expect("negative arguments should parse");
        match cli.command {
            Command::Call(args) => assert_eq!(args.args, vec!["-4", "10"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
