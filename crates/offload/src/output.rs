use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use offload::rpc::RemoteError;
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// How one call ended, as far as the CLI reports it.
#[derive(Debug)]
pub enum Outcome<'a> {
    Value(&'a Value),
    Failed(&'a RemoteError),
}

#[derive(Serialize)]
struct OutcomeOutput<'a> {
    function: &'a str,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorOutput<'a>>,
}

#[derive(Serialize)]
struct ErrorOutput<'a> {
    name: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stack: Option<&'a str>,
}

pub fn print_outcome(function: &str, outcome: &Outcome<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&outcome_output(function, outcome))
                    .unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let (ok, detail) = match outcome {
                Outcome::Value(value) => ("true", value.to_string()),
                Outcome::Failed(err) => ("false", err.to_string()),
            };
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FUNCTION", "OK", "RESULT"])
                .add_row(vec![function, ok, detail.as_str()]);
            println!("{table}");
        }
        OutputFormat::Pretty => match outcome {
            Outcome::Value(value) => println!(
                "{function} -> {}",
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            ),
            Outcome::Failed(err) => {
                println!("{function} failed: {err}");
                if let Some(stack) = err.stack() {
                    println!("{stack}");
                }
            }
        },
        OutputFormat::Raw => {
            let text = match outcome {
                Outcome::Value(Value::String(text)) => text.clone(),
                Outcome::Value(value) => value.to_string(),
                Outcome::Failed(err) => err.to_string(),
            };
            print_raw(text.as_bytes());
        }
    }
}

fn outcome_output<'a>(function: &'a str, outcome: &Outcome<'a>) -> OutcomeOutput<'a> {
    match *outcome {
        Outcome::Value(value) => OutcomeOutput {
            function,
            ok: true,
            value: Some(value),
            error: None,
        },
        Outcome::Failed(err) => OutcomeOutput {
            function,
            ok: false,
            value: None,
            error: Some(ErrorOutput {
                name: err.name(),
                message: err.message(),
                stack: err.stack(),
            }),
        },
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}
