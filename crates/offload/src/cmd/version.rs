use comfy_table::{presets::UTF8_FULL, Table};
use offload::frame::{channel_name, CONTROL, DEFAULT_MAX_PAYLOAD, ENVELOPE, HEADER_SIZE, MAGIC};
use serde::Serialize;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::OutputFormat;

/// What a caller needs to know before pairing this binary with a worker.
#[derive(Debug, Serialize)]
struct BuildInfo {
    name: &'static str,
    version: &'static str,
    target: &'static str,
    target_os: &'static str,
    target_arch: &'static str,
    git_hash: &'static str,
    wire: WireInfo,
}

#[derive(Debug, Serialize)]
struct WireInfo {
    magic: String,
    header_size: usize,
    channels: Vec<ChannelInfo>,
    max_payload_default: usize,
}

#[derive(Debug, Serialize)]
struct ChannelInfo {
    id: u16,
    name: &'static str,
}

impl BuildInfo {
    fn current() -> Self {
        Self {
            name: "offload",
            version: env!("CARGO_PKG_VERSION"),
            target: option_env!("OFFLOAD_BUILD_TARGET").unwrap_or("unknown"),
            target_os: std::env::consts::OS,
            target_arch: std::env::consts::ARCH,
            git_hash: option_env!("GIT_HASH").unwrap_or("unknown"),
            wire: WireInfo {
                magic: String::from_utf8_lossy(&MAGIC).into_owned(),
                header_size: HEADER_SIZE,
                channels: [CONTROL, ENVELOPE]
                    .into_iter()
                    .map(|id| ChannelInfo {
                        id,
                        name: channel_name(id),
                    })
                    .collect(),
                max_payload_default: DEFAULT_MAX_PAYLOAD,
            },
        }
    }

    fn rows(&self) -> Vec<(&'static str, String)> {
        let channels = self
            .wire
            .channels
            .iter()
            .map(|channel| format!("{}={}", channel.id, channel.name))
            .collect::<Vec<_>>()
            .join(", ");
        vec![
            ("version", self.version.to_string()),
            ("target", self.target.to_string()),
            ("target_os", self.target_os.to_string()),
            ("target_arch", self.target_arch.to_string()),
            ("git_hash", self.git_hash.to_string()),
            ("wire_magic", self.wire.magic.clone()),
            ("wire_header_size", self.wire.header_size.to_string()),
            ("wire_channels", channels),
            ("max_payload_default", self.wire.max_payload_default.to_string()),
        ]
    }
}

pub fn run(args: VersionArgs, format: OutputFormat) -> CliResult<i32> {
    let info = BuildInfo::current();
    if !args.extended {
        println!("{} {}", info.name, info.version);
        return Ok(SUCCESS);
    }

    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string(&info).unwrap_or_else(|_| "{}".to_string())
        ),
        OutputFormat::Table => {
            let mut table = Table::new();
            table.load_preset(UTF8_FULL).set_header(vec!["KEY", "VALUE"]);
            for (key, value) in info.rows() {
                table.add_row(vec![key.to_string(), value]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for (key, value) in info.rows() {
                println!("{key}: {value}");
            }
        }
    }
    Ok(SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_info_describes_the_wire() {
        let info = BuildInfo::current();
        assert_eq!(info.wire.magic, "OF");

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["wire"]["channels"][1]["id"], ENVELOPE);
        assert_eq!(json["wire"]["max_payload_default"], DEFAULT_MAX_PAYLOAD);
    }

    #[test]
    fn rows_lead_with_the_version() {
        let rows = BuildInfo::current().rows();
        assert_eq!(rows[0], ("version", env!("CARGO_PKG_VERSION").to_string()));
        assert!(rows.iter().any(|(key, _)| *key == "wire_channels"));
    }
}
