//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::builder::FalseyValueParser;
use clap::{Args, Parser, Subcommand, ValueEnum};
use hygrolink_types::BleAddress;

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Reusable output format arguments
#[derive(Debug, Clone, Args)]
pub struct OutputArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Use Fahrenheit as the primary temperature unit (overrides --celsius and config)
    #[arg(long, conflicts_with = "celsius")]
    pub fahrenheit: bool,

    /// Use Celsius as the primary temperature unit (default, overrides config)
    #[arg(long, conflicts_with = "fahrenheit")]
    pub celsius: bool,
}

impl OutputArgs {
    /// Resolve fahrenheit setting: explicit flags override config
    pub fn resolve_fahrenheit(&self, config_fahrenheit: bool) -> bool {
        if self.fahrenheit {
            true
        } else if self.celsius {
            false
        } else {
            config_fahrenheit
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "hygrolink")]
#[command(author, version, about = "CLI for BLE temperature and humidity sensors", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR", value_parser = FalseyValueParser::new())]
    pub no_color: bool,

    /// Output compact JSON (no pretty-printing)
    #[arg(long, global = true)]
    pub compact: bool,

    /// Path to the config file
    #[arg(long, global = true, env = "HYGROLINK_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan for nearby devices until Enter is pressed
    Scan {
        /// Stop after this many seconds instead of waiting for Enter
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Connect to a sensor and print temperature/humidity notifications
    Monitor {
        /// Device address; skips interactive selection
        #[arg(short, long, env = "HYGROLINK_DEVICE")]
        device: Option<BleAddress>,

        /// Scan timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Vendor service short UUID (e.g. 0xFFE5)
        #[arg(long, value_parser = parse_short_uuid)]
        service: Option<u16>,

        /// Telemetry characteristic short UUID (e.g. 0xFFE8)
        #[arg(long, value_parser = parse_short_uuid)]
        characteristic: Option<u16>,

        /// Connect retries after the first attempt
        #[arg(long)]
        retries: Option<u32>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Decode a telemetry frame given as hex
    Decode {
        /// Frame bytes, e.g. "aa aa a2 00 06 00 fa 00 32"
        hex: String,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Manage CLI configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show config file path
    Path,
    /// Show the effective configuration
    Show,
    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Parse a 16-bit UUID written as `0xFFE5`, `FFE5` or `ffe5`.
pub fn parse_short_uuid(s: &str) -> Result<u16, String> {
    let trimmed = s.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() || digits.len() > 4 {
        return Err(format!("'{}' is not a 16-bit UUID", s));
    }
    u16::from_str_radix(digits, 16).map_err(|_| format!("'{}' is not a 16-bit UUID", s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_short_uuid() {
        assert_eq!(parse_short_uuid("0xFFE5"), Ok(0xFFE5));
        assert_eq!(parse_short_uuid("ffe8"), Ok(0xFFE8));
        assert_eq!(parse_short_uuid("0X2902"), Ok(0x2902));
        assert!(parse_short_uuid("0x").is_err());
        assert!(parse_short_uuid("12345").is_err());
        assert!(parse_short_uuid("zz").is_err());
    }

    #[test]
    fn test_resolve_fahrenheit() {
        let args = |fahrenheit, celsius| OutputArgs {
            format: OutputFormat::Text,
            fahrenheit,
            celsius,
        };
        assert!(args(true, false).resolve_fahrenheit(false));
        assert!(!args(false, true).resolve_fahrenheit(true));
        assert!(args(false, false).resolve_fahrenheit(true));
        assert!(!args(false, false).resolve_fahrenheit(false));
    }

    #[test]
    fn test_monitor_parses_device_address() {
        let cli = Cli::try_parse_from([
            "hygrolink",
            "monitor",
            "--device",
            "c4:7c:8d:6a:12:34",
            "--service",
            "0xFFE5",
        ])
        .unwrap();
        match cli.command {
            Commands::Monitor {
                device, service, ..
            } => {
                assert_eq!(device.map(|d| d.to_string()).as_deref(), Some("C4:7C:8D:6A:12:34"));
                assert_eq!(service, Some(0xFFE5));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_monitor_rejects_bad_address() {
        assert!(Cli::try_parse_from(["hygrolink", "monitor", "--device", "nope"]).is_err());
    }
}
