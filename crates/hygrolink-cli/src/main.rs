mod cli;
mod commands;
mod config;
mod format;

use std::io;
use std::time::Duration;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use commands::{MonitorArgs, cmd_config, cmd_decode, cmd_monitor, cmd_scan};
use config::{Config, resolve_timeout};
use format::FormatOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle completions command early (before tracing init)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "hygrolink", &mut io::stdout());
        return Ok(());
    }

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let (config, config_error) = match Config::load_from(&config_path) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .ok()
            .or_else(|| {
                config
                    .log_level
                    .as_deref()
                    .and_then(|level| EnvFilter::try_new(level).ok())
            })
            .unwrap_or_else(|| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    if let Some(e) = config_error {
        tracing::warn!("{:#}; using defaults", e);
    }

    match cli.command {
        Commands::Scan { timeout, format } => {
            let opts = FormatOptions::new(cli.no_color, config.fahrenheit).with_compact(cli.compact);
            cmd_scan(resolve_timeout(timeout, &config), format, cli.quiet, &opts).await?;
        }
        Commands::Monitor {
            device,
            timeout,
            service,
            characteristic,
            retries,
            output,
        } => {
            let opts = FormatOptions::new(cli.no_color, output.resolve_fahrenheit(config.fahrenheit))
                .with_compact(cli.compact);
            let args = MonitorArgs {
                device,
                scan_timeout: resolve_timeout(timeout, &config).map(Duration::from_secs),
                connect_timeout: Duration::from_secs(config.connect_timeout),
                service: service.unwrap_or(config.service_uuid),
                characteristic: characteristic.unwrap_or(config.characteristic_uuid),
                retries: retries.unwrap_or(config.connect_retries),
                format: output.format,
                quiet: cli.quiet,
            };
            cmd_monitor(args, &opts).await?;
        }
        Commands::Decode { hex, output } => {
            let opts = FormatOptions::new(cli.no_color, output.resolve_fahrenheit(config.fahrenheit))
                .with_compact(cli.compact);
            cmd_decode(&hex, output.format, &opts)?;
        }
        Commands::Config { action } => {
            cmd_config(action, &config_path, &config, cli.no_color)?;
        }
        Commands::Completions { .. } => {
            // Already handled above
            unreachable!()
        }
    }

    Ok(())
}
