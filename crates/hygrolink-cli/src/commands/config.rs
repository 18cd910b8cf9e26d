//! Config command implementation.

use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::cli::ConfigAction;
use crate::config::Config;
use crate::format::format_success;

pub fn cmd_config(action: ConfigAction, path: &Path, config: &Config, no_color: bool) -> Result<()> {
    match action {
        ConfigAction::Path => println!("{}", path.display()),
        ConfigAction::Show => {
            let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
            print!("{}", content);
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                bail!(
                    "Config file already exists: {} (use --force to overwrite)",
                    path.display()
                );
            }
            Config::default().save_to(path)?;
            println!(
                "{}",
                format_success(&format!("Wrote {}", path.display()), no_color)
            );
        }
    }
    Ok(())
}
