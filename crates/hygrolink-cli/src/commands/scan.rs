//! Scan command implementation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use hygrolink_core::{BtleplugStack, EventDispatcher, ScanSession};

use super::{InputLines, ScanEnd, scan_until};
use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_discovered, format_info, format_warning};

pub async fn cmd_scan(
    timeout: Option<u64>,
    format: OutputFormat,
    quiet: bool,
    opts: &FormatOptions,
) -> Result<()> {
    let stack = Arc::new(
        BtleplugStack::new()
            .await
            .context("Failed to open Bluetooth adapter")?,
    );
    let events = EventDispatcher::default();
    let mut rx = events.subscribe();
    let session = ScanSession::new(stack, events);
    let mut input = InputLines::stdin();

    if !quiet {
        let message = match timeout {
            Some(secs) => format!(
                "Scanning for devices for {}s. Press Enter to stop scanning.",
                secs
            ),
            None => "Scanning for devices. Press Enter to stop scanning.".to_string(),
        };
        eprintln!("{}", format_info(&message, opts.no_color));
    }

    let end = scan_until(
        &session,
        &mut rx,
        &mut input,
        timeout.map(Duration::from_secs),
        |record| {
            if format == OutputFormat::Text {
                println!("{}", format_discovered(record, opts));
            }
            false
        },
    )
    .await
    .context("Failed to scan for devices")?;

    let devices = session.registry().devices();
    match format {
        OutputFormat::Json => print!("{}", opts.as_json(&devices)?),
        OutputFormat::Text => {
            if devices.is_empty() && !quiet {
                eprintln!("{}", format_warning("No devices found", opts.no_color));
            }
        }
    }

    if end == ScanEnd::Interrupted && !quiet {
        eprintln!("\nScan interrupted.");
    }
    Ok(())
}
