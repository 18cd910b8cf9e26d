//! Offline frame decoding.

use anyhow::{Context, Result};
use hygrolink_types::{decode, parse_hex};

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_reading};

pub fn cmd_decode(hex: &str, format: OutputFormat, opts: &FormatOptions) -> Result<()> {
    let bytes = parse_hex(hex).context("Failed to parse frame")?;
    let reading = decode(&bytes).context("Failed to decode frame")?;

    print!("{}", format_reading(None, &reading, format, opts)?);
    Ok(())
}
