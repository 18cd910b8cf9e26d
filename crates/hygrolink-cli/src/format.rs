//! Output formatting for text and JSON.

use anyhow::Result;
use hygrolink_core::DeviceRecord;
use hygrolink_types::{BleAddress, Telemetry, TemperatureUnit};
use owo_colors::OwoColorize;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;

use crate::cli::OutputFormat;

/// Formatting options for output.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatOptions {
    /// Disable colored output.
    pub no_color: bool,
    /// Use Fahrenheit as the primary temperature unit.
    pub fahrenheit: bool,
    /// Use compact JSON output (no pretty-printing).
    pub compact: bool,
}

impl FormatOptions {
    pub fn new(no_color: bool, fahrenheit: bool) -> Self {
        Self {
            no_color,
            fahrenheit,
            compact: false,
        }
    }

    /// Create with compact JSON option.
    pub fn with_compact(mut self, compact: bool) -> Self {
        self.compact = compact;
        self
    }

    /// Serialize value to JSON string, respecting compact option.
    pub fn as_json<T: Serialize>(&self, value: &T) -> Result<String> {
        let json = if self.compact {
            serde_json::to_string(value)?
        } else {
            serde_json::to_string_pretty(value)?
        };
        Ok(json + "\n")
    }

    fn primary_unit(&self) -> TemperatureUnit {
        if self.fahrenheit {
            TemperatureUnit::Fahrenheit
        } else {
            TemperatureUnit::Celsius
        }
    }

    fn secondary_unit(&self) -> TemperatureUnit {
        if self.fahrenheit {
            TemperatureUnit::Celsius
        } else {
            TemperatureUnit::Fahrenheit
        }
    }

    /// Format temperature in the primary unit with the other in parentheses,
    /// e.g. `25.0°C (77.0°F)`.
    #[must_use]
    pub fn format_temp(&self, celsius: f32) -> String {
        let primary = self.primary_unit();
        let secondary = self.secondary_unit();
        format!(
            "{:.1}{} ({:.1}{})",
            primary.from_celsius(celsius),
            primary,
            secondary.from_celsius(celsius),
            secondary
        )
    }
}

/// Line printed when a device is first seen.
#[must_use]
pub fn format_discovered(record: &DeviceRecord, opts: &FormatOptions) -> String {
    let tag = format!("[{}]", record.index);
    if opts.no_color {
        format!("{} Device found: {} ({})", tag, record.name, record.address)
    } else {
        format!(
            "{} Device found: {} ({})",
            tag.cyan(),
            record.name.bold(),
            record.address
        )
    }
}

/// Text block for one reading.
#[must_use]
pub fn format_reading_text(reading: &Telemetry, opts: &FormatOptions) -> String {
    let temperature = opts.format_temp(reading.temperature_celsius);
    let humidity = format!("{:.1}%", reading.humidity_percent);
    let (temperature, humidity) = if opts.no_color {
        (temperature, humidity)
    } else {
        (
            temperature.green().to_string(),
            humidity.green().to_string(),
        )
    };
    format!(
        "Raw Data: {}\nTemperature: {}\nHumidity: {}\n",
        reading.hex_dump(),
        temperature,
        humidity
    )
}

/// One reading as printed by `decode` and `monitor`, newline-terminated.
pub fn format_reading(
    address: Option<BleAddress>,
    reading: &Telemetry,
    format: OutputFormat,
    opts: &FormatOptions,
) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(format_reading_text(reading, opts)),
        OutputFormat::Json => opts.as_json(&ReadingJson::new(address, reading, opts)),
    }
}

/// JSON shape of one reading.
#[derive(Debug, Serialize)]
pub struct ReadingJson {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<BleAddress>,
    pub raw: String,
    pub temperature: f32,
    pub temperature_unit: TemperatureUnit,
    pub temperature_celsius: f32,
    pub temperature_fahrenheit: f32,
    pub humidity_percent: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received_at: Option<String>,
}

impl ReadingJson {
    pub fn new(address: Option<BleAddress>, reading: &Telemetry, opts: &FormatOptions) -> Self {
        let unit = opts.primary_unit();
        Self {
            address,
            raw: reading.hex_dump(),
            temperature: reading.temperature_in(unit),
            temperature_unit: unit,
            temperature_celsius: reading.temperature_celsius,
            temperature_fahrenheit: reading.temperature_fahrenheit(),
            humidity_percent: reading.humidity_percent,
            received_at: reading.received_at.and_then(|at| at.format(&Rfc3339).ok()),
        }
    }
}

/// Format a success message.
pub fn format_success(message: &str, no_color: bool) -> String {
    if no_color {
        format!("[OK] {}", message)
    } else {
        format!("{} {}", "[OK]".green(), message)
    }
}

/// Format an info message.
pub fn format_info(message: &str, no_color: bool) -> String {
    if no_color {
        format!("[i] {}", message)
    } else {
        format!("{} {}", "[i]".cyan(), message)
    }
}

/// Format a warning message.
pub fn format_warning(message: &str, no_color: bool) -> String {
    if no_color {
        format!("[!!] {}", message)
    } else {
        format!("{} {}", "[!!]".yellow(), message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hygrolink_types::decode;
    use time::macros::datetime;

    const FRAME: [u8; 9] = [0xAA, 0xAA, 0xA2, 0x00, 0x06, 0x00, 0xFA, 0x00, 0x32];

    fn plain(fahrenheit: bool) -> FormatOptions {
        FormatOptions::new(true, fahrenheit)
    }

    #[test]
    fn test_format_temp_celsius_primary() {
        assert_eq!(plain(false).format_temp(25.0), "25.0°C (77.0°F)");
    }

    #[test]
    fn test_format_temp_fahrenheit_primary() {
        assert_eq!(plain(true).format_temp(25.0), "77.0°F (25.0°C)");
    }

    #[test]
    fn test_format_reading_text() {
        let reading = decode(&FRAME).unwrap();
        assert_eq!(
            format_reading_text(&reading, &plain(false)),
            "Raw Data: aa aa a2 00 06 00 fa 00 32\nTemperature: 25.0°C (77.0°F)\nHumidity: 5.0%\n"
        );
    }

    #[test]
    fn test_format_reading_ends_with_one_newline() {
        let reading = decode(&FRAME).unwrap();
        for format in [OutputFormat::Text, OutputFormat::Json] {
            let out = format_reading(None, &reading, format, &plain(false).with_compact(true)).unwrap();
            assert!(out.ends_with('\n'), "{:?}", format);
            assert!(!out.ends_with("\n\n"), "{:?}", format);
        }
    }

    #[test]
    fn test_format_discovered() {
        let record = DeviceRecord {
            index: 2,
            name: "ThermoBeacon".to_string(),
            address: BleAddress::new(0xC47C_8D6A_1234),
        };
        assert_eq!(
            format_discovered(&record, &plain(false)),
            "[2] Device found: ThermoBeacon (C4:7C:8D:6A:12:34)"
        );
    }

    #[test]
    fn test_reading_json() {
        let reading = decode(&FRAME)
            .unwrap()
            .with_received_at(datetime!(2026-10-18 12:00:00 UTC));
        let json = ReadingJson::new(None, &reading, &plain(true));
        let value = serde_json::to_value(&json).unwrap();

        assert_eq!(value["temperature"], 77.0);
        assert_eq!(value["temperature_unit"], "fahrenheit");
        assert_eq!(value["temperature_celsius"], 25.0);
        assert_eq!(value["humidity_percent"], 5.0);
        assert_eq!(value["raw"], "aa aa a2 00 06 00 fa 00 32");
        assert_eq!(value["received_at"], "2026-10-18T12:00:00Z");
        assert!(value.get("address").is_none());
    }

    #[test]
    fn test_as_json_compact() {
        let opts = FormatOptions::default().with_compact(true);
        assert_eq!(opts.as_json(&[1, 2]).unwrap(), "[1,2]\n");
    }

    #[test]
    fn test_message_prefixes() {
        assert_eq!(format_success("done", true), "[OK] done");
        assert_eq!(format_info("note", true), "[i] note");
        assert_eq!(format_warning("careful", true), "[!!] careful");
    }
}
