//! H5075 payload decoding.
//!
//! The sensor packs temperature and humidity into one 24-bit unsigned
//! integer and reports battery as a plain byte. These conversions are total:
//! every input yields a value, and range checking is left to the caller.

/// Largest value the packed 24-bit reading can carry.
pub const MAX_ENCODED_READING: u32 = 0x00FF_FFFF;

/// Temperature in degrees Celsius.
pub fn decode_temperature_celsius(encoded: u32) -> f64 {
    f64::from(encoded) / 10_000.0
}

/// Temperature in degrees Fahrenheit.
pub fn decode_temperature_fahrenheit(encoded: u32) -> f64 {
    decode_temperature_celsius(encoded) * 1.8 + 32.0
}

/// Relative humidity in percent, always within `0.0..=99.9`.
pub fn decode_humidity_percent(encoded: u32) -> f64 {
    f64::from(encoded % 1000) / 10.0
}

/// Battery level in percent. Values above 100 pass through unchanged.
pub fn decode_battery_percent(encoded: u8) -> u8 {
    encoded
}

/// One decoded temperature/humidity sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature_c: f64,
    pub temperature_f: f64,
    pub humidity_pct: f64,
}

impl Reading {
    pub fn decode(encoded: u32) -> Self {
        Self {
            temperature_c: decode_temperature_celsius(encoded),
            temperature_f: decode_temperature_fahrenheit(encoded),
            humidity_pct: decode_humidity_percent(encoded),
        }
    }
}

/// Render a decoded value the way the table shows it: two fractional digits.
pub fn format_fixed(value: f64) -> String {
    format!("{value:.2}")
}
