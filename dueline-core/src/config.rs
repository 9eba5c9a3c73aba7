//! Configuration helpers shared by the service crates.

use crate::error::ConfigError;
use std::time::Duration;

/// Parse a duration from configuration text.
///
/// Accepts a bare number of seconds (`"60"`) or one or more
/// `<number><unit>` groups with units `ms`, `s`, `m`, `h` (`"250ms"`,
/// `"5m"`, `"1h30m"`). Surrounding whitespace and a single pair of
/// matching quotes are stripped first.
pub fn parse_duration(field: &str, raw: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidValue {
        field: field.to_string(),
        value: raw.to_string(),
        reason: reason.to_string(),
    };

    let mut text = raw.trim();
    if text.len() >= 2 {
        let bytes = text.as_bytes();
        let first = bytes[0];
        if (first == b'"' || first == b'\'') && bytes[text.len() - 1] == first {
            text = text[1..text.len() - 1].trim();
        }
    }
    if text.is_empty() {
        return Err(invalid("empty duration"));
    }

    if let Ok(secs) = text.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = text;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(invalid("expected a number like 10s, 5m or 250ms"));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| invalid("malformed number"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let seconds_per_unit = match &rest[..unit_len] {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => return Err(invalid("missing unit after number")),
            _ => return Err(invalid("unknown unit, use ms, s, m or h")),
        };
        rest = &rest[unit_len..];

        total += Duration::try_from_secs_f64(value * seconds_per_unit)
            .map_err(|_| invalid("duration out of range"))?;
    }

    Ok(total)
}
