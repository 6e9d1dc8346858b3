/// Human-readable byte sizes.
///
/// Sizes use binary multiples: `1kb == 1024`. Units are case-insensitive,
/// may be separated from the number by whitespace, and the number may carry
/// a fractional part (`1.5gb`). A bare number is a byte count.
use crate::ConfigError;

const KIB: u64 = 1024;

/// Parses a size such as `"1gb"`, `"512 MiB"`, `"1.5k"` or `"4096"`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidSize`] for an empty or negative number, an
/// unknown unit, or a result that does not fit in a `u64`.
pub fn parse_size(input: &str) -> Result<u64, ConfigError> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    if number.is_empty() {
        return Err(bad_size(input, "missing number"));
    }

    let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => KIB,
        "m" | "mb" | "mib" => KIB.pow(2),
        "g" | "gb" | "gib" => KIB.pow(3),
        "t" | "tb" | "tib" => KIB.pow(4),
        "p" | "pb" | "pib" => KIB.pow(5),
        other => return Err(bad_size(input, &format!("unknown unit {other:?}"))),
    };

    if number.contains('.') {
        let value: f64 = number
            .parse()
            .map_err(|_| bad_size(input, "malformed number"))?;
        let bytes = (value * multiplier as f64).round();
        if !bytes.is_finite() || bytes >= u64::MAX as f64 {
            return Err(bad_size(input, "size too large"));
        }
        Ok(bytes as u64)
    } else {
        let value: u64 = number
            .parse()
            .map_err(|_| bad_size(input, "malformed number"))?;
        value
            .checked_mul(multiplier)
            .ok_or_else(|| bad_size(input, "size too large"))
    }
}

/// Renders a byte count for log lines: `"512 B"`, `"1.50 KiB"`, `"2.00 GiB"`.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];

    if bytes < KIB {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= KIB as f64 && unit < UNITS.len() - 1 {
        value /= KIB as f64;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

fn bad_size(input: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidSize {
        input: input.to_string(),
        reason: reason.to_string(),
    }
}
