//! Human-readable sizes and durations for log lines.

use std::time::Duration;

/// Formats a byte count as a human-readable string (B, KB, MB, GB).
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [(&str, u64); 3] = [("GB", 1 << 30), ("MB", 1 << 20), ("KB", 1 << 10)];

    UNITS
        .iter()
        .find(|(_, size)| bytes >= *size)
        .map_or_else(
            || format!("{bytes} B"),
            |(unit, size)| format!("{:.2} {unit}", bytes as f64 / *size as f64),
        )
}

/// Formats a short duration: milliseconds below one second, otherwise
/// seconds with one decimal.
#[must_use]
pub fn format_elapsed(d: Duration) -> String {
    if d < Duration::from_secs(1) {
        format!("{}ms", d.as_millis())
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn elapsed_switches_units() {
        assert_eq!(format_elapsed(Duration::from_millis(312)), "312ms");
        assert_eq!(format_elapsed(Duration::from_millis(1300)), "1.3s");
        assert_eq!(format_elapsed(Duration::from_secs(42)), "42.0s");
    }
}
