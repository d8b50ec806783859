//! Interval parsing for the periodic sync loop.

use std::time::Duration;

use anyhow::Context;

/// Longest accepted interval: one year.
const MAX_INTERVAL_SECS: u64 = 366 * 24 * 3600;

/// Parse an interval like "1h", "5m", "300s" or "300" (seconds).
pub fn parse_interval(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("Empty interval string");
    }

    let (number, unit) = match s.char_indices().last() {
        Some((i, 'h')) => (&s[..i], 3600),
        Some((i, 'm')) => (&s[..i], 60),
        Some((i, 's')) => (&s[..i], 1),
        _ => (s, 1),
    };
    let value: u64 = number
        .parse()
        .with_context(|| format!("Invalid interval value: {s}"))?;
    if value == 0 {
        anyhow::bail!("Interval must be greater than zero: {s}");
    }
    let secs = value
        .checked_mul(unit)
        .filter(|secs| *secs <= MAX_INTERVAL_SECS)
        .with_context(|| format!("Interval too long: {s}"))?;
    Ok(Duration::from_secs(secs))
}
