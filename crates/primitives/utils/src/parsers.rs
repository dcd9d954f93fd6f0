use anyhow::{anyhow, bail};
use std::time::Duration;

/// Parses a duration with a unit suffix, such as `200ms`, `2s`, `5min` or `1h`.
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    let split_index = s.find(|c: char| !c.is_ascii_digit()).ok_or_else(|| anyhow!("Invalid duration format: {s}"))?;

    let (value_str, suffix) = s.split_at(split_index);
    let value: u64 = value_str.parse().map_err(|_| anyhow!("Invalid duration value: {value_str}"))?;

    match suffix.trim() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "min" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        _ => bail!("Invalid duration suffix: {suffix}. Expected 'ms', 's', 'min' or 'h'."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("2s", Duration::from_secs(2))]
    #[case("200ms", Duration::from_millis(200))]
    #[case("5min", Duration::from_secs(300))]
    #[case("1 min", Duration::from_secs(60))]
    #[case("1h", Duration::from_secs(3600))]
    fn valid_durations(#[case] input: &str, #[case] expected: Duration) {
        assert_eq!(parse_duration(input).unwrap(), expected);
    }

    #[rstest]
    #[case("2x")]
    #[case("200")]
    #[case("ms200")]
    #[case("-5s")]
    #[case("1.5s")]
    fn invalid_durations(#[case] input: &str) {
        assert!(parse_duration(input).is_err());
    }
}
