//! Parsing of Kubernetes-style duration strings
//!
//! CRD specs express credential validity as strings like `"30s"`, `"5m"`,
//! `"24h"`, or `"90d"`.

use std::time::Duration;

use crate::{Error, Result};

/// Parse a Kubernetes duration string (`<number><unit>`, units s/m/h/d).
pub fn parse_duration(input: &str) -> Result<Duration> {
    let trimmed = input.trim();
    let Some((idx, unit)) = trimmed.char_indices().last() else {
        return Err(Error::validation("duration cannot be empty"));
    };

    let value: u64 = trimmed[..idx].parse().map_err(|_| {
        Error::validation(format!(
            "invalid duration {trimmed:?}, expected <number><unit> (e.g. \"30s\", \"5m\", \"24h\", \"90d\")"
        ))
    })?;
    if value == 0 {
        return Err(Error::validation(format!(
            "duration {trimmed:?} must be greater than zero"
        )));
    }

    let per_unit = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 86400,
        other => {
            return Err(Error::validation(format!(
                "invalid duration unit {other:?} in {trimmed:?}, expected s, m, h, or d"
            )))
        }
    };

    value
        .checked_mul(per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| Error::validation(format!("duration {trimmed:?} is out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("30s", 30)]
    #[case("5m", 300)]
    #[case("24h", 86_400)]
    #[case("90d", 7_776_000)]
    #[case(" 1h ", 3600)]
    fn test_parses_valid_durations(#[case] input: &str, #[case] seconds: u64) {
        assert_eq!(parse_duration(input).unwrap(), Duration::from_secs(seconds));
    }

    #[rstest]
    #[case("")]
    #[case("h")]
    #[case("0m")]
    #[case("1w")]
    #[case("1.5h")]
    #[case("-1h")]
    fn test_rejects_invalid_durations(#[case] input: &str) {
        assert!(parse_duration(input).is_err());
    }
}
