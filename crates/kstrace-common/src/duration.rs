//! Parsing of duration flags such as `--trace-timeout 1m30s`.
//!
//! Accepts a bare `0`, or a sequence of decimal numbers each followed by a
//! unit (`ns`, `us`, `µs`, `ms`, `s`, `m`, `h`), e.g. `300ms`, `1.5h`, `2h45m`.

use std::time::Duration;

use crate::error::{KstraceError, Result};

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Parses a duration string into a non-negative [`Duration`].
///
/// # Errors
///
/// Returns a validation error for empty input, a missing or unknown unit,
/// a malformed number, or a negative duration.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let invalid = |why: &str| KstraceError::validation(format!("invalid duration {input:?}: {why}"));

    let s = input.trim();
    let (negative, mut rest) = match s.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(invalid("empty"));
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);

        if unit.is_empty() {
            return Err(invalid("missing unit"));
        }
        let scale = unit_nanos(unit).ok_or_else(|| invalid(&format!("unknown unit {unit:?}")))?;
        total = total
            .checked_add(scale_number(number, scale).ok_or_else(|| invalid("bad number"))?)
            .ok_or_else(|| invalid("overflow"))?;
        rest = tail;
    }

    if negative && total > 0 {
        return Err(invalid("must not be negative"));
    }
    let secs = u64::try_from(total / NANOS_PER_SEC).map_err(|_| invalid("overflow"))?;
    #[allow(clippy::cast_possible_truncation)]
    let nanos = (total % NANOS_PER_SEC) as u32;
    Ok(Duration::new(secs, nanos))
}

fn unit_nanos(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" | "μs" => Some(NANOS_PER_MICRO),
        "ms" => Some(NANOS_PER_MILLI),
        "s" => Some(NANOS_PER_SEC),
        "m" => Some(60 * NANOS_PER_SEC),
        "h" => Some(3600 * NANOS_PER_SEC),
        _ => None,
    }
}

/// Scales `whole[.frac]` by `scale` nanoseconds, truncating below 1ns.
fn scale_number(number: &str, scale: u128) -> Option<u128> {
    let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if frac.contains('.') {
        return None;
    }
    let whole_value = if whole.is_empty() {
        0
    } else {
        whole.parse::<u128>().ok()?
    };
    let mut value = whole_value.checked_mul(scale)?;

    let frac = &frac[..frac.len().min(18)];
    if !frac.is_empty() {
        let digits = u32::try_from(frac.len()).ok()?;
        let frac_value = frac.parse::<u128>().ok()?;
        value = value.checked_add(frac_value.checked_mul(scale)? / 10u128.pow(digits))?;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_unbounded() {
        assert_eq!(parse_duration("0").ok(), Some(Duration::ZERO));
        assert_eq!(parse_duration("-0").ok(), Some(Duration::ZERO));
    }

    #[test]
    fn single_units() {
        assert_eq!(parse_duration("5s").ok(), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("300ms").ok(), Some(Duration::from_millis(300)));
        assert_eq!(parse_duration("2m").ok(), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h").ok(), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("10us").ok(), Some(Duration::from_micros(10)));
        assert_eq!(parse_duration("7ns").ok(), Some(Duration::from_nanos(7)));
    }

    #[test]
    fn compound_and_fractional() {
        assert_eq!(parse_duration("1h30m").ok(), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("1.5s").ok(), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration(".5m").ok(), Some(Duration::from_secs(30)));
        assert_eq!(
            parse_duration("2h45m10.25s").ok(),
            Some(Duration::from_millis((2 * 3600 + 45 * 60 + 10) * 1000 + 250))
        );
    }

    #[test]
    fn rejects_negative() {
        assert!(parse_duration("-5s").is_err());
    }

    #[test]
    fn rejects_malformed() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("1..2s").is_err());
        assert!(parse_duration(".s").is_err());
    }
}
