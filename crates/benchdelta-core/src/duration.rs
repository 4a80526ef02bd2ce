//! Duration helpers shared by the renderers, the margins configuration and the
//! record decoders.
//!
//! Everything here works on [`chrono::Duration`], which is signed and keeps
//! nanosecond ticks. Formatting is lossy and only meant for display; the
//! comparison code always works on the full-precision values.

use chrono::Duration;

const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

/// Total nanoseconds of `d` as a float, without going through
/// `num_nanoseconds()` (which fails for spans longer than ~292 years).
pub fn as_nanos_f64(d: Duration) -> f64 {
    d.num_seconds() as f64 * NANOS_PER_SECOND + d.subsec_nanos() as f64
}

/// Seconds of `d` as a float.
pub fn as_secs_f64(d: Duration) -> f64 {
    as_nanos_f64(d) / NANOS_PER_SECOND
}

fn magnitude(d: Duration) -> Duration {
    if d < Duration::zero() {
        -d
    } else {
        d
    }
}

/// Round `d` to the nearest multiple of `unit`, halfway values away from zero.
///
/// A non-positive `unit` or a duration outside the nanosecond range is
/// returned unchanged.
pub fn round_duration(d: Duration, unit: Duration) -> Duration {
    let (Some(n), Some(u)) = (d.num_nanoseconds(), unit.num_nanoseconds()) else {
        return d;
    };
    if u <= 0 {
        return d;
    }
    let n = n as i128;
    let u = u as i128;
    let remainder = (n % u).abs();
    let rounded = if n < 0 {
        if remainder * 2 < u {
            n + remainder
        } else {
            n + remainder - u
        }
    } else if remainder * 2 < u {
        n - remainder
    } else {
        n - remainder + u
    };
    match i64::try_from(rounded) {
        Ok(nanos) => Duration::nanoseconds(nanos),
        Err(_) => d,
    }
}

/// Compact, sign-preserving rendering scaled to the magnitude of `d`:
///
/// ```text
///  30.918273ms     -> 31ms
///  30.918273645s   -> 30.9s
///  1m30.918273645s -> 91s
/// -30.918273ms     -> -31ms
///  999.6ms         -> 1.0s
/// ```
///
/// The band is picked from the rounded value, so a value that rounds up to
/// the next band is printed in that band's unit.
pub fn smart_format(d: Duration) -> String {
    let millis = round_duration(d, Duration::milliseconds(1));
    if magnitude(millis) < Duration::seconds(1) {
        return format!("{}ms", millis.num_milliseconds());
    }
    let tenths = round_duration(d, Duration::milliseconds(100));
    if magnitude(tenths) < Duration::minutes(1) {
        return format!("{:.1}s", tenths.num_milliseconds() as f64 / 1000.0);
    }
    format!("{}s", round_duration(d, Duration::seconds(1)).num_seconds())
}

/// Exact, parseable rendering using the largest unit that divides `d`.
pub fn to_text(d: Duration) -> String {
    let Some(nanos) = d.num_nanoseconds() else {
        return format!("{}s", d.num_seconds());
    };
    if nanos == 0 {
        "0s".to_string()
    } else if nanos % 1_000_000_000 == 0 {
        format!("{}s", nanos / 1_000_000_000)
    } else if nanos % 1_000_000 == 0 {
        format!("{}ms", nanos / 1_000_000)
    } else if nanos % 1_000 == 0 {
        format!("{}us", nanos / 1_000)
    } else {
        format!("{nanos}ns")
    }
}

/// Parse a duration such as `30ms`, `1.5s`, `1m30s` or `-2h`.
///
/// Accepted units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. A bare
/// `0` needs no unit.
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let invalid = |why: &str| format!("invalid duration {text:?}: {why}");

    let mut rest = text.trim();
    let negative = match rest.as_bytes().first() {
        Some(b'-') => {
            rest = &rest[1..];
            true
        }
        Some(b'+') => {
            rest = &rest[1..];
            false
        }
        _ => false,
    };
    if rest == "0" {
        return Ok(Duration::zero());
    }
    if rest.is_empty() {
        return Err(invalid("empty"));
    }

    let mut total: i128 = 0;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let number = &rest[..number_end];
        rest = &rest[number_end..];
        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        rest = &rest[unit_end..];

        if number.is_empty() || number == "." {
            return Err(invalid("expected a number"));
        }
        let scale: i128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 3_600 * 1_000_000_000,
            "" => return Err(invalid("missing unit")),
            other => return Err(invalid(&format!("unknown unit {other:?}"))),
        };

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if fraction.contains('.') {
            return Err(invalid("more than one decimal point"));
        }
        let whole: i128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid("number out of range"))?
        };
        let mut value = whole
            .checked_mul(scale)
            .ok_or_else(|| invalid("out of range"))?;
        let fraction = &fraction[..fraction.len().min(18)];
        if !fraction.is_empty() {
            let digits: i128 = fraction
                .parse()
                .map_err(|_| invalid("bad fraction"))?;
            value += digits * scale / 10i128.pow(fraction.len() as u32);
        }
        total = total
            .checked_add(value)
            .filter(|t| *t <= i64::MAX as i128)
            .ok_or_else(|| invalid("out of range"))?;
    }

    let nanos = total as i64;
    Ok(Duration::nanoseconds(if negative { -nanos } else { nanos }))
}

/// Serde adapter writing a duration as integer nanoseconds.
pub mod serde_nanos {
    use chrono::Duration;
    use serde::{de::Error as _, ser::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match d.num_nanoseconds() {
            Some(nanos) => serializer.serialize_i64(nanos),
            None => Err(S::Error::custom("duration exceeds nanosecond range")),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let nanos = i64::deserialize(deserializer)?;
        if nanos == i64::MIN {
            return Err(D::Error::custom("duration exceeds nanosecond range"));
        }
        Ok(Duration::nanoseconds(nanos))
    }
}

/// Serde adapter for human-written durations: serialises as text (`"30ms"`),
/// accepts either text or integer nanoseconds.
pub mod serde_text {
    use chrono::Duration;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Nanos(i64),
    }

    pub fn serialize<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::to_text(*d))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => super::parse_duration(&text).map_err(D::Error::custom),
            Raw::Nanos(nanos) => Ok(Duration::nanoseconds(nanos)),
        }
    }
}
