//! Serde helpers for durations written as `<n><unit>` strings.
//!
//! Units: `ms`, `s`, `m`, `h`, `d`. The literal `never` maps to
//! [`Duration::MAX`]. Use with `#[serde(with = "serde_duration")]`.
use serde::{de::Error, Deserialize, Deserializer, Serializer};
use std::time::Duration;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

pub fn format(duration: &Duration) -> String {
    if duration == &Duration::MAX {
        return "never".into();
    }
    if duration.subsec_millis() != 0 || duration.as_secs() == 0 {
        return format!("{}ms", duration.as_millis());
    }
    let secs = duration.as_secs();
    let (value, unit) = match secs {
        s if s % DAY == 0 => (s / DAY, "d"),
        s if s % HOUR == 0 => (s / HOUR, "h"),
        s if s % MINUTE == 0 => (s / MINUTE, "m"),
        s => (s, "s"),
    };
    format!("{value}{unit}")
}

pub fn parse(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration string cannot be empty".into());
    }
    if s == "never" {
        return Ok(Duration::MAX);
    }
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("missing time unit in {s:?}"))?;
    let (value, unit) = s.split_at(split);
    let value = value
        .parse::<u64>()
        .map_err(|err| format!("invalid duration {s:?}: {err}"))?;
    let secs = |scale: u64| {
        value
            .checked_mul(scale)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration {s:?} is too large"))
    };
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => secs(MINUTE),
        "h" => secs(HOUR),
        "d" => secs(DAY),
        _ => Err(format!("invalid time unit {unit:?}, use ms, s, m, h or d")),
    }
}

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format(duration))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse(&s).map_err(D::Error::custom)
}
