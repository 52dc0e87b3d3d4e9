//! Interval strings such as `30s`, `5m`, `2h` or `1d`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::IntervalError;

/// Parse an interval string into a number of seconds.
///
/// Accepts a decimal magnitude followed by one unit letter (`s`, `m`, `h`,
/// `d`, case-insensitive). Whitespace is allowed around the string and
/// between the magnitude and the unit. Zero is rejected.
pub fn parse_interval(input: &str) -> Result<u64, IntervalError> {
    let invalid = || IntervalError::Invalid {
        input: input.to_string(),
    };

    let trimmed = input.trim();
    let digits_end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(invalid)?;
    if digits_end == 0 {
        return Err(invalid());
    }

    let (magnitude, rest) = trimmed.split_at(digits_end);
    let mut unit = rest.trim_start().chars();
    let multiplier = match (unit.next(), unit.next()) {
        (Some(c), None) => match c.to_ascii_lowercase() {
            's' => 1,
            'm' => 60,
            'h' => 60 * 60,
            'd' => 60 * 60 * 24,
            _ => return Err(invalid()),
        },
        _ => return Err(invalid()),
    };

    let magnitude: u64 = magnitude.parse().map_err(|_| invalid())?;
    if magnitude == 0 {
        return Err(IntervalError::Invalid { input: "0".into() });
    }

    magnitude.checked_mul(multiplier).ok_or_else(invalid)
}

/// A strictly positive number of seconds.
///
/// Deserializes from an integer number of seconds or from an interval
/// string accepted by [`parse_interval`]. Always serializes as seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interval(u64);

impl Interval {
    pub fn from_secs(secs: u64) -> Result<Self, IntervalError> {
        if secs == 0 {
            return Err(IntervalError::Invalid { input: "0".into() });
        }
        Ok(Self(secs))
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.0)
    }
}

impl FromStr for Interval {
    type Err = IntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_interval(s).map(Self)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

impl Serialize for Interval {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for Interval {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Interval::from_secs(secs),
            Raw::Text(text) => text.parse(),
        }
        .map_err(serde::de::Error::custom)
    }
}
