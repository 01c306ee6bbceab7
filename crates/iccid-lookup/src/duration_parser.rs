use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

use crate::errors::LookupError;

/// Parse human-readable duration strings.
/// Supports formats like: "7s", "200ms", "1.5s", "700" (milliseconds), "1m"
pub fn parse_duration(input: &str) -> Result<Duration, LookupError> {
    let input = input.trim();

    // Plain number means milliseconds
    if let Ok(ms) = input.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }

    let (number_part, unit_part) = split_number_and_unit(input)?;
    let value: f64 = number_part.trim().parse().map_err(|_| {
        LookupError::InvalidConfig(format!("invalid number in duration: {number_part:?}"))
    })?;
    if !value.is_finite() || value < 0.0 {
        return Err(LookupError::InvalidConfig(format!(
            "duration must be a non-negative number: {input:?}"
        )));
    }

    let multiplier = match unit_part {
        "ms" | "milliseconds" | "millisecond" => 1.0,
        "s" | "sec" | "secs" | "second" | "seconds" => 1000.0,
        "m" | "min" | "mins" | "minute" | "minutes" => 60_000.0,
        _ => {
            return Err(LookupError::InvalidConfig(format!(
                "unknown time unit: {unit_part:?}"
            )))
        }
    };

    Ok(Duration::from_millis((value * multiplier).round() as u64))
}

fn split_number_and_unit(input: &str) -> Result<(&str, &str), LookupError> {
    let split_pos = input
        .char_indices()
        .find(|(_, ch)| ch.is_alphabetic())
        .map(|(i, _)| i)
        .unwrap_or(input.len());

    let number_part = &input[..split_pos];
    let unit_part = input[split_pos..].trim();

    if number_part.trim().is_empty() {
        return Err(LookupError::InvalidConfig(format!(
            "no numeric value in duration: {input:?}"
        )));
    }

    Ok((number_part, unit_part))
}

/// Serde adapter: accepts either a bare millisecond count or a duration string.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Millis(ms) => Ok(Duration::from_millis(ms)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format!("{}ms", duration.as_millis()))
}
