//! Lenient deserialisers for OKX payloads.
//!
//! OKX encodes numerics as JSON strings, sometimes empty, sometimes missing. Anything that
//! cannot be read as a finite number deserialises to `None` rather than failing the whole
//! payload, so a single bad field narrows to an absent value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, de::IgnoredAny};

#[derive(Deserialize)]
#[serde(untagged)]
enum LenientFloat {
    Num(f64),
    Str(String),
    Other(IgnoredAny),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LenientInt {
    Int(i64),
    Str(String),
    Other(IgnoredAny),
}

/// Deserialize a string or number as an optional finite `f64`.
pub fn de_lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = match Option::<LenientFloat>::deserialize(deserializer)? {
        Some(LenientFloat::Num(value)) => Some(value),
        Some(LenientFloat::Str(raw)) => raw.trim().parse::<f64>().ok(),
        Some(LenientFloat::Other(_)) | None => None,
    };

    Ok(value.filter(|value| value.is_finite()))
}

/// Deserialize a string or number as an optional `i64`.
pub fn de_lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<LenientInt>::deserialize(deserializer)? {
        Some(LenientInt::Int(value)) => Some(value),
        Some(LenientInt::Str(raw)) => raw.trim().parse::<i64>().ok(),
        Some(LenientInt::Other(_)) | None => None,
    })
}

/// Deserialize a string or number as an optional `String`, keeping the raw text.
pub fn de_lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum LenientString {
        Str(String),
        Int(i64),
        Num(f64),
        Other(IgnoredAny),
    }

    Ok(match Option::<LenientString>::deserialize(deserializer)? {
        Some(LenientString::Str(raw)) if !raw.is_empty() => Some(raw),
        Some(LenientString::Int(value)) => Some(value.to_string()),
        Some(LenientString::Num(value)) => Some(value.to_string()),
        Some(_) | None => None,
    })
}

/// Deserialize a string or number epoch millisecond timestamp as an optional [`DateTime<Utc>`].
pub fn de_lenient_epoch_ms<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    de_lenient_i64(deserializer).map(|ms| ms.and_then(DateTime::from_timestamp_millis))
}
