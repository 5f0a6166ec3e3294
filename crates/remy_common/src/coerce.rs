//! Lenient numeric deserialization.
//!
//! Upstream language models and older pending-action payloads sometimes carry
//! numbers as JSON strings ("2" instead of 2). Every numeric field that can
//! cross that boundary deserializes through these helpers, so scaling math
//! further down never sees a string-typed quantity. This is the single place
//! where the coercion happens.

use serde::de::{self, Deserializer, Unexpected, Visitor};
use std::fmt;

struct LenientF64;

impl<'de> Visitor<'de> for LenientF64 {
    type Value = f64;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a number or a numeric string")
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
        Ok(v)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
        Ok(v as f64)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
        Ok(v as f64)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
        v.trim()
            .parse::<f64>()
            .map_err(|_| de::Error::invalid_value(Unexpected::Str(v), &self))
    }
}

/// Deserialize an `f64` from a JSON number or a numeric string.
pub fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(LenientF64)
}

struct LenientOptF64;

impl<'de> Visitor<'de> for LenientOptF64 {
    type Value = Option<f64>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a number, a numeric string, or null")
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        lenient_f64(deserializer).map(Some)
    }
}

/// Deserialize an `Option<f64>` from a JSON number, numeric string, or null.
pub fn lenient_opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_option(LenientOptF64)
}

struct LenientF64OrZero;

impl<'de> Visitor<'de> for LenientF64OrZero {
    type Value = f64;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a number, a numeric string, or null")
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
        Ok(v)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
        Ok(v as f64)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
        Ok(v as f64)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
        Ok(v.trim().parse().unwrap_or(0.0))
    }

    fn visit_none<E: de::Error>(self) -> Result<f64, E> {
        Ok(0.0)
    }

    fn visit_unit<E: de::Error>(self) -> Result<f64, E> {
        Ok(0.0)
    }
}

/// Deserialize an `f64` that falls back to zero for null or garbage strings.
///
/// Used for nutrient fields where a model occasionally emits "unknown" for a
/// single value; zero is the safe floor there, and the zero-calorie warning
/// downstream tells the user about it.
pub fn lenient_f64_or_zero<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(LenientF64OrZero)
}
