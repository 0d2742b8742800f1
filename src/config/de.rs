//! Field deserializers shared by the option structs.

use serde::de::{self, Deserialize, Deserializer, Unexpected};
use serde_json::Value;

/// Deserialize a field that may be absent but not `null`.
///
/// Absent fields never reach this function; the container default fills
/// them in.
pub(crate) fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    match Option::<T>::deserialize(deserializer)? {
        Some(value) => Ok(Some(value)),
        None => Err(de::Error::invalid_type(Unexpected::Unit, &"a value")),
    }
}

/// Deserialize a flag from any JSON value by truthiness.
pub(crate) fn truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => false,
        Value::Bool(on) => on,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    })
}
