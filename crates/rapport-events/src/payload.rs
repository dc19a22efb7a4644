//! The key/value payload carried by every [`StateEvent`](crate::StateEvent).
//!
//! Payloads stay a generic JSON map so logging and telemetry can serialize
//! any event without knowing its type. The typed accessors here are the
//! only place payload shape is validated: a missing key yields the caller's
//! default, a present key of the wrong shape yields a [`PayloadError`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A payload field had the wrong shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    /// The field exists but is not of the expected JSON type.
    #[error("payload field `{key}` must be {expected}")]
    WrongType {
        /// Offending key.
        key: String,
        /// Human-readable expected type.
        expected: &'static str,
    },

    /// The field is a number but not a finite one.
    #[error("payload field `{key}` must be finite")]
    NonFinite {
        /// Offending key.
        key: String,
    },
}

/// Event-specific key/value data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, Value>);

impl Payload {
    /// Create an empty payload.
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_owned(), value.into());
        self
    }

    /// Raw access to a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Whether the payload has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Read a finite number, falling back to `default` when absent or null.
    pub fn number_or(&self, key: &str, default: f64) -> Result<f64, PayloadError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Number(n)) => match n.as_f64() {
                Some(v) if v.is_finite() => Ok(v),
                _ => Err(PayloadError::NonFinite {
                    key: key.to_owned(),
                }),
            },
            Some(_) => Err(wrong_type(key, "a number")),
        }
    }

    /// Read a string, or `None` when absent or null.
    pub fn text(&self, key: &str) -> Result<Option<&str>, PayloadError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(wrong_type(key, "a string")),
        }
    }

    /// Read a string, falling back to `default` when absent or null.
    pub fn text_or<'a>(&'a self, key: &str, default: &'a str) -> Result<&'a str, PayloadError> {
        Ok(self.text(key)?.unwrap_or(default))
    }

    /// Read a list of strings; absent or null yields an empty list.
    pub fn tags(&self, key: &str) -> Result<Vec<String>, PayloadError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_owned)
                        .ok_or_else(|| wrong_type(key, "a list of strings"))
                })
                .collect(),
            Some(_) => Err(wrong_type(key, "a list of strings")),
        }
    }

    /// Read a nested object, or `None` when absent or null.
    pub fn object(&self, key: &str) -> Result<Option<&Map<String, Value>>, PayloadError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map)),
            Some(_) => Err(wrong_type(key, "an object")),
        }
    }
}

fn wrong_type(key: &str, expected: &'static str) -> PayloadError {
    PayloadError::WrongType {
        key: key.to_owned(),
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_number_uses_default() {
        let payload = Payload::new();
        assert_eq!(payload.number_or("delta", 0.25), Ok(0.25));
    }

    #[test]
    fn string_where_number_expected_is_rejected() {
        let payload = Payload::new().with("delta", "lots");
        assert!(matches!(
            payload.number_or("delta", 0.0),
            Err(PayloadError::WrongType { .. })
        ));
    }

    #[test]
    fn non_finite_numbers_collapse_to_null() {
        // serde_json has no NaN; it stores null, which reads as the default.
        let payload = Payload::new().with("delta", f64::NAN);
        assert_eq!(payload.number_or("delta", 0.0), Ok(0.0));
    }

    #[test]
    fn tags_must_all_be_strings() {
        let good = Payload::new().with("tags", vec!["gift", "sword"]);
        assert_eq!(good.tags("tags").unwrap_or_default(), vec!["gift", "sword"]);

        let bad = Payload::new().with("tags", serde_json::json!(["gift", 3]));
        assert!(bad.tags("tags").is_err());
    }

    #[test]
    fn text_or_falls_back() {
        let payload = Payload::new().with("mood", "Happy");
        assert_eq!(payload.text_or("mood", "Neutral"), Ok("Happy"));
        assert_eq!(payload.text_or("other", "Neutral"), Ok("Neutral"));
    }
}
