//! Structured action input values.
//!
//! Action inputs arrive as arbitrary JSON objects. They are converted at the
//! protocol boundary into [`InputMap`], a map of [`InputValue`] kinds, so
//! policies and capabilities never handle untyped JSON directly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::{AppError, Result};

/// Key/value input of a proposed action.
pub type InputMap = BTreeMap<String, InputValue>;

/// One value inside an action input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum InputValue {
    /// JSON `null`.
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Numeric scalar, kept in its original JSON representation.
    Number(Number),
    /// String scalar.
    String(String),
    /// Ordered list of values.
    Array(Vec<InputValue>),
    /// Nested key/value object.
    Object(InputMap),
}

impl InputValue {
    /// Borrow the string content, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Return the boolean content, if this is a boolean.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Return the value as `i64`, if it is an integral number in range.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    /// Return the value as `f64`, if it is a number.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    /// Borrow the nested object, if this is an object.
    #[must_use]
    pub fn as_object(&self) -> Option<&InputMap> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }
}

impl From<Value> for InputValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => Self::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<InputValue> for Value {
    fn from(value: InputValue) -> Self {
        match value {
            InputValue::Null => Value::Null,
            InputValue::Bool(b) => Value::Bool(b),
            InputValue::Number(n) => Value::Number(n),
            InputValue::String(s) => Value::String(s),
            InputValue::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            InputValue::Object(map) => Value::Object(input_map_to_json(map)),
        }
    }
}

impl From<&str> for InputValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for InputValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for InputValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for InputValue {
    fn from(value: i64) -> Self {
        Self::Number(Number::from(value))
    }
}

/// Convert an inbound JSON value into an [`InputMap`].
///
/// `null` (or an absent field) yields an empty map.
///
/// # Errors
///
/// Returns [`AppError::Decode`] when `value` is neither an object nor `null`.
pub fn input_map_from_json(value: Value) -> Result<InputMap> {
    match value {
        Value::Null => Ok(InputMap::new()),
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(k, v)| (k, InputValue::from(v)))
            .collect()),
        other => Err(AppError::Decode(format!(
            "action input must be an object, got {}",
            json_kind(&other)
        ))),
    }
}

/// Convert an [`InputMap`] back into a JSON object map.
#[must_use]
pub fn input_map_to_json(map: InputMap) -> Map<String, Value> {
    map.into_iter().map(|(k, v)| (k, Value::from(v))).collect()
}

/// Merge two optional rewrite maps, keys from `update` winning.
///
/// - `merge(None, None)` is `None`.
/// - `merge(None, Some(u))` is a copy of `u`.
/// - `merge(Some(b), None)` is `b`.
/// - `merge(Some(b), Some(u))` holds every key of `b`, overwritten by `u`.
#[must_use]
pub fn merge_inputs(base: Option<&InputMap>, update: Option<&InputMap>) -> Option<InputMap> {
    match (base, update) {
        (None, None) => None,
        (None, Some(update)) => Some(update.clone()),
        (Some(base), None) => Some(base.clone()),
        (Some(base), Some(update)) => {
            let mut merged = base.clone();
            merged.extend(update.iter().map(|(k, v)| (k.clone(), v.clone())));
            Some(merged)
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
