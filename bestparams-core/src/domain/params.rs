//! Opaque strategy parameter mapping.
//!
//! Parameter schemas differ per strategy type and are not validated here.
//! Values are kept as JSON values in a `BTreeMap` so serialization order is
//! deterministic and the mapping round-trips losslessly through both stores.
//! Numbers keep their source text, so integers beyond 64 bits survive too.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Parameter name → value mapping of one trial.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamSet(BTreeMap<String, Value>);

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object.
    pub fn from_object(object: serde_json::Map<String, Value>) -> Self {
        Self(object.into_iter().collect())
    }

    /// Parse the serialized text form stored in the relational table.
    ///
    /// The text must decode to a JSON object.
    pub fn from_json_text(text: &str) -> Result<Self, String> {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(object)) => Ok(Self::from_object(object)),
            Ok(other) => Err(format!("expected a JSON object, found {}", kind_of(&other))),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Compact canonical JSON text (keys sorted).
    pub fn to_json_text(&self) -> String {
        Value::Object(self.0.clone().into_iter().collect()).to_string()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Structural equality with numbers compared by value.
    ///
    /// `{"period": 14}` and `{"period": 14.0}` describe the same configuration
    /// even though one store kept an integer and the other a float.
    pub fn same_values(&self, other: &ParamSet) -> bool {
        self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .zip(other.0.iter())
                .all(|((ka, va), (kb, vb))| ka == kb && values_equal(va, vb))
    }
}

impl FromIterator<(String, Value)> for ParamSet {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(i), Some(j)) = (x.as_i64(), y.as_i64()) {
                i == j
            } else if let (Some(i), Some(j)) = (x.as_u64(), y.as_u64()) {
                i == j
            } else if is_integer_text(x) && is_integer_text(y) {
                x.to_string() == y.to_string()
            } else {
                x.as_f64() == y.as_f64()
            }
        }
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

/// JSON integer literals have no leading zeros, so equal text is equal value.
fn is_integer_text(n: &serde_json::Number) -> bool {
    !n.to_string().contains(['.', 'e', 'E'])
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
