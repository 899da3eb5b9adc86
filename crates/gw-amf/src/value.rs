//! The dynamically typed object graph carried by command bodies.

use std::collections::BTreeMap;

/// One decoded structured value.
///
/// Object and array element order is preserved exactly as received on the
/// wire - callers that re-serialize a `Value` they decoded get back the
/// same property order, which matters for peers that rely on positional
/// command arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// IEEE-754 double (AMF0 `Number`, or an AMF3 `Integer`/`Double` folded
    /// back to a single numeric representation).
    Number(f64),
    /// Boolean.
    Boolean(bool),
    /// UTF-8 string.
    String(String),
    /// Ordered object properties (AMF0 `Object`/`TypedObject`, or an AMF3
    /// dynamic object).
    Object(Vec<(String, Value)>),
    /// Dense array.
    Array(Vec<Value>),
    /// Sparse / associative array (AMF0 `MixedArray`): integer-keyed
    /// entries are preserved as string keys, matching what the peer sent.
    MixedArray(Vec<(String, Value)>),
    /// `null`.
    Null,
    /// `undefined`.
    Undefined,
    /// Milliseconds since epoch (AMF0 `Date`); the timezone field is
    /// always 0 on the wire and is not round-tripped separately.
    Date(f64),
}

impl Value {
    /// Convenience constructor for a UTF-8 string value.
    #[must_use]
    pub fn str(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    /// Build an object from owned key/value pairs, preserving order.
    #[must_use]
    pub fn object(pairs: impl IntoIterator<Item = (String, Value)>) -> Self {
        Value::Object(pairs.into_iter().collect())
    }

    /// Read a named property out of an `Object`/`MixedArray` value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(pairs) | Value::MixedArray(pairs) => {
                pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    /// Unwrap as a string, if this value is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Unwrap as a number, if this value is one.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// Flatten an object's properties into a sorted map, useful in tests where
/// property order doesn't matter but contents do.
#[must_use]
pub fn object_as_map(value: &Value) -> BTreeMap<String, Value> {
    match value {
        Value::Object(pairs) | Value::MixedArray(pairs) => pairs.iter().cloned().collect(),
        _ => BTreeMap::new(),
    }
}
