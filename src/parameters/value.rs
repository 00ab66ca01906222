//! Dynamically typed parameter values.
//!
//! Parameter files are plain YAML, so a value can be any scalar, a list, or a mapping.
//! [`ParValue`] mirrors that shape with an untagged serde representation, and [`ParType`]
//! is the set of type tags a parameter schema can allow.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Mapping of parameter names to values, as read from a YAML section or given by a caller.
pub type ParMap = BTreeMap<String, ParValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ParValue>),
    /// Never produced by deserialization (a YAML sequence is a `List`), only by coercion
    /// when the schema of the parameter asks for a set.
    Set(BTreeSet<String>),
    Map(ParMap),
}

/// Type tags used by the parameter schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParType {
    Null,
    Bool,
    Int,
    Float,
    Str,
    List,
    Set,
    Map,
}

impl fmt::Display for ParType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParType::Null => "null",
            ParType::Bool => "bool",
            ParType::Int => "int",
            ParType::Float => "float",
            ParType::Str => "str",
            ParType::List => "list",
            ParType::Set => "set",
            ParType::Map => "map",
        };
        write!(f, "{name}")
    }
}

impl ParValue {
    pub fn par_type(&self) -> ParType {
        match self {
            ParValue::Null => ParType::Null,
            ParValue::Bool(_) => ParType::Bool,
            ParValue::Int(_) => ParType::Int,
            ParValue::Float(_) => ParType::Float,
            ParValue::Str(_) => ParType::Str,
            ParValue::List(_) => ParType::List,
            ParValue::Set(_) => ParType::Set,
            ParValue::Map(_) => ParType::Map,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ParValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParValue::Int(i) => Some(*i),
            ParValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Numeric value, integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParValue::Int(i) => Some(*i as f64),
            ParValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ParValue]> {
        match self {
            ParValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ParMap> {
        match self {
            ParValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// A set of strings, also accepting a list made only of strings.
    pub fn as_string_set(&self) -> Option<BTreeSet<String>> {
        match self {
            ParValue::Set(s) => Some(s.clone()),
            ParValue::List(l) => l.iter().map(|v| v.as_str().map(str::to_string)).collect(),
            _ => None,
        }
    }

    /// A list of numbers, used for ranges and axis specifications.
    pub fn as_f64_list(&self) -> Option<Vec<f64>> {
        self.as_list()?.iter().map(ParValue::as_f64).collect()
    }

    /// Try to convert the value so that its type is one of `allowed`.
    ///
    /// An empty `allowed` slice accepts anything, and `Null` is always accepted.
    /// Integers are widened to floats and string lists become sets when the schema
    /// asks for it.
    pub fn coerce(self, allowed: &[ParType]) -> Option<ParValue> {
        if allowed.is_empty() || self.is_null() || allowed.contains(&self.par_type()) {
            return Some(self);
        }
        match self {
            ParValue::Int(i) if allowed.contains(&ParType::Float) => Some(ParValue::Float(i as f64)),
            ParValue::List(_) if allowed.contains(&ParType::Set) => {
                self.as_string_set().map(ParValue::Set)
            }
            ParValue::Set(s) if allowed.contains(&ParType::List) => Some(ParValue::List(
                s.into_iter().map(ParValue::Str).collect(),
            )),
            _ => None,
        }
    }

    /// JSON rendering, used when parameters travel inside dataset metadata.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl From<bool> for ParValue {
    fn from(v: bool) -> Self {
        ParValue::Bool(v)
    }
}

impl From<i64> for ParValue {
    fn from(v: i64) -> Self {
        ParValue::Int(v)
    }
}

impl From<i32> for ParValue {
    fn from(v: i32) -> Self {
        ParValue::Int(v as i64)
    }
}

impl From<usize> for ParValue {
    fn from(v: usize) -> Self {
        ParValue::Int(v as i64)
    }
}

impl From<f64> for ParValue {
    fn from(v: f64) -> Self {
        ParValue::Float(v)
    }
}

impl From<&str> for ParValue {
    fn from(v: &str) -> Self {
        ParValue::Str(v.to_string())
    }
}

impl From<String> for ParValue {
    fn from(v: String) -> Self {
        ParValue::Str(v)
    }
}

impl<T: Into<ParValue>> From<Vec<T>> for ParValue {
    fn from(v: Vec<T>) -> Self {
        ParValue::List(v.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeSet<String>> for ParValue {
    fn from(v: BTreeSet<String>) -> Self {
        ParValue::Set(v)
    }
}

impl From<ParMap> for ParValue {
    fn from(v: ParMap) -> Self {
        ParValue::Map(v)
    }
}

impl<T: Into<ParValue>> From<Option<T>> for ParValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(ParValue::Null, Into::into)
    }
}
