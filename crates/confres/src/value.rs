//! value representation
//!
//! Evaluated properties are closed, tagged values:
//! - a [Scalar] for cardinality `0`
//! - an `Array` of scalars for positive cardinality (fixed maximum size)
//! - a `Vector` of scalars for negative cardinality (ordered sequence)
//!
//! Scalar kinds follow the semantic attribute types of the schema. Durations are stored as `Long` in the unit the
//! attribute asked for. Passwords are wrapped in [ProtectedString] which never serializes or prints its content.
use serde::{ser::SerializeSeq, Serialize, Serializer};
use std::fmt::{self, Formatter};

/// All possible scalar kinds
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Char(char),
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Password(ProtectedString),
}

/// All possible property values
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    Array(Vec<Scalar>),
    Vector(Vec<Scalar>),
}

impl Value {
    /// Number of values carried
    pub fn count(&self) -> usize {
        match self {
            Value::Scalar(_) => 1,
            Value::Array(values) | Value::Vector(values) => values.len(),
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Value::Scalar(scalar) => Some(scalar),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Scalar(Scalar::String(s)) => Some(s),
            _ => None,
        }
    }

    /// All carried scalars, in order
    pub fn scalars(&self) -> &[Scalar] {
        match self {
            Value::Scalar(scalar) => std::slice::from_ref(scalar),
            Value::Array(values) | Value::Vector(values) => values,
        }
    }

    /// String items if every carried scalar is a string
    pub fn strings(&self) -> Option<Vec<&str>> {
        self.scalars()
            .iter()
            .map(|scalar| match scalar {
                Scalar::String(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Boolean(value) => write!(f, "{value}"),
            Scalar::Byte(value) => write!(f, "{value}"),
            Scalar::Short(value) => write!(f, "{value}"),
            Scalar::Char(value) => write!(f, "{value}"),
            Scalar::Integer(value) => write!(f, "{value}"),
            Scalar::Long(value) => write!(f, "{value}"),
            Scalar::Float(value) => write!(f, "{value}"),
            Scalar::Double(value) => write!(f, "{value}"),
            Scalar::String(value) => f.write_str(value),
            Scalar::Password(value) => write!(f, "{value}"),
        }
    }
}

/// Renders multi-valued values as an escaped, comma separated list
impl fmt::Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(scalar) => write!(f, "{scalar}"),
            Value::Array(values) | Value::Vector(values) => {
                if let [single] = values.as_slice() {
                    return f.write_str(&crate::util::escape(&single.to_string()));
                }
                let joined: Vec<String> = values
                    .iter()
                    .map(|value| crate::util::escape(&value.to_string()))
                    .collect();
                f.write_str(&joined.join(", "))
            }
        }
    }
}

/// Password wrapper
///
/// Neither [fmt::Debug], [fmt::Display] nor serialization reveal the content. Use [ProtectedString::expose] to read it.
#[derive(Clone, PartialEq, Eq)]
pub struct ProtectedString(String);

impl ProtectedString {
    const MASK: &'static str = "*****";

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ProtectedString {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(Self::MASK)
    }
}

impl fmt::Display for ProtectedString {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(Self::MASK)
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::String(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::String(value.to_string())
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Boolean(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Integer(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Long(value)
    }
}

impl From<Scalar> for Value {
    fn from(value: Scalar) -> Self {
        Value::Scalar(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Scalar(value.into())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Scalar(value.into())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Scalar(value.into())
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Scalar(value.into())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Scalar(value.into())
    }
}

impl serde::ser::Serialize for ProtectedString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(Self::MASK)
    }
}

impl serde::ser::Serialize for Scalar {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Scalar::Boolean(value) => serializer.serialize_bool(*value),
            Scalar::Byte(value) => serializer.serialize_i8(*value),
            Scalar::Short(value) => serializer.serialize_i16(*value),
            Scalar::Char(value) => serializer.serialize_char(*value),
            Scalar::Integer(value) => serializer.serialize_i32(*value),
            Scalar::Long(value) => serializer.serialize_i64(*value),
            Scalar::Float(value) => serializer.serialize_f32(*value),
            Scalar::Double(value) => serializer.serialize_f64(*value),
            Scalar::String(value) => serializer.serialize_str(value),
            Scalar::Password(value) => value.serialize(serializer),
        }
    }
}

impl serde::ser::Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Scalar(value) => value.serialize(serializer),
            Value::Array(values) | Value::Vector(values) => {
                let mut ser = serializer.serialize_seq(Some(values.len()))?;
                for element in values {
                    ser.serialize_element(element)?;
                }
                ser.end()
            }
        }
    }
}
