/// Represents a SQL value in a driver-agnostic way.
/// Used both for command parameters and for fields read from a cursor.
/// Drivers are responsible for converting these to and from their native types.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, used in conversion errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int16(_) => "int16",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int16(i) => Some(i64::from(i)),
            Value::Int32(i) => Some(i64::from(i)),
            Value::Int64(i) => Some(i),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i16> for Value {
    fn from(value: i16) -> Self {
        Value::Int16(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int64(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float32(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float64(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Bytes(value.to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

/// Conversion from a [`Value`] read off a cursor into a Rust type.
///
/// Returns `None` when the value cannot be represented as `Self`; callers
/// turn that into a [`TypeMismatch`](crate::DbKitError::TypeMismatch) with
/// the column name attached. `Null` only converts into `Option<T>` and
/// `Value`; entity mapping substitutes the member's default before getting here.
pub trait FromValue: Sized {
    fn type_name() -> &'static str;

    fn from_value(value: Value) -> Option<Self>;
}

impl FromValue for Value {
    fn type_name() -> &'static str {
        "value"
    }

    fn from_value(value: Value) -> Option<Self> {
        Some(value)
    }
}

impl FromValue for bool {
    fn type_name() -> &'static str {
        "bool"
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(b),
            other => other.as_i64().map(|i| i != 0),
        }
    }
}

impl FromValue for i16 {
    fn type_name() -> &'static str {
        "i16"
    }

    fn from_value(value: Value) -> Option<Self> {
        value.as_i64().and_then(|i| i16::try_from(i).ok())
    }
}

impl FromValue for i32 {
    fn type_name() -> &'static str {
        "i32"
    }

    fn from_value(value: Value) -> Option<Self> {
        value.as_i64().and_then(|i| i32::try_from(i).ok())
    }
}

impl FromValue for i64 {
    fn type_name() -> &'static str {
        "i64"
    }

    fn from_value(value: Value) -> Option<Self> {
        value.as_i64()
    }
}

impl FromValue for f32 {
    fn type_name() -> &'static str {
        "f32"
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Float32(f) => Some(f),
            Value::Float64(f) => Some(f as f32),
            other => other.as_i64().map(|i| i as f32),
        }
    }
}

impl FromValue for f64 {
    fn type_name() -> &'static str {
        "f64"
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Float32(f) => Some(f64::from(f)),
            Value::Float64(f) => Some(f),
            other => other.as_i64().map(|i| i as f64),
        }
    }
}

impl FromValue for String {
    fn type_name() -> &'static str {
        "String"
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Text(s) => Some(s),
            Value::Bool(b) => Some(b.to_string()),
            Value::Int16(i) => Some(i.to_string()),
            Value::Int32(i) => Some(i.to_string()),
            Value::Int64(i) => Some(i.to_string()),
            Value::Float32(f) => Some(f.to_string()),
            Value::Float64(f) => Some(f.to_string()),
            Value::Null | Value::Bytes(_) => None,
        }
    }
}

impl FromValue for Vec<u8> {
    fn type_name() -> &'static str {
        "Vec<u8>"
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Bytes(b) => Some(b),
            Value::Text(s) => Some(s.into_bytes()),
            _ => None,
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn type_name() -> &'static str {
        T::type_name()
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_option() {
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some("a")), Value::Text("a".to_string()));
    }

    #[test]
    fn test_integer_widening_and_narrowing() {
        assert_eq!(i64::from_value(Value::Int32(7)), Some(7));
        assert_eq!(i32::from_value(Value::Int64(7)), Some(7));
        assert_eq!(i32::from_value(Value::Int64(i64::MAX)), None);
        assert_eq!(i16::from_value(Value::Int32(40_000)), None);
    }

    #[test]
    fn test_null_only_converts_to_option() {
        assert_eq!(i64::from_value(Value::Null), None);
        assert_eq!(Option::<i64>::from_value(Value::Null), Some(None));
        assert_eq!(String::from_value(Value::Null), None);
    }

    #[test]
    fn test_text_conversions() {
        assert_eq!(
            String::from_value(Value::Int32(42)),
            Some("42".to_string())
        );
        assert_eq!(i32::from_value(Value::Text("42".into())), None);
        assert_eq!(
            Vec::<u8>::from_value(Value::Text("ab".into())),
            Some(vec![b'a', b'b'])
        );
    }

    #[test]
    fn test_bool_from_integer() {
        assert_eq!(bool::from_value(Value::Int32(0)), Some(false));
        assert_eq!(bool::from_value(Value::Int64(5)), Some(true));
    }
}
