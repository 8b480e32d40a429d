//! Structured values carried over the message channel.
//!
//! Both directions of the protocol speak the same small vocabulary: null,
//! booleans, numbers, strings and ordered lists, nested arbitrarily. The
//! untagged serde representation keeps the wire format plain JSON so the
//! front end needs no Rust-specific decoding.

use serde::{Deserialize, Serialize};

/// One self-contained protocol value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// JSON `null`; doubles as the "no result" sentinel for introspection.
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    /// Builds a list value from plain strings.
    pub fn strings<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self::List(items.into_iter().map(|item| Self::Str(item.into())).collect())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(flag) => Some(*flag),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(number) => Some(*number),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(flag: bool) -> Self {
        Self::Bool(flag)
    }
}

impl From<i64> for Value {
    fn from(number: i64) -> Self {
        Self::Int(number)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Self::Str(text.to_owned())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Self::Str(text)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl From<Option<String>> for Value {
    fn from(text: Option<String>) -> Self {
        match text {
            Some(text) => Self::Str(text),
            None => Self::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::Value;

    #[test]
    fn wire_shapes_are_plain_json() {
        assert_eq!(serde_json::to_string(&Value::None).unwrap(), "null");
        assert_eq!(serde_json::to_string(&Value::Bool(true)).unwrap(), "true");
        assert_eq!(serde_json::to_string(&Value::Int(-3)).unwrap(), "-3");
        assert_eq!(serde_json::to_string(&Value::Str("hi".into())).unwrap(), "\"hi\"");
        let nested = Value::List(vec![Value::Bool(false), Value::None]);
        assert_eq!(serde_json::to_string(&nested).unwrap(), "[false,null]");
    }

    #[test]
    fn decoding_round_trips() {
        let original = Value::List(vec![
            Value::Str("execute".into()),
            Value::List(vec![Value::Str("x = 1\n".into())]),
        ]);
        let encoded = serde_json::to_string(&original).unwrap();
        let decoded: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn integers_and_floats_decode_distinctly() {
        let int: Value = serde_json::from_str("7").unwrap();
        assert_eq!(int, Value::Int(7));
        let float: Value = serde_json::from_str("7.5").unwrap();
        assert_eq!(float, Value::Float(7.5));
    }

    #[test]
    fn strings_helper_builds_a_list() {
        assert_eq!(
            Value::strings(["a", "b"]),
            Value::List(vec![Value::Str("a".into()), Value::Str("b".into())])
        );
    }
}
