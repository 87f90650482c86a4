//! The in-memory values handed to task bodies.
//!
//! A revealed parameter is always a [`Value`]. Task bodies read and mutate
//! values in place; whatever a value looks like after the call is what gets
//! written back to the exchange files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::{DataType, Hash32};

/// An object living in an external storage system, passed by identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persistent {
    /// Identifier known to the storage collaborator.
    pub id: String,
    /// Materialized state of the object, if the storage provided one.
    pub state: Box<Value>,
}

/// Dynamically shaped task argument.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// Ordered key/value pairs.
    Dict(Vec<(Value, Value)>),
    /// Instance of a user-defined class.
    Object {
        class: String,
        fields: BTreeMap<String, Value>,
    },
    Persistent(Persistent),
}

impl Value {
    /// Whether this value is a persistent object with a usable identifier.
    pub fn is_persistent(&self) -> bool {
        match self {
            Value::Persistent(p) => !p.id.is_empty() && p.id != "None",
            _ => false,
        }
    }

    /// Identifier of a persistent value.
    pub fn persistent_id(&self) -> Option<&str> {
        match self {
            Value::Persistent(p) if self.is_persistent() => Some(&p.id),
            _ => None,
        }
    }

    /// Builds a persistent value with the given identifier and state.
    pub fn persistent(id: impl Into<String>, state: Value) -> Self {
        Value::Persistent(Persistent {
            id: id.into(),
            state: Box::new(state),
        })
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Looks up the value stored under `key` in a [`Value::Dict`].
    pub fn get(&self, key: &Value) -> Option<&Value> {
        match self {
            Value::Dict(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Mutable variant of [`get`](Self::get).
    pub fn get_mut(&mut self, key: &Value) -> Option<&mut Value> {
        match self {
            Value::Dict(entries) => entries
                .iter_mut()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Builds an "empty" instance of the named content type, used for
    /// elements of output collections that have no file to read from yet.
    pub fn placeholder(content_type: &str) -> Self {
        let name = content_type.rsplit('.').next().unwrap_or(content_type);

        match name {
            "int" | "long" | "short" | "byte" => Value::Int(0),
            "float" | "double" => Value::Float(0.0),
            "bool" | "boolean" => Value::Bool(false),
            "str" | "string" => Value::Str(String::new()),
            "char" => Value::Char('\0'),
            "bytes" | "bytearray" => Value::Bytes(Vec::new()),
            "list" | "tuple" | "set" => Value::List(Vec::new()),
            "dict" => Value::Dict(Vec::new()),
            "" | "None" | "NoneType" | "null" => Value::Null,
            _ => Value::Object {
                class: content_type.to_string(),
                fields: BTreeMap::new(),
            },
        }
    }

    /// Parses a literal passed inline on the wire.
    pub(crate) fn from_literal(data_type: DataType, literal: &str) -> Option<Self> {
        let value = match data_type {
            DataType::Boolean => Value::Bool(literal.eq_ignore_ascii_case("true")),
            DataType::Char => Value::Char(literal.chars().next()?),
            DataType::String | DataType::Enum => Value::Str(literal.to_string()),
            DataType::Byte | DataType::Short | DataType::Int | DataType::Long => {
                Value::Int(literal.parse().ok()?)
            }
            DataType::Float | DataType::Double => Value::Float(literal.parse().ok()?),
            DataType::Null => Value::Null,
            _ => return None,
        };

        Some(value)
    }

    /// Fingerprint of the value's canonical encoding.
    pub(crate) fn fingerprint(&self) -> Option<Hash32> {
        let mut buffer = Vec::new();
        ciborium::into_writer(self, &mut buffer).ok()?;
        Some(Hash32::hash(buffer))
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value.into())
                }
            }
        )*
    };
}

impl_from!(
    bool => Bool,
    i32 => Int,
    i64 => Int,
    f64 => Float,
    char => Char,
    String => Str,
    &str => Str,
    Vec<u8> => Bytes,
    Vec<Value> => List,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder() {
        assert_eq!(Value::placeholder("int"), Value::Int(0));
        assert_eq!(Value::placeholder("builtins.float"), Value::Float(0.0));
        assert_eq!(Value::placeholder("list"), Value::List(vec![]));
        assert_eq!(Value::placeholder("NoneType"), Value::Null);
        assert_eq!(
            Value::placeholder("app.models.Block"),
            Value::Object {
                class: "app.models.Block".into(),
                fields: BTreeMap::new(),
            }
        );
    }

    #[test]
    fn test_literal() {
        assert_eq!(
            Value::from_literal(DataType::Int, "42"),
            Some(Value::Int(42))
        );
        assert_eq!(
            Value::from_literal(DataType::Boolean, "True"),
            Some(Value::Bool(true))
        );
        assert_eq!(Value::from_literal(DataType::Int, "4x"), None);
        assert_eq!(Value::from_literal(DataType::File, "/tmp/x"), None);
    }

    #[test]
    fn test_persistent() {
        let value = Value::persistent("psco-1", Value::Int(3));
        assert!(value.is_persistent());
        assert_eq!(value.persistent_id(), Some("psco-1"));

        let none = Value::persistent("None", Value::Null);
        assert!(!none.is_persistent());
        assert_eq!(none.persistent_id(), None);
    }

    #[test]
    fn test_fingerprint_tracks_mutation() {
        let mut value = Value::List(vec![Value::Int(1), Value::Int(2)]);
        let before = value.fingerprint();
        assert_eq!(before, value.clone().fingerprint());

        value.as_list_mut().unwrap()[1] = Value::Int(3);
        assert_ne!(before, value.fingerprint());
    }

    #[test]
    fn test_dict_lookup() {
        let mut dict = Value::Dict(vec![("a".into(), 1.into()), ("b".into(), 2.into())]);
        assert_eq!(dict.get(&"b".into()), Some(&Value::Int(2)));
        *dict.get_mut(&"a".into()).unwrap() = Value::Int(10);
        assert_eq!(dict.get(&"a".into()), Some(&Value::Int(10)));
        assert_eq!(dict.get(&"z".into()), None);
    }
}
