use std::fmt;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::core::{DataType, Direction, Hash32};
use crate::io::exchange_path;
use crate::value::Value;

const RETURN_PREFIX: &str = "$return_";
const KWARG_PREFIX: &str = "#kwarg_";
const VARARG_PREFIX: &str = "*";
const RECEIVER: &str = "self";

/// Content type sent when the engine knows nothing about the element.
const UNKNOWN_CONTENT: &str = "null";

/// One parameter of a task invocation as it arrives from the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Exchange file path, manifest path, persistent identifier or scalar
    /// literal, depending on the type.
    pub value: String,
    #[serde(default = "unknown_content")]
    pub content_type: String,
}

fn unknown_content() -> String {
    UNKNOWN_CONTENT.to_string()
}

impl WireParameter {
    pub fn new(name: impl Into<String>, data_type: DataType, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type,
            value: value.into(),
            content_type: unknown_content(),
        }
    }

    /// An object or file passed through an exchange file.
    pub fn file(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(name, DataType::File, path)
    }

    pub fn collection(name: impl Into<String>, manifest: impl Into<String>) -> Self {
        Self::new(name, DataType::Collection, manifest)
    }

    pub fn dict_collection(name: impl Into<String>, manifest: impl Into<String>) -> Self {
        Self::new(name, DataType::DictCollection, manifest)
    }

    pub fn persistent(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(name, DataType::ExternalPsco, id)
    }

    /// Exchange file for the `index`-th return value.
    pub fn ret(index: usize, path: impl Into<String>) -> Self {
        Self::new(format!("{RETURN_PREFIX}{index}"), DataType::File, path)
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }
}

/// Role of a parameter, decoded from its wire name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParameterName {
    /// The object the task is a method of.
    Receiver,
    Positional(String),
    /// One element of a variadic positional parameter.
    Vararg(String),
    Keyword(String),
    Return(usize),
}

impl ParameterName {
    pub fn parse(raw: &str) -> Self {
        if raw == RECEIVER {
            return ParameterName::Receiver;
        }
        if let Some(index) = raw
            .strip_prefix(RETURN_PREFIX)
            .and_then(|index| index.parse().ok())
        {
            return ParameterName::Return(index);
        }
        if let Some(name) = raw.strip_prefix(KWARG_PREFIX) {
            return ParameterName::Keyword(name.to_string());
        }
        if let Some(name) = raw.strip_prefix(VARARG_PREFIX) {
            return ParameterName::Vararg(name.to_string());
        }

        ParameterName::Positional(raw.to_string())
    }

    /// Name the parameter is declared under in the task signature.
    pub fn declared(&self) -> Option<&str> {
        match self {
            ParameterName::Receiver => Some(RECEIVER),
            ParameterName::Positional(name)
            | ParameterName::Vararg(name)
            | ParameterName::Keyword(name) => Some(name),
            ParameterName::Return(_) => None,
        }
    }

    pub fn is_return(&self) -> bool {
        matches!(self, ParameterName::Return(_))
    }
}

impl fmt::Display for ParameterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterName::Receiver => f.write_str(RECEIVER),
            ParameterName::Positional(name) => f.write_str(name),
            ParameterName::Vararg(name) => write!(f, "{VARARG_PREFIX}{name}"),
            ParameterName::Keyword(name) => write!(f, "{KWARG_PREFIX}{name}"),
            ParameterName::Return(index) => write!(f, "{RETURN_PREFIX}{index}"),
        }
    }
}

/// Structure of a revealed parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// Scalar, file, directory, stream or serialized object.
    Leaf,
    Collection(Vec<Node>),
    /// Key node and value node of every entry, in manifest order.
    KeyedCollection(Vec<(Node, Node)>),
    /// Reference to an object held by the storage collaborator.
    Persistent(String),
}

/// Wire reference of a parameter or of one element nested inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub data_type: DataType,
    /// Exchange file or manifest; `None` for values passed by literal or by
    /// identifier.
    pub file_name: Option<Utf8PathBuf>,
    pub content_type: String,
    pub shape: Shape,
    /// Fingerprint of the value read from `file_name` at reveal time, or of
    /// the literal key of a keyed collection entry.
    pub(crate) fingerprint: Option<Hash32>,
}

impl Node {
    pub(crate) fn new(data_type: DataType, raw: &str, content_type: &str) -> Self {
        let file_name = match data_type {
            DataType::File
            | DataType::Object
            | DataType::Directory
            | DataType::Collection
            | DataType::DictCollection
            | DataType::Stream
            | DataType::ExternalStream => Some(exchange_path(raw)),
            _ => None,
        };

        let shape = match data_type {
            DataType::Psco | DataType::ExternalPsco => Shape::Persistent(raw.to_string()),
            _ => Shape::Leaf,
        };

        Self {
            data_type,
            file_name,
            content_type: content_type.to_string(),
            shape,
            fingerprint: None,
        }
    }

    pub fn children(&self) -> &[Node] {
        match &self.shape {
            Shape::Collection(children) => children,
            _ => &[],
        }
    }
}

/// Pairs every manifest entry of a keyed collection with the entry of
/// `entries` stored under the same key.
///
/// Keys are compared by the fingerprint taken at reveal time. A manifest
/// entry whose key was never revealed is paired by position. `None` marks a
/// manifest entry the task body removed.
pub(crate) fn match_keyed<'v>(
    children: &[(Node, Node)],
    entries: &'v [(Value, Value)],
) -> Vec<Option<&'v (Value, Value)>> {
    let keys: Vec<Option<Hash32>> = entries.iter().map(|(key, _)| key.fingerprint()).collect();

    children
        .iter()
        .enumerate()
        .map(|(i, (key_node, _))| match key_node.fingerprint {
            Some(key) => keys
                .iter()
                .position(|fingerprint| *fingerprint == Some(key))
                .map(|j| &entries[j]),
            None => entries.get(i),
        })
        .collect()
}

/// A parameter of one invocation, from reveal to the result message.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskParameter {
    pub name: ParameterName,
    pub direction: Direction,
    pub node: Node,
    /// Value handed to (and taken back from) the task body.
    pub content: Value,
    /// Travels as a serialized object rather than as a path.
    pub(crate) object: bool,
    pub(crate) file_collection: bool,
    /// Contents were replaced by a byte copy of a default file.
    pub(crate) defaulted: bool,
}

impl TaskParameter {
    pub(crate) fn new(name: ParameterName, direction: Direction, node: Node) -> Self {
        Self {
            name,
            direction,
            node,
            content: Value::Null,
            object: true,
            file_collection: false,
            defaulted: false,
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self.node.shape, Shape::Persistent(_)) || self.content.is_persistent()
    }
}
