use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ManifestError;

/// A type-erased, thread-safe container.
pub(crate) type Dynamic = Arc<dyn Any + Send + Sync>;

/// Globally unique identifier of a tracked object.
///
/// Identifiers have the form `{runtime-uuid}-{counter}`. The UUID is drawn
/// once per [`ObjectTracker`](crate::ObjectTracker), the counter increases
/// on every allocation, so two trackers never hand out the same identifier
/// and one tracker never hands out the same identifier twice.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(Arc<str>);

impl ObjectId {
    pub(crate) fn new(runtime: &str, counter: u64) -> Self {
        Self(Arc::from(format!("{runtime}-{counter}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

impl AsRef<str> for ObjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A 32-byte BLAKE3 hash used to detect whether a revealed value was
/// modified by the task body.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(crate) struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub(crate) fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub(crate) fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in self.0.iter() {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// Elementary type tag shared with the orchestration engine.
///
/// The numeric values are part of the wire format: they appear in the
/// collection manifests and in the result message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum DataType {
    File = 0,
    Object = 1,
    Psco = 2,
    ExternalPsco = 3,
    BindingObject = 4,
    Boolean = 5,
    Char = 6,
    String = 7,
    Byte = 8,
    Short = 9,
    Int = 10,
    Long = 11,
    Float = 12,
    Double = 13,
    Directory = 14,
    Collection = 15,
    DictCollection = 16,
    Stream = 17,
    ExternalStream = 18,
    Enum = 19,
    Null = 20,
}

impl DataType {
    const ALL: [DataType; 21] = [
        DataType::File,
        DataType::Object,
        DataType::Psco,
        DataType::ExternalPsco,
        DataType::BindingObject,
        DataType::Boolean,
        DataType::Char,
        DataType::String,
        DataType::Byte,
        DataType::Short,
        DataType::Int,
        DataType::Long,
        DataType::Float,
        DataType::Double,
        DataType::Directory,
        DataType::Collection,
        DataType::DictCollection,
        DataType::Stream,
        DataType::ExternalStream,
        DataType::Enum,
        DataType::Null,
    ];

    /// Numeric wire tag.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Whether values of this type are passed by literal on the wire rather
    /// than through an exchange file.
    pub fn is_basic(self) -> bool {
        matches!(
            self,
            DataType::Boolean
                | DataType::Char
                | DataType::String
                | DataType::Byte
                | DataType::Short
                | DataType::Int
                | DataType::Long
                | DataType::Float
                | DataType::Double
                | DataType::Null
                | DataType::Enum
        )
    }
}

impl From<DataType> for u8 {
    fn from(value: DataType) -> Self {
        value.tag()
    }
}

impl TryFrom<u8> for DataType {
    type Error = ManifestError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        DataType::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| ManifestError::UnknownType(value.to_string()))
    }
}

impl std::str::FromStr for DataType {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag: u8 = s
            .parse()
            .map_err(|_| ManifestError::UnknownType(s.to_string()))?;
        DataType::try_from(tag)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Access direction of a task parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    /// Read-only.
    #[default]
    In,
    /// Produced fresh by the task.
    Out,
    /// Read, modified and written back.
    InOut,
    /// Read-modify-write without ordering between concurrent writers.
    Commutative,
}

impl Direction {
    /// Whether a task with this direction writes the value back.
    pub fn is_write(self) -> bool {
        !matches!(self, Direction::In)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Direction::In => "IN",
            Direction::Out => "OUT",
            Direction::InOut => "INOUT",
            Direction::Commutative => "COMMUTATIVE",
        };
        f.write_str(label)
    }
}
