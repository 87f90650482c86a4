pub use anyhow::Error as RuntimeError;
use camino::Utf8PathBuf;
use thiserror::Error;

use crate::core::{DataType, ObjectId};

/// Contract violations against the object tracker.
///
/// These are never expected in a correct engine/binding pairing, so they are
/// reported instead of being silently ignored.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Object {0} is not tracked")]
    Untracked(ObjectId),

    #[error("Object {0} has not been written by the calling process")]
    NotWritten(ObjectId),

    #[error("Object {0} has no exchange file")]
    NoExchangeFile(ObjectId),

    #[error("Couldn't store the tracker report.\n{0}")]
    Report(#[from] std::io::Error),

    #[error("Couldn't encode the tracker report.\n{0}")]
    ReportFormat(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Unknown type tag '{0}'")]
    UnknownType(String),

    #[error("Line {line}: expected 3 fields, found {found}")]
    Fields { line: usize, found: usize },

    #[error("Keyed collection manifest has a dangling key on line {0}")]
    DanglingKey(usize),

    #[error("Couldn't read manifest.\n{0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("Couldn't access exchange file {0}.\n{1}")]
    Io(Utf8PathBuf, std::io::Error),

    #[error("Couldn't decode exchange file {0}.\n{1}")]
    Decode(Utf8PathBuf, String),

    #[error("Couldn't encode value for exchange file {0}.\n{1}")]
    Encode(Utf8PathBuf, String),
}

/// Resolution fault: a parameter could not be turned into a value.
#[derive(Debug, Error)]
pub enum RevealError {
    #[error("Parameter '{0}': {1}")]
    Serialize(String, SerializeError),

    #[error("Parameter '{0}': malformed collection manifest.\n{1}")]
    Manifest(String, ManifestError),

    #[error("Parameter '{0}': persistent object lookup failed.\n{1}")]
    Storage(String, anyhow::Error),

    #[error("Parameter '{0}': invalid literal '{1}' for type {2:?}")]
    Literal(String, String, DataType),
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Couldn't reveal task parameters.\n{0}")]
    Reveal(#[from] RevealError),

    #[error("Couldn't store task results.\n{0}")]
    Serialize(#[from] SerializeError),

    #[error("Task '{0}':\n{1}")]
    Task(String, anyhow::Error),

    #[error("Task '{task}' declares {expected} return values, got {found}")]
    ReturnArity {
        task: String,
        expected: usize,
        found: usize,
    },

    #[error("Unsupported acceleration mode '{0}'")]
    UnsupportedAcceleration(String),

    #[error("Default value for parameter '{0}' couldn't be applied.\n{1}")]
    Default(String, std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Raised by a task body to cancel the rest of its task group.
///
/// The worker recovers from it: configured default outputs are published
/// and the engine is told to cancel the group.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct Cancellation {
    pub message: String,
}

impl Cancellation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure of a task body.
#[derive(Debug, Error)]
pub enum TaskFailure {
    #[error("Task cancelled: {0}")]
    Cancelled(#[from] Cancellation),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}
