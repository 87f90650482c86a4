//! Configuration for both halves of the crate.
//!
//! [`TrackerConfig`] and [`WorkerConfig`] describe the process the code runs
//! in and can be read from the environment. [`TaskConfig`] describes one task
//! signature, the way the application declared it; the engine ships it to
//! the worker as JSON.

use std::collections::BTreeMap;
use std::env;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::core::Direction;
use crate::value::Value;

const ENV_EXCHANGE_DIR: &str = "TASKWIRE_EXCHANGE_DIR";
const ENV_TRACKER_REPORT: &str = "TASKWIRE_TRACKER_REPORT";
const ENV_RANK: &str = "TASKWIRE_RANK";
const ENV_NESTING: &str = "TASKWIRE_NESTING";

fn env_flag(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

/// Settings of the calling-process object tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Directory where exchange files are placed.
    pub exchange_dir: Utf8PathBuf,
    /// Record a snapshot of every table size after each mutation.
    pub reporting: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        let temp = Utf8PathBuf::from_path_buf(env::temp_dir())
            .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"));

        Self {
            exchange_dir: temp.join("taskwire"),
            reporting: false,
        }
    }
}

impl TrackerConfig {
    /// Reads `TASKWIRE_EXCHANGE_DIR` and `TASKWIRE_TRACKER_REPORT`, falling
    /// back to the defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = env::var(ENV_EXCHANGE_DIR) {
            config.exchange_dir = dir.into();
        }
        if let Some(reporting) = env_flag(ENV_TRACKER_REPORT) {
            config.reporting = reporting;
        }

        config
    }

    pub fn with_exchange_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.exchange_dir = dir.into();
        self
    }

    pub fn with_reporting(mut self, reporting: bool) -> Self {
        self.reporting = reporting;
        self
    }
}

/// Settings of the worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Rank of this worker inside a distributed (rank-partitioned)
    /// invocation. `None` for ordinary invocations.
    pub rank: Option<usize>,
    /// Reuse/nesting toggle echoed in every result message.
    ///
    /// Defaults to `true`; the value is pending confirmation with the engine
    /// side.
    pub nesting: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            rank: None,
            nesting: true,
        }
    }
}

impl WorkerConfig {
    /// Reads `TASKWIRE_RANK` and `TASKWIRE_NESTING`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(rank) = env::var(ENV_RANK).ok().and_then(|r| r.trim().parse().ok()) {
            config.rank = Some(rank);
        }
        if let Some(nesting) = env_flag(ENV_NESTING) {
            config.nesting = nesting;
        }

        config
    }

    pub fn with_rank(mut self, rank: usize) -> Self {
        self.rank = Some(rank);
        self
    }
}

/// Explicit type annotation of a task parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Annotation {
    File,
    Directory,
    Collection,
    DictCollection,
    ExternalStream,
}

fn default_depth() -> usize {
    1
}

/// Declared properties of one task parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub content: Option<Annotation>,
    /// Nesting depth of a collection parameter.
    #[serde(default = "default_depth")]
    pub depth: usize,
    /// Collection whose elements are plain file paths.
    #[serde(default)]
    pub file_collection: bool,
}

impl Default for ParameterSpec {
    fn default() -> Self {
        Self {
            direction: Direction::In,
            content: None,
            depth: 1,
            file_collection: false,
        }
    }
}

impl ParameterSpec {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            ..Default::default()
        }
    }

    pub fn with_content(mut self, content: Annotation) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn file_collection(mut self) -> Self {
        self.file_collection = true;
        self
    }

    /// Whether the parameter travels as a serialized object, as opposed to a
    /// path handed to the task verbatim.
    pub fn is_object(&self) -> bool {
        !matches!(
            self.content,
            Some(Annotation::File) | Some(Annotation::Directory)
        )
    }
}

/// What to do when the task body fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailurePolicy {
    #[default]
    Retry,
    CancelSuccessors,
    Fail,
    /// Swallow the failure and publish the configured defaults instead.
    Ignore,
}

/// Default output for one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValue {
    /// Replacement in-memory value, serialized like any other output.
    Object(Value),
    /// File whose bytes are copied verbatim over the parameter's file.
    File(Utf8PathBuf),
}

/// Outputs published when the task body does not produce its own.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Defaults {
    #[serde(default)]
    pub returns: Option<Value>,
    #[serde(default)]
    pub parameters: BTreeMap<String, DefaultValue>,
}

impl Defaults {
    pub fn is_empty(&self) -> bool {
        self.returns.is_none() && self.parameters.is_empty()
    }
}

fn default_target_direction() -> Direction {
    Direction::InOut
}

/// Declared signature of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterSpec>,
    /// Number of declared return values.
    #[serde(default)]
    pub returns: usize,
    /// Direction of the receiver object, if the task has one.
    #[serde(default = "default_target_direction")]
    pub target_direction: Direction,
    #[serde(default)]
    pub on_failure: FailurePolicy,
    #[serde(default)]
    pub defaults: Defaults,
    /// Alternative invocation strategy to run the task body with.
    #[serde(default)]
    pub acceleration: Option<String>,
}

impl TaskConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: BTreeMap::new(),
            returns: 0,
            target_direction: default_target_direction(),
            on_failure: FailurePolicy::default(),
            defaults: Defaults::default(),
            acceleration: None,
        }
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn parameter(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        self.parameters.insert(name.into(), spec);
        self
    }

    pub fn returns(mut self, returns: usize) -> Self {
        self.returns = returns;
        self
    }

    pub fn on_failure(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }

    pub fn default_return(mut self, value: Value) -> Self {
        self.defaults.returns = Some(value);
        self
    }

    pub fn default_parameter(mut self, name: impl Into<String>, value: DefaultValue) -> Self {
        self.defaults.parameters.insert(name.into(), value);
        self
    }

    pub fn target_direction(mut self, direction: Direction) -> Self {
        self.target_direction = direction;
        self
    }

    pub fn accelerate(mut self, mode: impl Into<String>) -> Self {
        self.acceleration = Some(mode.into());
        self
    }

    /// Declared signature entry of a top-level parameter.
    pub fn spec(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.get(name)
    }

    /// Declared direction, falling back to IN for unannotated parameters.
    pub fn direction(&self, name: &str) -> Direction {
        self.spec(name).map(|spec| spec.direction).unwrap_or_default()
    }

    /// Unannotated parameters are objects.
    pub fn is_object(&self, name: &str) -> bool {
        self.spec(name).is_none_or(ParameterSpec::is_object)
    }

    pub fn is_file_collection(&self, name: &str) -> bool {
        self.spec(name).is_some_and(|spec| spec.file_collection)
    }
}
