//! Worker side of a task invocation.
//!
//! A [`TaskWorker`] takes the flat list of [`WireParameter`]s the engine sent
//! for one invocation and drives it through
//! `Received → Revealing → Executing → PostProcessing → Reporting → Done`:
//!
//! 1. every parameter is revealed into a [`Value`], descending into
//!    collections and keyed collections;
//! 2. the task body runs on those values;
//! 3. outputs are written back to their exchange files, returns are
//!    serialized;
//! 4. a [`ResultMessage`] describes the post-call state of every parameter.

mod execute;
pub mod manifest;
mod parameter;
mod post;
mod report;
mod reveal;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::config::{FailurePolicy, WorkerConfig};
use crate::core::Direction;
use crate::error::{Cancellation, TaskError, TaskFailure};
use crate::io::{CborSerializer, Serializer};
use crate::storage::{NoStorage, Storage};
use crate::value::Value;

pub use execute::{Arguments, InvocationStrategy, TaskDefinition, TaskFunction};
pub use manifest::ManifestEntry;
pub use parameter::{Node, ParameterName, Shape, TaskParameter, WireParameter};
pub use report::{ReportedValue, ResultEntry, ResultMessage};
pub use reveal::{ElementMode, Partition, element_mode};

/// State of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Revealing,
    Executing,
    PostProcessing,
    Reporting,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Received => "RECEIVED",
            Stage::Revealing => "REVEALING",
            Stage::Executing => "EXECUTING",
            Stage::PostProcessing => "POST_PROCESSING",
            Stage::Reporting => "REPORTING",
            Stage::Done => "DONE",
            Stage::Failed => "FAILED",
        };
        f.write_str(label)
    }
}

/// One invocation as the engine sends it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub parameters: Vec<WireParameter>,
    /// Rank partition of distributed collection parameters, by parameter
    /// name.
    #[serde(default)]
    pub partitions: BTreeMap<String, Partition>,
}

impl TaskRequest {
    pub fn new(parameters: Vec<WireParameter>) -> Self {
        Self {
            parameters,
            partitions: BTreeMap::new(),
        }
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn partition(mut self, name: impl Into<String>, partition: Partition) -> Self {
        self.partitions.insert(name.into(), partition);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    Completed,
    /// The body raised a [`Cancellation`]; the engine should cancel the rest
    /// of the task group.
    GroupCancelled {
        message: String,
        target_direction: Direction,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub message: ResultMessage,
    pub status: TaskStatus,
}

/// How the task body ended, after failure handling.
struct Execution {
    returns: Value,
    use_defaults: bool,
    cancellation: Option<Cancellation>,
}

struct Invocation<'a> {
    task: &'a str,
    stage: Stage,
}

impl<'a> Invocation<'a> {
    fn new(task: &'a str) -> Self {
        Self {
            task,
            stage: Stage::Received,
        }
    }

    fn advance(&mut self, stage: Stage) {
        tracing::debug!("{}: {} -> {}", self.task, self.stage, stage);
        self.stage = stage;
    }
}

/// Runs task invocations inside a worker process.
#[derive(Clone)]
pub struct TaskWorker {
    config: WorkerConfig,
    serializer: Arc<dyn Serializer>,
    storage: Arc<dyn Storage>,
}

impl fmt::Debug for TaskWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskWorker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for TaskWorker {
    fn default() -> Self {
        Self::new(WorkerConfig::default())
    }
}

impl TaskWorker {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            serializer: Arc::new(CborSerializer),
            storage: Arc::new(NoStorage),
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Runs one invocation of `task`.
    ///
    /// Resolution faults, serialization faults and body failures not covered
    /// by the failure policy end the invocation with an error. A cancellation
    /// raised by the body is not an error: its outputs are published and the
    /// outcome is [`TaskStatus::GroupCancelled`].
    pub fn run(&self, task: &TaskDefinition, request: &TaskRequest) -> Result<TaskOutcome, TaskError> {
        let name = task.config().name.as_str();
        let span = tracing::span!(Level::INFO, "task", name);
        let _enter = span.enter();

        let mut invocation = Invocation::new(name);
        let result = self.execute(task, request, &mut invocation);

        match &result {
            Ok(outcome) => {
                invocation.advance(Stage::Done);
                if let TaskStatus::GroupCancelled { message, .. } = &outcome.status {
                    tracing::warn!("task group cancelled: {message}");
                } else {
                    tracing::info!("task completed");
                }
            }
            Err(e) => {
                let stage = invocation.stage;
                invocation.advance(Stage::Failed);
                tracing::error!("task failed while {stage}: {e}");
            }
        }

        result
    }

    fn execute(
        &self,
        task: &TaskDefinition,
        request: &TaskRequest,
        invocation: &mut Invocation<'_>,
    ) -> Result<TaskOutcome, TaskError> {
        let config = task.config();
        let strategy = task.strategy()?;

        let num_returns = request
            .parameters
            .iter()
            .filter(|wire| ParameterName::parse(&wire.name).is_return())
            .count();
        if num_returns != config.returns {
            return Err(TaskError::Protocol(format!(
                "task '{}' declares {} return values but {} return files were sent",
                config.name, config.returns, num_returns
            )));
        }

        invocation.advance(Stage::Revealing);
        let mut parameters = reveal::Revealer::new(
            config,
            self.serializer.as_ref(),
            self.storage.as_ref(),
            self.config.rank,
            &request.partitions,
        )
        .reveal_all(&request.parameters)?;

        let receiver_before = parameters
            .iter()
            .find(|p| p.name == ParameterName::Receiver)
            .map(report::receiver_before);

        invocation.advance(Stage::Executing);
        let (mut arguments, slots) = execute::segregate(&mut parameters);
        let result = task.invoke(strategy, &mut arguments);
        execute::restore(&mut parameters, &slots, arguments);

        let execution = match result {
            Ok(returns) => Execution {
                returns,
                use_defaults: false,
                cancellation: None,
            },
            Err(TaskFailure::Cancelled(cancellation)) => {
                tracing::warn!("cancellation raised: {cancellation}");
                Execution {
                    returns: config.defaults.returns.clone().unwrap_or_default(),
                    use_defaults: true,
                    cancellation: Some(cancellation),
                }
            }
            Err(TaskFailure::Failed(e)) if config.on_failure == FailurePolicy::Ignore => {
                tracing::warn!("task body failed, publishing defaults: {e:#}");
                Execution {
                    returns: config.defaults.returns.clone().unwrap_or_default(),
                    use_defaults: true,
                    cancellation: None,
                }
            }
            Err(TaskFailure::Failed(e)) => return Err(TaskError::Task(config.name.clone(), e)),
        };

        invocation.advance(Stage::PostProcessing);
        let mut post = post::PostProcessor::new(self.serializer.as_ref());
        if execution.use_defaults {
            post.apply_defaults(&mut parameters, &config.defaults)?;
        }
        post.store_outputs(&parameters)?;

        let returns = post::normalize_returns(&config.name, num_returns, execution.returns)?;
        post.store_returns(&parameters, &returns)?;

        invocation.advance(Stage::Reporting);
        let mut entries: Vec<ResultEntry> = parameters
            .iter()
            .filter(|p| !p.name.is_return() && p.name != ParameterName::Receiver)
            .map(report::parameter_entry)
            .collect();

        if let Some((receiver, before)) = parameters
            .iter()
            .find(|p| p.name == ParameterName::Receiver)
            .zip(receiver_before)
        {
            entries.push(report::receiver_entry(receiver, config.target_direction, before));
        }

        let return_slots = parameters.iter().filter(|p| p.name.is_return());
        entries.extend(
            return_slots
                .zip(&returns)
                .map(|(slot, value)| report::return_entry(&slot.node, value)),
        );

        let message = ResultMessage {
            entries,
            target_direction: config.target_direction,
            updated: post.into_updated(),
            nesting: self.config.nesting,
        };

        let status = match execution.cancellation {
            Some(cancellation) => TaskStatus::GroupCancelled {
                message: cancellation.message,
                target_direction: config.target_direction,
            },
            None => TaskStatus::Completed,
        };

        Ok(TaskOutcome { message, status })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskConfig;
    use crate::core::DataType;

    #[test]
    fn test_stage_labels() {
        assert_eq!(Stage::PostProcessing.to_string(), "POST_PROCESSING");
        assert_eq!(Stage::Done.to_string(), "DONE");
    }

    #[test]
    fn test_request_json() {
        let request = TaskRequest::from_json(
            r#"{
                "parameters": [
                    { "name": "n", "type": 10, "value": "3", "content_type": "int" },
                    { "name": "$return_0", "type": 0, "value": "/tmp/r0" }
                ],
                "partitions": { "col": { "0": [0, 1], "1": [2, 3] } }
            }"#,
        )
        .unwrap();

        assert_eq!(request.parameters.len(), 2);
        assert_eq!(request.parameters[0].data_type, DataType::Int);
        assert_eq!(request.partitions["col"][&1].len(), 2);
    }

    #[test]
    fn test_scalar_invocation() {
        let task = TaskDefinition::new(TaskConfig::new("add"), |args| match args.args[..] {
            [Value::Int(a), Value::Int(b)] => Ok(Value::Int(a + b)),
            _ => Err(anyhow::anyhow!("expected two ints").into()),
        });

        let request = TaskRequest::new(vec![
            WireParameter::new("a", DataType::Int, "2"),
            WireParameter::new("b", DataType::Int, "3"),
        ]);

        let outcome = TaskWorker::default().run(&task, &request).unwrap();
        assert_eq!(outcome.status, TaskStatus::Completed);
        assert_eq!(outcome.message.entries.len(), 2);
        assert!(outcome.message.updated.is_empty());
        assert!(outcome.message.nesting);
    }

    #[test]
    fn test_failure_propagates() {
        let task = TaskDefinition::new(TaskConfig::new("boom"), |_| {
            Err(anyhow::anyhow!("kaboom").into())
        });

        let err = TaskWorker::default()
            .run(&task, &TaskRequest::default())
            .unwrap_err();
        assert!(matches!(err, TaskError::Task(name, _) if name == "boom"));
    }

    #[test]
    fn test_return_count_mismatch() {
        let task = TaskDefinition::new(TaskConfig::new("t").returns(2), |_| Ok(Value::Null));
        let request = TaskRequest::new(vec![WireParameter::ret(0, "/tmp/r0")]);

        let err = TaskWorker::default().run(&task, &request).unwrap_err();
        assert!(matches!(err, TaskError::Protocol(_)));
    }

    #[test]
    fn test_unknown_acceleration_fails_before_reveal() {
        let task = TaskDefinition::new(TaskConfig::new("t").accelerate("gpu"), |_| {
            panic!("must not run")
        });
        let request = TaskRequest::new(vec![WireParameter::file("x", "/nonexistent/x")]);

        let err = TaskWorker::default().run(&task, &request).unwrap_err();
        assert!(matches!(err, TaskError::UnsupportedAcceleration(_)));
    }
}
