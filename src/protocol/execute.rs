use std::collections::BTreeMap;
use std::fmt;

use crate::config::TaskConfig;
use crate::error::{TaskError, TaskFailure};
use crate::value::Value;

use super::parameter::{ParameterName, TaskParameter};

/// Arguments handed to a task body.
///
/// The body may mutate them in place; the mutated values are what gets
/// written back for output parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Arguments {
    /// The object the task is a method of.
    pub receiver: Option<Value>,
    pub args: Vec<Value>,
    pub kwargs: BTreeMap<String, Value>,
}

impl Arguments {
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    pub fn arg_mut(&mut self, index: usize) -> Option<&mut Value> {
        self.args.get_mut(index)
    }

    pub fn kwarg(&self, name: &str) -> Option<&Value> {
        self.kwargs.get(name)
    }

    pub fn kwarg_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.kwargs.get_mut(name)
    }
}

/// Where the content of a parameter went in [`Arguments`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Slot {
    Receiver,
    Positional(usize),
    Keyword(String),
    Return,
}

/// Moves the revealed contents into the arguments of the call.
pub(crate) fn segregate(parameters: &mut [TaskParameter]) -> (Arguments, Vec<Slot>) {
    let mut arguments = Arguments::default();
    let mut slots = Vec::with_capacity(parameters.len());

    for parameter in parameters.iter_mut() {
        let content = std::mem::take(&mut parameter.content);

        let slot = match &parameter.name {
            ParameterName::Return(_) => Slot::Return,
            ParameterName::Receiver => {
                arguments.receiver = Some(content);
                Slot::Receiver
            }
            ParameterName::Keyword(name) => {
                arguments.kwargs.insert(name.clone(), content);
                Slot::Keyword(name.clone())
            }
            ParameterName::Positional(_) | ParameterName::Vararg(_) => {
                arguments.args.push(content);
                Slot::Positional(arguments.args.len() - 1)
            }
        };

        slots.push(slot);
    }

    (arguments, slots)
}

/// Moves the (possibly mutated) arguments back into their parameters.
pub(crate) fn restore(parameters: &mut [TaskParameter], slots: &[Slot], mut arguments: Arguments) {
    for (parameter, slot) in parameters.iter_mut().zip(slots) {
        let content = match slot {
            Slot::Return => continue,
            Slot::Receiver => arguments.receiver.take(),
            Slot::Positional(index) => arguments.args.get_mut(*index).map(std::mem::take),
            Slot::Keyword(name) => arguments.kwargs.remove(name),
        };

        parameter.content = content.unwrap_or_else(|| {
            tracing::warn!("{}: argument dropped by the task body", parameter.name);
            Value::Null
        });
    }
}

/// The user function of a task.
pub trait TaskFunction: Send + Sync {
    fn call(&self, arguments: &mut Arguments) -> Result<Value, TaskFailure>;
}

impl<F> TaskFunction for F
where
    F: Fn(&mut Arguments) -> Result<Value, TaskFailure> + Send + Sync,
{
    fn call(&self, arguments: &mut Arguments) -> Result<Value, TaskFailure> {
        self(arguments)
    }
}

/// Alternative way of running a task function, such as a compiled variant
/// of the body.
pub trait InvocationStrategy: Send + Sync {
    fn invoke(
        &self,
        function: &dyn TaskFunction,
        arguments: &mut Arguments,
    ) -> Result<Value, TaskFailure>;
}

impl<F> InvocationStrategy for F
where
    F: Fn(&dyn TaskFunction, &mut Arguments) -> Result<Value, TaskFailure> + Send + Sync,
{
    fn invoke(
        &self,
        function: &dyn TaskFunction,
        arguments: &mut Arguments,
    ) -> Result<Value, TaskFailure> {
        self(function, arguments)
    }
}

/// A task as the worker knows it: declared signature, body and the
/// invocation strategies it can be accelerated with.
pub struct TaskDefinition {
    config: TaskConfig,
    function: Box<dyn TaskFunction>,
    strategies: BTreeMap<String, Box<dyn InvocationStrategy>>,
}

impl fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("config", &self.config)
            .field("strategies", &self.strategies.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TaskDefinition {
    pub fn new<F>(config: TaskConfig, function: F) -> Self
    where
        F: Fn(&mut Arguments) -> Result<Value, TaskFailure> + Send + Sync + 'static,
    {
        Self::from_function(config, Box::new(function))
    }

    pub fn from_function(config: TaskConfig, function: Box<dyn TaskFunction>) -> Self {
        Self {
            config,
            function,
            strategies: BTreeMap::new(),
        }
    }

    /// Registers the strategy used when the task is configured with
    /// acceleration `mode`.
    pub fn accelerator<F>(mut self, mode: impl Into<String>, strategy: F) -> Self
    where
        F: Fn(&dyn TaskFunction, &mut Arguments) -> Result<Value, TaskFailure>
            + Send
            + Sync
            + 'static,
    {
        self.strategies.insert(mode.into(), Box::new(strategy));
        self
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    /// Strategy selected by the configuration; `None` runs the body directly.
    pub(crate) fn strategy(&self) -> Result<Option<&dyn InvocationStrategy>, TaskError> {
        match &self.config.acceleration {
            None => Ok(None),
            Some(mode) => self
                .strategies
                .get(mode)
                .map(|strategy| Some(strategy.as_ref()))
                .ok_or_else(|| TaskError::UnsupportedAcceleration(mode.clone())),
        }
    }

    pub(crate) fn invoke(
        &self,
        strategy: Option<&dyn InvocationStrategy>,
        arguments: &mut Arguments,
    ) -> Result<Value, TaskFailure> {
        match strategy {
            Some(strategy) => strategy.invoke(self.function.as_ref(), arguments),
            None => self.function.call(arguments),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataType, Direction};
    use crate::error::Cancellation;
    use crate::protocol::parameter::Node;

    fn parameter(name: &str, content: Value) -> TaskParameter {
        let mut parameter = TaskParameter::new(
            ParameterName::parse(name),
            Direction::In,
            Node::new(DataType::Int, "0", "int"),
        );
        parameter.content = content;
        parameter
    }

    #[test]
    fn test_segregate_and_restore() {
        let mut params = vec![
            parameter("self", Value::Str("me".into())),
            parameter("a", Value::Int(1)),
            parameter("*rest", Value::Int(2)),
            parameter("#kwarg_k", Value::Int(3)),
            parameter("$return_0", Value::Null),
        ];

        let (mut arguments, slots) = segregate(&mut params);
        assert_eq!(arguments.receiver, Some(Value::Str("me".into())));
        assert_eq!(arguments.args, vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(arguments.kwarg("k"), Some(&Value::Int(3)));
        assert_eq!(params[1].content, Value::Null);

        *arguments.arg_mut(0).unwrap() = Value::Int(10);
        *arguments.kwarg_mut("k").unwrap() = Value::Int(30);
        restore(&mut params, &slots, arguments);

        assert_eq!(params[0].content, Value::Str("me".into()));
        assert_eq!(params[1].content, Value::Int(10));
        assert_eq!(params[2].content, Value::Int(2));
        assert_eq!(params[3].content, Value::Int(30));
    }

    #[test]
    fn test_direct_invocation() {
        let task = TaskDefinition::new(TaskConfig::new("double"), |args| {
            let Some(Value::Int(n)) = args.arg(0) else {
                return Err(anyhow::anyhow!("expected an int").into());
            };
            Ok(Value::Int(n * 2))
        });

        let strategy = task.strategy().unwrap();
        assert!(strategy.is_none());

        let mut args = Arguments {
            args: vec![Value::Int(21)],
            ..Default::default()
        };
        assert_eq!(task.invoke(strategy, &mut args).unwrap(), Value::Int(42));

        let mut args = Arguments::default();
        assert!(matches!(task.invoke(strategy, &mut args), Err(TaskFailure::Failed(_))));
    }

    #[test]
    fn test_accelerated_invocation() {
        let task = TaskDefinition::new(TaskConfig::new("t").accelerate("traced"), |_| {
            Err(Cancellation::new("stop").into())
        })
        .accelerator("traced", |function, args| {
            args.kwargs.insert("accelerated".into(), Value::Bool(true));
            function.call(args)
        });

        let strategy = task.strategy().unwrap();
        let mut args = Arguments::default();
        let result = task.invoke(strategy, &mut args);

        assert!(matches!(result, Err(TaskFailure::Cancelled(c)) if c.message == "stop"));
        assert_eq!(args.kwarg("accelerated"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_unknown_acceleration() {
        let task = TaskDefinition::new(TaskConfig::new("t").accelerate("gpu"), |_| Ok(Value::Null));
        assert!(matches!(
            task.strategy(),
            Err(TaskError::UnsupportedAcceleration(mode)) if mode == "gpu"
        ));
    }
}
