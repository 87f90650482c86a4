//! Writing outputs back to their exchange files once the task body is done.

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::{DefaultValue, Defaults};
use crate::core::{DataType, Direction};
use crate::error::{SerializeError, TaskError};
use crate::io::{Serializer, copy_file};
use crate::value::Value;

use super::parameter::{Node, ParameterName, Shape, TaskParameter, match_keyed};

pub(crate) struct PostProcessor<'a> {
    serializer: &'a dyn Serializer,
    /// Every exchange file written so far.
    updated: Vec<Utf8PathBuf>,
}

impl<'a> PostProcessor<'a> {
    pub(crate) fn new(serializer: &'a dyn Serializer) -> Self {
        Self {
            serializer,
            updated: Vec::new(),
        }
    }

    pub(crate) fn into_updated(self) -> Vec<Utf8PathBuf> {
        self.updated
    }

    /// Replaces the outputs of the task with the configured defaults.
    ///
    /// Object defaults replace the content; file defaults are copied byte
    /// for byte over the parameter's file, which is then left alone.
    pub(crate) fn apply_defaults(
        &mut self,
        parameters: &mut [TaskParameter],
        defaults: &Defaults,
    ) -> Result<(), TaskError> {
        tracing::debug!("applying default values");

        for parameter in parameters.iter_mut() {
            if !parameter.direction.is_write() {
                continue;
            }
            let Some(default) = parameter
                .name
                .declared()
                .and_then(|name| defaults.parameters.get(name))
            else {
                continue;
            };

            match default {
                DefaultValue::Object(value) if parameter.object => {
                    parameter.content = value.clone();
                }
                DefaultValue::Object(_) => {
                    return Err(TaskError::Protocol(format!(
                        "{} is passed by path, its default must be a file",
                        parameter.name
                    )));
                }
                DefaultValue::File(source) => {
                    let Some(target) = parameter.node.file_name.clone() else {
                        return Err(TaskError::Protocol(format!(
                            "{} has no file to copy the default into",
                            parameter.name
                        )));
                    };

                    copy_file(source, &target)
                        .map_err(|e| TaskError::Default(parameter.name.to_string(), e))?;

                    tracing::debug!("{}: default copied from {source}", parameter.name);
                    parameter.defaulted = true;
                    self.updated.push(target);
                }
            }
        }

        Ok(())
    }

    /// Serializes the outputs of every object parameter that travels back:
    /// INOUT and COMMUTATIVE objects, OUT collections, and the receiver
    /// when its target direction writes.
    pub(crate) fn store_outputs(&mut self, parameters: &[TaskParameter]) -> Result<(), TaskError> {
        for parameter in parameters {
            if parameter.name.is_return()
                || !parameter.object
                || parameter.file_collection
                || parameter.defaulted
                || parameter.is_persistent()
            {
                continue;
            }

            let out_collection = parameter.direction == Direction::Out
                && matches!(
                    parameter.node.data_type,
                    DataType::Collection | DataType::DictCollection
                );
            let inout = matches!(
                parameter.direction,
                Direction::InOut | Direction::Commutative
            );
            let receiver = matches!(parameter.name, ParameterName::Receiver)
                && parameter.direction.is_write();

            if inout || out_collection || receiver {
                tracing::debug!("storing {}", parameter.name);
                self.store(&parameter.node, &parameter.content)?;
            }
        }

        Ok(())
    }

    /// Writes `content` back through `node`, descending into collections.
    /// Leaves whose value is unchanged since reveal are skipped.
    fn store(&mut self, node: &Node, content: &Value) -> Result<(), SerializeError> {
        match (&node.shape, content) {
            (Shape::Persistent(_), _) => Ok(()),
            (Shape::Collection(children), Value::List(items)) => {
                if children.len() != items.len() {
                    tracing::warn!(
                        "collection resized from {} to {} elements, extra elements are lost",
                        children.len(),
                        items.len()
                    );
                }
                for (child, item) in children.iter().zip(items) {
                    self.store(child, item)?;
                }
                Ok(())
            }
            (Shape::KeyedCollection(children), Value::Dict(entries)) => {
                let matched = match_keyed(children, entries);

                let added = entries.len().saturating_sub(matched.iter().flatten().count());
                if added > 0 {
                    tracing::warn!("{added} entries with new keys have no file, they are lost");
                }

                for ((key_node, value_node), entry) in children.iter().zip(matched) {
                    match entry {
                        Some((key, value)) => {
                            self.store(key_node, key)?;
                            self.store(value_node, value)?;
                        }
                        None => tracing::warn!(
                            "entry removed by the task, {} left as it was",
                            value_node.file_name.as_deref().map_or("its value", |p| p.as_str())
                        ),
                    }
                }
                Ok(())
            }
            (Shape::Collection(_) | Shape::KeyedCollection(_), _) => {
                tracing::warn!("collection replaced by a non-collection value, not stored");
                Ok(())
            }
            (Shape::Leaf, _) => self.store_leaf(node, content),
        }
    }

    fn store_leaf(&mut self, node: &Node, content: &Value) -> Result<(), SerializeError> {
        if content.is_persistent()
            || node.data_type.is_basic()
            || matches!(
                node.data_type,
                DataType::Collection | DataType::DictCollection | DataType::Directory
            )
        {
            return Ok(());
        }

        let Some(path) = &node.file_name else {
            return Ok(());
        };

        let fingerprint = content.fingerprint();
        if fingerprint.is_some() && fingerprint == node.fingerprint {
            tracing::debug!("{path} unchanged");
            return Ok(());
        }

        self.write(content, path)
    }

    fn write(&mut self, value: &Value, path: &Utf8Path) -> Result<(), SerializeError> {
        self.serializer.serialize(value, path)?;
        tracing::debug!("serialized to {path}");
        self.updated.push(path.to_path_buf());
        Ok(())
    }

    /// Serializes the return values, which always travel through files.
    pub(crate) fn store_returns(
        &mut self,
        parameters: &[TaskParameter],
        returns: &[Value],
    ) -> Result<(), TaskError> {
        let slots = parameters.iter().filter(|p| p.name.is_return());

        for (parameter, value) in slots.zip(returns) {
            if value.is_persistent() || parameter.node.data_type == DataType::ExternalPsco {
                continue;
            }
            if let Some(path) = &parameter.node.file_name {
                self.write(value, path)?;
            }
        }

        Ok(())
    }
}

/// Spreads what the body returned over the declared return slots.
pub(crate) fn normalize_returns(
    task: &str,
    expected: usize,
    value: Value,
) -> Result<Vec<Value>, TaskError> {
    match (expected, value) {
        (0, _) => Ok(Vec::new()),
        (1, value) => Ok(vec![value]),
        (n, Value::Null) => Ok(vec![Value::Null; n]),
        (n, Value::List(items)) if items.len() == n => Ok(items),
        (n, Value::List(items)) => Err(TaskError::ReturnArity {
            task: task.to_string(),
            expected: n,
            found: items.len(),
        }),
        (n, _) => Err(TaskError::ReturnArity {
            task: task.to_string(),
            expected: n,
            found: 1,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::CborSerializer;

    fn leaf(path: &Utf8Path, original: Option<&Value>) -> Node {
        let mut node = Node::new(DataType::File, path.as_str(), "int");
        node.fingerprint = original.and_then(Value::fingerprint);
        node
    }

    fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    #[test]
    fn test_normalize_returns() {
        assert!(normalize_returns("t", 0, Value::Int(1)).unwrap().is_empty());
        assert_eq!(
            normalize_returns("t", 1, Value::List(vec![])).unwrap(),
            vec![Value::List(vec![])]
        );
        assert_eq!(
            normalize_returns("t", 2, Value::Null).unwrap(),
            vec![Value::Null, Value::Null]
        );
        assert_eq!(
            normalize_returns("t", 2, Value::List(vec![1.into(), 2.into()])).unwrap(),
            vec![Value::Int(1), Value::Int(2)]
        );
        assert!(matches!(
            normalize_returns("t", 3, Value::List(vec![1.into()])),
            Err(TaskError::ReturnArity { expected: 3, found: 1, .. })
        ));
    }

    #[test]
    fn test_only_changed_leaves_are_written() {
        let (_dir, root) = temp_root();
        let (a, b) = (root.join("a"), root.join("b"));

        let before = [Value::Int(1), Value::Int(2)];
        let mut parameter = TaskParameter::new(
            ParameterName::parse("xs"),
            Direction::InOut,
            Node::new(DataType::Collection, root.join("manifest").as_str(), "list"),
        );
        parameter.node.shape = Shape::Collection(vec![
            leaf(&a, Some(&before[0])),
            leaf(&b, Some(&before[1])),
        ]);
        parameter.content = Value::List(vec![Value::Int(1), Value::Int(20)]);

        let mut post = PostProcessor::new(&CborSerializer);
        post.store_outputs(&[parameter]).unwrap();

        assert_eq!(post.into_updated(), vec![b.clone()]);
        assert!(!a.exists());
        assert_eq!(CborSerializer.deserialize(&b).unwrap(), Value::Int(20));
    }

    #[test]
    fn test_in_parameters_are_not_written() {
        let (_dir, root) = temp_root();
        let path = root.join("x");

        let mut parameter =
            TaskParameter::new(ParameterName::parse("x"), Direction::In, leaf(&path, None));
        parameter.content = Value::Int(3);

        let mut post = PostProcessor::new(&CborSerializer);
        post.store_outputs(&[parameter]).unwrap();
        assert!(post.into_updated().is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_persistent_leaves_are_skipped() {
        let (_dir, root) = temp_root();
        let path = root.join("p");

        let mut parameter =
            TaskParameter::new(ParameterName::parse("p"), Direction::InOut, leaf(&path, None));
        parameter.content = Value::persistent("psco-9", Value::Null);

        let mut post = PostProcessor::new(&CborSerializer);
        post.store_outputs(&[parameter]).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_file_default_is_copied() {
        let (_dir, root) = temp_root();
        let source = root.join("default.bin");
        let target = root.join("out.bin");
        std::fs::write(&source, b"\x00fallback\xff").unwrap();

        let mut parameter = TaskParameter::new(
            ParameterName::parse("out"),
            Direction::Out,
            leaf(&target, None),
        );
        parameter.object = false;

        let mut defaults = Defaults::default();
        defaults
            .parameters
            .insert("out".into(), DefaultValue::File(source.clone()));

        let mut parameters = [parameter];
        let mut post = PostProcessor::new(&CborSerializer);
        post.apply_defaults(&mut parameters, &defaults).unwrap();

        assert!(parameters[0].defaulted);
        assert_eq!(
            std::fs::read(&target).unwrap(),
            std::fs::read(&source).unwrap()
        );
    }

    #[test]
    fn test_object_default_on_path_parameter() {
        let mut parameter = TaskParameter::new(
            ParameterName::parse("out"),
            Direction::Out,
            Node::new(DataType::File, "/tmp/out", "null"),
        );
        parameter.object = false;

        let mut defaults = Defaults::default();
        defaults
            .parameters
            .insert("out".into(), DefaultValue::Object(Value::Int(0)));

        let mut post = PostProcessor::new(&CborSerializer);
        assert!(matches!(
            post.apply_defaults(&mut [parameter], &defaults),
            Err(TaskError::Protocol(_))
        ));
    }

    #[test]
    fn test_returns_written() {
        let (_dir, root) = temp_root();
        let r0 = root.join("r0");
        let r1 = root.join("r1");

        let parameters = [
            TaskParameter::new(
                ParameterName::Return(0),
                Direction::Out,
                Node::new(DataType::File, r0.as_str(), "null"),
            ),
            TaskParameter::new(
                ParameterName::Return(1),
                Direction::Out,
                Node::new(DataType::File, r1.as_str(), "null"),
            ),
        ];
        let returns = [Value::Str("done".into()), Value::persistent("psco-1", Value::Null)];

        let mut post = PostProcessor::new(&CborSerializer);
        post.store_returns(&parameters, &returns).unwrap();

        assert_eq!(CborSerializer.deserialize(&r0).unwrap(), Value::Str("done".into()));
        assert!(!r1.exists());
        assert_eq!(post.into_updated(), vec![r0]);
    }
}
