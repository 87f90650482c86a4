//! The result message sent back to the engine.

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::core::{DataType, Direction};
use crate::value::Value;

use super::parameter::{Node, Shape, TaskParameter, match_keyed};

/// Post-call value of one parameter, receiver or return.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReportedValue {
    /// Unchanged identity, the exchange file holds the value.
    Null,
    /// Identifier of the persistent object the value now is.
    Persistent(String),
    /// One entry per element, keyed collections list key then value.
    Collection(Vec<ResultEntry>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultEntry {
    #[serde(rename = "type")]
    pub data_type: DataType,
    pub value: ReportedValue,
}

impl ResultEntry {
    pub fn new(data_type: DataType, value: ReportedValue) -> Self {
        Self { data_type, value }
    }

    fn null(data_type: DataType) -> Self {
        Self::new(data_type, ReportedValue::Null)
    }

    fn persistent(id: &str) -> Self {
        Self::new(DataType::ExternalPsco, ReportedValue::Persistent(id.to_string()))
    }
}

/// Everything the engine learns about one finished invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultMessage {
    /// Parameters in wire order, then the receiver, then the returns.
    pub entries: Vec<ResultEntry>,
    pub target_direction: Direction,
    /// Exchange files written by the worker.
    pub updated: Vec<Utf8PathBuf>,
    pub nesting: bool,
}

impl ResultMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Reports a non-return parameter. A parameter that became a persistent
/// object is reported as one, whatever its declared type.
pub(crate) fn parameter_entry(parameter: &TaskParameter) -> ResultEntry {
    let node = &parameter.node;

    match node.data_type {
        DataType::File | DataType::ExternalPsco => match parameter.content.persistent_id() {
            Some(id) => ResultEntry::persistent(id),
            None => ResultEntry::null(node.data_type),
        },
        DataType::Collection | DataType::DictCollection => ResultEntry::new(
            node.data_type,
            ReportedValue::Collection(elements(node, &parameter.content, parameter.direction)),
        ),
        data_type => ResultEntry::null(data_type),
    }
}

fn elements(node: &Node, content: &Value, direction: Direction) -> Vec<ResultEntry> {
    match (&node.shape, content) {
        (Shape::Collection(children), Value::List(items)) => children
            .iter()
            .enumerate()
            .map(|(i, child)| element(child, items.get(i), direction))
            .collect(),
        (Shape::KeyedCollection(children), Value::Dict(entries)) => children
            .iter()
            .zip(match_keyed(children, entries))
            .flat_map(|((key_node, value_node), entry)| {
                [
                    element(key_node, entry.map(|(k, _)| k), direction),
                    element(value_node, entry.map(|(_, v)| v), direction),
                ]
            })
            .collect(),
        (Shape::Collection(children), _) => {
            children.iter().map(|child| element(child, None, direction)).collect()
        }
        (Shape::KeyedCollection(children), _) => children
            .iter()
            .flat_map(|(key_node, value_node)| {
                [element(key_node, None, direction), element(value_node, None, direction)]
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn element(node: &Node, content: Option<&Value>, direction: Direction) -> ResultEntry {
    match node.data_type {
        DataType::Collection | DataType::DictCollection => ResultEntry::new(
            node.data_type,
            ReportedValue::Collection(elements(
                node,
                content.unwrap_or(&Value::Null),
                direction,
            )),
        ),
        DataType::File | DataType::ExternalPsco if direction != Direction::In => {
            match content.and_then(Value::persistent_id) {
                Some(id) => ResultEntry::persistent(id),
                None => ResultEntry::null(node.data_type),
            }
        }
        data_type => ResultEntry::null(data_type),
    }
}

/// Receiver entry as it stood before the call.
pub(crate) fn receiver_before(receiver: &TaskParameter) -> ResultEntry {
    match receiver.content.persistent_id() {
        Some(id) => ResultEntry::persistent(id),
        None => ResultEntry::null(DataType::File),
    }
}

/// Receiver entry after the call. It is only re-inspected when the task
/// declares it INOUT.
pub(crate) fn receiver_entry(
    receiver: &TaskParameter,
    target_direction: Direction,
    before: ResultEntry,
) -> ResultEntry {
    if target_direction == Direction::InOut {
        receiver_before(receiver)
    } else {
        before
    }
}

/// Reports a return value against its declared slot. Only a slot declared
/// as a collection is expanded; any other value travels whole in the slot's
/// file.
pub(crate) fn return_entry(slot: &Node, value: &Value) -> ResultEntry {
    if let Some(id) = value.persistent_id() {
        return ResultEntry::persistent(id);
    }

    match (slot.data_type, value) {
        (DataType::Collection, Value::List(items)) => ResultEntry::new(
            DataType::Collection,
            ReportedValue::Collection(
                items
                    .iter()
                    .map(|item| match item.persistent_id() {
                        Some(id) => ResultEntry::persistent(id),
                        None => ResultEntry::null(DataType::File),
                    })
                    .collect(),
            ),
        ),
        _ => ResultEntry::null(DataType::File),
    }
}
