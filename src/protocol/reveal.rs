//! Turning wire parameters into the values handed to the task body.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use camino::Utf8PathBuf;

use crate::config::TaskConfig;
use crate::core::{DataType, Direction};
use crate::error::RevealError;
use crate::io::{Serializer, exchange_path};
use crate::storage::Storage;
use crate::value::Value;

use super::manifest;
use super::parameter::{Node, ParameterName, Shape, TaskParameter, WireParameter};

/// Element offsets of one collection parameter assigned to every rank.
pub type Partition = BTreeMap<usize, BTreeSet<usize>>;

static NO_OFFSETS: BTreeSet<usize> = BTreeSet::new();

/// How the elements of a collection are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementMode {
    /// Synthesize empty values; nothing has been written yet.
    Placeholder,
    /// Inner layer of an output collection, `depth` levels left.
    Out(usize),
    /// Read every element from its exchange file.
    Read,
}

/// Decides the element mode of a collection from its declared direction
/// and its nesting depth.
///
/// Inner collections have no declared direction: a positive inherited depth
/// marks them as layers of an output collection.
pub fn element_mode(declared: Option<Direction>, depth: usize) -> ElementMode {
    let out = match declared {
        Some(direction) => direction == Direction::Out,
        None => depth > 0,
    };

    match (out, depth) {
        (false, _) => ElementMode::Read,
        (true, 0 | 1) => ElementMode::Placeholder,
        (true, depth) => ElementMode::Out(depth - 1),
    }
}

#[derive(Debug, Clone, Copy)]
struct Level<'p> {
    declared: Option<Direction>,
    depth: usize,
    offsets: Option<&'p BTreeSet<usize>>,
    object: bool,
    file_collection: bool,
}

impl Level<'_> {
    fn inner(depth: usize) -> Self {
        Self {
            declared: None,
            depth,
            offsets: None,
            object: true,
            file_collection: false,
        }
    }
}

pub(crate) struct Revealer<'a> {
    config: &'a TaskConfig,
    serializer: &'a dyn Serializer,
    storage: &'a dyn Storage,
    rank: Option<usize>,
    partitions: &'a BTreeMap<String, Partition>,
    prefetched: HashMap<String, Value>,
}

impl<'a> Revealer<'a> {
    pub(crate) fn new(
        config: &'a TaskConfig,
        serializer: &'a dyn Serializer,
        storage: &'a dyn Storage,
        rank: Option<usize>,
        partitions: &'a BTreeMap<String, Partition>,
    ) -> Self {
        Self {
            config,
            serializer,
            storage,
            rank,
            partitions,
            prefetched: HashMap::new(),
        }
    }

    /// Reveals every parameter, in wire order. Return parameters are only
    /// decoded; they have no content yet.
    pub(crate) fn reveal_all(
        &mut self,
        parameters: &[WireParameter],
    ) -> Result<Vec<TaskParameter>, RevealError> {
        self.prefetch(parameters)?;
        parameters.iter().map(|wire| self.reveal(wire)).collect()
    }

    /// Resolves every persistent reference of the invocation in one call
    /// when the storage supports it, nested collection elements included.
    fn prefetch(&mut self, parameters: &[WireParameter]) -> Result<(), RevealError> {
        if !self.storage.supports_pipelining() {
            return Ok(());
        }

        let mut ids = Vec::new();
        let mut names = Vec::new();

        for wire in parameters {
            let Some(declared) = ParameterName::parse(&wire.name).declared().map(str::to_string)
            else {
                continue;
            };

            let before = ids.len();
            let offsets = self
                .partitions
                .get(&declared)
                .zip(self.rank)
                .map(|(partition, rank)| partition.get(&rank).unwrap_or(&NO_OFFSETS));

            collect_ids(&wire.name, wire.data_type, &wire.value, offsets, &mut ids)?;
            if ids.len() > before {
                names.push(wire.name.as_str());
            }
        }

        if ids.is_empty() {
            return Ok(());
        }

        tracing::debug!("resolving {} persistent objects in one batch", ids.len());

        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let objects = self
            .storage
            .get_by_ids(&refs)
            .map_err(|e| RevealError::Storage(names.join(","), e))?;

        self.prefetched.extend(ids.into_iter().zip(objects));

        Ok(())
    }

    fn reveal(&mut self, wire: &WireParameter) -> Result<TaskParameter, RevealError> {
        let name = ParameterName::parse(&wire.name);
        let mut node = Node::new(wire.data_type, &wire.value, &wire.content_type);

        let Some(declared) = name.declared() else {
            return Ok(TaskParameter::new(name, Direction::Out, node));
        };

        tracing::debug!("revealing {}", wire.name);

        let spec = self.config.spec(declared);
        let direction = match name {
            ParameterName::Receiver => self.config.target_direction,
            _ => self.config.direction(declared),
        };

        let level = Level {
            declared: match name {
                ParameterName::Receiver => Some(direction),
                _ => spec.map(|spec| spec.direction),
            },
            depth: spec.map_or(0, |spec| spec.depth),
            offsets: self.offsets(declared),
            object: self.config.is_object(declared),
            file_collection: self.config.is_file_collection(declared),
        };

        let content = self.node(&wire.name, &mut node, &wire.value, level)?;

        let mut parameter = TaskParameter::new(name, direction, node);
        parameter.content = content;
        parameter.object = level.object;
        parameter.file_collection = level.file_collection;
        Ok(parameter)
    }

    fn offsets(&self, declared: &str) -> Option<&'a BTreeSet<usize>> {
        let partition = self.partitions.get(declared)?;

        match self.rank {
            Some(rank) => Some(partition.get(&rank).unwrap_or(&NO_OFFSETS)),
            None => {
                tracing::warn!("{declared}: partition map ignored, this worker has no rank");
                None
            }
        }
    }

    fn node(
        &mut self,
        name: &str,
        node: &mut Node,
        raw: &str,
        level: Level<'_>,
    ) -> Result<Value, RevealError> {
        let mode = element_mode(level.declared, level.depth);

        match node.data_type {
            DataType::Collection => self.collection(name, node, level, mode),
            DataType::DictCollection => self.keyed_collection(name, node, mode),
            DataType::ExternalPsco | DataType::Psco => self.persistent(name, node),
            DataType::Directory | DataType::Stream | DataType::BindingObject => {
                Ok(path_value(node, raw))
            }
            DataType::File | DataType::Object if !level.object => Ok(path_value(node, raw)),
            DataType::File | DataType::Object | DataType::ExternalStream => {
                self.object(name, node, mode)
            }
            data_type => Value::from_literal(data_type, raw)
                .ok_or_else(|| RevealError::Literal(name.to_string(), raw.to_string(), data_type)),
        }
    }

    fn object(&self, name: &str, node: &mut Node, mode: ElementMode) -> Result<Value, RevealError> {
        let path = match (&node.file_name, mode) {
            (Some(path), ElementMode::Read) => path,
            _ => {
                tracing::debug!("{name}: placeholder of type {}", node.content_type);
                return Ok(Value::placeholder(&node.content_type));
            }
        };

        let value = self
            .serializer
            .deserialize(path)
            .map_err(|e| RevealError::Serialize(name.to_string(), e))?;

        tracing::debug!("{name}: deserialized from {path}");
        node.fingerprint = value.fingerprint();
        Ok(value)
    }

    fn persistent(&self, name: &str, node: &Node) -> Result<Value, RevealError> {
        let Shape::Persistent(id) = &node.shape else {
            return Ok(Value::Null);
        };

        if let Some(value) = self.prefetched.get(id) {
            return Ok(value.clone());
        }

        tracing::debug!("{name}: resolving persistent object {id}");
        self.storage
            .get_by_id(id)
            .map_err(|e| RevealError::Storage(name.to_string(), e))
    }

    fn manifest_path(node: &Node) -> Utf8PathBuf {
        node.file_name.clone().unwrap_or_default()
    }

    fn collection(
        &mut self,
        name: &str,
        node: &mut Node,
        level: Level<'_>,
        mode: ElementMode,
    ) -> Result<Value, RevealError> {
        let path = Self::manifest_path(node);
        let entries =
            manifest::read(&path).map_err(|e| RevealError::Manifest(name.to_string(), e))?;

        tracing::debug!(
            "{name}: collection of {} elements in {path}, depth {}",
            entries.len(),
            level.depth
        );

        let inner = Level::inner(match mode {
            ElementMode::Out(depth) => depth,
            _ => 0,
        });

        let mut children = Vec::with_capacity(entries.len());
        let mut items = Vec::with_capacity(entries.len());

        for (offset, entry) in entries.iter().enumerate() {
            if level.offsets.is_some_and(|offsets| !offsets.contains(&offset)) {
                continue;
            }

            let mut child = Node::new(entry.data_type, &entry.value, &entry.content_type);
            let value = if level.file_collection {
                path_value(&child, &entry.value)
            } else if mode == ElementMode::Placeholder {
                Value::placeholder(&entry.content_type)
            } else {
                self.node(&format!("{name}.{offset}"), &mut child, &entry.value, inner)?
            };

            children.push(child);
            items.push(value);
        }

        // A rank owning exactly one element gets the element itself.
        if level.offsets.is_some_and(|offsets| offsets.len() == 1) && children.len() == 1 {
            if let (Some(child), Some(value)) = (children.pop(), items.pop()) {
                tracing::debug!("{name}: collapsed to a single element");
                *node = child;
                return Ok(value);
            }
        }

        node.shape = Shape::Collection(children);
        Ok(Value::List(items))
    }

    fn keyed_collection(
        &mut self,
        name: &str,
        node: &mut Node,
        mode: ElementMode,
    ) -> Result<Value, RevealError> {
        let path = Self::manifest_path(node);
        let pairs =
            manifest::read_pairs(&path).map_err(|e| RevealError::Manifest(name.to_string(), e))?;

        tracing::debug!("{name}: keyed collection of {} entries in {path}", pairs.len());

        let inner = Level::inner(match mode {
            ElementMode::Out(depth) => depth,
            _ => 0,
        });

        let mut children = Vec::with_capacity(pairs.len());
        let mut entries = Vec::with_capacity(pairs.len());

        for (i, (key, value)) in pairs.iter().enumerate() {
            let mut key_node = Node::new(key.data_type, &key.value, &key.content_type);
            let mut value_node = Node::new(value.data_type, &value.value, &value.content_type);

            let entry = if mode == ElementMode::Placeholder {
                (
                    Value::placeholder(&key.content_type),
                    Value::placeholder(&value.content_type),
                )
            } else {
                let revealed_key =
                    self.node(&format!("{name}.{i}.key"), &mut key_node, &key.value, inner)?;
                if key.data_type.is_basic() {
                    key_node.fingerprint = revealed_key.fingerprint();
                }
                (
                    revealed_key,
                    self.node(&format!("{name}.{i}.value"), &mut value_node, &value.value, inner)?,
                )
            };

            children.push((key_node, value_node));
            entries.push(entry);
        }

        node.shape = Shape::KeyedCollection(children);
        Ok(Value::Dict(entries))
    }
}

/// Gathers the distinct persistent identifiers reachable from one wire
/// reference, reading collection manifests on the way.
fn collect_ids(
    name: &str,
    data_type: DataType,
    raw: &str,
    offsets: Option<&BTreeSet<usize>>,
    ids: &mut Vec<String>,
) -> Result<(), RevealError> {
    match data_type {
        DataType::Psco | DataType::ExternalPsco => {
            if !ids.iter().any(|id| id == raw) {
                ids.push(raw.to_string());
            }
        }
        DataType::Collection => {
            let entries = manifest::read(&exchange_path(raw))
                .map_err(|e| RevealError::Manifest(name.to_string(), e))?;

            for (offset, entry) in entries.iter().enumerate() {
                if offsets.is_some_and(|offsets| !offsets.contains(&offset)) {
                    continue;
                }
                collect_ids(name, entry.data_type, &entry.value, None, ids)?;
            }
        }
        DataType::DictCollection => {
            let pairs = manifest::read_pairs(&exchange_path(raw))
                .map_err(|e| RevealError::Manifest(name.to_string(), e))?;

            for (key, value) in &pairs {
                collect_ids(name, key.data_type, &key.value, None, ids)?;
                collect_ids(name, value.data_type, &value.value, None, ids)?;
            }
        }
        _ => {}
    }

    Ok(())
}

/// Passes a path (or an opaque literal) to the task body verbatim.
fn path_value(node: &Node, raw: &str) -> Value {
    match &node.file_name {
        Some(path) => Value::Str(path.to_string()),
        None => Value::Str(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8Path;

    use super::*;
    use crate::config::{Annotation, ParameterSpec};
    use crate::io::CborSerializer;
    use crate::protocol::manifest::ManifestEntry;
    use crate::storage::{MemoryStorage, NoStorage};

    struct Fixture {
        _dir: tempfile::TempDir,
        root: Utf8PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
            Self { _dir: dir, root }
        }

        fn object(&self, name: &str, value: &Value) -> String {
            let path = self.root.join(name);
            CborSerializer.serialize(value, &path).unwrap();
            path.to_string()
        }

        fn manifest(&self, name: &str, entries: &[ManifestEntry]) -> String {
            let path = self.root.join(name);
            manifest::write(&path, entries).unwrap();
            path.to_string()
        }

        fn missing(&self, name: &str) -> String {
            self.root.join(name).to_string()
        }
    }

    fn reveal(
        config: &TaskConfig,
        storage: &dyn Storage,
        rank: Option<usize>,
        partitions: &BTreeMap<String, Partition>,
        wire: &[WireParameter],
    ) -> Result<Vec<TaskParameter>, RevealError> {
        Revealer::new(config, &CborSerializer, storage, rank, partitions).reveal_all(wire)
    }

    #[test]
    fn test_element_mode() {
        assert_eq!(element_mode(Some(Direction::In), 1), ElementMode::Read);
        assert_eq!(element_mode(Some(Direction::InOut), 3), ElementMode::Read);
        assert_eq!(element_mode(Some(Direction::Out), 1), ElementMode::Placeholder);
        assert_eq!(element_mode(Some(Direction::Out), 3), ElementMode::Out(2));
        assert_eq!(element_mode(None, 0), ElementMode::Read);
        assert_eq!(element_mode(None, 1), ElementMode::Placeholder);
        assert_eq!(element_mode(None, 2), ElementMode::Out(1));
    }

    #[test]
    fn test_scalars_and_files() {
        let fx = Fixture::new();
        let obj = fx.object("obj", &Value::Int(5));

        let config = TaskConfig::new("t")
            .parameter("path", ParameterSpec::new(Direction::In).with_content(Annotation::File));

        let wire = [
            WireParameter::new("n", DataType::Int, "12"),
            WireParameter::file("obj", format!("node1:{obj}")),
            WireParameter::file("path", "/data/input.csv"),
            WireParameter::new("#kwarg_flag", DataType::Boolean, "true"),
        ];

        let params = reveal(&config, &NoStorage, None, &BTreeMap::new(), &wire).unwrap();
        assert_eq!(params[0].content, Value::Int(12));
        assert_eq!(params[1].content, Value::Int(5));
        assert!(params[1].node.fingerprint.is_some());
        assert_eq!(params[2].content, Value::Str("/data/input.csv".into()));
        assert_eq!(params[3].content, Value::Bool(true));
        assert_eq!(params[3].name, ParameterName::Keyword("flag".into()));
    }

    #[test]
    fn test_bad_literal() {
        let wire = [WireParameter::new("n", DataType::Int, "twelve")];
        let err = reveal(&TaskConfig::new("t"), &NoStorage, None, &BTreeMap::new(), &wire)
            .unwrap_err();
        assert!(matches!(err, RevealError::Literal(name, _, DataType::Int) if name == "n"));
    }

    #[test]
    fn test_missing_input_is_fatal() {
        let fx = Fixture::new();
        let wire = [WireParameter::file("obj", fx.missing("gone"))];
        let err = reveal(&TaskConfig::new("t"), &NoStorage, None, &BTreeMap::new(), &wire)
            .unwrap_err();
        assert!(matches!(err, RevealError::Serialize(..)));
    }

    #[test]
    fn test_out_object_gets_placeholder() {
        let fx = Fixture::new();
        let config = TaskConfig::new("t").parameter("acc", ParameterSpec::new(Direction::Out));
        let wire = [WireParameter::file("acc", fx.missing("acc")).with_content_type("builtins.dict")];

        let params = reveal(&config, &NoStorage, None, &BTreeMap::new(), &wire).unwrap();
        assert_eq!(params[0].content, Value::Dict(vec![]));
    }

    #[test]
    fn test_nested_collection() {
        let fx = Fixture::new();
        let a = fx.object("a", &Value::Int(1));
        let b = fx.object("b", &Value::Int(2));
        let inner = fx.manifest(
            "inner",
            &[ManifestEntry::new(DataType::File, &b, "int")],
        );
        let outer = fx.manifest(
            "outer",
            &[
                ManifestEntry::new(DataType::File, &a, "int"),
                ManifestEntry::new(DataType::Collection, &inner, "list"),
                ManifestEntry::new(DataType::String, "hello", "str"),
            ],
        );

        let wire = [WireParameter::collection("xs", outer)];
        let params = reveal(&TaskConfig::new("t"), &NoStorage, None, &BTreeMap::new(), &wire)
            .unwrap();

        assert_eq!(
            params[0].content,
            Value::List(vec![
                Value::Int(1),
                Value::List(vec![Value::Int(2)]),
                Value::Str("hello".into()),
            ])
        );

        let children = params[0].node.children();
        assert_eq!(children.len(), 3);
        assert_eq!(children[1].children().len(), 1);
        assert_eq!(children[2].file_name, None);
    }

    #[test]
    fn test_out_collection_reads_nothing() {
        let fx = Fixture::new();
        let manifest = fx.manifest(
            "col",
            &[
                ManifestEntry::new(DataType::File, fx.missing("e0"), "builtins.int"),
                ManifestEntry::new(DataType::File, fx.missing("e1"), "app.Block"),
            ],
        );

        let config = TaskConfig::new("t").parameter(
            "col",
            ParameterSpec::new(Direction::Out).with_content(Annotation::Collection),
        );
        let wire = [WireParameter::collection("col", manifest)];

        let params = reveal(&config, &NoStorage, None, &BTreeMap::new(), &wire).unwrap();
        let items = match &params[0].content {
            Value::List(items) => items,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Value::Int(0));
        assert_eq!(items[1], Value::placeholder("app.Block"));
    }

    #[test]
    fn test_out_collection_depth_two() {
        let fx = Fixture::new();
        let inner = fx.manifest(
            "inner",
            &[ManifestEntry::new(DataType::File, fx.missing("leaf"), "float")],
        );
        let outer = fx.manifest(
            "outer",
            &[ManifestEntry::new(DataType::Collection, &inner, "list")],
        );

        let config = TaskConfig::new("t").parameter(
            "grid",
            ParameterSpec::new(Direction::Out)
                .with_content(Annotation::Collection)
                .with_depth(2),
        );
        let wire = [WireParameter::collection("grid", outer)];

        let params = reveal(&config, &NoStorage, None, &BTreeMap::new(), &wire).unwrap();
        assert_eq!(
            params[0].content,
            Value::List(vec![Value::List(vec![Value::Float(0.0)])])
        );
    }

    #[test]
    fn test_keyed_collection() {
        let fx = Fixture::new();
        let v = fx.object("v", &Value::Float(2.5));
        let manifest = fx.manifest(
            "dict",
            &[
                ManifestEntry::new(DataType::String, "alpha", "str"),
                ManifestEntry::new(DataType::File, &v, "float"),
            ],
        );

        let wire = [WireParameter::dict_collection("d", manifest)];
        let params = reveal(&TaskConfig::new("t"), &NoStorage, None, &BTreeMap::new(), &wire)
            .unwrap();

        assert_eq!(
            params[0].content,
            Value::Dict(vec![(Value::Str("alpha".into()), Value::Float(2.5))])
        );
        assert!(matches!(&params[0].node.shape, Shape::KeyedCollection(pairs) if pairs.len() == 1));
    }

    #[test]
    fn test_rank_collapses_single_offset() {
        let fx = Fixture::new();
        let entries: Vec<ManifestEntry> = (0..3)
            .map(|i| {
                let path = fx.object(&format!("e{i}"), &Value::Int(i));
                ManifestEntry::new(DataType::File, path, "int")
            })
            .collect();
        let manifest = fx.manifest("col", &entries);

        let partitions = BTreeMap::from([(
            "col".to_string(),
            Partition::from([(0, BTreeSet::from([0, 1])), (1, BTreeSet::from([2]))]),
        )]);
        let wire = [WireParameter::collection("col", manifest)];
        let config = TaskConfig::new("t");

        let params = reveal(&config, &NoStorage, Some(1), &partitions, &wire).unwrap();
        assert_eq!(params[0].content, Value::Int(2));
        assert_eq!(params[0].node.data_type, DataType::File);

        let params = reveal(&config, &NoStorage, Some(0), &partitions, &wire).unwrap();
        assert_eq!(params[0].content, Value::List(vec![Value::Int(0), Value::Int(1)]));
    }

    #[test]
    fn test_file_collection_keeps_paths() {
        let fx = Fixture::new();
        let manifest = fx.manifest(
            "files",
            &[ManifestEntry::new(DataType::File, "host:/data/a.txt", "null")],
        );

        let config = TaskConfig::new("t").parameter(
            "files",
            ParameterSpec::new(Direction::In)
                .with_content(Annotation::Collection)
                .file_collection(),
        );
        let wire = [WireParameter::collection("files", manifest)];

        let params = reveal(&config, &NoStorage, None, &BTreeMap::new(), &wire).unwrap();
        assert_eq!(
            params[0].content,
            Value::List(vec![Value::Str("/data/a.txt".into())])
        );
    }

    #[test]
    fn test_pipelined_persistent_lookup() {
        let storage = MemoryStorage::new().pipelined();
        let a = storage.insert("psco-a", Value::Int(1));
        let b = storage.insert("psco-b", Value::Int(2));

        let wire = [
            WireParameter::persistent("a", "psco-a"),
            WireParameter::persistent("b", "psco-b"),
        ];

        let params = reveal(&TaskConfig::new("t"), &storage, None, &BTreeMap::new(), &wire)
            .unwrap();
        assert_eq!(params[0].content, a);
        assert_eq!(params[1].content, b);
        assert_eq!(storage.lookups(), vec!["psco-a", "psco-b"]);
        assert!(params[0].is_persistent());
    }

    /// Pipelined storage recording batch sizes and single lookups apart.
    #[derive(Default)]
    struct CountingStorage {
        objects: HashMap<String, Value>,
        batches: std::sync::Mutex<Vec<usize>>,
        singles: std::sync::Mutex<Vec<String>>,
    }

    impl CountingStorage {
        fn with(ids: &[&str]) -> Self {
            let objects = ids
                .iter()
                .map(|id| (id.to_string(), Value::persistent(*id, Value::Null)))
                .collect();
            Self {
                objects,
                ..Self::default()
            }
        }

        fn find(&self, id: &str) -> anyhow::Result<Value> {
            self.objects
                .get(id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("unknown object {id}"))
        }
    }

    impl Storage for CountingStorage {
        fn get_by_id(&self, id: &str) -> anyhow::Result<Value> {
            self.singles.lock().unwrap().push(id.to_string());
            self.find(id)
        }

        fn supports_pipelining(&self) -> bool {
            true
        }

        fn get_by_ids(&self, ids: &[&str]) -> anyhow::Result<Vec<Value>> {
            self.batches.lock().unwrap().push(ids.len());
            ids.iter().map(|id| self.find(id)).collect()
        }
    }

    #[test]
    fn test_nested_persistent_objects_in_one_batch() {
        let fx = Fixture::new();
        let storage = CountingStorage::with(&["p0", "p1", "p2", "p3"]);

        let col = fx.manifest(
            "col",
            &[
                ManifestEntry::new(DataType::Psco, "p1", "null"),
                ManifestEntry::new(DataType::ExternalPsco, "p2", "null"),
            ],
        );
        let dict = fx.manifest(
            "dict",
            &[
                ManifestEntry::new(DataType::String, "k", "str"),
                ManifestEntry::new(DataType::Psco, "p3", "null"),
            ],
        );
        let wire = [
            WireParameter::persistent("top", "p0"),
            WireParameter::collection("col", col),
            WireParameter::dict_collection("dict", dict),
            WireParameter::new("again", DataType::Psco, "p1"),
        ];

        let params = reveal(&TaskConfig::new("t"), &storage, None, &BTreeMap::new(), &wire)
            .unwrap();

        assert_eq!(*storage.batches.lock().unwrap(), vec![4]);
        assert!(storage.singles.lock().unwrap().is_empty());
        assert_eq!(params[0].content.persistent_id(), Some("p0"));
        assert_eq!(
            params[1].content,
            Value::List(vec![
                Value::persistent("p1", Value::Null),
                Value::persistent("p2", Value::Null),
            ])
        );
        assert_eq!(
            params[2].content,
            Value::Dict(vec![("k".into(), Value::persistent("p3", Value::Null))])
        );
        assert_eq!(params[3].content.persistent_id(), Some("p1"));
    }

    #[test]
    fn test_unknown_persistent_object() {
        let storage = MemoryStorage::new();
        let wire = [WireParameter::persistent("a", "ghost")];

        let err = reveal(&TaskConfig::new("t"), &storage, None, &BTreeMap::new(), &wire)
            .unwrap_err();
        assert!(matches!(err, RevealError::Storage(name, _) if name == "a"));
    }

    #[test]
    fn test_returns_are_not_revealed() {
        let wire = [WireParameter::ret(0, "/never/read")];
        let params = reveal(&TaskConfig::new("t"), &NoStorage, None, &BTreeMap::new(), &wire)
            .unwrap();
        assert_eq!(params[0].content, Value::Null);
        assert_eq!(
            params[0].node.file_name.as_deref(),
            Some(Utf8Path::new("/never/read"))
        );
    }
}
