//! The persistent-object storage collaborator.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use anyhow::anyhow;

use crate::value::Value;

/// Narrow get-by-id contract of an external storage system.
pub trait Storage: Send + Sync {
    /// Resolves one persistent object.
    fn get_by_id(&self, id: &str) -> anyhow::Result<Value>;

    /// Whether [`get_by_ids`](Self::get_by_ids) resolves a whole batch in a
    /// single round trip.
    fn supports_pipelining(&self) -> bool {
        false
    }

    /// Resolves a batch of objects, in order. Each distinct identifier is
    /// looked up at most once.
    fn get_by_ids(&self, ids: &[&str]) -> anyhow::Result<Vec<Value>> {
        let mut resolved: HashMap<&str, Value> = HashMap::new();
        let mut values = Vec::with_capacity(ids.len());

        for &id in ids {
            let value = match resolved.get(id) {
                Some(value) => value.clone(),
                None => {
                    let value = self.get_by_id(id)?;
                    resolved.insert(id, value.clone());
                    value
                }
            };
            values.push(value);
        }

        Ok(values)
    }
}

/// Storage used when the application configured none. Every lookup fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStorage;

impl Storage for NoStorage {
    fn get_by_id(&self, id: &str) -> anyhow::Result<Value> {
        Err(anyhow!("no storage configured, can't resolve '{id}'"))
    }
}

/// In-process storage keeping objects in a map.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, Value>>,
    pipelining: bool,
    lookups: Mutex<Vec<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise batched resolution.
    pub fn pipelined(mut self) -> Self {
        self.pipelining = true;
        self
    }

    /// Stores `state` under `id` and returns the persistent value.
    pub fn insert(&self, id: impl Into<String>, state: Value) -> Value {
        let id = id.into();
        let value = Value::persistent(id.clone(), state);
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, value.clone());
        value
    }

    /// Every identifier looked up so far, in order.
    pub fn lookups(&self) -> Vec<String> {
        self.lookups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Storage for MemoryStorage {
    fn get_by_id(&self, id: &str) -> anyhow::Result<Value> {
        self.lookups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id.to_string());

        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("persistent object '{id}' not found"))
    }

    fn supports_pipelining(&self) -> bool {
        self.pipelining
    }
}
