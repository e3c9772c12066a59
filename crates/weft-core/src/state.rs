use std::collections::{HashMap, HashSet};

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::error::{Result, WeftError};
use crate::value::Value;

/// Ordered key/value store threaded through one workflow run.
///
/// Keys keep the position of their first write. Every write is also recorded
/// in a journal so a parallel branch can report exactly which keys it produced
/// since it was forked from its parent.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    entries: Vec<(String, Value)>,
    index: HashMap<String, usize>,
    journal: Vec<String>,
    journaled: HashSet<String>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with initial entries. Seeding does not count as a write.
    pub fn from_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let mut store = Self::new();
        for (k, v) in entries {
            store.set(k, v);
        }
        store.journal.clear();
        store.journaled.clear();
        store
    }

    /// Seed a store from a JSON object.
    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        match json {
            serde_json::Value::Object(fields) => Ok(Self::from_entries(
                fields.into_iter().map(|(k, v)| (k, Value::from(v))),
            )),
            other => Err(WeftError::Config(format!(
                "initial state must be a JSON object, got {}",
                Value::from(other).kind()
            ))),
        }
    }

    /// Get a value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    /// Get a value as a string, if it's text.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Write a value, returning the previous one. Overwrites keep the key's position.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        if self.journaled.insert(key.clone()) {
            self.journal.push(key.clone());
        }
        match self.index.get(&key) {
            Some(&i) => Some(std::mem::replace(&mut self.entries[i].1, value)),
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in first-write order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Entries in first-write order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Copy of this store for an isolated branch, with an empty write journal.
    pub fn fork(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            index: self.index.clone(),
            journal: Vec::new(),
            journaled: HashSet::new(),
        }
    }

    /// Keys written since this store was created or forked, in first-write order.
    pub fn written_keys(&self) -> &[String] {
        &self.journal
    }

    /// Current values of every key written since creation or fork.
    pub fn writes(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.journal
            .iter()
            .filter_map(|k| self.get(k).map(|v| (k.as_str(), v)))
    }

    /// Export the store as a JSON object.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl Serialize for StateStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}
