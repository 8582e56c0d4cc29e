//! Key-value checkpoint stores.

use crate::asg::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// External store of parameter values keyed by parameter name.
pub trait CheckpointStore {
    fn get(&self, name: &str) -> Option<Value>;

    fn put(&mut self, name: &str, value: Value);

    /// Every stored name, sorted.
    fn names(&self) -> Vec<String>;
}

/// Checkpoint kept in memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryCheckpoint {
    values: BTreeMap<String, Value>,
}

impl MemoryCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name)
    }
}

impl CheckpointStore for MemoryCheckpoint {
    fn get(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }

    fn put(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    fn names(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;

    #[test]
    fn put_then_get_by_name() {
        let mut store = MemoryCheckpoint::new();
        store.put("dense/weights", Value::Tensor(ArrayD::zeros(vec![2, 3])));
        store.put("dense/bias", Value::Tensor(ArrayD::ones(vec![3])));

        assert_eq!(store.names(), vec!["dense/bias".to_string(), "dense/weights".to_string()]);
        assert_eq!(store.get("dense/bias").map(|v| v.shape()), Some(vec![3]));
        assert!(store.get("conv/kernel").is_none());
    }

    #[test]
    fn put_overwrites() {
        let mut store = MemoryCheckpoint::new();
        store.put("w", Value::ScalarF32(1.0));
        store.put("w", Value::ScalarF32(2.0));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("w"), Some(Value::ScalarF32(2.0)));
    }
}
