use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::{Result, store::StateStore};

/// In-memory state store implementation for testing and single-process use.
///
/// Provides the same interface as the PostgreSQL implementation. Groups are
/// kept as ordered maps so group scans return values in key order, matching
/// the database `ORDER BY key` behavior.
#[derive(Clone, Default)]
pub struct InMemoryStateStore {
    groups: Arc<RwLock<HashMap<String, BTreeMap<String, Value>>>>,
}

impl InMemoryStateStore {
    /// Creates a new empty in-memory state store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of values stored under `group`.
    pub async fn group_len(&self, group: &str) -> usize {
        self.groups
            .read()
            .await
            .get(group)
            .map(|g| g.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, group: &str, key: &str) -> Result<Option<Value>> {
        let groups = self.groups.read().await;
        Ok(groups.get(group).and_then(|g| g.get(key)).cloned())
    }

    async fn set(&self, group: &str, key: &str, value: Value) -> Result<()> {
        let mut groups = self.groups.write().await;
        groups
            .entry(group.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, group: &str, key: &str) -> Result<()> {
        let mut groups = self.groups.write().await;
        if let Some(g) = groups.get_mut(group) {
            g.remove(key);
        }
        Ok(())
    }

    async fn get_group(&self, group: &str) -> Result<Vec<Value>> {
        let groups = self.groups.read().await;
        Ok(groups
            .get(group)
            .map(|g| g.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn clear(&self, group: &str) -> Result<()> {
        let mut groups = self.groups.write().await;
        groups.remove(group);
        Ok(())
    }
}
