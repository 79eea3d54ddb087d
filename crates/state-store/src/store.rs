use async_trait::async_trait;
use serde_json::Value;

use crate::Result;

/// Core trait for grouped key-value state store implementations.
///
/// Records are addressed by a `(group, key)` pair; a group scan returns
/// every value stored under a group. No multi-key transactions are
/// provided: each operation is an independent point read or write, and
/// callers layer their own guards on top.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Retrieves the value at `(group, key)`, or None if absent.
    async fn get(&self, group: &str, key: &str) -> Result<Option<Value>>;

    /// Writes the value at `(group, key)`, replacing any existing value.
    async fn set(&self, group: &str, key: &str, value: Value) -> Result<()>;

    /// Deletes the value at `(group, key)`. Deleting an absent key is a no-op.
    async fn delete(&self, group: &str, key: &str) -> Result<()>;

    /// Returns all values stored under `group`, in key order.
    async fn get_group(&self, group: &str) -> Result<Vec<Value>>;

    /// Removes every value stored under `group`.
    async fn clear(&self, group: &str) -> Result<()>;
}
