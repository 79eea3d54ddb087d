use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Row};

use crate::{Result, store::StateStore};

/// PostgreSQL-backed state store implementation.
///
/// All groups share a single `flowforge_state` table keyed by
/// `(group_id, key)` with a jsonb value column. Writes are idempotent
/// upserts, matching the last-writer-wins contract of the store.
#[derive(Clone)]
pub struct PostgresStateStore {
    pool: PgPool,
}

impl PostgresStateStore {
    /// Creates a new PostgreSQL state store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the backing table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS flowforge_state (
                group_id   TEXT NOT NULL,
                key        TEXT NOT NULL,
                value      JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (group_id, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for PostgresStateStore {
    async fn get(&self, group: &str, key: &str) -> Result<Option<Value>> {
        let row = sqlx::query(
            "SELECT value FROM flowforge_state WHERE group_id = $1 AND key = $2",
        )
        .bind(group)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.try_get::<Value, _>("value").map_err(Into::into))
            .transpose()
    }

    async fn set(&self, group: &str, key: &str, value: Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO flowforge_state (group_id, key, value, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (group_id, key)
            DO UPDATE SET value = EXCLUDED.value, updated_at = now()
            "#,
        )
        .bind(group)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, group: &str, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM flowforge_state WHERE group_id = $1 AND key = $2")
            .bind(group)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_group(&self, group: &str) -> Result<Vec<Value>> {
        let rows = sqlx::query(
            "SELECT value FROM flowforge_state WHERE group_id = $1 ORDER BY key ASC",
        )
        .bind(group)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| r.try_get::<Value, _>("value").map_err(Into::into))
            .collect()
    }

    async fn clear(&self, group: &str) -> Result<()> {
        sqlx::query("DELETE FROM flowforge_state WHERE group_id = $1")
            .bind(group)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
