//! SQLite storage backend.
//!
//! Persists projection rows and checkpoints to a single SQLite file. Rows are
//! stored as JSON text and partial updates are applied with SQLite's
//! `json_patch`, so replaying the same write leaves the row unchanged.
//!
//! # Usage
//! ```rust,no_run
//! use vaultindex_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./vaults.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row as _, SqlitePool};
use tracing::debug;

use vaultindex_core::checkpoint::{Checkpoint, CheckpointStore};
use vaultindex_core::error::IndexerError;
use vaultindex_core::projector::ProjectionStore;
use vaultindex_core::records::{Row, Table, KEY_COLUMN};
use vaultindex_core::types::Address;

fn storage_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

fn encode_row(row: &Row) -> Result<String, IndexerError> {
    serde_json::to_string(row).map_err(|e| IndexerError::Storage(e.to_string()))
}

/// SQLite-backed projection and checkpoint store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./vaults.db"`) or a full
    /// SQLite URL (`"sqlite:./vaults.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Uses a single connection, since every `:memory:` connection is its own
    /// database.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS projections (
                table_name TEXT    NOT NULL,
                key        TEXT    NOT NULL,
                row_json   TEXT    NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (table_name, key)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                chain_id     TEXT    NOT NULL,
                indexer_id   TEXT    NOT NULL,
                block_number INTEGER NOT NULL,
                updated_at   INTEGER NOT NULL,
                PRIMARY KEY (chain_id, indexer_id)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    /// Number of rows stored in `table`.
    pub async fn count(&self, table: Table) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM projections WHERE table_name = ?")
            .bind(table.name())
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }
}

// ─── ProjectionStore impl ────────────────────────────────────────────────────

#[async_trait]
impl ProjectionStore for SqliteStore {
    async fn upsert(&self, table: Table, key: &Address, row: Row) -> Result<(), IndexerError> {
        let mut row = row;
        row.insert(KEY_COLUMN.into(), key.as_str().into());
        let json = encode_row(&row)?;

        sqlx::query(
            "INSERT INTO projections (table_name, key, row_json, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (table_name, key) DO UPDATE SET
                row_json   = json_patch(projections.row_json, excluded.row_json),
                updated_at = excluded.updated_at",
        )
        .bind(table.name())
        .bind(key.as_str())
        .bind(&json)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(%table, %key, "row upserted");
        Ok(())
    }

    async fn update(&self, table: Table, key: &Address, patch: Row) -> Result<u64, IndexerError> {
        let json = encode_row(&patch)?;
        let result = sqlx::query(
            "UPDATE projections
             SET row_json = json_patch(row_json, ?), updated_at = ?
             WHERE table_name = ? AND key = ?",
        )
        .bind(&json)
        .bind(chrono::Utc::now().timestamp())
        .bind(table.name())
        .bind(key.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(%table, %key, matched = result.rows_affected(), "row updated");
        Ok(result.rows_affected())
    }

    async fn get(&self, table: Table, key: &Address) -> Result<Option<Row>, IndexerError> {
        let row = sqlx::query("SELECT row_json FROM projections WHERE table_name = ? AND key = ?")
            .bind(table.name())
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        match row {
            Some(r) => {
                let text: String = r.get("row_json");
                let parsed: Row = serde_json::from_str(&text)
                    .map_err(|e| IndexerError::Storage(format!("corrupt {table} row for {key}: {e}")))?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }
}

// ─── CheckpointStore impl ────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn load(
        &self,
        chain_id: &str,
        indexer_id: &str,
    ) -> Result<Option<Checkpoint>, IndexerError> {
        let row = sqlx::query(
            "SELECT chain_id, indexer_id, block_number, updated_at
             FROM checkpoints WHERE chain_id = ? AND indexer_id = ?",
        )
        .bind(chain_id)
        .bind(indexer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(row.map(|r| Checkpoint {
            chain_id: r.get("chain_id"),
            indexer_id: r.get("indexer_id"),
            block_number: r.get::<i64, _>("block_number") as u64,
            updated_at: r.get("updated_at"),
        }))
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT OR REPLACE INTO checkpoints
             (chain_id, indexer_id, block_number, updated_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&checkpoint.chain_id)
        .bind(&checkpoint.indexer_id)
        .bind(checkpoint.block_number as i64)
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(
            chain_id = %checkpoint.chain_id,
            indexer_id = %checkpoint.indexer_id,
            block = checkpoint.block_number,
            "checkpoint saved"
        );
        Ok(())
    }

    async fn delete(&self, chain_id: &str, indexer_id: &str) -> Result<(), IndexerError> {
        sqlx::query("DELETE FROM checkpoints WHERE chain_id = ? AND indexer_id = ?")
            .bind(chain_id)
            .bind(indexer_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
