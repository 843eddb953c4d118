//! SQLite [`KvStore`] backend.
//!
//! Two tables: `kv` for scalar keys and `kv_list` for append-only lists
//! (ordered by rowid). Each [`WriteBatch`] runs in one `BEGIN IMMEDIATE`
//! transaction and its guards are checked inside it, so a concurrent
//! writer either waits for the lock or loses the compare-and-swap. Nothing
//! is ever half applied.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePoolOptions};
use sqlx::{Row, Sqlite, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{KvStore, WriteBatch, WriteOp};

/// How long a writer waits for another process's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS kv (
        key   TEXT PRIMARY KEY NOT NULL,
        value TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS kv_list (
        id    INTEGER PRIMARY KEY AUTOINCREMENT,
        key   TEXT NOT NULL,
        value TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS kv_list_key ON kv_list (key, id)",
];

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and apply the schema.
    ///
    /// `sqlite::memory:` is accepted; the pool is then pinned to a single
    /// connection so every query sees the same database.
    pub async fn connect(url: &str) -> Result<Self> {
        let in_memory = url.contains(":memory:");
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid SQLite URL: {url}"))?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);

        let mut pool_options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open SQLite database: {url}"))?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .context("Failed to apply SQLite schema")?;
        }

        info!(url, "SQLite store ready");
        Ok(Self { pool })
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to read {key}"))?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO kv (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to write {key}"))?;
        Ok(())
    }

    async fn range(&self, key: &str, start: usize, limit: usize) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT value FROM kv_list WHERE key = ? ORDER BY id LIMIT ? OFFSET ?")
            .bind(key)
            .bind(limit as i64)
            .bind(start as i64)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to read list {key}"))?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>("value")).collect())
    }

    async fn list_len(&self, key: &str) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM kv_list WHERE key = ?")
            .bind(key)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("Failed to count list {key}"))?;
        Ok(row.get::<i64, _>("n") as usize)
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        // substr() instead of LIKE so '%' and '_' in user ids are literal.
        let rows = sqlx::query("SELECT key FROM kv WHERE substr(key, 1, ?) = ? ORDER BY key")
            .bind(prefix.chars().count() as i64)
            .bind(prefix)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to list keys with prefix {prefix}"))?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>("key")).collect())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<bool> {
        let mut conn = self.pool.acquire().await.context("Failed to acquire connection")?;

        // IMMEDIATE takes the write lock up front, so the guards are read
        // under the same lock the writes are made under.
        if let Err(e) = sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await {
            if is_busy(&e) {
                warn!(error = %e, "Database busy, batch not applied");
                return Ok(false);
            }
            return Err(e).context("Failed to begin transaction");
        }

        match apply_batch(&mut conn, &batch).await {
            Ok(true) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .context("Failed to commit transaction")?;
                Ok(true)
            }
            Ok(false) => {
                rollback(conn).await;
                Ok(false)
            }
            Err(e) => {
                rollback(conn).await;
                Err(e)
            }
        }
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

// ---------------------------------------------------------------------------
// Transaction helpers
// ---------------------------------------------------------------------------

/// Check every guard, then apply the writes. `Ok(false)` leaves the
/// transaction open for the caller to roll back.
async fn apply_batch(conn: &mut SqliteConnection, batch: &WriteBatch) -> Result<bool> {
    for guard in &batch.guards {
        let current: Option<String> = sqlx::query("SELECT value FROM kv WHERE key = ?")
            .bind(&guard.key)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to read guard key")?
            .map(|r| r.get::<String, _>("value"));

        if current != guard.expected {
            debug!(key = %guard.key, "Guard mismatch, batch not applied");
            return Ok(false);
        }
    }

    for op in &batch.ops {
        match op {
            WriteOp::Set { key, value } => {
                sqlx::query(
                    "INSERT INTO kv (key, value) VALUES (?, ?)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                )
                .bind(key)
                .bind(value)
                .execute(&mut *conn)
                .await
                .with_context(|| format!("Failed to write {key}"))?;
            }
            WriteOp::Append { key, value } => {
                sqlx::query("INSERT INTO kv_list (key, value) VALUES (?, ?)")
                    .bind(key)
                    .bind(value)
                    .execute(&mut *conn)
                    .await
                    .with_context(|| format!("Failed to append to {key}"))?;
            }
            WriteOp::Delete { key } => {
                sqlx::query("DELETE FROM kv WHERE key = ?")
                    .bind(key)
                    .execute(&mut *conn)
                    .await
                    .with_context(|| format!("Failed to delete {key}"))?;
                sqlx::query("DELETE FROM kv_list WHERE key = ?")
                    .bind(key)
                    .execute(&mut *conn)
                    .await
                    .with_context(|| format!("Failed to delete list {key}"))?;
            }
        }
    }
    Ok(true)
}

/// Roll back an open transaction. A connection that cannot roll back is
/// closed rather than returned to the pool mid-transaction.
async fn rollback(mut conn: PoolConnection<Sqlite>) {
    if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
        warn!(error = %e, "Rollback failed, dropping connection");
        drop(conn.detach());
    }
}

/// SQLITE_BUSY / SQLITE_LOCKED, including their extended codes.
fn is_busy(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| matches!(code & 0xff, 5 | 6)),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_get_set_overwrite() {
        let store = memory_store().await;
        assert!(store.get("k").await.unwrap().is_none());
        store.set("k", "1").await.unwrap();
        store.set("k", "2").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_commit_and_lists() {
        let store = memory_store().await;
        let batch = WriteBatch::new()
            .set("user:u:bankroll", "118.00")
            .append("user:u:bankroll:history", "a")
            .append("user:u:bankroll:history", "b");
        assert!(store.commit(batch).await.unwrap());

        assert_eq!(store.list_len("user:u:bankroll:history").await.unwrap(), 2);
        assert_eq!(
            store.range("user:u:bankroll:history", 1, 5).await.unwrap(),
            vec!["b"]
        );
    }

    #[tokio::test]
    async fn test_guard_mismatch_writes_nothing() {
        let store = memory_store().await;
        store.set("bets", "[1]").await.unwrap();

        let batch = WriteBatch::new()
            .guarded("bets", Some("[0]".into()))
            .set("bets", "[2]")
            .append("history", "x");
        assert!(!store.commit(batch).await.unwrap());
        assert_eq!(store.get("bets").await.unwrap().as_deref(), Some("[1]"));
        assert_eq!(store.list_len("history").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_and_prefix_keys() {
        let store = memory_store().await;
        store.set("pending_user_bet:b1", "u1").await.unwrap();
        store.set("pending_user_bet:b2", "u2").await.unwrap();
        store.set("pending_user_bex", "noise").await.unwrap();

        assert!(store
            .commit(WriteBatch::new().delete("pending_user_bet:b1"))
            .await
            .unwrap());
        let keys = store.keys("pending_user_bet:").await.unwrap();
        assert_eq!(keys, vec!["pending_user_bet:b2"]);
    }

    #[tokio::test]
    async fn test_second_guard_mismatch_writes_nothing() {
        let store = memory_store().await;
        store.set("bets", "[1]").await.unwrap();
        store.set("balance", "80").await.unwrap();

        let batch = WriteBatch::new()
            .guarded("bets", Some("[1]".into()))
            .guarded("balance", Some("90".into()))
            .set("bets", "[2]")
            .set("balance", "108");
        assert!(!store.commit(batch).await.unwrap());
        assert_eq!(store.get("bets").await.unwrap().as_deref(), Some("[1]"));
        assert_eq!(store.get("balance").await.unwrap().as_deref(), Some("80"));
    }

    #[tokio::test]
    async fn test_racing_pools_lose_cleanly() {
        let path = std::env::temp_dir().join(format!("settler-{}.db", uuid::Uuid::new_v4()));
        let url = format!("sqlite://{}", path.display());
        let first = std::sync::Arc::new(SqliteStore::connect(&url).await.unwrap());
        let second = std::sync::Arc::new(SqliteStore::connect(&url).await.unwrap());
        first.set("bets", "v1").await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = if i % 2 == 0 { first.clone() } else { second.clone() };
            handles.push(tokio::spawn(async move {
                let batch = WriteBatch::new()
                    .guarded("bets", Some("v1".into()))
                    .set("bets", format!("v2-{i}"))
                    .append("history", i.to_string());
                store.commit(batch).await
            }));
        }

        let mut committed = 0;
        for handle in handles {
            // Losers report a guard mismatch, never an error.
            if handle.await.unwrap().unwrap() {
                committed += 1;
            }
        }
        assert_eq!(committed, 1);
        assert_eq!(first.list_len("history").await.unwrap(), 1);

        let _ = std::fs::remove_file(&path);
    }
}
