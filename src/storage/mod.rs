//! Persistence layer.
//!
//! The engine talks to a key-value store through [`KvStore`]: per-key
//! scalar get/set, append-only lists, prefix listing, and [`WriteBatch`]
//! commits that apply all-or-nothing behind an optional compare-and-swap
//! guard. Two backends are provided: [`MemoryStore`] and [`SqliteStore`].

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Prefix of the pending-wager index maintained by the staking flow.
pub const PENDING_INDEX_PREFIX: &str = "pending_user_bet:";

// ---------------------------------------------------------------------------
// Key layout
// ---------------------------------------------------------------------------

/// The user's wager list (JSON array, read/modify/write as a whole).
pub fn wagers_key(user: &str) -> String {
    format!("user:{user}:bets")
}

/// The user's current balance (decimal string).
pub fn balance_key(user: &str) -> String {
    format!("user:{user}:bankroll")
}

/// The balance the user started with.
pub fn initial_balance_key(user: &str) -> String {
    format!("user:{user}:bankroll:initial")
}

/// The user's append-only balance history list.
pub fn history_key(user: &str) -> String {
    format!("user:{user}:bankroll:history")
}

/// Pending index entry for one wager. Its value is the owning user.
pub fn pending_index_key(wager_id: &str) -> String {
    format!("{PENDING_INDEX_PREFIX}{wager_id}")
}

// ---------------------------------------------------------------------------
// Write batches
// ---------------------------------------------------------------------------

/// A single mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Overwrite a scalar key.
    Set { key: String, value: String },
    /// Append one entry to the end of a list key.
    Append { key: String, value: String },
    /// Remove a scalar key and any list stored under it.
    Delete { key: String },
}

/// Commit precondition: the scalar at `key` must still equal `expected`
/// (`None` meaning absent). A batch may carry several; all must hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guard {
    pub key: String,
    pub expected: Option<String>,
}

/// Operations applied atomically by [`KvStore::commit`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    pub guards: Vec<Guard>,
    pub ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only commit if `key` still holds `expected`.
    pub fn guarded(mut self, key: impl Into<String>, expected: Option<String>) -> Self {
        self.guards.push(Guard {
            key: key.into(),
            expected,
        });
        self
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ops.push(WriteOp::Set {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn append(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ops.push(WriteOp::Append {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.ops.push(WriteOp::Delete { key: key.into() });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Abstraction over the key-value store holding wagers and bankrolls.
///
/// Single-key reads and writes are atomic. Cross-key atomicity is only
/// available through [`KvStore::commit`].
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a scalar key.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Overwrite a scalar key.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Read up to `limit` list entries starting at `start`, oldest first.
    async fn range(&self, key: &str, start: usize, limit: usize) -> Result<Vec<String>>;

    /// Number of entries in a list key (0 if absent).
    async fn list_len(&self, key: &str) -> Result<usize>;

    /// All scalar keys beginning with `prefix`, sorted.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Apply `batch` atomically. Returns `Ok(false)` without writing
    /// anything if any guard no longer holds.
    async fn commit(&self, batch: WriteBatch) -> Result<bool>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}
