//! Bankroll ledger — the only writer of wager status and balance.
//!
//! Settlement is a read/decide/write on two keys (the user's wager list and
//! balance) plus a history append and removal of the pending-index entry.
//! All of it goes out as one [`WriteBatch`] guarded on the wager list and
//! balance values that were read, so a concurrent writer (another run, or
//! the staking flow deducting a stake) makes the commit fail and the
//! settlement is re-evaluated from a fresh read. A per-user lock keeps
//! commits for one user serial inside this process.
//!
//! Wager entries are patched in place as JSON, so fields written by other
//! components survive settlement untouched.

use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::LedgerConfig;
use crate::storage::{
    balance_key, history_key, initial_balance_key, pending_index_key, wagers_key, KvStore,
    WriteBatch, PENDING_INDEX_PREFIX,
};
use crate::types::{
    BalancePoint, BankrollSummary, Resolution, SettlementError, VerificationMethod, Wager,
    WagerStatus,
};

/// Result of one settle call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    /// Status written; `balance` is the balance after settlement.
    Committed {
        status: WagerStatus,
        balance: Decimal,
    },
    /// The wager had already left `Pending`. Nothing written.
    AlreadySettled { status: WagerStatus },
    /// No wager with that id in the user's list.
    NotFound,
}

/// Pending wagers of one user, plus entries that could not be decoded.
#[derive(Debug, Default)]
pub struct PendingWagers {
    pub wagers: Vec<Wager>,
    pub rejected: Vec<SettlementError>,
}

pub struct BankrollLedger {
    store: Arc<dyn KvStore>,
    config: LedgerConfig,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl BankrollLedger {
    pub fn new(store: Arc<dyn KvStore>, config: LedgerConfig) -> Self {
        Self {
            store,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    async fn user_lock(&self, user: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(user.to_string()).or_default().clone()
    }

    // -----------------------------------------------------------------------
    // Settlement
    // -----------------------------------------------------------------------

    /// Move `wager_id` from pending to `resolution`, crediting the payout on
    /// a win. Safe to call any number of times: only the first call for a
    /// wager can commit.
    pub async fn settle(
        &self,
        user: &str,
        wager_id: &str,
        resolution: Resolution,
        method: VerificationMethod,
    ) -> Result<SettleOutcome, SettlementError> {
        let lock = self.user_lock(user).await;
        let _held = lock.lock().await;

        let key = wagers_key(user);
        let attempts = self.config.max_commit_attempts.max(1);

        for attempt in 1..=attempts {
            let Some(raw) = self.store.get(&key).await? else {
                return Ok(SettleOutcome::NotFound);
            };
            let mut entries = decode_list(&key, &raw)?;

            let Some(index) = entries.iter().position(|e| entry_id(e) == Some(wager_id)) else {
                return Ok(SettleOutcome::NotFound);
            };

            let wager = decode_wager(&entries[index], index)?;
            if wager.status.is_terminal() {
                debug!(user, wager_id, status = %wager.status, "Wager already settled");
                return Ok(SettleOutcome::AlreadySettled {
                    status: wager.status,
                });
            }
            wager.validate()?;

            let status = WagerStatus::from(resolution);
            let now = Utc::now();
            patch_entry(&mut entries[index], status, now, method);

            let credit = match resolution {
                Resolution::Won => wager.potential_payout,
                Resolution::Lost => Decimal::ZERO,
            };
            let balance_raw = self.store.get(&balance_key(user)).await?;
            let balance_before = match balance_raw.as_deref() {
                Some(raw) => parse_decimal(&balance_key(user), raw)?,
                None => self.config.default_balance,
            };
            let balance_after = match resolution {
                Resolution::Won => round_money(balance_before + credit),
                Resolution::Lost => balance_before,
            };

            let serialized = serde_json::to_string(&entries).map_err(anyhow::Error::from)?;
            let mut batch = WriteBatch::new()
                .guarded(key.as_str(), Some(raw))
                .guarded(balance_key(user), balance_raw)
                .set(key.as_str(), serialized);

            let record_history =
                resolution == Resolution::Won || self.config.record_losses_in_history;
            if resolution == Resolution::Won {
                batch = batch.set(balance_key(user), balance_after.to_string());
            }
            if record_history {
                let point = BalancePoint {
                    date: now.date_naive(),
                    bankroll: balance_after,
                };
                let point = serde_json::to_string(&point).map_err(anyhow::Error::from)?;
                batch = batch.append(history_key(user), point);
            }
            batch = batch.delete(pending_index_key(wager_id));

            if self.store.commit(batch).await? {
                info!(
                    user,
                    wager_id,
                    label = %wager.label(),
                    %status,
                    method = %method,
                    credit = %credit,
                    balance_before = %balance_before,
                    balance_after = %balance_after,
                    "Wager settled"
                );
                return Ok(SettleOutcome::Committed {
                    status,
                    balance: balance_after,
                });
            }

            warn!(user, wager_id, attempt, "Wager list or balance changed during settlement, retrying");
        }

        Err(SettlementError::Conflict { key, attempts })
    }

    // -----------------------------------------------------------------------
    // Read side
    // -----------------------------------------------------------------------

    /// Current balance, or the configured default when none is stored.
    pub async fn read_balance(&self, user: &str) -> Result<Decimal, SettlementError> {
        let key = balance_key(user);
        match self.store.get(&key).await? {
            Some(raw) => parse_decimal(&key, &raw),
            None => Ok(self.config.default_balance),
        }
    }

    pub async fn bankroll(&self, user: &str) -> Result<BankrollSummary, SettlementError> {
        let balance = self.read_balance(user).await?;
        let key = initial_balance_key(user);
        let initial_balance = match self.store.get(&key).await? {
            Some(raw) => parse_decimal(&key, &raw)?,
            None => self.config.default_balance,
        };

        let roi_pct = if initial_balance > Decimal::ZERO {
            round_money((balance - initial_balance) / initial_balance * Decimal::ONE_HUNDRED)
        } else {
            Decimal::ZERO
        };

        Ok(BankrollSummary {
            balance,
            initial_balance,
            roi_pct,
        })
    }

    /// The most recent `limit` history points, oldest first. Undecodable
    /// entries are skipped.
    pub async fn balance_history(
        &self,
        user: &str,
        limit: usize,
    ) -> Result<Vec<BalancePoint>, SettlementError> {
        let key = history_key(user);
        let len = self.store.list_len(&key).await?;
        let start = len.saturating_sub(limit);
        let raw = self.store.range(&key, start, limit).await?;

        Ok(raw
            .iter()
            .filter_map(|entry| match serde_json::from_str::<BalancePoint>(entry) {
                Ok(point) => Some(point),
                Err(e) => {
                    warn!(user, error = %e, "Skipping malformed history entry");
                    None
                }
            })
            .collect())
    }

    /// Pending wagers of `user`. Entries that cannot be decoded or fail
    /// validation are returned separately so one bad record does not hide
    /// the others.
    pub async fn pending_wagers(&self, user: &str) -> Result<PendingWagers, SettlementError> {
        let key = wagers_key(user);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(PendingWagers::default());
        };
        let entries = decode_list(&key, &raw)?;

        let mut pending = PendingWagers::default();
        for (index, entry) in entries.iter().enumerate() {
            let status = entry.get("status").and_then(Value::as_str);
            if status.is_some_and(|s| s != "pending") {
                continue;
            }
            match decode_wager(entry, index).and_then(|w| w.validate().map(|_| w)) {
                Ok(wager) => pending.wagers.push(wager),
                Err(e) => {
                    warn!(user, error = %e, "Rejecting malformed wager entry");
                    pending.rejected.push(e);
                }
            }
        }
        Ok(pending)
    }

    /// Users with at least one entry in the pending index.
    pub async fn users_with_pending(&self) -> Result<Vec<String>, SettlementError> {
        let mut users = BTreeSet::new();
        for key in self.store.keys(PENDING_INDEX_PREFIX).await? {
            match self.store.get(&key).await? {
                Some(user) if !user.trim().is_empty() => {
                    users.insert(user.trim().trim_matches('"').to_string());
                }
                _ => debug!(key = %key, "Pending index entry without owner"),
            }
        }
        Ok(users.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Round to cents, halves away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn parse_decimal(key: &str, raw: &str) -> Result<Decimal, SettlementError> {
    let trimmed = raw.trim().trim_matches('"');
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|e| SettlementError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })
}

fn decode_list(key: &str, raw: &str) -> Result<Vec<Value>, SettlementError> {
    serde_json::from_str(raw).map_err(|e| SettlementError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn entry_id(entry: &Value) -> Option<&str> {
    entry.get("id").and_then(Value::as_str)
}

fn decode_wager(entry: &Value, index: usize) -> Result<Wager, SettlementError> {
    serde_json::from_value(entry.clone()).map_err(|e| SettlementError::InvalidWager {
        wager_id: entry_id(entry)
            .map(str::to_string)
            .unwrap_or_else(|| format!("#{index}")),
        reason: e.to_string(),
    })
}

/// Write the terminal fields onto a stored entry, leaving every other field
/// as it was.
fn patch_entry(
    entry: &mut Value,
    status: WagerStatus,
    at: chrono::DateTime<Utc>,
    method: VerificationMethod,
) {
    if let Value::Object(fields) = entry {
        fields.insert("status".into(), serde_json::json!(status));
        fields.insert("settledAt".into(), serde_json::json!(at));
        fields.insert("verification".into(), serde_json::json!(method));
        fields.insert(
            "perplexityVerified".into(),
            Value::Bool(method == VerificationMethod::Oracle),
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
