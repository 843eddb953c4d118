//! Shared fixtures for integration tests: seeded stores, stub result
//! provider and oracle, and a store whose commits can be made to fail.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use settler::config::LedgerConfig;
use settler::data::ResultProvider;
use settler::engine::{BankrollLedger, MarketInterpreter, SettlementOrchestrator};
use settler::llm::VerificationOracle;
use settler::storage::{
    balance_key, pending_index_key, wagers_key, KvStore, MemoryStore, WriteBatch,
};
use settler::types::{FixtureStatus, MatchResult, MatchWinner, Verdict, Wager};

// ---------------------------------------------------------------------------
// Data builders
// ---------------------------------------------------------------------------

/// A pending wager as the staking flow writes it.
pub fn wager_json(id: &str, market: &str, selection: &str, stake: f64, odds: f64) -> Value {
    json!({
        "id": id,
        "fixtureId": 1035048,
        "homeTeam": "Paris Saint-Germain",
        "awayTeam": "Olympique Lyonnais",
        "league": "Ligue 1",
        "date": "2026-03-14T20:00:00.000Z",
        "market": market,
        "selection": selection,
        "odds": odds,
        "stake": stake,
        "potentialWin": ((stake * odds) * 100.0).round() / 100.0,
        "status": "pending",
        "createdAt": "2026-03-14T08:12:00.000Z",
        "ticketId": "ticket-7"
    })
}

pub fn wager(value: &Value) -> Wager {
    serde_json::from_value(value.clone()).unwrap()
}

pub fn finished(home_goals: u32, away_goals: u32) -> MatchResult {
    let winner = match home_goals.cmp(&away_goals) {
        std::cmp::Ordering::Greater => MatchWinner::Home,
        std::cmp::Ordering::Less => MatchWinner::Away,
        std::cmp::Ordering::Equal => MatchWinner::Draw,
    };
    MatchResult {
        fixture_id: Some(1035048),
        status: FixtureStatus::FullTime,
        home_team: "Paris Saint Germain".to_string(),
        away_team: "Lyon".to_string(),
        home_goals: Some(home_goals),
        away_goals: Some(away_goals),
        winner,
    }
}

/// Write a user's wager list, balance and pending-index entries.
pub async fn seed_user(store: &dyn KvStore, user: &str, wagers: &[Value], balance: &str) {
    for w in wagers {
        store
            .set(&pending_index_key(w["id"].as_str().unwrap()), user)
            .await
            .unwrap();
    }
    store
        .set(&wagers_key(user), &serde_json::to_string(wagers).unwrap())
        .await
        .unwrap();
    store.set(&balance_key(user), balance).await.unwrap();
}

pub async fn stored_wagers(store: &dyn KvStore, user: &str) -> Vec<Value> {
    let raw = store.get(&wagers_key(user)).await.unwrap().unwrap();
    serde_json::from_str(&raw).unwrap()
}

pub fn orchestrator(
    store: Arc<dyn KvStore>,
    provider: Arc<dyn ResultProvider>,
    oracle: Option<Arc<dyn VerificationOracle>>,
) -> SettlementOrchestrator {
    let ledger = Arc::new(BankrollLedger::new(store, LedgerConfig::default()));
    SettlementOrchestrator::new(ledger, provider, oracle, MarketInterpreter::default())
}

// ---------------------------------------------------------------------------
// Stub collaborators
// ---------------------------------------------------------------------------

/// Returns a fixed result per wager id (or for every wager).
#[derive(Default)]
pub struct StubProvider {
    by_wager: HashMap<String, MatchResult>,
    fallback: Option<MatchResult>,
    pub calls: AtomicUsize,
}

impl StubProvider {
    pub fn always(result: Option<MatchResult>) -> Self {
        Self {
            fallback: result,
            ..Self::default()
        }
    }

    pub fn with(mut self, wager_id: &str, result: MatchResult) -> Self {
        self.by_wager.insert(wager_id.to_string(), result);
        self
    }
}

#[async_trait]
impl ResultProvider for StubProvider {
    async fn find_result(&self, wager: &Wager) -> Option<MatchResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.by_wager
            .get(&wager.id)
            .cloned()
            .or_else(|| self.fallback.clone())
    }

    fn name(&self) -> &str {
        "stub"
    }
}

/// Answers every question with the same verdict, optionally after a delay
/// bounded by `timeout` (exceeding it yields `Undetermined`).
pub struct StubOracle {
    verdict: Verdict,
    delay: Duration,
    timeout: Duration,
    pub calls: AtomicUsize,
}

impl StubOracle {
    pub fn answering(verdict: Verdict) -> Self {
        Self {
            verdict,
            delay: Duration::ZERO,
            timeout: Duration::from_secs(5),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn timing_out() -> Self {
        Self {
            verdict: Verdict::Won,
            delay: Duration::from_secs(30),
            timeout: Duration::from_millis(50),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VerificationOracle for StubOracle {
    async fn verify(&self, _wager: &Wager) -> Verdict {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = async {
            tokio::time::sleep(self.delay).await;
            self.verdict
        };
        tokio::time::timeout(self.timeout, answer)
            .await
            .unwrap_or(Verdict::Undetermined)
    }

    fn model_name(&self) -> &str {
        "stub-oracle"
    }
}

// ---------------------------------------------------------------------------
// Failing store
// ---------------------------------------------------------------------------

/// Memory store whose batch commits fail while `fail_commits` is set.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    pub fail_commits: AtomicBool,
}

#[async_trait]
impl KvStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.inner.set(key, value).await
    }

    async fn range(&self, key: &str, start: usize, limit: usize) -> Result<Vec<String>> {
        self.inner.range(key, start, limit).await
    }

    async fn list_len(&self, key: &str) -> Result<usize> {
        self.inner.list_len(key).await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.keys(prefix).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<bool> {
        if self.fail_commits.load(Ordering::SeqCst) {
            anyhow::bail!("connection reset by peer");
        }
        self.inner.commit(batch).await
    }

    fn name(&self) -> &str {
        "flaky"
    }
}
