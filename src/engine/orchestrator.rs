//! Settlement orchestrator — drives pending wagers to a verdict.
//!
//! Per wager: structured lookup → interpreter → (if undetermined) oracle.
//! Evaluation of one user's wagers runs concurrently since it is all
//! network I/O; commits to the ledger then happen one at a time in list
//! order. A failure on one wager is recorded in the run report and never
//! aborts the rest of the batch.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::data::ResultProvider;
use crate::engine::interpreter::MarketInterpreter;
use crate::engine::ledger::{BankrollLedger, SettleOutcome};
use crate::llm::VerificationOracle;
use crate::types::{Resolution, SettlementError, VerificationMethod, Wager, WagerStatus};

// ---------------------------------------------------------------------------
// Run report
// ---------------------------------------------------------------------------

/// What happened to one wager during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum WagerOutcome {
    #[serde(rename_all = "camelCase")]
    Settled {
        wager_id: String,
        label: String,
        status: WagerStatus,
        method: VerificationMethod,
        balance: Decimal,
    },
    /// Another run or an operator got there first.
    #[serde(rename_all = "camelCase")]
    AlreadySettled {
        wager_id: String,
        label: String,
        status: WagerStatus,
    },
    /// Still undetermined after every source. Retried next run.
    #[serde(rename_all = "camelCase")]
    Pending {
        wager_id: String,
        label: String,
        reason: String,
    },
    /// Disappeared from the user's list between read and commit.
    #[serde(rename_all = "camelCase")]
    NotFound { wager_id: String, label: String },
    #[serde(rename_all = "camelCase")]
    Failed {
        wager_id: String,
        label: String,
        error: String,
    },
}

impl WagerOutcome {
    pub fn wager_id(&self) -> &str {
        match self {
            WagerOutcome::Settled { wager_id, .. }
            | WagerOutcome::AlreadySettled { wager_id, .. }
            | WagerOutcome::Pending { wager_id, .. }
            | WagerOutcome::NotFound { wager_id, .. }
            | WagerOutcome::Failed { wager_id, .. } => wager_id,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, WagerOutcome::Settled { .. })
    }
}

impl fmt::Display for WagerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WagerOutcome::Settled {
                label,
                status,
                method,
                ..
            } => {
                let tag = match method {
                    VerificationMethod::Structured => "",
                    VerificationMethod::Oracle => " (IA)",
                    VerificationMethod::Manual => " (manual)",
                };
                write!(f, "{label}: {status}{tag}")
            }
            WagerOutcome::AlreadySettled { label, status, .. } => {
                write!(f, "{label}: already {status}")
            }
            WagerOutcome::Pending { label, .. } => write!(f, "{label}: pending"),
            WagerOutcome::NotFound { label, .. } => write!(f, "{label}: not found"),
            WagerOutcome::Failed { label, .. } => write!(f, "{label}: verification error"),
        }
    }
}

/// Summary of one orchestration run over one user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementReport {
    pub run_id: Uuid,
    pub user: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Pending wagers examined, including undecodable ones.
    pub checked: usize,
    /// Wagers this run moved out of pending.
    pub updated: usize,
    pub outcomes: Vec<WagerOutcome>,
}

impl SettlementReport {
    /// One human-readable line per wager.
    pub fn details(&self) -> Vec<String> {
        self.outcomes.iter().map(ToString::to_string).collect()
    }

    /// Wagers left pending by this run.
    pub fn pending(&self) -> impl Iterator<Item = &WagerOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, WagerOutcome::Pending { .. }))
    }
}

/// Summary of a sweep over every user with pending wagers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub reports: Vec<SettlementReport>,
    /// Users whose batch could not run at all, with the error.
    pub failures: Vec<(String, String)>,
}

impl SweepReport {
    pub fn checked(&self) -> usize {
        self.reports.iter().map(|r| r.checked).sum()
    }

    pub fn updated(&self) -> usize {
        self.reports.iter().map(|r| r.updated).sum()
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Verdict derived for one wager, before commit.
#[derive(Debug, Clone)]
enum Evaluation {
    Decided {
        resolution: Resolution,
        method: VerificationMethod,
    },
    Undetermined { reason: String },
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct SettlementOrchestrator {
    ledger: Arc<BankrollLedger>,
    provider: Arc<dyn ResultProvider>,
    oracle: Option<Arc<dyn VerificationOracle>>,
    interpreter: MarketInterpreter,
    wager_concurrency: usize,
    user_concurrency: usize,
}

impl SettlementOrchestrator {
    pub fn new(
        ledger: Arc<BankrollLedger>,
        provider: Arc<dyn ResultProvider>,
        oracle: Option<Arc<dyn VerificationOracle>>,
        interpreter: MarketInterpreter,
    ) -> Self {
        Self {
            ledger,
            provider,
            oracle,
            interpreter,
            wager_concurrency: 4,
            user_concurrency: 4,
        }
    }

    /// Set how many wagers (per user) and users (per sweep) are processed
    /// in parallel. Zero is treated as one.
    pub fn with_concurrency(mut self, wagers: usize, users: usize) -> Self {
        self.wager_concurrency = wagers.max(1);
        self.user_concurrency = users.max(1);
        self
    }

    pub fn ledger(&self) -> &Arc<BankrollLedger> {
        &self.ledger
    }

    /// Run the fallback chain for one wager. Never fails: every collaborator
    /// problem ends up as `Undetermined`.
    async fn evaluate(&self, wager: &Wager) -> Evaluation {
        let mut reason = match self.provider.find_result(wager).await {
            Some(result) => {
                let verdict = self.interpreter.interpret(wager, &result);
                if let Some(resolution) = verdict.resolution() {
                    return Evaluation::Decided {
                        resolution,
                        method: VerificationMethod::Structured,
                    };
                }
                if !result.status.is_finished() {
                    format!("match not finished ({})", result.status)
                } else if result.score().is_none() {
                    "finished match without a score".to_string()
                } else {
                    format!("market not recognised ({}: {})", wager.market, wager.selection)
                }
            }
            None => "no structured result".to_string(),
        };

        match &self.oracle {
            Some(oracle) => {
                if let Some(resolution) = oracle.verify(wager).await.resolution() {
                    return Evaluation::Decided {
                        resolution,
                        method: VerificationMethod::Oracle,
                    };
                }
                reason.push_str(", oracle undetermined");
            }
            None => reason.push_str(", oracle disabled"),
        }

        Evaluation::Undetermined { reason }
    }

    /// Settle every pending wager of `user`.
    ///
    /// Only a failure to read the user's wager list fails the whole call.
    pub async fn settle_user(&self, user: &str) -> Result<SettlementReport, SettlementError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        let pending = self.ledger.pending_wagers(user).await?;
        let checked = pending.wagers.len() + pending.rejected.len();
        info!(%run_id, user, pending = checked, "Settlement run started");

        let mut outcomes: Vec<WagerOutcome> = pending
            .rejected
            .into_iter()
            .map(|e| {
                let wager_id = match &e {
                    SettlementError::InvalidWager { wager_id, .. } => wager_id.clone(),
                    _ => String::new(),
                };
                WagerOutcome::Failed {
                    label: wager_id.clone(),
                    wager_id,
                    error: e.to_string(),
                }
            })
            .collect();

        let evaluated: Vec<(Wager, Evaluation)> = stream::iter(pending.wagers)
            .map(|wager| async move {
                let evaluation = self.evaluate(&wager).await;
                (wager, evaluation)
            })
            .buffered(self.wager_concurrency)
            .collect()
            .await;

        for (wager, evaluation) in evaluated {
            outcomes.push(self.commit(user, &wager, evaluation).await);
        }

        let updated = outcomes.iter().filter(|o| o.is_settled()).count();
        let report = SettlementReport {
            run_id,
            user: user.to_string(),
            started_at,
            finished_at: Utc::now(),
            checked,
            updated,
            outcomes,
        };

        info!(
            %run_id,
            user,
            checked = report.checked,
            updated = report.updated,
            still_pending = report.pending().count(),
            "Settlement run finished"
        );
        Ok(report)
    }

    async fn commit(&self, user: &str, wager: &Wager, evaluation: Evaluation) -> WagerOutcome {
        let wager_id = wager.id.clone();
        let label = wager.label();

        let (resolution, method) = match evaluation {
            Evaluation::Decided { resolution, method } => (resolution, method),
            Evaluation::Undetermined { reason } => {
                info!(user, wager_id = %wager.id, label = %label, reason = %reason, "Wager left pending");
                return WagerOutcome::Pending {
                    wager_id,
                    label,
                    reason,
                };
            }
        };

        match self.ledger.settle(user, &wager.id, resolution, method).await {
            Ok(SettleOutcome::Committed { status, balance }) => WagerOutcome::Settled {
                wager_id,
                label,
                status,
                method,
                balance,
            },
            Ok(SettleOutcome::AlreadySettled { status }) => {
                info!(user, wager_id = %wager.id, %status, "Wager settled elsewhere");
                WagerOutcome::AlreadySettled {
                    wager_id,
                    label,
                    status,
                }
            }
            Ok(SettleOutcome::NotFound) => {
                warn!(user, wager_id = %wager.id, "Wager vanished before commit");
                WagerOutcome::NotFound { wager_id, label }
            }
            Err(e) => {
                error!(user, wager_id = %wager.id, error = %e, "Settlement commit failed");
                WagerOutcome::Failed {
                    wager_id,
                    label,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Settle every user that has at least one wager in the pending index.
    pub async fn settle_all(&self) -> Result<SweepReport, SettlementError> {
        let started_at = Utc::now();
        let users = self.ledger.users_with_pending().await?;
        info!(users = users.len(), "Sweep started");

        let results: Vec<(String, Result<SettlementReport, SettlementError>)> = stream::iter(users)
            .map(|user| async move {
                let result = self.settle_user(&user).await;
                (user, result)
            })
            .buffer_unordered(self.user_concurrency)
            .collect()
            .await;

        let mut reports = Vec::new();
        let mut failures = Vec::new();
        for (user, result) in results {
            match result {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(user = %user, error = %e, "Settlement run failed");
                    failures.push((user, e.to_string()));
                }
            }
        }
        reports.sort_by(|a, b| a.user.cmp(&b.user));

        let sweep = SweepReport {
            started_at,
            reports,
            failures,
        };
        info!(
            users = sweep.reports.len(),
            failed = sweep.failures.len(),
            checked = sweep.checked(),
            updated = sweep.updated(),
            "Sweep finished"
        );
        Ok(sweep)
    }

    /// Operator override: force a verdict through the same guarded commit
    /// as automatic settlement.
    pub async fn settle_manually(
        &self,
        user: &str,
        wager_id: &str,
        resolution: Resolution,
    ) -> Result<SettleOutcome, SettlementError> {
        info!(user, wager_id, %resolution, "Manual settlement requested");
        self.ledger
            .settle(user, wager_id, resolution, VerificationMethod::Manual)
            .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
