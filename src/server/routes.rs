//! Trigger-surface route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<ServerState>`.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

use crate::engine::{SettleOutcome, SettlementOrchestrator, SettlementReport};
use crate::types::{BalancePoint, BankrollSummary, Resolution, SettlementError, WagerStatus};

/// Header carrying the operator token on admin routes.
pub const ADMIN_HEADER: &str = "x-admin-secret";

/// Reports kept for `GET /api/runs`.
const RUN_LOG_CAPACITY: usize = 100;

const DEFAULT_HISTORY_LIMIT: usize = 100;
const MAX_HISTORY_LIMIT: usize = 1000;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct ServerState {
    pub orchestrator: Arc<SettlementOrchestrator>,
    /// `None` disables the admin routes.
    admin_token: Option<SecretString>,
    run_log: RwLock<VecDeque<SettlementReport>>,
}

impl ServerState {
    pub fn new(orchestrator: Arc<SettlementOrchestrator>, admin_token: Option<SecretString>) -> Self {
        Self {
            orchestrator,
            admin_token,
            run_log: RwLock::new(VecDeque::new()),
        }
    }

    /// Keep a finished run for operator visibility.
    pub async fn record(&self, report: SettlementReport) {
        let mut log = self.run_log.write().await;
        if log.len() == RUN_LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back(report);
    }

    pub async fn recent_runs(&self) -> Vec<SettlementReport> {
        self.run_log.read().await.iter().cloned().collect()
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let Some(expected) = self.admin_token.as_ref() else {
            return Err(ApiError::new(StatusCode::FORBIDDEN, "Admin routes are disabled"));
        };
        let provided = headers.get(ADMIN_HEADER).and_then(|v| v.to_str().ok());
        if provided == Some(expected.expose_secret().as_str()) {
            Ok(())
        } else {
            Err(ApiError::new(StatusCode::UNAUTHORIZED, "Unauthorized"))
        }
    }
}

pub type AppState = Arc<ServerState>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<SettlementError> for ApiError {
    fn from(e: SettlementError) -> Self {
        let status = match &e {
            SettlementError::InvalidWager { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            SettlementError::Conflict { .. } => StatusCode::CONFLICT,
            SettlementError::Storage(_) | SettlementError::Corrupt { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        warn!(status = %status, error = %e, "Request failed");
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "success": false, "error": self.message })),
        )
            .into_response()
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SettleResponse {
    pub success: bool,
    pub checked: usize,
    pub updated: usize,
    pub details: Vec<String>,
    pub report: SettlementReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepResponse {
    pub success: bool,
    pub users: usize,
    pub checked: usize,
    pub updated: usize,
    pub failures: Vec<(String, String)>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OverrideRequest {
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverrideResponse {
    pub success: bool,
    pub outcome: &'static str,
    pub status: WagerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// POST /api/users/:user/settle
pub async fn settle_user(
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> Result<Json<SettleResponse>, ApiError> {
    let report = state.orchestrator.settle_user(&user).await?;
    state.record(report.clone()).await;

    Ok(Json(SettleResponse {
        success: true,
        checked: report.checked,
        updated: report.updated,
        details: report.details(),
        report,
    }))
}

/// POST /api/settle-all
pub async fn settle_all(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SweepResponse>, ApiError> {
    state.authorize(&headers)?;
    let sweep = state.orchestrator.settle_all().await?;

    let response = SweepResponse {
        success: true,
        users: sweep.reports.len(),
        checked: sweep.checked(),
        updated: sweep.updated(),
        failures: sweep.failures.clone(),
    };
    for report in sweep.reports {
        state.record(report).await;
    }
    Ok(Json(response))
}

/// POST /api/admin/users/:user/wagers/:wager/settle
pub async fn override_wager(
    State(state): State<AppState>,
    Path((user, wager_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(request): Json<OverrideRequest>,
) -> Result<Json<OverrideResponse>, ApiError> {
    state.authorize(&headers)?;
    let resolution: Resolution = request
        .status
        .parse()
        .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, "status must be \"won\" or \"lost\""))?;

    let response = match state
        .orchestrator
        .settle_manually(&user, &wager_id, resolution)
        .await?
    {
        SettleOutcome::Committed { status, balance } => OverrideResponse {
            success: true,
            outcome: "committed",
            status,
            balance: Some(balance),
        },
        SettleOutcome::AlreadySettled { status } => OverrideResponse {
            success: false,
            outcome: "alreadySettled",
            status,
            balance: None,
        },
        SettleOutcome::NotFound => {
            return Err(ApiError::new(
                StatusCode::NOT_FOUND,
                format!("Wager {wager_id} not found for {user}"),
            ))
        }
    };
    Ok(Json(response))
}

/// GET /api/users/:user/bankroll
pub async fn get_bankroll(
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> Result<Json<BankrollSummary>, ApiError> {
    Ok(Json(state.orchestrator.ledger().bankroll(&user).await?))
}

/// GET /api/users/:user/bankroll/history?limit=N
pub async fn get_bankroll_history(
    State(state): State<AppState>,
    Path(user): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<BalancePoint>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    Ok(Json(
        state
            .orchestrator
            .ledger()
            .balance_history(&user, limit)
            .await?,
    ))
}

/// GET /api/runs
pub async fn get_runs(State(state): State<AppState>) -> Json<Vec<SettlementReport>> {
    Json(state.recent_runs().await)
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
