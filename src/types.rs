//! Shared types for the SETTLER engine.
//!
//! These types form the data model used across all modules: the wager
//! records owned by users, the ephemeral match results fetched from the
//! result provider, the three-valued verdict threaded through the
//! settlement pipeline, and the bankroll views exposed to callers.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Wager
// ---------------------------------------------------------------------------

/// A user's staked prediction on one market/selection of one match.
///
/// Wagers are created by the external staking flow (which also deducts the
/// stake) and are only ever advanced out of `Pending` by the ledger. Field
/// names follow the stored JSON layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wager {
    pub id: String,
    /// External fixture identifier at the result provider, when known.
    #[serde(default, deserialize_with = "de_fixture_id", skip_serializing_if = "Option::is_none")]
    pub fixture_id: Option<String>,
    pub home_team: String,
    pub away_team: String,
    #[serde(default)]
    pub league: Option<String>,
    /// Scheduled kick-off, either `YYYY-MM-DD` or a full RFC 3339 timestamp.
    #[serde(default)]
    pub date: Option<String>,
    pub market: String,
    pub selection: String,
    pub odds: Decimal,
    pub stake: Decimal,
    /// stake × odds, precomputed when the wager was placed.
    #[serde(rename = "potentialWin")]
    pub potential_payout: Decimal,
    pub status: WagerStatus,
    #[serde(default)]
    pub settled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub verification: Option<VerificationMethod>,
}

impl fmt::Display for Wager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} vs {} | {}: {} @ {} (stake {}) [{}]",
            self.id,
            self.home_team,
            self.away_team,
            self.market,
            self.selection,
            self.odds,
            self.stake,
            self.status,
        )
    }
}

impl Wager {
    /// Short human-readable match label ("Home vs Away").
    pub fn label(&self) -> String {
        format!("{} vs {}", self.home_team, self.away_team)
    }

    /// The scheduled match date, if one can be parsed.
    pub fn match_date(&self) -> Option<NaiveDate> {
        let raw = self.date.as_deref()?.trim();
        let day = raw.get(..10).unwrap_or(raw);
        NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
    }

    pub fn is_pending(&self) -> bool {
        self.status == WagerStatus::Pending
    }

    /// Check the immutable money fields. Odds must be at least 1.0, stake
    /// and payout strictly positive.
    pub fn validate(&self) -> Result<(), SettlementError> {
        let reason = if self.id.trim().is_empty() {
            Some("empty identifier".to_string())
        } else if self.odds < Decimal::ONE {
            Some(format!("odds {} below 1.0", self.odds))
        } else if self.stake <= Decimal::ZERO {
            Some(format!("non-positive stake {}", self.stake))
        } else if self.potential_payout <= Decimal::ZERO {
            Some(format!("non-positive payout {}", self.potential_payout))
        } else {
            None
        };

        match reason {
            Some(reason) => Err(SettlementError::InvalidWager {
                wager_id: self.id.clone(),
                reason,
            }),
            None => Ok(()),
        }
    }

    /// Helper to build a test wager with sensible defaults.
    #[cfg(test)]
    pub fn sample(market: &str, selection: &str) -> Self {
        use rust_decimal_macros::dec;
        Wager {
            id: "bet_test_001".to_string(),
            fixture_id: Some("1035048".to_string()),
            home_team: "Paris Saint-Germain".to_string(),
            away_team: "Olympique Lyonnais".to_string(),
            league: Some("Ligue 1".to_string()),
            date: Some("2026-03-14T20:00:00+00:00".to_string()),
            market: market.to_string(),
            selection: selection.to_string(),
            odds: dec!(1.80),
            stake: dec!(10),
            potential_payout: dec!(18.00),
            status: WagerStatus::Pending,
            settled_at: None,
            verification: None,
        }
    }
}

/// Fixture ids are written as numbers by some producers and strings by others.
fn de_fixture_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Wager lifecycle status. Monotonic: `Pending` → {`Won`, `Lost`} once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WagerStatus {
    Pending,
    Won,
    Lost,
}

impl WagerStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WagerStatus::Pending)
    }
}

impl fmt::Display for WagerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WagerStatus::Pending => write!(f, "PENDING"),
            WagerStatus::Won => write!(f, "WON"),
            WagerStatus::Lost => write!(f, "LOST"),
        }
    }
}

/// Where a settlement verdict came from. Affects trust labelling only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationMethod {
    /// Structured match result read by the market interpreter.
    Structured,
    /// Natural-language fallback oracle.
    Oracle,
    /// Operator override.
    Manual,
}

impl fmt::Display for VerificationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationMethod::Structured => write!(f, "structured"),
            VerificationMethod::Oracle => write!(f, "oracle"),
            VerificationMethod::Manual => write!(f, "manual"),
        }
    }
}

/// Three-valued settlement outcome produced by each pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Won,
    Lost,
    Undetermined,
}

impl Verdict {
    /// The terminal resolution, if this verdict is decisive.
    pub fn resolution(self) -> Option<Resolution> {
        match self {
            Verdict::Won => Some(Resolution::Won),
            Verdict::Lost => Some(Resolution::Lost),
            Verdict::Undetermined => None,
        }
    }

    pub fn is_decided(self) -> bool {
        self != Verdict::Undetermined
    }

    /// `Won` when the condition holds, `Lost` otherwise.
    pub fn from_bool(won: bool) -> Self {
        if won {
            Verdict::Won
        } else {
            Verdict::Lost
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Won => write!(f, "WON"),
            Verdict::Lost => write!(f, "LOST"),
            Verdict::Undetermined => write!(f, "UNDETERMINED"),
        }
    }
}

/// A decisive verdict, the only thing the ledger accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Won,
    Lost,
}

impl From<Resolution> for WagerStatus {
    fn from(r: Resolution) -> Self {
        match r {
            Resolution::Won => WagerStatus::Won,
            Resolution::Lost => WagerStatus::Lost,
        }
    }
}

impl From<Resolution> for Verdict {
    fn from(r: Resolution) -> Self {
        match r {
            Resolution::Won => Verdict::Won,
            Resolution::Lost => Verdict::Lost,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Verdict::from(*self).fmt(f)
    }
}

/// Parse "won"/"lost" (case-insensitive).
impl std::str::FromStr for Resolution {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "won" | "win" => Ok(Resolution::Won),
            "lost" | "loss" => Ok(Resolution::Lost),
            _ => Err(anyhow::anyhow!("Unknown resolution: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Match result
// ---------------------------------------------------------------------------

/// Provider fixture status, decoded from its short code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixtureStatus {
    Scheduled,
    InPlay,
    FullTime,
    AfterExtraTime,
    AfterPenalties,
    Postponed,
    Cancelled,
    Other(String),
}

impl FixtureStatus {
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_uppercase().as_str() {
            "NS" | "TBD" => FixtureStatus::Scheduled,
            "1H" | "HT" | "2H" | "ET" | "BT" | "P" | "LIVE" | "INT" | "SUSP" => {
                FixtureStatus::InPlay
            }
            "FT" => FixtureStatus::FullTime,
            "AET" => FixtureStatus::AfterExtraTime,
            "PEN" => FixtureStatus::AfterPenalties,
            "PST" => FixtureStatus::Postponed,
            "CANC" | "ABD" | "AWD" | "WO" => FixtureStatus::Cancelled,
            other => FixtureStatus::Other(other.to_string()),
        }
    }

    /// Whether the match is over (FT, AET or PEN).
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            FixtureStatus::FullTime | FixtureStatus::AfterExtraTime | FixtureStatus::AfterPenalties
        )
    }
}

impl fmt::Display for FixtureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixtureStatus::Scheduled => write!(f, "NS"),
            FixtureStatus::InPlay => write!(f, "LIVE"),
            FixtureStatus::FullTime => write!(f, "FT"),
            FixtureStatus::AfterExtraTime => write!(f, "AET"),
            FixtureStatus::AfterPenalties => write!(f, "PEN"),
            FixtureStatus::Postponed => write!(f, "PST"),
            FixtureStatus::Cancelled => write!(f, "CANC"),
            FixtureStatus::Other(code) => write!(f, "{code}"),
        }
    }
}

/// Declared winner of a finished match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchWinner {
    Home,
    Away,
    Draw,
}

impl MatchWinner {
    /// Decode the provider's per-side winner flags; neither flag set is a draw.
    pub fn from_flags(home: Option<bool>, away: Option<bool>) -> Self {
        match (home, away) {
            (Some(true), _) => MatchWinner::Home,
            (_, Some(true)) => MatchWinner::Away,
            _ => MatchWinner::Draw,
        }
    }
}

/// Structured result of one fixture lookup. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub fixture_id: Option<u64>,
    pub status: FixtureStatus,
    pub home_team: String,
    pub away_team: String,
    pub home_goals: Option<u32>,
    pub away_goals: Option<u32>,
    pub winner: MatchWinner,
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let goals = |g: Option<u32>| g.map(|g| g.to_string()).unwrap_or_else(|| "?".into());
        write!(
            f,
            "{} {}-{} {} ({})",
            self.home_team,
            goals(self.home_goals),
            goals(self.away_goals),
            self.away_team,
            self.status,
        )
    }
}

impl MatchResult {
    /// Final score, when both sides are known.
    pub fn score(&self) -> Option<(u32, u32)> {
        Some((self.home_goals?, self.away_goals?))
    }

    /// Helper to build a finished match result for tests.
    #[cfg(test)]
    pub fn finished(home_goals: u32, away_goals: u32) -> Self {
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
}

// ---------------------------------------------------------------------------
// Text
// ---------------------------------------------------------------------------

/// Lowercase, fold French accents and collapse whitespace. Used for every
/// free-text comparison (team names, market and selection text).
pub fn normalize_text(text: &str) -> String {
    let folded: String = text
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'à' | 'â' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'î' | 'ï' => 'i',
            'ô' | 'ö' => 'o',
            'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First `len` characters of a normalised name.
pub fn name_prefix(name: &str, len: usize) -> String {
    normalize_text(name).chars().take(len).collect()
}

// ---------------------------------------------------------------------------
// Bankroll views
// ---------------------------------------------------------------------------

/// One balance-history snapshot, appended per crediting settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalancePoint {
    pub date: NaiveDate,
    pub bankroll: Decimal,
}

/// Read-side summary of a user's bankroll.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankrollSummary {
    pub balance: Decimal,
    pub initial_balance: Decimal,
    /// Return on the initial balance, in percent (two decimals).
    pub roi_pct: Decimal,
}

impl fmt::Display for BankrollSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "balance={:.2} initial={:.2} roi={:.2}%",
            self.balance, self.initial_balance, self.roi_pct,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Ledger-level failures. Everything else in the pipeline degrades to
/// `Verdict::Undetermined` instead of erroring.
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("Invalid wager {wager_id}: {reason}")]
    InvalidWager { wager_id: String, reason: String },

    #[error("Corrupt value at {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Concurrent update on {key} not resolved after {attempts} attempts")]
    Conflict { key: String, attempts: u32 },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
