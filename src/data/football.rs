//! API-Football result provider.
//!
//! API: `https://v3.football.api-sports.io/fixtures`
//! Auth: `x-apisports-key` header. The free tier is rate limited, so lookups
//! short-circuit: fixture id first, then a date search by home team, then
//! by away team.
//!
//! Every failure (missing key, transport error, non-success status, empty
//! result) is logged and reported as "not found".

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::ResultProvider;
use crate::types::{name_prefix, normalize_text, FixtureStatus, MatchResult, MatchWinner, Wager};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_BASE_URL: &str = "https://v3.football.api-sports.io";

/// Characters of a wager's team name that a fixture team must contain.
const TEAM_PREFIX_LEN: usize = 5;

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FixturesResponse {
    #[serde(default)]
    response: Vec<ApiFixture>,
    /// API-Football reports quota and parameter errors here with a 200.
    #[serde(default)]
    errors: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiFixture {
    fixture: ApiFixtureInfo,
    teams: ApiTeams,
    #[serde(default)]
    goals: ApiGoals,
}

#[derive(Debug, Deserialize)]
struct ApiFixtureInfo {
    id: u64,
    status: ApiStatus,
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    short: String,
}

#[derive(Debug, Deserialize)]
struct ApiTeams {
    home: ApiTeam,
    away: ApiTeam,
}

#[derive(Debug, Deserialize)]
struct ApiTeam {
    name: String,
    #[serde(default)]
    winner: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiGoals {
    home: Option<u32>,
    away: Option<u32>,
}

impl From<ApiFixture> for MatchResult {
    fn from(f: ApiFixture) -> Self {
        MatchResult {
            fixture_id: Some(f.fixture.id),
            status: FixtureStatus::from_code(&f.fixture.status.short),
            winner: MatchWinner::from_flags(f.teams.home.winner, f.teams.away.winner),
            home_team: f.teams.home.name,
            away_team: f.teams.away.name,
            home_goals: f.goals.home,
            away_goals: f.goals.away,
        }
    }
}

fn has_errors(errors: &serde_json::Value) -> bool {
    match errors {
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
        serde_json::Value::Null => false,
        _ => true,
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct FootballClient {
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
    total_calls: AtomicU64,
}

impl FootballClient {
    /// Create a new client.
    ///
    /// - `base_url`: API root, without trailing path.
    /// - `api_key`: `None` disables lookups entirely.
    /// - `timeout`: per-request bound; a timed-out call counts as not found.
    pub fn new(base_url: &str, api_key: Option<SecretString>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("SETTLER/0.1.0")
            .build()
            .context("Failed to build football HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            total_calls: AtomicU64::new(0),
        })
    }

    /// Number of HTTP calls made so far.
    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }

    /// Issue one `/fixtures` query. `None` on any failure.
    async fn fetch_fixtures(&self, api_key: &SecretString, query: &str) -> Option<Vec<ApiFixture>> {
        let url = format!("{}/fixtures?{query}", self.base_url);
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        let response = match self
            .http
            .get(&url)
            .header("x-apisports-key", api_key.expose_secret())
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(query, error = %e, "Football API request failed");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(query, status = %status, "Football API returned non-success status");
            return None;
        }

        match response.json::<FixturesResponse>().await {
            Ok(body) => {
                if has_errors(&body.errors) {
                    warn!(query, errors = %body.errors, "Football API reported errors");
                }
                Some(body.response)
            }
            Err(e) => {
                warn!(query, error = %e, "Failed to parse football API response");
                None
            }
        }
    }

    async fn by_fixture_id(&self, api_key: &SecretString, fixture_id: &str) -> Option<MatchResult> {
        let query = format!("id={}", urlencoding::encode(fixture_id));
        let fixture = self.fetch_fixtures(api_key, &query).await?.into_iter().next()?;
        Some(fixture.into())
    }

    async fn by_date_and_team(
        &self,
        api_key: &SecretString,
        date: NaiveDate,
        team: &str,
        wager: &Wager,
    ) -> Option<MatchResult> {
        let query = format!(
            "date={}&search={}",
            date.format("%Y-%m-%d"),
            urlencoding::encode(team)
        );
        let fixtures = self.fetch_fixtures(api_key, &query).await?;
        select_fixture(fixtures, wager).map(MatchResult::from)
    }
}

/// First fixture whose home team contains the wager's home-name prefix, or
/// whose away team contains the wager's away-name prefix.
fn select_fixture(fixtures: Vec<ApiFixture>, wager: &Wager) -> Option<ApiFixture> {
    let home = name_prefix(&wager.home_team, TEAM_PREFIX_LEN);
    let away = name_prefix(&wager.away_team, TEAM_PREFIX_LEN);

    fixtures.into_iter().find(|f| {
        (!home.is_empty() && normalize_text(&f.teams.home.name).contains(&home))
            || (!away.is_empty() && normalize_text(&f.teams.away.name).contains(&away))
    })
}

#[async_trait]
impl ResultProvider for FootballClient {
    async fn find_result(&self, wager: &Wager) -> Option<MatchResult> {
        let Some(api_key) = self.api_key.as_ref() else {
            debug!(wager_id = %wager.id, "No football API key, skipping structured lookup");
            return None;
        };

        if let Some(fixture_id) = wager.fixture_id.as_deref() {
            debug!(wager_id = %wager.id, fixture_id, "Looking up fixture by id");
            if let Some(result) = self.by_fixture_id(api_key, fixture_id).await {
                info!(wager_id = %wager.id, result = %result, "Fixture found by id");
                return Some(result);
            }
        }

        let Some(date) = wager.match_date() else {
            debug!(wager_id = %wager.id, "No usable match date, cannot search by team");
            return None;
        };

        for team in [&wager.home_team, &wager.away_team] {
            debug!(wager_id = %wager.id, %date, team = %team, "Searching fixtures by date and team");
            if let Some(result) = self.by_date_and_team(api_key, date, team, wager).await {
                info!(wager_id = %wager.id, result = %result, "Fixture found by search");
                return Some(result);
            }
        }

        info!(wager_id = %wager.id, label = %wager.label(), "Fixture not found at provider");
        None
    }

    fn name(&self) -> &str {
        "api-football"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
