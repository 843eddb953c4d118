//! Perplexity oracle integration.
//!
//! Uses Perplexity's OpenAI-compatible chat completions endpoint with a
//! search-backed model. The prompt pins the answer to one of three literal
//! tokens (`WON`, `LOST`, `PENDING`), wrapped in a small JSON object.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::VerificationOracle;
use crate::types::{Verdict, Wager};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_API_URL: &str = "https://api.perplexity.ai/chat/completions";

pub const DEFAULT_MODEL: &str = "sonar";

/// The answer is a single short JSON object.
const MAX_TOKENS: u32 = 100;

/// Base delay for exponential backoff (ms).
const BASE_BACKOFF_MS: u64 = 500;

// ---------------------------------------------------------------------------
// API types (OpenAI-compatible)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct OracleAnswer {
    result: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct PerplexityClient {
    http: Client,
    api_url: String,
    api_key: SecretString,
    model: String,
    max_retries: u32,
    total_calls: AtomicU64,
}

impl PerplexityClient {
    /// Create a new Perplexity client.
    ///
    /// - `api_url`: chat completions endpoint.
    /// - `model`: model id (e.g. "sonar").
    /// - `timeout`: per-request bound; a timed-out call is undetermined.
    /// - `max_retries`: extra attempts on 429/5xx and transport errors.
    pub fn new(
        api_url: &str,
        api_key: SecretString,
        model: Option<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Perplexity HTTP client")?;

        Ok(Self {
            http,
            api_url: api_url.to_string(),
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_retries,
            total_calls: AtomicU64::new(0),
        })
    }

    /// Total number of API calls made.
    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }

    pub fn build_prompt(wager: &Wager) -> String {
        let date = wager
            .match_date()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let competition = wager.league.as_deref().unwrap_or("unknown");

        format!(
            "You are a sports betting expert. Check whether this bet won or lost.\n\
             \n\
             Match: {home} vs {away}\n\
             Competition: {competition}\n\
             Match date: {date}\n\
             Bet type: {market}\n\
             Selection: {selection}\n\
             \n\
             Look up the real result of the match and decide whether the bet won or lost.\n\
             IMPORTANT: answer ONLY with valid JSON, no text before or after:\n\
             {{\"result\": \"WON\"}} if the bet won\n\
             {{\"result\": \"LOST\"}} if the bet lost\n\
             {{\"result\": \"PENDING\"}} if the match is not over or you are not sure",
            home = wager.home_team,
            away = wager.away_team,
            market = wager.market,
            selection = wager.selection,
        )
    }

    /// Map the model's reply to a verdict.
    ///
    /// Accepts the first `{...}` object carrying a `result` token, or a
    /// reply that is nothing but the token. Anything else is undetermined.
    pub fn parse_verdict(text: &str) -> Verdict {
        let token = match extract_object(text) {
            Some(object) => match serde_json::from_str::<OracleAnswer>(object) {
                Ok(answer) => answer.result,
                Err(_) => return Verdict::Undetermined,
            },
            None => text.to_string(),
        };

        let token = token.trim().trim_matches(|c: char| c == '"' || c == '.' || c == '`');
        match token.to_uppercase().as_str() {
            "WON" => Verdict::Won,
            "LOST" => Verdict::Lost,
            _ => Verdict::Undetermined,
        }
    }

    /// Send the prompt with retry + exponential backoff and return the
    /// raw reply text.
    async fn call_api(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            temperature: 0.0,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = BASE_BACKOFF_MS * 2u64.pow(attempt - 1);
                debug!(attempt, delay_ms = delay, "Retrying Perplexity API call");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            self.total_calls.fetch_add(1, Ordering::Relaxed);
            let resp = self
                .http
                .post(&self.api_url)
                .header(
                    "Authorization",
                    format!("Bearer {}", self.api_key.expose_secret()),
                )
                .header("Content-Type", "application/json")
                .json(&request)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let body: ChatResponse = response
                            .json()
                            .await
                            .context("Failed to parse Perplexity response")?;

                        return Ok(body
                            .choices
                            .into_iter()
                            .next()
                            .and_then(|c| c.message)
                            .map(|m| m.content)
                            .unwrap_or_default());
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(status = %status, attempt, error = %error_text, "Retryable Perplexity error");
                        last_error = Some(format!("HTTP {status}: {error_text}"));
                        continue;
                    }

                    anyhow::bail!("Perplexity API error {status}: {error_text}");
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Perplexity request failed");
                    last_error = Some(format!("Request error: {e}"));
                }
            }
        }

        anyhow::bail!(
            "Perplexity API failed after {} retries: {}",
            self.max_retries,
            last_error.unwrap_or_default()
        )
    }
}

/// The first `{...}` span without nested braces.
fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let len = text[start..].find('}')?;
    Some(&text[start..=start + len])
}

#[async_trait]
impl VerificationOracle for PerplexityClient {
    async fn verify(&self, wager: &Wager) -> Verdict {
        let prompt = Self::build_prompt(wager);
        debug!(wager_id = %wager.id, model = %self.model, "Asking oracle");

        match self.call_api(&prompt).await {
            Ok(text) => {
                let verdict = Self::parse_verdict(&text);
                info!(
                    wager_id = %wager.id,
                    label = %wager.label(),
                    %verdict,
                    "Oracle answered"
                );
                if verdict == Verdict::Undetermined {
                    debug!(wager_id = %wager.id, reply = %text, "Oracle reply not decisive");
                }
                verdict
            }
            Err(e) => {
                warn!(wager_id = %wager.id, error = %e, "Oracle unavailable");
                Verdict::Undetermined
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
