//! Structured match-result providers.
//!
//! Defines the `ResultProvider` trait consumed by the orchestrator and the
//! API-Football implementation.

pub mod football;

use async_trait::async_trait;

use crate::types::{MatchResult, Wager};

pub use football::FootballClient;

/// Abstraction over the primary match-result source.
///
/// `None` covers both "no such fixture" and "provider unavailable": the
/// settlement pipeline falls back to the oracle either way, so failures are
/// logged by the implementation and never surfaced as errors.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResultProvider: Send + Sync {
    /// Find the structured result of the match a wager was placed on.
    async fn find_result(&self, wager: &Wager) -> Option<MatchResult>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}
