//! Natural-language verification oracle.
//!
//! Defines the `VerificationOracle` trait used as the settlement fallback
//! and the Perplexity implementation.

pub mod perplexity;

use async_trait::async_trait;

use crate::types::{Verdict, Wager};

pub use perplexity::PerplexityClient;

/// Abstraction over the fallback oracle.
///
/// Implementors ask an external model to judge a wager. Any failure,
/// timeout or unexpected answer must come back as
/// [`Verdict::Undetermined`], never as a guess.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VerificationOracle: Send + Sync {
    /// Judge whether `wager` won or lost.
    async fn verify(&self, wager: &Wager) -> Verdict;

    /// Model identifier string.
    fn model_name(&self) -> &str;
}
