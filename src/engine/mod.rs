//! Core engine — the fetch → interpret → verify → commit pipeline.

pub mod interpreter;
pub mod ledger;
pub mod orchestrator;

pub use interpreter::MarketInterpreter;
pub use ledger::{BankrollLedger, SettleOutcome};
pub use orchestrator::{SettlementOrchestrator, SettlementReport, SweepReport, WagerOutcome};
