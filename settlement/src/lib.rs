//! WokoPay Settlement
//!
//! Bilateral netting and settlement tracking for cross-border corridors.
//!
//! # Architecture
//!
//! The engine runs over persisted transactions only, independent of the
//! request path:
//!
//! 1. **Netting**: Sum completed-but-unsettled transactions per direction
//!    and reduce the pair to one net directional obligation
//! 2. **Reconciliation**: Operators move real funds off-platform, then
//!    mark the covered transactions settled under one reference
//! 3. **History**: Settled transactions grouped by reference for audit
//!
//! Netting uses only figures stored on each transaction at commit time;
//! no rate is re-derived when a summary runs.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod config;
pub mod engine;
pub mod error;
pub mod netting;
pub mod scheduler;
pub mod types;

// Re-exports
pub use config::{Config, Corridor};
pub use engine::SettlementEngine;
pub use error::{Error, Result};
pub use netting::NettingEngine;
pub use scheduler::SummaryScheduler;
pub use types::{
    DirectionalPosition, MarkSettledOutcome, NettingSummary, SettlementBatch, SettlementHistory,
    UnsettledLine,
};
