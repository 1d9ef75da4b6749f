//! Main settlement engine
//!
//! Runs netting over persisted transactions only: corridor summaries on
//! demand, idempotent mark-settled, and settlement history grouped by
//! reference. The engine never touches balances; it records which
//! obligations have been reconciled off-platform.

use crate::{
    config::Config,
    netting::NettingEngine,
    types::{MarkSettledOutcome, NettingSummary, SettledLine, SettlementBatch, SettlementHistory},
    Result,
};
use chrono::Utc;
use ledger_core::types::{operation_reference, CountryCode};
use ledger_core::Storage;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Settlement engine
pub struct SettlementEngine {
    /// Shared ledger storage
    store: Arc<Storage>,

    /// Netting engine
    netting: NettingEngine,
}

impl SettlementEngine {
    /// Create an engine over an already-open store
    pub fn new(store: Arc<Storage>) -> Self {
        Self {
            store,
            netting: NettingEngine::new(),
        }
    }

    /// Open the engine from configuration (its own store handle)
    pub fn open(config: &Config) -> Result<Self> {
        let ledger_config = ledger_core::Config {
            data_dir: config.ledger_data_dir.clone(),
            ..Default::default()
        };
        let store = Arc::new(Storage::open(&ledger_config)?);
        Ok(Self::new(store))
    }

    /// Net obligation for a corridor over completed-but-unsettled
    /// transactions
    pub fn summary(&self, a: CountryCode, b: CountryCode) -> Result<NettingSummary> {
        let unsettled = self.store.unsettled_transactions()?;
        let summary = self.netting.corridor_summary(a, b, &unsettled);

        tracing::info!(
            corridor = %format!("{}-{}", a, b),
            net = %summary.net_amount,
            direction = ?summary.net_direction,
            unsettled = summary.unsettled.len(),
            "Corridor netted"
        );

        Ok(summary)
    }

    /// Mark transactions settled under one reference
    ///
    /// Idempotent: ids already settled are reported back untouched, so a
    /// repeated call neither re-stamps them nor changes any subsequent
    /// summary.
    pub fn mark_settled(
        &self,
        transaction_ids: &[Uuid],
        settlement_reference: Option<String>,
    ) -> Result<MarkSettledOutcome> {
        let settled_at = Utc::now();
        let reference =
            settlement_reference.unwrap_or_else(|| operation_reference("SETTLE", settled_at));

        let report = self
            .store
            .mark_transactions_settled(transaction_ids, &reference, settled_at)?;

        tracing::info!(
            reference = %reference,
            settled = report.settled.len(),
            already_settled = report.already_settled.len(),
            missing = report.missing.len(),
            "Transactions marked settled"
        );

        Ok(MarkSettledOutcome {
            reference,
            settled: report.settled,
            already_settled: report.already_settled,
            missing: report.missing,
            settled_at,
        })
    }

    /// Settlement history: settled transactions grouped by reference
    pub fn history(&self) -> Result<SettlementHistory> {
        let mut batches: BTreeMap<String, SettlementBatch> = BTreeMap::new();
        let mut total_settled = 0usize;

        for tx in self.store.transactions()? {
            if !tx.settled {
                continue;
            }
            total_settled += 1;

            let reference = tx
                .settlement_reference
                .clone()
                .unwrap_or_else(|| "UNREFERENCED".to_string());

            let batch = batches
                .entry(reference.clone())
                .or_insert_with(|| SettlementBatch {
                    reference,
                    settled_at: tx.settled_at,
                    transactions: Vec::new(),
                });

            if let (Some(existing), Some(candidate)) = (batch.settled_at, tx.settled_at) {
                if candidate < existing {
                    batch.settled_at = Some(candidate);
                }
            }

            batch.transactions.push(SettledLine {
                transaction_id: tx.id,
                from: tx.sender_country,
                to: tx.recipient_country,
                amount: tx.amount,
                currency: tx.currency,
                settled_at: tx.settled_at,
            });
        }

        Ok(SettlementHistory {
            batches: batches.into_values().collect(),
            total_settled,
        })
    }
}
