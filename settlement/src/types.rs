//! Core types for settlement netting

use chrono::{DateTime, Utc};
use ledger_core::types::{CountryCode, Currency, Transaction};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Gross owed in one direction of a corridor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectionalPosition {
    /// Owing country
    pub from: CountryCode,

    /// Owed country
    pub to: CountryCode,

    /// Gross owed, expressed in the summary's reference currency
    pub gross: Decimal,

    /// Contributing transaction count
    pub transaction_count: usize,
}

/// One unsettled transaction line for manual reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsettledLine {
    /// Transaction ID
    pub transaction_id: Uuid,

    /// Human-readable reference
    pub reference: String,

    /// Paying country
    pub from: CountryCode,

    /// Receiving country
    pub to: CountryCode,

    /// Source amount
    pub amount: Decimal,

    /// Source currency
    pub currency: Currency,

    /// Credited amount on the receiving side
    pub credited_amount: Decimal,

    /// Receiving currency
    pub credited_currency: Currency,

    /// Fee charged on top of the amount
    pub fee: Decimal,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl From<&Transaction> for UnsettledLine {
    fn from(tx: &Transaction) -> Self {
        Self {
            transaction_id: tx.id,
            reference: tx.reference.clone(),
            from: tx.sender_country,
            to: tx.recipient_country,
            amount: tx.amount,
            currency: tx.currency,
            credited_amount: tx.credited_amount(),
            credited_currency: tx.converted_currency.unwrap_or(tx.currency),
            fee: tx.fees.total,
            created_at: tx.created_at,
        }
    }
}

/// Net directional obligation between two countries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NettingSummary {
    /// Corridor the summary covers, as requested
    pub corridor: (CountryCode, CountryCode),

    /// Currency every figure is expressed in (second country's)
    pub reference_currency: Currency,

    /// Gross owed in the corridor direction
    pub forward: DirectionalPosition,

    /// Gross owed in the reverse direction
    pub reverse: DirectionalPosition,

    /// Net obligation, absolute, 2 dp
    pub net_amount: Decimal,

    /// Net direction; `None` when the positions cancel exactly
    pub net_direction: Option<(CountryCode, CountryCode)>,

    /// Every unsettled transaction on the corridor, both directions
    pub unsettled: Vec<UnsettledLine>,

    /// Summary generation time
    pub generated_at: DateTime<Utc>,
}

impl NettingSummary {
    /// Whether any real money needs to move
    pub fn settlement_needed(&self) -> bool {
        self.net_direction.is_some()
    }
}

/// Outcome of one mark-settled call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkSettledOutcome {
    /// Settlement reference stamped on the flipped transactions
    pub reference: String,

    /// Transactions flipped by this call
    pub settled: Vec<Uuid>,

    /// Transactions already settled before this call
    pub already_settled: Vec<Uuid>,

    /// Requested ids with no matching transaction
    pub missing: Vec<Uuid>,

    /// Stamp applied to the flipped transactions
    pub settled_at: DateTime<Utc>,
}

/// One settled transaction inside a history batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettledLine {
    /// Transaction ID
    pub transaction_id: Uuid,

    /// Paying country
    pub from: CountryCode,

    /// Receiving country
    pub to: CountryCode,

    /// Source amount
    pub amount: Decimal,

    /// Source currency
    pub currency: Currency,

    /// When the transaction was settled
    pub settled_at: Option<DateTime<Utc>>,
}

/// Settled transactions grouped under one settlement reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementBatch {
    /// Settlement reference
    pub reference: String,

    /// Earliest settle stamp in the batch
    pub settled_at: Option<DateTime<Utc>>,

    /// Transactions covered by the reference
    pub transactions: Vec<SettledLine>,
}

/// Full settlement history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementHistory {
    /// Batches, one per settlement reference
    pub batches: Vec<SettlementBatch>,

    /// Total settled transactions across all batches
    pub total_settled: usize,
}
