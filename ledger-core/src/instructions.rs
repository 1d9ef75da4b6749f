//! Settlement instruction generation
//!
//! For payouts and cross-border sends the ledger derives a
//! [`PayoutInstruction`] from the committed transaction. When the corridor
//! crosses a border, the bilateral [`IntercountrySettlement`] for the
//! (from, to) pair is created or extended with the new instruction; the
//! obligation stays `pending` until the countries reconcile off-platform.

use crate::storage::Storage;
use crate::types::{
    operation_reference, InstructionStatus, IntercountrySettlement, PayoutInstruction,
    PayoutMethod, SettlementStatus, Transaction,
};
use crate::{Error, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Generates payout instructions and bilateral obligations
pub struct InstructionGenerator {
    store: Arc<Storage>,
}

impl InstructionGenerator {
    /// Create a generator over the shared store
    pub fn new(store: Arc<Storage>) -> Self {
        Self { store }
    }

    /// Derive and persist the payout instruction for a committed transaction
    ///
    /// `completed` marks instructions whose delivery already happened inside
    /// the commit (float credited in the same unit of work); wallet-bound
    /// transfers stay `pending` for the settlement pass.
    pub fn record_payout_instruction(
        &self,
        tx: &Transaction,
        method: PayoutMethod,
        provider_name: &str,
        completed: bool,
    ) -> Result<PayoutInstruction> {
        let now = Utc::now();

        let from_account = tx.source_country_account_id.ok_or_else(|| {
            Error::Configuration("transaction missing source country account".to_string())
        })?;
        let to_account = tx.destination_country_account_id.ok_or_else(|| {
            Error::Configuration("transaction missing destination country account".to_string())
        })?;
        let phone = tx
            .recipient_phone
            .clone()
            .ok_or_else(|| Error::InvalidOperation("payout without recipient phone".to_string()))?;

        let (status, processed_at, completed_at) = if completed {
            (InstructionStatus::PayoutCompleted, Some(now), Some(now))
        } else {
            (InstructionStatus::Pending, None, None)
        };

        let instruction = PayoutInstruction {
            id: Uuid::new_v4(),
            reference: operation_reference("PIO", now),
            from_country: tx.sender_country,
            from_country_account_id: from_account,
            to_country: tx.recipient_country,
            to_country_account_id: to_account,
            amount: tx.amount,
            currency: tx.currency,
            fx_rate: tx.fx_rate.unwrap_or(Decimal::ONE),
            converted_amount: tx.credited_amount(),
            converted_currency: tx.converted_currency.unwrap_or(tx.currency),
            payout_to_phone: phone,
            payout_provider_name: provider_name.to_string(),
            payout_method: method,
            source_transaction_id: tx.id,
            status,
            is_guest_payout: tx.tx_type == crate::types::TransactionType::GuestPayout,
            guest_surcharge: tx.fees.guest_surcharge,
            retry_count: 0,
            last_retry_at: None,
            processing_notes: format!(
                "{} receives, {} pays",
                tx.sender_country, tx.recipient_country
            ),
            created_at: now,
            processed_at,
            completed_at,
        };

        self.store.put_instruction(&instruction)?;

        tracing::debug!(
            instruction_id = %instruction.id,
            reference = %instruction.reference,
            "Payout instruction recorded"
        );

        Ok(instruction)
    }

    /// Create or extend the bilateral obligation for a cross-border corridor
    pub fn record_intercountry_obligation(
        &self,
        instruction: &PayoutInstruction,
    ) -> Result<IntercountrySettlement> {
        let now = Utc::now();

        let settlement = match self
            .store
            .pending_settlement_for(instruction.from_country, instruction.to_country)?
        {
            Some(mut existing) => {
                existing.total_amount += instruction.converted_amount;
                existing.instruction_ids.push(instruction.id);
                existing.total_instructions += 1;
                existing.updated_at = now;
                existing
            }
            None => IntercountrySettlement {
                id: Uuid::new_v4(),
                reference: operation_reference("STL", now),
                from_country: instruction.from_country,
                to_country: instruction.to_country,
                total_amount: instruction.converted_amount,
                currency: instruction.converted_currency,
                instruction_ids: vec![instruction.id],
                total_instructions: 1,
                status: SettlementStatus::Pending,
                method: "bilateral".to_string(),
                created_at: now,
                updated_at: now,
            },
        };

        self.store.put_settlement(&settlement)?;

        tracing::info!(
            from = %settlement.from_country,
            to = %settlement.to_country,
            total = %settlement.total_amount,
            "Intercountry obligation updated"
        );

        Ok(settlement)
    }

    /// Retry a failed instruction: bump the retry counter and replay the
    /// processing transition
    pub fn retry_instruction(&self, instruction_id: Uuid) -> Result<PayoutInstruction> {
        let mut instruction = self.store.get_instruction(instruction_id)?;

        if instruction.status != InstructionStatus::Failed {
            return Err(Error::InvalidOperation(format!(
                "instruction {} is not in a failed state",
                instruction_id
            )));
        }

        let now = Utc::now();
        instruction.retry_count += 1;
        instruction.last_retry_at = Some(now);
        instruction.status = InstructionStatus::Processing;
        self.store.put_instruction(&instruction)?;

        instruction.status = InstructionStatus::PayoutCompleted;
        instruction.completed_at = Some(now);
        self.store.put_instruction(&instruction)?;

        tracing::info!(
            instruction_id = %instruction.id,
            retry_count = instruction.retry_count,
            "Payout instruction retried"
        );

        Ok(instruction)
    }
}
