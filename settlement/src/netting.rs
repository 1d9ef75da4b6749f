//! Bilateral netting over unsettled transactions
//!
//! Computes one net directional obligation between two countries from the
//! individual completed-but-unsettled transactions on the corridor.
//!
//! # Example
//!
//! ```text
//! Unsettled:
//!   MW -> ZM: 100 ZMW delivered
//!   MW -> ZM:  50 ZMW delivered
//!   ZM -> MW:  0.9 ZMW sent
//!
//! Positions (ZMW):
//!   MW owes ZM: 150.0
//!   ZM owes MW:   0.9
//!
//! Net: MW -> ZM 149.1 ZMW
//! ```
//!
//! Every figure is taken from the transaction itself: a forward
//! transaction contributes the amount the receiving country fronted
//! (`converted_amount`, already in the reference currency) and a reverse
//! transaction contributes its source `amount` (likewise already in the
//! reference currency, since that corridor originates there). No rate is
//! re-derived at netting time.

use crate::types::{DirectionalPosition, NettingSummary, UnsettledLine};
use chrono::Utc;
use ledger_core::types::{CountryCode, Transaction};
use rust_decimal::Decimal;

/// Netting engine
#[derive(Debug, Default)]
pub struct NettingEngine;

impl NettingEngine {
    /// Create new netting engine
    pub fn new() -> Self {
        Self
    }

    /// Net the corridor `(a, b)` over the given unsettled transactions
    ///
    /// Figures are expressed in `b`'s currency. Transactions outside the
    /// corridor are ignored. A zero net reports no settlement needed.
    pub fn corridor_summary(
        &self,
        a: CountryCode,
        b: CountryCode,
        unsettled: &[Transaction],
    ) -> NettingSummary {
        let reference_currency = b.currency();

        let mut forward_gross = Decimal::ZERO;
        let mut forward_count = 0usize;
        let mut reverse_gross = Decimal::ZERO;
        let mut reverse_count = 0usize;
        let mut lines = Vec::new();

        for tx in unsettled {
            match tx.corridor() {
                (from, to) if from == a && to == b => {
                    forward_gross += tx.credited_amount();
                    forward_count += 1;
                    lines.push(UnsettledLine::from(tx));
                }
                (from, to) if from == b && to == a => {
                    reverse_gross += tx.amount;
                    reverse_count += 1;
                    lines.push(UnsettledLine::from(tx));
                }
                _ => {}
            }
        }

        let position = forward_gross - reverse_gross;
        let net_direction = if position > Decimal::ZERO {
            Some((a, b))
        } else if position < Decimal::ZERO {
            Some((b, a))
        } else {
            None
        };

        NettingSummary {
            corridor: (a, b),
            reference_currency,
            forward: DirectionalPosition {
                from: a,
                to: b,
                gross: forward_gross.round_dp(2),
                transaction_count: forward_count,
            },
            reverse: DirectionalPosition {
                from: b,
                to: a,
                gross: reverse_gross.round_dp(2),
                transaction_count: reverse_count,
            },
            net_amount: position.abs().round_dp(2),
            net_direction,
            unsettled: lines,
            generated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ledger_core::types::{
        operation_reference, Currency, FeeBreakdown, PhoneNumber, TransactionStatus,
        TransactionType,
    };
    use uuid::Uuid;

    fn tx(
        from: CountryCode,
        to: CountryCode,
        amount: Decimal,
        converted: Option<Decimal>,
    ) -> Transaction {
        let now = Utc::now();
        Transaction {
            id: Uuid::new_v4(),
            reference: operation_reference("PAY", now),
            tx_type: TransactionType::WalletCashout,
            sender_user_id: Some(Uuid::new_v4()),
            sender_wallet_id: Some(Uuid::new_v4()),
            sender_phone: Some(PhoneNumber::new("+265991000001")),
            sender_country: from,
            sender_currency: from.currency(),
            recipient_user_id: None,
            recipient_wallet_id: None,
            recipient_phone: Some(PhoneNumber::new("+260971000001")),
            recipient_country: to,
            recipient_currency: to.currency(),
            amount,
            currency: from.currency(),
            fees: FeeBreakdown::zero(),
            total_deduction: amount,
            fx_rate: converted.map(|_| Decimal::new(32, 4)),
            converted_amount: converted,
            converted_currency: converted.map(|_| to.currency()),
            source_country_account_id: Some(Uuid::new_v4()),
            destination_country_account_id: Some(Uuid::new_v4()),
            is_travel_transaction: false,
            status: TransactionStatus::Completed,
            description: "test".to_string(),
            settled: false,
            settled_at: None,
            settlement_reference: None,
            payout_instruction_id: None,
            created_at: now,
            completed_at: Some(now),
        }
    }

    #[test]
    fn test_net_direction_forward() {
        let engine = NettingEngine::new();

        // MW -> ZM worth 100 + 50 ZMW; ZM -> MW worth 0.9 ZMW
        let unsettled = vec![
            tx(
                CountryCode::MW,
                CountryCode::ZM,
                Decimal::new(3125000, 2),
                Some(Decimal::new(10000, 2)),
            ),
            tx(
                CountryCode::MW,
                CountryCode::ZM,
                Decimal::new(1562500, 2),
                Some(Decimal::new(5000, 2)),
            ),
            tx(
                CountryCode::ZM,
                CountryCode::MW,
                Decimal::new(90, 2), // 0.90 ZMW sent
                Some(Decimal::new(28125, 2)),
            ),
        ];

        let summary = engine.corridor_summary(CountryCode::MW, CountryCode::ZM, &unsettled);

        assert_eq!(summary.reference_currency, Currency::ZMW);
        assert_eq!(summary.forward.gross, Decimal::new(15000, 2));
        assert_eq!(summary.forward.transaction_count, 2);
        assert_eq!(summary.reverse.gross, Decimal::new(90, 2));
        assert_eq!(summary.net_amount, Decimal::new(14910, 2)); // 149.10
        assert_eq!(
            summary.net_direction,
            Some((CountryCode::MW, CountryCode::ZM))
        );
        assert_eq!(summary.unsettled.len(), 3);
        assert!(summary.settlement_needed());
    }

    #[test]
    fn test_net_direction_reverse() {
        let engine = NettingEngine::new();

        let unsettled = vec![
            tx(
                CountryCode::MW,
                CountryCode::ZM,
                Decimal::new(312500, 2),
                Some(Decimal::new(1000, 2)), // 10 ZMW
            ),
            tx(
                CountryCode::ZM,
                CountryCode::MW,
                Decimal::new(2500, 2), // 25 ZMW sent
                Some(Decimal::new(781250, 2)),
            ),
        ];

        let summary = engine.corridor_summary(CountryCode::MW, CountryCode::ZM, &unsettled);

        assert_eq!(summary.net_amount, Decimal::new(1500, 2));
        assert_eq!(
            summary.net_direction,
            Some((CountryCode::ZM, CountryCode::MW))
        );
    }

    #[test]
    fn test_exact_zero_reports_no_settlement() {
        let engine = NettingEngine::new();

        let unsettled = vec![
            tx(
                CountryCode::MW,
                CountryCode::ZM,
                Decimal::new(312500, 2),
                Some(Decimal::new(1000, 2)),
            ),
            tx(
                CountryCode::ZM,
                CountryCode::MW,
                Decimal::new(1000, 2), // 10 ZMW both ways
                Some(Decimal::new(312500, 2)),
            ),
        ];

        let summary = engine.corridor_summary(CountryCode::MW, CountryCode::ZM, &unsettled);

        assert_eq!(summary.net_amount, Decimal::ZERO);
        assert_eq!(summary.net_direction, None);
        assert!(!summary.settlement_needed());
    }

    #[test]
    fn test_other_corridors_ignored() {
        let engine = NettingEngine::new();

        let unsettled = vec![
            tx(
                CountryCode::MW,
                CountryCode::ZM,
                Decimal::new(312500, 2),
                Some(Decimal::new(1000, 2)),
            ),
            // Different corridor entirely
            tx(
                CountryCode::MW,
                CountryCode::ZA,
                Decimal::new(312500, 2),
                Some(Decimal::new(2656, 2)),
            ),
            // Local movement, no obligation
            tx(CountryCode::MW, CountryCode::MW, Decimal::new(10000, 2), None),
        ];

        let summary = engine.corridor_summary(CountryCode::MW, CountryCode::ZM, &unsettled);

        assert_eq!(summary.forward.transaction_count, 1);
        assert_eq!(summary.reverse.transaction_count, 0);
        assert_eq!(summary.unsettled.len(), 1);
    }

    #[test]
    fn test_empty_corridor() {
        let engine = NettingEngine::new();
        let summary = engine.corridor_summary(CountryCode::MW, CountryCode::ZM, &[]);

        assert_eq!(summary.net_amount, Decimal::ZERO);
        assert_eq!(summary.net_direction, None);
        assert!(summary.unsettled.is_empty());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn corridor_tx(forward: bool, cents: i64) -> Transaction {
            if forward {
                // MW -> ZM delivering `cents` ZMW
                tx(
                    CountryCode::MW,
                    CountryCode::ZM,
                    Decimal::new(cents, 2) * Decimal::new(3125, 1),
                    Some(Decimal::new(cents, 2)),
                )
            } else {
                // ZM -> MW sending `cents` ZMW
                tx(
                    CountryCode::ZM,
                    CountryCode::MW,
                    Decimal::new(cents, 2),
                    Some(Decimal::new(cents, 2) * Decimal::new(3125, 1)),
                )
            }
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            /// Net is always |forward - reverse| with the direction of
            /// the larger side, and every corridor transaction is listed
            #[test]
            fn prop_net_is_difference_of_positions(
                flows in prop::collection::vec((any::<bool>(), 1i64..100_000_00i64), 0..20)
            ) {
                let txs: Vec<Transaction> = flows
                    .iter()
                    .map(|&(forward, cents)| corridor_tx(forward, cents))
                    .collect();

                let engine = NettingEngine::new();
                let summary =
                    engine.corridor_summary(CountryCode::MW, CountryCode::ZM, &txs);

                prop_assert_eq!(
                    summary.net_amount,
                    (summary.forward.gross - summary.reverse.gross).abs()
                );
                prop_assert_eq!(summary.unsettled.len(), txs.len());

                match summary.net_direction {
                    Some((from, _)) if from == CountryCode::MW => {
                        prop_assert!(summary.forward.gross > summary.reverse.gross)
                    }
                    Some(_) => prop_assert!(summary.reverse.gross > summary.forward.gross),
                    None => prop_assert_eq!(summary.forward.gross, summary.reverse.gross),
                }
            }
        }
    }
}
