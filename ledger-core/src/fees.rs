//! Fee assessment
//!
//! Every fee is a deterministic function of the amount, the corridor kind,
//! and the operation type. No hidden state: the schedule is captured at
//! construction and the methods are pure.

use crate::types::{Biller, FeeBreakdown, FeeKind};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Fee schedule, loadable from configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Flat fee for local transfers/payouts
    pub local_base: Decimal,

    /// Percentage fee for local transfers/payouts (fraction, e.g. 0.01)
    pub local_percent: Decimal,

    /// Flat fee for cross-border transfers/payouts
    pub cross_border_base: Decimal,

    /// Percentage fee for cross-border transfers/payouts (fraction)
    pub cross_border_percent: Decimal,

    /// Flat fee for wallet loads
    pub load_base: Decimal,

    /// Percentage fee for wallet loads (fraction)
    pub load_percent: Decimal,

    /// Flat surcharge for payouts to unregistered recipients
    pub guest_surcharge: Decimal,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            local_base: Decimal::new(500, 2),          // 5.00
            local_percent: Decimal::new(1, 2),         // 1%
            cross_border_base: Decimal::new(1000, 2),  // 10.00
            cross_border_percent: Decimal::new(25, 3), // 2.5%
            load_base: Decimal::new(200, 2),           // 2.00
            load_percent: Decimal::new(5, 3),          // 0.5%
            guest_surcharge: Decimal::new(1000, 2),    // 10.00
        }
    }
}

impl FeeSchedule {
    /// Fee for a transfer or payout over the given corridor kind
    pub fn transfer_fee(&self, amount: Decimal, cross_border: bool) -> FeeBreakdown {
        let (base, percent) = if cross_border {
            (self.cross_border_base, self.cross_border_percent)
        } else {
            (self.local_base, self.local_percent)
        };

        Self::breakdown(amount, base, percent, Decimal::ZERO)
    }

    /// Fee for a payout; guest payouts carry the flat surcharge
    pub fn payout_fee(&self, amount: Decimal, cross_border: bool, guest: bool) -> FeeBreakdown {
        let (base, percent) = if cross_border {
            (self.cross_border_base, self.cross_border_percent)
        } else {
            (self.local_base, self.local_percent)
        };
        let surcharge = if guest {
            self.guest_surcharge
        } else {
            Decimal::ZERO
        };

        Self::breakdown(amount, base, percent, surcharge)
    }

    /// Fee for a wallet load; the load model is distinct and lower
    pub fn load_fee(&self, amount: Decimal) -> FeeBreakdown {
        Self::breakdown(amount, self.load_base, self.load_percent, Decimal::ZERO)
    }

    /// Fee defined by the biller's own model (flat or percent)
    pub fn biller_fee(&self, biller: &Biller, amount: Decimal) -> FeeBreakdown {
        match biller.fee_kind {
            FeeKind::Flat => Self::breakdown(amount, biller.fee_value, Decimal::ZERO, Decimal::ZERO),
            FeeKind::Percent => {
                let fraction = biller.fee_value / Decimal::ONE_HUNDRED;
                Self::breakdown(amount, Decimal::ZERO, fraction, Decimal::ZERO)
            }
        }
    }

    fn breakdown(
        amount: Decimal,
        base: Decimal,
        percent: Decimal,
        guest_surcharge: Decimal,
    ) -> FeeBreakdown {
        let percentage = (amount * percent).round_dp(2);
        let total = (base + percentage + guest_surcharge).round_dp(2);

        FeeBreakdown {
            base,
            percentage,
            guest_surcharge,
            total,
        }
    }
}
