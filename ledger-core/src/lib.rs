//! WokoPay Ledger Core
//!
//! Ledger and settlement engine for cross-border mobile-money remittance:
//! per-country wallets, mobile-money floats, country clearing accounts,
//! FX conversion, fee assessment, and settlement obligation tracking.
//!
//! # Architecture
//!
//! - **Conserved mutations**: Every operation's account updates commit as
//!   one unit of work; either all balances move or none do
//! - **Per-account locking**: Concurrent operations on the same account
//!   serialize; disjoint accounts proceed in parallel
//! - **Degradable rates**: FX lookups time out into cached or static
//!   fallback rates instead of blocking payments
//! - **Post-commit recording**: Transactions, instructions, and audit
//!   snapshots follow the committed mutation and never roll it back

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod audit;
pub mod config;
pub mod error;
pub mod fees;
pub mod instructions;
pub mod ledger;
pub mod locks;
pub mod metrics;
pub mod rates;
pub mod storage;
pub mod types;

// Re-exports
pub use config::{Config, RateConfig};
pub use error::{Error, Result};
pub use fees::FeeSchedule;
pub use ledger::{Ledger, NewUser};
pub use rates::{Conversion, RateProvider, RateSource, RateSourceError};
pub use storage::{BalanceCommit, MarkSettledReport, Storage};
pub use types::{
    CountryAccount, CountryCode, Currency, FeeBreakdown, IntercountrySettlement,
    MobileProviderAccount, OperationReceipt, PayoutInstruction, PhoneNumber, Transaction,
    TransactionStatus, TransactionType, User, Wallet,
};
