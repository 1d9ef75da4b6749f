//! Core types for the remittance ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Memory safety (no unsafe code)
//! - Exact arithmetic (Decimal for money)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// ISO 4217 currency code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Currency {
    /// Malawian Kwacha
    MWK,
    /// Zambian Kwacha
    ZMW,
    /// South African Rand
    ZAR,
    /// US Dollar
    USD,
}

impl Currency {
    /// ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::MWK => "MWK",
            Currency::ZMW => "ZMW",
            Currency::ZAR => "ZAR",
            Currency::USD => "USD",
        }
    }

    /// Parse from string
    pub fn from_code(s: &str) -> Option<Self> {
        match s {
            "MWK" => Some(Currency::MWK),
            "ZMW" => Some(Currency::ZMW),
            "ZAR" => Some(Currency::ZAR),
            "USD" => Some(Currency::USD),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// ISO 3166-1 alpha-2 country code for the corridors WokoPay operates in
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[non_exhaustive]
pub enum CountryCode {
    /// Malawi
    MW,
    /// Zambia
    ZM,
    /// South Africa
    ZA,
    /// United States
    US,
}

impl CountryCode {
    /// Two-letter code
    pub fn code(&self) -> &'static str {
        match self {
            CountryCode::MW => "MW",
            CountryCode::ZM => "ZM",
            CountryCode::ZA => "ZA",
            CountryCode::US => "US",
        }
    }

    /// Parse from string
    pub fn from_code(s: &str) -> Option<Self> {
        match s {
            "MW" => Some(CountryCode::MW),
            "ZM" => Some(CountryCode::ZM),
            "ZA" => Some(CountryCode::ZA),
            "US" => Some(CountryCode::US),
            _ => None,
        }
    }

    /// Home currency of the country's mobile-money market
    pub fn currency(&self) -> Currency {
        match self {
            CountryCode::MW => Currency::MWK,
            CountryCode::ZM => Currency::ZMW,
            CountryCode::ZA => Currency::ZAR,
            CountryCode::US => Currency::USD,
        }
    }
}

impl fmt::Display for CountryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Phone number in international format, the lookup key for users and floats
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Create new phone number
    pub fn new(number: impl Into<String>) -> Self {
        Self(number.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registered user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID
    pub id: Uuid,

    /// Phone number (unique)
    pub phone_number: PhoneNumber,

    /// Full name
    pub full_name: String,

    /// Home country
    pub country: CountryCode,

    /// Email, optional
    pub email: Option<String>,

    /// Account active flag
    pub is_active: bool,

    /// Whether the phone number matched a mobile-money float at registration
    pub mobile_verified: bool,

    /// Traveling flag; when set, `current_country` overrides the wallet
    /// country for corridor resolution
    pub is_traveling: bool,

    /// Current country while traveling
    pub current_country: Option<CountryCode>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Country used for corridor/fee resolution, honoring travel override
    pub fn effective_country(&self, wallet_country: CountryCode) -> CountryCode {
        match (self.is_traveling, self.current_country) {
            (true, Some(country)) => country,
            _ => wallet_country,
        }
    }
}

/// Wallet status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletStatus {
    /// Open for transactions
    Active,
    /// Temporarily blocked
    Frozen,
    /// Permanently closed
    Closed,
}

/// Per-user, per-country store of spendable balance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    /// Unique wallet ID
    pub id: Uuid,

    /// Owning user
    pub user_id: Uuid,

    /// Wallet country
    pub country: CountryCode,

    /// Wallet currency
    pub currency: Currency,

    /// Spendable balance; never negative
    pub available_balance: Decimal,

    /// At most one primary wallet per user
    pub is_primary: bool,

    /// Wallet status
    pub status: WalletStatus,

    /// Last balance-affecting operation
    pub last_transaction_at: Option<DateTime<Utc>>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

/// Mobile-money network float, reachable by phone number
///
/// Acts as the cash-in/cash-out bridge to the real-world mobile-money
/// system: debited on wallet loads, credited on payouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MobileProviderAccount {
    /// Unique account ID
    pub id: Uuid,

    /// Network name (e.g. "Airtel Money")
    pub provider_name: String,

    /// Phone number the float is reachable by
    pub phone_number: PhoneNumber,

    /// Country
    pub country: CountryCode,

    /// Float currency
    pub currency: Currency,

    /// Pooled balance
    pub balance: Decimal,

    /// Active flag
    pub is_active: bool,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

/// WokoPay's own clearing position in one country
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountryAccount {
    /// Unique account ID
    pub id: Uuid,

    /// Country (one account per country)
    pub country: CountryCode,

    /// Account currency
    pub currency: Currency,

    /// Running clearing balance
    pub current_balance: Decimal,

    /// Cumulative inbound funds
    pub incoming_pool: Decimal,

    /// Cumulative outbound funds
    pub outgoing_pool: Decimal,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

/// How a biller charges its processing fee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeKind {
    /// Fixed amount per payment
    Flat,
    /// Percentage of the bill amount
    Percent,
}

/// Bill issuer (utility, subscription, ...)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Biller {
    /// Unique biller ID
    pub id: Uuid,

    /// Short lookup code (e.g. "ESCOM")
    pub code: String,

    /// Display name
    pub name: String,

    /// Category (utility, tv, ...)
    pub category: String,

    /// Fee model
    pub fee_kind: FeeKind,

    /// Flat amount or percent value depending on `fee_kind`
    pub fee_value: Decimal,

    /// Active flag
    pub is_active: bool,
}

/// Receiving account for one biller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillerAccount {
    /// Unique account ID
    pub id: Uuid,

    /// Owning biller
    pub biller_id: Uuid,

    /// Accumulated balance
    pub current_balance: Decimal,

    /// Active flag
    pub is_active: bool,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

/// Money-movement operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    /// Mobile-money float to wallet
    WalletLoad,
    /// Wallet to mobile-money float
    WalletCashout,
    /// Cashout to an unregistered recipient
    GuestPayout,
    /// Wallet to wallet across a corridor
    CrossBorderSend,
    /// Wallet to biller account
    BillPayment,
}

impl TransactionType {
    /// Reference prefix for the human-readable transaction reference
    pub fn reference_prefix(&self) -> &'static str {
        match self {
            TransactionType::WalletLoad => "WLT",
            TransactionType::WalletCashout | TransactionType::GuestPayout => "PAY",
            TransactionType::CrossBorderSend => "TRF",
            TransactionType::BillPayment => "BILL",
        }
    }
}

/// Transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Accepted, balances not yet applied
    Pending,
    /// Balances committed
    Completed,
    /// Aborted before commit
    Failed,
}

/// Deterministic fee breakdown for one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    /// Flat component
    pub base: Decimal,

    /// Percentage component, already applied to the amount
    pub percentage: Decimal,

    /// Flat surcharge for unregistered payout recipients
    pub guest_surcharge: Decimal,

    /// Sum of all components
    pub total: Decimal,
}

impl FeeBreakdown {
    /// Zero fee
    pub fn zero() -> Self {
        Self {
            base: Decimal::ZERO,
            percentage: Decimal::ZERO,
            guest_surcharge: Decimal::ZERO,
            total: Decimal::ZERO,
        }
    }
}

/// Immutable record of one completed money movement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction ID
    pub id: Uuid,

    /// Human-readable reference (`<PREFIX><epoch-millis><suffix>`)
    pub reference: String,

    /// Operation type
    pub tx_type: TransactionType,

    /// Sender user
    pub sender_user_id: Option<Uuid>,

    /// Sender wallet, when a wallet was debited
    pub sender_wallet_id: Option<Uuid>,

    /// Sender phone
    pub sender_phone: Option<PhoneNumber>,

    /// Paying corridor country
    pub sender_country: CountryCode,

    /// Source currency
    pub sender_currency: Currency,

    /// Recipient user, when registered
    pub recipient_user_id: Option<Uuid>,

    /// Recipient wallet, when a wallet was credited
    pub recipient_wallet_id: Option<Uuid>,

    /// Recipient phone
    pub recipient_phone: Option<PhoneNumber>,

    /// Receiving corridor country
    pub recipient_country: CountryCode,

    /// Destination currency
    pub recipient_currency: Currency,

    /// Principal amount in source currency
    pub amount: Decimal,

    /// Source currency (duplicated for query convenience)
    pub currency: Currency,

    /// Fee breakdown charged on top of `amount`
    pub fees: FeeBreakdown,

    /// `amount + fees.total`, debited from the payer
    pub total_deduction: Decimal,

    /// FX rate used, 6 dp, when conversion occurred
    pub fx_rate: Option<Decimal>,

    /// Credited amount in destination currency, when conversion occurred
    pub converted_amount: Option<Decimal>,

    /// Destination currency, when conversion occurred
    pub converted_currency: Option<Currency>,

    /// Paying corridor clearing account
    pub source_country_account_id: Option<Uuid>,

    /// Receiving corridor clearing account
    pub destination_country_account_id: Option<Uuid>,

    /// Sender was traveling when the operation ran
    pub is_travel_transaction: bool,

    /// Status
    pub status: TransactionStatus,

    /// Free-form description
    pub description: String,

    /// Whether the inter-country obligation has been reconciled
    pub settled: bool,

    /// When the obligation was reconciled
    pub settled_at: Option<DateTime<Utc>>,

    /// Reference of the settlement batch that covered this transaction
    pub settlement_reference: Option<String>,

    /// Payout instruction derived from this transaction
    pub payout_instruction_id: Option<Uuid>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Completion timestamp
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Amount the receiving side was credited, falling back to the raw
    /// amount for same-currency corridors
    pub fn credited_amount(&self) -> Decimal {
        self.converted_amount.unwrap_or(self.amount)
    }

    /// Corridor of this transaction
    pub fn corridor(&self) -> (CountryCode, CountryCode) {
        (self.sender_country, self.recipient_country)
    }

    /// Whether the corridor crosses a border
    pub fn is_cross_border(&self) -> bool {
        self.sender_country != self.recipient_country
    }
}

/// How a payout reaches the recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayoutMethod {
    /// Credited to a mobile-money float
    MobileMoney,
    /// Credited to a WokoPay wallet
    WalletTransfer,
}

/// Payout instruction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstructionStatus {
    /// Awaiting processing
    Pending,
    /// Being executed
    Processing,
    /// Funds delivered
    PayoutCompleted,
    /// Delivery failed; retriable
    Failed,
}

/// Intended cross-party payout derived from a transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutInstruction {
    /// Unique instruction ID
    pub id: Uuid,

    /// Human-readable reference
    pub reference: String,

    /// Paying country
    pub from_country: CountryCode,

    /// Paying clearing account
    pub from_country_account_id: Uuid,

    /// Receiving country
    pub to_country: CountryCode,

    /// Receiving clearing account
    pub to_country_account_id: Uuid,

    /// Principal amount in source currency
    pub amount: Decimal,

    /// Source currency
    pub currency: Currency,

    /// FX rate used
    pub fx_rate: Decimal,

    /// Amount delivered in destination currency
    pub converted_amount: Decimal,

    /// Destination currency
    pub converted_currency: Currency,

    /// Recipient phone
    pub payout_to_phone: PhoneNumber,

    /// Receiving network or "wallet"
    pub payout_provider_name: String,

    /// Delivery method
    pub payout_method: PayoutMethod,

    /// Transaction this instruction derives from
    pub source_transaction_id: Uuid,

    /// Status
    pub status: InstructionStatus,

    /// Recipient had no registered user
    pub is_guest_payout: bool,

    /// Surcharge applied for guest payouts
    pub guest_surcharge: Decimal,

    /// Number of delivery retries
    pub retry_count: u32,

    /// Last retry timestamp
    pub last_retry_at: Option<DateTime<Utc>>,

    /// Operator notes
    pub processing_notes: String,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Processing start timestamp
    pub processed_at: Option<DateTime<Utc>>,

    /// Completion timestamp
    pub completed_at: Option<DateTime<Utc>>,
}

/// Intercountry settlement status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementStatus {
    /// Obligation accumulating
    Pending,
    /// Reconciled off-platform
    Settled,
}

/// Bilateral net-owed record between two countries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntercountrySettlement {
    /// Unique settlement ID
    pub id: Uuid,

    /// Human-readable reference
    pub reference: String,

    /// Owing country
    pub from_country: CountryCode,

    /// Owed country
    pub to_country: CountryCode,

    /// Accumulated obligation in `currency`
    pub total_amount: Decimal,

    /// Obligation currency (receiving country's)
    pub currency: Currency,

    /// Contributing payout instructions
    pub instruction_ids: Vec<Uuid>,

    /// Count of contributing instructions
    pub total_instructions: u32,

    /// Status
    pub status: SettlementStatus,

    /// Settlement method
    pub method: String,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

/// Bill payment record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillPayment {
    /// Unique bill payment ID
    pub id: Uuid,

    /// Human-readable reference
    pub reference: String,

    /// Paying user
    pub user_id: Uuid,

    /// Debited wallet
    pub wallet_id: Uuid,

    /// Biller
    pub biller_id: Uuid,

    /// Credited biller account
    pub biller_account_id: Uuid,

    /// Customer account number at the biller
    pub customer_account_number: String,

    /// Bill amount
    pub bill_amount: Decimal,

    /// Fee charged
    pub fee_amount: Decimal,

    /// Total debited
    pub total_amount: Decimal,

    /// Currency
    pub currency: Currency,

    /// Payment method label from the request
    pub payment_method: String,

    /// Ledger transaction
    pub transaction_id: Uuid,

    /// Paid timestamp
    pub paid_at: DateTime<Utc>,
}

/// Append-only audit log entry with before/after snapshots
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Unique entry ID
    pub id: Uuid,

    /// Action type (e.g. "PAYOUT_COMPLETED")
    pub action: String,

    /// Affected conceptual table
    pub table_name: String,

    /// Affected record
    pub record_id: Uuid,

    /// Snapshot before the mutation
    pub old_values: serde_json::Value,

    /// Snapshot after the mutation
    pub new_values: serde_json::Value,

    /// Acting user, absent for system actions
    pub changed_by: Option<Uuid>,

    /// Mutation originated from the system rather than a user request
    pub changed_by_system: bool,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

/// One account's balance movement within an operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceChange {
    /// Account label ("wallet", "provider", "country:MW", ...)
    pub account: String,

    /// Currency of the balance
    pub currency: Currency,

    /// Balance before
    pub before: Decimal,

    /// Balance after
    pub after: Decimal,
}

impl BalanceChange {
    /// Signed delta applied to the account
    pub fn delta(&self) -> Decimal {
        self.after - self.before
    }
}

/// Result handed back to the caller after a committed operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationReceipt {
    /// Transaction ID
    pub transaction_id: Uuid,

    /// Transaction reference
    pub reference: String,

    /// Operation type
    pub tx_type: TransactionType,

    /// Principal amount
    pub amount: Decimal,

    /// Source currency
    pub currency: Currency,

    /// Credited amount when conversion occurred
    pub converted_amount: Option<Decimal>,

    /// Destination currency when conversion occurred
    pub converted_currency: Option<Currency>,

    /// FX rate used when conversion occurred
    pub fx_rate: Option<Decimal>,

    /// Fee breakdown
    pub fees: FeeBreakdown,

    /// Total debited from the payer
    pub total_deduction: Decimal,

    /// Every balance the operation touched
    pub balance_changes: Vec<BalanceChange>,
}

impl OperationReceipt {
    /// Balance change for a labeled account, if touched
    pub fn change(&self, account: &str) -> Option<&BalanceChange> {
        self.balance_changes.iter().find(|c| c.account == account)
    }
}

/// Non-mutating quote for a wallet load
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadQuote {
    /// Quote reference
    pub quote_id: String,

    /// Load amount
    pub amount: Decimal,

    /// Wallet currency
    pub currency: Currency,

    /// Fee breakdown
    pub fees: FeeBreakdown,

    /// What the float will be debited
    pub provider_deduction: Decimal,

    /// Whether the float can cover the deduction
    pub provider_has_sufficient_balance: bool,

    /// Quote expiry
    pub expires_at: DateTime<Utc>,
}

/// Non-mutating quote for a payout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutQuote {
    /// Quote reference
    pub quote_id: String,

    /// Send amount in source currency
    pub amount: Decimal,

    /// Source currency
    pub currency: Currency,

    /// Amount the recipient will receive
    pub receive_amount: Decimal,

    /// Destination currency
    pub receive_currency: Currency,

    /// FX rate used, 6 dp
    pub fx_rate: Decimal,

    /// Fee breakdown including any guest surcharge
    pub fees: FeeBreakdown,

    /// Total the sender wallet will be debited
    pub total_deduction: Decimal,

    /// Corridor crosses a border
    pub is_cross_border: bool,

    /// Recipient phone has a registered user
    pub recipient_is_registered: bool,

    /// Quote expiry
    pub expires_at: DateTime<Utc>,
}

/// Non-mutating quote for a bill payment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillQuote {
    /// Quote reference
    pub quote_id: String,

    /// Biller code
    pub biller_code: String,

    /// Biller display name
    pub biller_name: String,

    /// Bill amount
    pub amount: Decimal,

    /// Fee charged by the biller model
    pub fee: Decimal,

    /// Total payable
    pub total: Decimal,

    /// Wallet currency
    pub currency: Currency,

    /// Whether the wallet covers the total
    pub wallet_has_sufficient_balance: bool,

    /// Quote expiry
    pub expires_at: DateTime<Utc>,
}

/// Build a human-readable operation reference: type prefix, epoch millis,
/// random 8-char suffix. Uniqueness is advisory; collision probability is
/// negligible and never enforced by lookup.
pub fn operation_reference(prefix: &str, at: DateTime<Utc>) -> String {
    use rand::Rng;

    const CHARSET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..8)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();

    format!("{}{}{}", prefix, at.timestamp_millis(), suffix)
}
