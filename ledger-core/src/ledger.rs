//! Main ledger orchestration layer
//!
//! This module ties together storage, rates, fees, locking, and the
//! post-commit recorders into a high-level API for money-movement
//! processing.
//!
//! Every operation walks the same pipeline, terminal on first failure:
//! resolve accounts and amounts, validate, lock the touched accounts in
//! canonical order, re-read and apply the balance deltas as one unit of
//! work, then hand off to the transaction recorder, the instruction
//! generator, and the audit logger. Post-commit recording failures are
//! logged and counted but never reverse committed balances; committed
//! operations are compensated with new entries, never rolled back.
//!
//! # Example
//!
//! ```no_run
//! use ledger_core::{Config, Ledger};
//!
//! #[tokio::main]
//! async fn main() -> ledger_core::Result<()> {
//!     let config = Config::default();
//!     let ledger = Ledger::open(config).await?;
//!
//!     // let receipt = ledger.load_wallet(user_id, &phone, amount, currency).await?;
//!
//!     Ok(())
//! }
//! ```

use crate::{
    audit::AuditLogger,
    fees::FeeSchedule,
    instructions::InstructionGenerator,
    locks::{AccountKey, AccountLocks},
    metrics::Metrics,
    rates::{RateProvider, RateSource},
    storage::{BalanceCommit, Storage},
    types::{
        operation_reference, BalanceChange, BillPayment, BillQuote, Biller, BillerAccount,
        CountryAccount, CountryCode, Currency, FeeKind, LoadQuote, MobileProviderAccount,
        OperationReceipt, PayoutMethod, PayoutQuote, PhoneNumber, Transaction, TransactionStatus,
        TransactionType, User, Wallet, WalletStatus,
    },
    Config, Error, Result,
};
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Quote lifetime
const QUOTE_VALIDITY_MINUTES: i64 = 5;

/// Registration data for a new user
#[derive(Debug, Clone)]
pub struct NewUser {
    /// Phone number (unique)
    pub phone_number: PhoneNumber,

    /// Full name
    pub full_name: String,

    /// Home country; the primary wallet opens here
    pub country: CountryCode,

    /// Email, optional
    pub email: Option<String>,
}

/// Main ledger interface
pub struct Ledger {
    /// Storage backend
    store: Arc<Storage>,

    /// FX rate provider (process-wide cache, injected sources)
    rates: Arc<RateProvider>,

    /// Fee schedule
    fees: FeeSchedule,

    /// Per-account lock registry for the commit step
    locks: AccountLocks,

    /// Audit logger
    audit: AuditLogger,

    /// Payout instruction generator
    instructions: InstructionGenerator,

    /// Metrics
    metrics: Metrics,
}

impl Ledger {
    /// Open ledger with configuration
    pub async fn open(config: Config) -> Result<Self> {
        let store = Arc::new(Storage::open(&config)?);
        let metrics = Metrics::new().map_err(|e| Error::Other(e.to_string()))?;
        let rates = Arc::new(RateProvider::new(&config.rates, metrics.clone()));

        Ok(Self {
            audit: AuditLogger::new(store.clone()),
            instructions: InstructionGenerator::new(store.clone()),
            fees: config.fees.clone(),
            locks: AccountLocks::new(),
            store,
            rates,
            metrics,
        })
    }

    /// Register an external FX rate source; earlier registrations win
    pub fn register_rate_source(&self, source: Arc<dyn RateSource>) {
        self.rates.register_source(source);
    }

    /// Shared storage handle (read access for settlement and tooling)
    pub fn storage(&self) -> Arc<Storage> {
        self.store.clone()
    }

    /// Rate provider handle
    pub fn rates(&self) -> &RateProvider {
        &self.rates
    }

    /// Metrics handle
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    // Registration / directory operations

    /// Register a user and open their primary wallet in the home country
    pub fn register_user(&self, new_user: NewUser) -> Result<User> {
        if self.store.user_by_phone(&new_user.phone_number)?.is_some() {
            return Err(Error::InvalidOperation(format!(
                "phone {} already registered",
                new_user.phone_number
            )));
        }

        let provider = self.store.provider_by_phone(&new_user.phone_number)?;
        let now = Utc::now();

        let user = User {
            id: Uuid::new_v4(),
            phone_number: new_user.phone_number,
            full_name: new_user.full_name,
            country: new_user.country,
            email: new_user.email,
            is_active: true,
            mobile_verified: provider.is_some(),
            is_traveling: false,
            current_country: None,
            created_at: now,
            updated_at: now,
        };
        self.store.put_user(&user)?;

        let wallet = Wallet {
            id: Uuid::new_v4(),
            user_id: user.id,
            country: user.country,
            currency: user.country.currency(),
            available_balance: Decimal::ZERO,
            is_primary: true,
            status: WalletStatus::Active,
            last_transaction_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.put_wallet(&wallet)?;

        self.audit.record(
            "USER_REGISTERED",
            "users",
            user.id,
            serde_json::json!({}),
            serde_json::json!({
                "phone": user.phone_number.as_str(),
                "country": user.country.code(),
                "mobile_verified": user.mobile_verified,
            }),
            Some(user.id),
        )?;

        tracing::info!(user_id = %user.id, country = %user.country, "User registered");
        Ok(user)
    }

    /// Open an additional wallet; at most one primary wallet per user
    pub fn open_wallet(
        &self,
        user_id: Uuid,
        country: CountryCode,
        is_primary: bool,
    ) -> Result<Wallet> {
        let user = self.store.get_user(user_id)?;
        if !user.is_active {
            return Err(Error::InactiveAccount(format!("user {}", user_id)));
        }

        let existing = self.store.wallets_for_user(user_id)?;
        if existing.iter().any(|w| w.country == country) {
            return Err(Error::InvalidOperation(format!(
                "user already has a wallet for {}",
                country
            )));
        }

        let now = Utc::now();

        if is_primary {
            // Demote the current primary before promoting the new wallet
            if let Ok(mut current) = self.store.primary_wallet(user_id) {
                current.is_primary = false;
                current.updated_at = now;
                self.store.put_wallet(&current)?;
            }
        }

        let wallet = Wallet {
            id: Uuid::new_v4(),
            user_id,
            country,
            currency: country.currency(),
            available_balance: Decimal::ZERO,
            is_primary,
            status: WalletStatus::Active,
            last_transaction_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.put_wallet(&wallet)?;

        self.audit.record(
            "WALLET_CREATED",
            "wokopay_wallets",
            wallet.id,
            serde_json::json!({}),
            serde_json::json!({
                "user_id": user_id.to_string(),
                "country": country.code(),
                "currency": wallet.currency.code(),
                "is_primary": is_primary,
            }),
            Some(user_id),
        )?;

        Ok(wallet)
    }

    /// Update a user's travel status and current-country override
    pub fn set_travel_status(
        &self,
        user_id: Uuid,
        is_traveling: bool,
        current_country: Option<CountryCode>,
    ) -> Result<User> {
        let mut user = self.store.get_user(user_id)?;
        user.is_traveling = is_traveling;
        user.current_country = current_country;
        user.updated_at = Utc::now();
        self.store.put_user(&user)?;
        Ok(user)
    }

    /// Register a mobile-money float reachable by phone number
    pub fn register_provider(
        &self,
        provider_name: &str,
        phone_number: PhoneNumber,
        country: CountryCode,
        opening_balance: Decimal,
    ) -> Result<MobileProviderAccount> {
        if self.store.provider_by_phone(&phone_number)?.is_some() {
            return Err(Error::InvalidOperation(format!(
                "provider already wired for {}",
                phone_number
            )));
        }

        let provider = MobileProviderAccount {
            id: Uuid::new_v4(),
            provider_name: provider_name.to_string(),
            phone_number,
            country,
            currency: country.currency(),
            balance: opening_balance,
            is_active: true,
            updated_at: Utc::now(),
        };
        self.store.put_provider(&provider)?;

        self.audit.record(
            "PROVIDER_REGISTERED",
            "mobile_providers",
            provider.id,
            serde_json::json!({}),
            serde_json::json!({
                "provider": provider.provider_name,
                "country": provider.country.code(),
                "balance": provider.balance.to_string(),
            }),
            None,
        )?;

        Ok(provider)
    }

    /// Open WokoPay's clearing account for a country
    pub fn open_country_account(
        &self,
        country: CountryCode,
        opening_balance: Decimal,
    ) -> Result<CountryAccount> {
        if self.store.country_account(country)?.is_some() {
            return Err(Error::InvalidOperation(format!(
                "country account already opened for {}",
                country
            )));
        }

        let account = CountryAccount {
            id: Uuid::new_v4(),
            country,
            currency: country.currency(),
            current_balance: opening_balance,
            incoming_pool: Decimal::ZERO,
            outgoing_pool: Decimal::ZERO,
            updated_at: Utc::now(),
        };
        self.store.put_country_account(&account)?;

        self.audit.record(
            "COUNTRY_ACCOUNT_OPENED",
            "wokopay_country_accounts",
            account.id,
            serde_json::json!({}),
            serde_json::json!({
                "country": account.country.code(),
                "balance": account.current_balance.to_string(),
            }),
            None,
        )?;

        Ok(account)
    }

    /// Register a biller and its receiving account
    pub fn register_biller(
        &self,
        code: &str,
        name: &str,
        category: &str,
        fee_kind: FeeKind,
        fee_value: Decimal,
    ) -> Result<(Biller, BillerAccount)> {
        if self.store.biller_by_code(code)?.is_some() {
            return Err(Error::InvalidOperation(format!(
                "biller code {} already registered",
                code
            )));
        }

        let biller = Biller {
            id: Uuid::new_v4(),
            code: code.to_string(),
            name: name.to_string(),
            category: category.to_string(),
            fee_kind,
            fee_value,
            is_active: true,
        };
        self.store.put_biller(&biller)?;

        let account = BillerAccount {
            id: Uuid::new_v4(),
            biller_id: biller.id,
            current_balance: Decimal::ZERO,
            is_active: true,
            updated_at: Utc::now(),
        };
        self.store.put_biller_account(&account)?;

        self.audit.record(
            "BILLER_REGISTERED",
            "billers",
            biller.id,
            serde_json::json!({}),
            serde_json::json!({
                "code": biller.code,
                "name": biller.name,
                "category": biller.category,
            }),
            None,
        )?;

        Ok((biller, account))
    }

    // Money-movement operations

    /// Load a wallet from a mobile-money float
    ///
    /// The float is debited `amount + load fee`; the wallet is credited the
    /// amount; the wallet country's clearing account absorbs the full
    /// deduction.
    pub async fn load_wallet(
        &self,
        user_id: Uuid,
        phone_number: &PhoneNumber,
        amount: Decimal,
        currency: Currency,
    ) -> Result<OperationReceipt> {
        let result = self.load_wallet_inner(user_id, phone_number, amount, currency).await;
        self.observe(&result);
        result
    }

    async fn load_wallet_inner(
        &self,
        user_id: Uuid,
        phone_number: &PhoneNumber,
        amount: Decimal,
        currency: Currency,
    ) -> Result<OperationReceipt> {
        Self::guard_amount(amount)?;

        // Resolve
        let user = self.store.get_user(user_id)?;
        if !user.is_active {
            return Err(Error::InactiveAccount(format!("user {}", user_id)));
        }

        let provider = self
            .store
            .provider_by_phone(phone_number)?
            .ok_or_else(|| Error::ProviderNotFound(phone_number.to_string()))?;
        if !provider.is_active {
            return Err(Error::InactiveAccount(format!(
                "mobile provider {}",
                provider.provider_name
            )));
        }
        if user.phone_number != *phone_number {
            tracing::warn!(
                user = %user.phone_number,
                from = %phone_number,
                "User loading from a different number"
            );
        }

        let wallet = self.store.primary_wallet(user_id)?;
        if wallet.status != WalletStatus::Active {
            return Err(Error::InactiveAccount(format!("wallet {}", wallet.id)));
        }
        if currency != wallet.currency {
            return Err(Error::CurrencyMismatch(format!(
                "load requested in {} but wallet holds {}",
                currency, wallet.currency
            )));
        }
        if provider.currency != wallet.currency {
            return Err(Error::CurrencyMismatch(format!(
                "float holds {} but wallet holds {}",
                provider.currency, wallet.currency
            )));
        }

        let fees = self.fees.load_fee(amount);
        let total_deduction = (amount + fees.total).round_dp(2);

        if self.store.country_account(wallet.country)?.is_none() {
            return Err(Error::Configuration(format!(
                "country account not opened for {}",
                wallet.country
            )));
        }

        // Lock, re-read, validate, apply as one unit of work
        let _guards = self
            .locks
            .acquire(vec![
                AccountKey::Provider(provider.id),
                AccountKey::Wallet(wallet.id),
                AccountKey::Country(wallet.country),
            ])
            .await;

        let mut provider = self.store.get_provider(provider.id)?;
        let mut wallet = self.store.get_wallet(wallet.id)?;
        let mut country = self
            .store
            .country_account(wallet.country)?
            .ok_or_else(|| {
                Error::Configuration(format!("country account not opened for {}", wallet.country))
            })?;

        if provider.balance < total_deduction {
            return Err(Error::InsufficientFunds {
                required: total_deduction,
                available: provider.balance,
            });
        }

        let now = Utc::now();
        let changes = vec![
            BalanceChange {
                account: "provider".to_string(),
                currency: provider.currency,
                before: provider.balance,
                after: provider.balance - total_deduction,
            },
            BalanceChange {
                account: "wallet".to_string(),
                currency: wallet.currency,
                before: wallet.available_balance,
                after: wallet.available_balance + amount,
            },
            BalanceChange {
                account: format!("country:{}", country.country),
                currency: country.currency,
                before: country.current_balance,
                after: country.current_balance + total_deduction,
            },
        ];

        provider.balance -= total_deduction;
        provider.updated_at = now;
        wallet.available_balance += amount;
        wallet.last_transaction_at = Some(now);
        wallet.updated_at = now;
        country.incoming_pool += total_deduction;
        country.current_balance += total_deduction;
        country.updated_at = now;

        let started = Instant::now();
        self.store.commit_balances(&BalanceCommit {
            wallets: vec![wallet.clone()],
            providers: vec![provider.clone()],
            country_accounts: vec![country.clone()],
            ..Default::default()
        })?;
        self.metrics.record_commit_duration(started.elapsed().as_secs_f64());
        drop(_guards);

        // Post-commit side effects
        let tx = Transaction {
            id: Uuid::new_v4(),
            reference: operation_reference(TransactionType::WalletLoad.reference_prefix(), now),
            tx_type: TransactionType::WalletLoad,
            sender_user_id: Some(user.id),
            sender_wallet_id: None,
            sender_phone: Some(phone_number.clone()),
            sender_country: wallet.country,
            sender_currency: wallet.currency,
            recipient_user_id: Some(user.id),
            recipient_wallet_id: Some(wallet.id),
            recipient_phone: Some(user.phone_number.clone()),
            recipient_country: wallet.country,
            recipient_currency: wallet.currency,
            amount,
            currency: wallet.currency,
            fees,
            total_deduction,
            fx_rate: None,
            converted_amount: None,
            converted_currency: None,
            source_country_account_id: Some(country.id),
            destination_country_account_id: Some(country.id),
            is_travel_transaction: false,
            status: TransactionStatus::Completed,
            description: format!("Wallet load from {}", provider.provider_name),
            settled: false,
            settled_at: None,
            settlement_reference: None,
            payout_instruction_id: None,
            created_at: now,
            completed_at: Some(now),
        };

        self.record_transaction_post_commit(&tx);
        self.record_audit_post_commit("WALLET_LOAD", "wokopay_wallets", wallet.id, &changes, Some(user.id));

        tracing::info!(
            reference = %tx.reference,
            user_id = %user.id,
            %amount,
            "Wallet load completed"
        );

        Ok(Self::receipt(&tx, changes))
    }

    /// Cash out from a wallet to a mobile-money float
    ///
    /// The wallet is debited `amount + fee` (plus the guest surcharge when
    /// the recipient phone has no registered user); the recipient float is
    /// credited the converted amount; the sender country's clearing
    /// account absorbs the deduction and the recipient country's fronts
    /// the payout.
    pub async fn cashout(
        &self,
        sender_user_id: Uuid,
        recipient_phone: &PhoneNumber,
        amount: Decimal,
        currency: Currency,
        is_guest_payout: bool,
    ) -> Result<OperationReceipt> {
        let result = self
            .cashout_inner(sender_user_id, recipient_phone, amount, currency, is_guest_payout)
            .await;
        self.observe(&result);
        result
    }

    async fn cashout_inner(
        &self,
        sender_user_id: Uuid,
        recipient_phone: &PhoneNumber,
        amount: Decimal,
        currency: Currency,
        is_guest_payout: bool,
    ) -> Result<OperationReceipt> {
        Self::guard_amount(amount)?;

        // Resolve
        let sender = self.store.get_user(sender_user_id)?;
        if !sender.is_active {
            return Err(Error::InactiveAccount(format!("user {}", sender_user_id)));
        }

        let wallet = self.store.primary_wallet(sender_user_id)?;
        if wallet.status != WalletStatus::Active {
            return Err(Error::InactiveAccount(format!("wallet {}", wallet.id)));
        }
        if currency != wallet.currency {
            return Err(Error::CurrencyMismatch(format!(
                "payout requested in {} but wallet holds {}",
                currency, wallet.currency
            )));
        }

        let recipient_user = self.store.user_by_phone(recipient_phone)?;

        let provider = self
            .store
            .provider_by_phone(recipient_phone)?
            .ok_or_else(|| Error::ProviderNotFound(recipient_phone.to_string()))?;
        if !provider.is_active {
            return Err(Error::InactiveAccount(format!(
                "mobile provider {}",
                provider.provider_name
            )));
        }

        let from_country = wallet.country;
        let to_country = provider.country;
        let cross_border = from_country != to_country;

        if self.store.country_account(from_country)?.is_none() {
            return Err(Error::Configuration(format!(
                "country account not opened for {}",
                from_country
            )));
        }
        if self.store.country_account(to_country)?.is_none() {
            return Err(Error::Configuration(format!(
                "country account not opened for {}",
                to_country
            )));
        }

        let conversion = self
            .rates
            .convert(wallet.currency, provider.currency, amount)
            .await;
        let converted_amount = conversion.converted_amount;
        let needs_conversion = wallet.currency != provider.currency;

        let guest = is_guest_payout && recipient_user.is_none();
        let fees = self.fees.payout_fee(amount, cross_border, guest);
        let total_deduction = (amount + fees.total).round_dp(2);

        // Lock, re-read, validate, apply as one unit of work
        let _guards = self
            .locks
            .acquire(vec![
                AccountKey::Wallet(wallet.id),
                AccountKey::Provider(provider.id),
                AccountKey::Country(from_country),
                AccountKey::Country(to_country),
            ])
            .await;

        let mut wallet = self.store.get_wallet(wallet.id)?;
        let mut provider = self.store.get_provider(provider.id)?;
        let mut from_account = self
            .store
            .country_account(from_country)?
            .ok_or_else(|| {
                Error::Configuration(format!("country account not opened for {}", from_country))
            })?;

        if wallet.available_balance < total_deduction {
            return Err(Error::InsufficientFunds {
                required: total_deduction,
                available: wallet.available_balance,
            });
        }

        let now = Utc::now();
        let mut changes = vec![
            BalanceChange {
                account: "wallet".to_string(),
                currency: wallet.currency,
                before: wallet.available_balance,
                after: wallet.available_balance - total_deduction,
            },
            BalanceChange {
                account: "provider".to_string(),
                currency: provider.currency,
                before: provider.balance,
                after: provider.balance + converted_amount,
            },
        ];

        wallet.available_balance -= total_deduction;
        wallet.last_transaction_at = Some(now);
        wallet.updated_at = now;
        provider.balance += converted_amount;
        provider.updated_at = now;

        let mut country_accounts = Vec::new();
        let dest_account_id;
        if cross_border {
            let mut to_account = self
                .store
                .country_account(to_country)?
                .ok_or_else(|| {
                    Error::Configuration(format!("country account not opened for {}", to_country))
                })?;
            dest_account_id = to_account.id;

            if to_account.current_balance < converted_amount {
                tracing::warn!(
                    country = %to_country,
                    balance = %to_account.current_balance,
                    needed = %converted_amount,
                    "Fronting country account balance is low"
                );
            }

            changes.push(BalanceChange {
                account: format!("country:{}", from_country),
                currency: from_account.currency,
                before: from_account.current_balance,
                after: from_account.current_balance + total_deduction,
            });
            changes.push(BalanceChange {
                account: format!("country:{}", to_country),
                currency: to_account.currency,
                before: to_account.current_balance,
                after: to_account.current_balance - converted_amount,
            });

            from_account.incoming_pool += total_deduction;
            from_account.current_balance += total_deduction;
            from_account.updated_at = now;
            to_account.outgoing_pool += converted_amount;
            to_account.current_balance -= converted_amount;
            to_account.updated_at = now;

            country_accounts.push(from_account.clone());
            country_accounts.push(to_account);
        } else {
            // Local payout: one clearing account receives and fronts
            dest_account_id = from_account.id;
            changes.push(BalanceChange {
                account: format!("country:{}", from_country),
                currency: from_account.currency,
                before: from_account.current_balance,
                after: from_account.current_balance + total_deduction - converted_amount,
            });

            from_account.incoming_pool += total_deduction;
            from_account.outgoing_pool += converted_amount;
            from_account.current_balance += total_deduction - converted_amount;
            from_account.updated_at = now;
            country_accounts.push(from_account.clone());
        }

        let started = Instant::now();
        self.store.commit_balances(&BalanceCommit {
            wallets: vec![wallet.clone()],
            providers: vec![provider.clone()],
            country_accounts,
            ..Default::default()
        })?;
        self.metrics.record_commit_duration(started.elapsed().as_secs_f64());
        drop(_guards);

        // Post-commit side effects
        let tx_type = if guest {
            TransactionType::GuestPayout
        } else {
            TransactionType::WalletCashout
        };

        let mut tx = Transaction {
            id: Uuid::new_v4(),
            reference: operation_reference(tx_type.reference_prefix(), now),
            tx_type,
            sender_user_id: Some(sender.id),
            sender_wallet_id: Some(wallet.id),
            sender_phone: Some(sender.phone_number.clone()),
            sender_country: from_country,
            sender_currency: wallet.currency,
            recipient_user_id: recipient_user.as_ref().map(|u| u.id),
            recipient_wallet_id: None,
            recipient_phone: Some(recipient_phone.clone()),
            recipient_country: to_country,
            recipient_currency: provider.currency,
            amount,
            currency: wallet.currency,
            fees,
            total_deduction,
            fx_rate: needs_conversion.then_some(conversion.rate),
            converted_amount: needs_conversion.then_some(converted_amount),
            converted_currency: needs_conversion.then_some(provider.currency),
            source_country_account_id: Some(from_account.id),
            destination_country_account_id: Some(dest_account_id),
            is_travel_transaction: sender.is_traveling,
            status: TransactionStatus::Completed,
            description: format!(
                "Payout to {} via {} WokoPay",
                provider.provider_name, to_country
            ),
            settled: false,
            settled_at: None,
            settlement_reference: None,
            payout_instruction_id: None,
            created_at: now,
            completed_at: Some(now),
        };

        self.record_transaction_post_commit(&tx);
        self.record_payout_side_effects(
            &mut tx,
            PayoutMethod::MobileMoney,
            &provider.provider_name,
            true,
            cross_border,
        );
        self.record_audit_post_commit(
            "PAYOUT_COMPLETED",
            "transactions",
            tx.id,
            &changes,
            Some(sender.id),
        );

        tracing::info!(
            reference = %tx.reference,
            from = %from_country,
            to = %to_country,
            cross_border,
            "Payout completed"
        );

        Ok(Self::receipt(&tx, changes))
    }

    /// Send from one wallet to another across a corridor
    ///
    /// Traveling users carry their current-country override into corridor
    /// and fee resolution.
    pub async fn send_cross_border(
        &self,
        sender_user_id: Uuid,
        recipient_phone: &PhoneNumber,
        amount: Decimal,
        currency: Currency,
        purpose: &str,
    ) -> Result<OperationReceipt> {
        let result = self
            .send_cross_border_inner(sender_user_id, recipient_phone, amount, currency, purpose)
            .await;
        self.observe(&result);
        result
    }

    async fn send_cross_border_inner(
        &self,
        sender_user_id: Uuid,
        recipient_phone: &PhoneNumber,
        amount: Decimal,
        currency: Currency,
        purpose: &str,
    ) -> Result<OperationReceipt> {
        Self::guard_amount(amount)?;

        // Resolve
        let sender = self.store.get_user(sender_user_id)?;
        if !sender.is_active {
            return Err(Error::InactiveAccount(format!("user {}", sender_user_id)));
        }

        let sender_wallet = self.store.primary_wallet(sender_user_id)?;
        if sender_wallet.status != WalletStatus::Active {
            return Err(Error::InactiveAccount(format!("wallet {}", sender_wallet.id)));
        }
        if currency != sender_wallet.currency {
            return Err(Error::CurrencyMismatch(format!(
                "send requested in {} but wallet holds {}",
                currency, sender_wallet.currency
            )));
        }

        let recipient = self
            .store
            .user_by_phone(recipient_phone)?
            .ok_or_else(|| Error::UserNotFound(recipient_phone.to_string()))?;
        if !recipient.is_active {
            return Err(Error::InactiveAccount(format!("user {}", recipient.id)));
        }

        let recipient_wallet = self.store.primary_wallet(recipient.id)?;
        if recipient_wallet.status != WalletStatus::Active {
            return Err(Error::InactiveAccount(format!(
                "wallet {}",
                recipient_wallet.id
            )));
        }

        let from_country = sender.effective_country(sender_wallet.country);
        let to_country = recipient.effective_country(recipient_wallet.country);
        let cross_border = from_country != to_country;

        if self.store.country_account(from_country)?.is_none() {
            return Err(Error::Configuration(format!(
                "country account not opened for {}",
                from_country
            )));
        }
        if self.store.country_account(to_country)?.is_none() {
            return Err(Error::Configuration(format!(
                "country account not opened for {}",
                to_country
            )));
        }

        let conversion = self
            .rates
            .convert(sender_wallet.currency, recipient_wallet.currency, amount)
            .await;
        let converted_amount = conversion.converted_amount;
        let needs_conversion = sender_wallet.currency != recipient_wallet.currency;

        let fees = self.fees.transfer_fee(amount, cross_border);
        let total_deduction = (amount + fees.total).round_dp(2);

        // Lock, re-read, validate, apply as one unit of work
        let _guards = self
            .locks
            .acquire(vec![
                AccountKey::Wallet(sender_wallet.id),
                AccountKey::Wallet(recipient_wallet.id),
                AccountKey::Country(from_country),
                AccountKey::Country(to_country),
            ])
            .await;

        let mut sender_wallet = self.store.get_wallet(sender_wallet.id)?;
        let mut recipient_wallet = self.store.get_wallet(recipient_wallet.id)?;
        let mut from_account = self
            .store
            .country_account(from_country)?
            .ok_or_else(|| {
                Error::Configuration(format!("country account not opened for {}", from_country))
            })?;

        if sender_wallet.available_balance < total_deduction {
            return Err(Error::InsufficientFunds {
                required: total_deduction,
                available: sender_wallet.available_balance,
            });
        }

        let now = Utc::now();
        let mut changes = vec![
            BalanceChange {
                account: "wallet".to_string(),
                currency: sender_wallet.currency,
                before: sender_wallet.available_balance,
                after: sender_wallet.available_balance - total_deduction,
            },
            BalanceChange {
                account: "recipient_wallet".to_string(),
                currency: recipient_wallet.currency,
                before: recipient_wallet.available_balance,
                after: recipient_wallet.available_balance + converted_amount,
            },
        ];

        sender_wallet.available_balance -= total_deduction;
        sender_wallet.last_transaction_at = Some(now);
        sender_wallet.updated_at = now;
        recipient_wallet.available_balance += converted_amount;
        recipient_wallet.last_transaction_at = Some(now);
        recipient_wallet.updated_at = now;

        let mut country_accounts = Vec::new();
        let dest_account_id;
        if cross_border {
            let mut to_account = self
                .store
                .country_account(to_country)?
                .ok_or_else(|| {
                    Error::Configuration(format!("country account not opened for {}", to_country))
                })?;
            dest_account_id = to_account.id;

            changes.push(BalanceChange {
                account: format!("country:{}", from_country),
                currency: from_account.currency,
                before: from_account.current_balance,
                after: from_account.current_balance - total_deduction,
            });
            changes.push(BalanceChange {
                account: format!("country:{}", to_country),
                currency: to_account.currency,
                before: to_account.current_balance,
                after: to_account.current_balance + converted_amount,
            });

            from_account.outgoing_pool += total_deduction;
            from_account.current_balance -= total_deduction;
            from_account.updated_at = now;
            to_account.incoming_pool += converted_amount;
            to_account.current_balance += converted_amount;
            to_account.updated_at = now;

            country_accounts.push(from_account.clone());
            country_accounts.push(to_account);
        } else {
            dest_account_id = from_account.id;
            changes.push(BalanceChange {
                account: format!("country:{}", from_country),
                currency: from_account.currency,
                before: from_account.current_balance,
                after: from_account.current_balance + converted_amount - total_deduction,
            });

            from_account.outgoing_pool += total_deduction;
            from_account.incoming_pool += converted_amount;
            from_account.current_balance += converted_amount - total_deduction;
            from_account.updated_at = now;
            country_accounts.push(from_account.clone());
        }

        let started = Instant::now();
        self.store.commit_balances(&BalanceCommit {
            wallets: vec![sender_wallet.clone(), recipient_wallet.clone()],
            country_accounts,
            ..Default::default()
        })?;
        self.metrics.record_commit_duration(started.elapsed().as_secs_f64());
        drop(_guards);

        // Post-commit side effects
        let mut tx = Transaction {
            id: Uuid::new_v4(),
            reference: operation_reference(
                TransactionType::CrossBorderSend.reference_prefix(),
                now,
            ),
            tx_type: TransactionType::CrossBorderSend,
            sender_user_id: Some(sender.id),
            sender_wallet_id: Some(sender_wallet.id),
            sender_phone: Some(sender.phone_number.clone()),
            sender_country: from_country,
            sender_currency: sender_wallet.currency,
            recipient_user_id: Some(recipient.id),
            recipient_wallet_id: Some(recipient_wallet.id),
            recipient_phone: Some(recipient.phone_number.clone()),
            recipient_country: to_country,
            recipient_currency: recipient_wallet.currency,
            amount,
            currency: sender_wallet.currency,
            fees,
            total_deduction,
            fx_rate: needs_conversion.then_some(conversion.rate),
            converted_amount: needs_conversion.then_some(converted_amount),
            converted_currency: needs_conversion.then_some(recipient_wallet.currency),
            source_country_account_id: Some(from_account.id),
            destination_country_account_id: Some(dest_account_id),
            is_travel_transaction: sender.is_traveling,
            status: TransactionStatus::Completed,
            description: format!("Cross-border transfer: {}", purpose),
            settled: false,
            settled_at: None,
            settlement_reference: None,
            payout_instruction_id: None,
            created_at: now,
            completed_at: Some(now),
        };

        self.record_transaction_post_commit(&tx);
        self.record_payout_side_effects(&mut tx, PayoutMethod::WalletTransfer, "wallet", false, cross_border);
        self.record_audit_post_commit(
            "TRANSFER_SEND",
            "wokopay_wallets",
            sender_wallet.id,
            &changes[..1],
            Some(sender.id),
        );
        self.record_audit_post_commit(
            "TRANSFER_RECEIVE",
            "wokopay_wallets",
            recipient_wallet.id,
            &changes[1..2],
            Some(sender.id),
        );

        tracing::info!(
            reference = %tx.reference,
            from = %from_country,
            to = %to_country,
            cross_border,
            "Transfer completed"
        );

        Ok(Self::receipt(&tx, changes))
    }

    /// Pay a bill from a wallet
    ///
    /// Single-country operation: the wallet is debited `amount + biller
    /// fee` and the biller account is credited the amount; no clearing
    /// account moves.
    pub async fn pay_bill(
        &self,
        user_id: Uuid,
        biller_code: &str,
        customer_account_number: &str,
        amount: Decimal,
        payment_method: &str,
    ) -> Result<OperationReceipt> {
        let result = self
            .pay_bill_inner(user_id, biller_code, customer_account_number, amount, payment_method)
            .await;
        self.observe(&result);
        result
    }

    async fn pay_bill_inner(
        &self,
        user_id: Uuid,
        biller_code: &str,
        customer_account_number: &str,
        amount: Decimal,
        payment_method: &str,
    ) -> Result<OperationReceipt> {
        Self::guard_amount(amount)?;

        // Resolve
        let user = self.store.get_user(user_id)?;
        if !user.is_active {
            return Err(Error::InactiveAccount(format!("user {}", user_id)));
        }

        let wallet = self.store.primary_wallet(user_id)?;
        if wallet.status != WalletStatus::Active {
            return Err(Error::InactiveAccount(format!("wallet {}", wallet.id)));
        }

        let biller = self
            .store
            .biller_by_code(biller_code)?
            .ok_or_else(|| Error::BillerNotFound(biller_code.to_string()))?;
        if !biller.is_active {
            return Err(Error::InactiveAccount(format!("biller {}", biller.code)));
        }

        let biller_account = self
            .store
            .biller_account_for(biller.id)?
            .ok_or_else(|| {
                Error::Configuration(format!("biller account not configured for {}", biller.code))
            })?;
        if !biller_account.is_active {
            return Err(Error::InactiveAccount(format!(
                "biller account for {}",
                biller.code
            )));
        }

        let fees = self.fees.biller_fee(&biller, amount);
        let total_deduction = (amount + fees.total).round_dp(2);

        // Lock, re-read, validate, apply as one unit of work
        let _guards = self
            .locks
            .acquire(vec![
                AccountKey::Wallet(wallet.id),
                AccountKey::BillerAccount(biller_account.id),
            ])
            .await;

        let mut wallet = self.store.get_wallet(wallet.id)?;
        let mut biller_account = self
            .store
            .biller_account_for(biller.id)?
            .ok_or_else(|| {
                Error::Configuration(format!("biller account not configured for {}", biller.code))
            })?;

        if wallet.available_balance < total_deduction {
            return Err(Error::InsufficientFunds {
                required: total_deduction,
                available: wallet.available_balance,
            });
        }

        let now = Utc::now();
        let changes = vec![
            BalanceChange {
                account: "wallet".to_string(),
                currency: wallet.currency,
                before: wallet.available_balance,
                after: wallet.available_balance - total_deduction,
            },
            BalanceChange {
                account: "biller_account".to_string(),
                currency: wallet.currency,
                before: biller_account.current_balance,
                after: biller_account.current_balance + amount,
            },
        ];

        wallet.available_balance -= total_deduction;
        wallet.last_transaction_at = Some(now);
        wallet.updated_at = now;
        biller_account.current_balance += amount;
        biller_account.updated_at = now;

        let started = Instant::now();
        self.store.commit_balances(&BalanceCommit {
            wallets: vec![wallet.clone()],
            biller_accounts: vec![biller_account.clone()],
            ..Default::default()
        })?;
        self.metrics.record_commit_duration(started.elapsed().as_secs_f64());
        drop(_guards);

        // Post-commit side effects
        let tx = Transaction {
            id: Uuid::new_v4(),
            reference: operation_reference(TransactionType::BillPayment.reference_prefix(), now),
            tx_type: TransactionType::BillPayment,
            sender_user_id: Some(user.id),
            sender_wallet_id: Some(wallet.id),
            sender_phone: Some(user.phone_number.clone()),
            sender_country: wallet.country,
            sender_currency: wallet.currency,
            recipient_user_id: None,
            recipient_wallet_id: None,
            recipient_phone: None,
            recipient_country: wallet.country,
            recipient_currency: wallet.currency,
            amount,
            currency: wallet.currency,
            fees,
            total_deduction,
            fx_rate: None,
            converted_amount: None,
            converted_currency: None,
            source_country_account_id: None,
            destination_country_account_id: None,
            is_travel_transaction: user.is_traveling,
            status: TransactionStatus::Completed,
            description: format!("Bill payment to {}", biller.name),
            settled: false,
            settled_at: None,
            settlement_reference: None,
            payout_instruction_id: None,
            created_at: now,
            completed_at: Some(now),
        };

        self.record_transaction_post_commit(&tx);

        let bill_payment = BillPayment {
            id: Uuid::new_v4(),
            reference: operation_reference("BP", now),
            user_id: user.id,
            wallet_id: wallet.id,
            biller_id: biller.id,
            biller_account_id: biller_account.id,
            customer_account_number: customer_account_number.to_string(),
            bill_amount: amount,
            fee_amount: fees.total,
            total_amount: total_deduction,
            currency: wallet.currency,
            payment_method: payment_method.to_string(),
            transaction_id: tx.id,
            paid_at: now,
        };
        if let Err(err) = self.store.put_bill_payment(&bill_payment) {
            tracing::error!(%err, transaction_id = %tx.id, "Bill payment record failed after commit");
            self.metrics.record_post_commit_failure();
        }

        self.record_audit_post_commit("BILL_PAYMENT", "bill_payments", tx.id, &changes, Some(user.id));

        tracing::info!(
            reference = %tx.reference,
            biller = %biller.code,
            %amount,
            "Bill payment completed"
        );

        Ok(Self::receipt(&tx, changes))
    }

    // Quotes (read-only)

    /// Quote a wallet load without mutating anything
    pub async fn load_quote(
        &self,
        user_id: Uuid,
        phone_number: &PhoneNumber,
        amount: Decimal,
    ) -> Result<LoadQuote> {
        Self::guard_amount(amount)?;

        self.store.get_user(user_id)?;
        let provider = self
            .store
            .provider_by_phone(phone_number)?
            .ok_or_else(|| Error::ProviderNotFound(phone_number.to_string()))?;
        let wallet = self.store.primary_wallet(user_id)?;

        let fees = self.fees.load_fee(amount);
        let provider_deduction = (amount + fees.total).round_dp(2);
        let now = Utc::now();

        Ok(LoadQuote {
            quote_id: operation_reference("LQT", now),
            amount,
            currency: wallet.currency,
            fees,
            provider_deduction,
            provider_has_sufficient_balance: provider.balance >= provider_deduction,
            expires_at: now + ChronoDuration::minutes(QUOTE_VALIDITY_MINUTES),
        })
    }

    /// Quote a payout without mutating anything
    pub async fn payout_quote(
        &self,
        sender_user_id: Uuid,
        recipient_phone: &PhoneNumber,
        amount: Decimal,
    ) -> Result<PayoutQuote> {
        Self::guard_amount(amount)?;

        let wallet = self.store.primary_wallet(sender_user_id)?;
        let provider = self
            .store
            .provider_by_phone(recipient_phone)?
            .ok_or_else(|| Error::ProviderNotFound(recipient_phone.to_string()))?;
        let recipient_user = self.store.user_by_phone(recipient_phone)?;

        let cross_border = wallet.country != provider.country;
        let conversion = self
            .rates
            .convert(wallet.currency, provider.currency, amount)
            .await;
        let fees = self
            .fees
            .payout_fee(amount, cross_border, recipient_user.is_none());
        let total_deduction = (amount + fees.total).round_dp(2);
        let now = Utc::now();

        Ok(PayoutQuote {
            quote_id: operation_reference("QTE", now),
            amount,
            currency: wallet.currency,
            receive_amount: conversion.converted_amount,
            receive_currency: provider.currency,
            fx_rate: conversion.rate,
            fees,
            total_deduction,
            is_cross_border: cross_border,
            recipient_is_registered: recipient_user.is_some(),
            expires_at: now + ChronoDuration::minutes(QUOTE_VALIDITY_MINUTES),
        })
    }

    /// Quote a bill payment without mutating anything
    pub async fn bill_quote(
        &self,
        user_id: Uuid,
        biller_code: &str,
        amount: Decimal,
    ) -> Result<BillQuote> {
        Self::guard_amount(amount)?;

        let wallet = self.store.primary_wallet(user_id)?;
        let biller = self
            .store
            .biller_by_code(biller_code)?
            .ok_or_else(|| Error::BillerNotFound(biller_code.to_string()))?;

        let fees = self.fees.biller_fee(&biller, amount);
        let total = (amount + fees.total).round_dp(2);
        let now = Utc::now();

        Ok(BillQuote {
            quote_id: operation_reference("BILLQ", now),
            biller_code: biller.code.clone(),
            biller_name: biller.name.clone(),
            amount,
            fee: fees.total,
            total,
            currency: wallet.currency,
            wallet_has_sufficient_balance: wallet.available_balance >= total,
            expires_at: now + ChronoDuration::minutes(QUOTE_VALIDITY_MINUTES),
        })
    }

    // Internal helpers

    fn guard_amount(amount: Decimal) -> Result<()> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidOperation(
                "amount must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn observe<T>(&self, result: &Result<T>) {
        match result {
            Ok(_) => self.metrics.record_operation(),
            Err(_) => self.metrics.record_failure(),
        }
    }

    /// Record the transaction; balances stand even if this fails
    fn record_transaction_post_commit(&self, tx: &Transaction) {
        if let Err(err) = self.store.record_transaction(tx) {
            tracing::error!(
                %err,
                transaction_id = %tx.id,
                "Transaction recording failed after commit; reconcile out-of-band"
            );
            self.metrics.record_post_commit_failure();
        }
    }

    /// Derive the payout instruction and, cross-border, the bilateral
    /// obligation; attach the instruction to the transaction
    fn record_payout_side_effects(
        &self,
        tx: &mut Transaction,
        method: PayoutMethod,
        provider_name: &str,
        completed: bool,
        cross_border: bool,
    ) {
        match self
            .instructions
            .record_payout_instruction(tx, method, provider_name, completed)
        {
            Ok(instruction) => {
                tx.payout_instruction_id = Some(instruction.id);
                if let Err(err) = self.store.update_transaction(tx) {
                    tracing::error!(%err, transaction_id = %tx.id, "Instruction linkage failed after commit");
                    self.metrics.record_post_commit_failure();
                }
                if cross_border {
                    if let Err(err) = self.instructions.record_intercountry_obligation(&instruction)
                    {
                        tracing::error!(%err, instruction_id = %instruction.id, "Obligation recording failed after commit");
                        self.metrics.record_post_commit_failure();
                    }
                }
            }
            Err(err) => {
                tracing::error!(%err, transaction_id = %tx.id, "Instruction recording failed after commit");
                self.metrics.record_post_commit_failure();
            }
        }
    }

    /// Write the audit snapshot; balances stand even if this fails
    fn record_audit_post_commit(
        &self,
        action: &str,
        table: &str,
        record_id: Uuid,
        changes: &[BalanceChange],
        actor: Option<Uuid>,
    ) {
        if let Err(err) = self
            .audit
            .record_balances(action, table, record_id, changes, actor)
        {
            tracing::error!(%err, action, "Audit write failed after commit");
            self.metrics.record_post_commit_failure();
        }
    }

    fn receipt(tx: &Transaction, changes: Vec<BalanceChange>) -> OperationReceipt {
        OperationReceipt {
            transaction_id: tx.id,
            reference: tx.reference.clone(),
            tx_type: tx.tx_type,
            amount: tx.amount,
            currency: tx.currency,
            converted_amount: tx.converted_amount,
            converted_currency: tx.converted_currency,
            fx_rate: tx.fx_rate,
            fees: tx.fees,
            total_deduction: tx.total_deduction,
            balance_changes: changes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MW_PHONE: &str = "+265991000001";
    const MW_FLOAT: &str = "+265991000001";
    const ZM_FLOAT: &str = "+260971000001";

    async fn test_ledger() -> (Ledger, TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Ledger::open(config).await.unwrap(), temp_dir)
    }

    /// Country accounts, floats, and a funded MW user
    async fn seeded_ledger() -> (Ledger, User, TempDir) {
        let (ledger, temp) = test_ledger().await;

        ledger
            .open_country_account(CountryCode::MW, Decimal::new(10_000_000, 2))
            .unwrap();
        ledger
            .open_country_account(CountryCode::ZM, Decimal::new(5_000_000, 2))
            .unwrap();
        ledger
            .register_provider(
                "Airtel Money",
                PhoneNumber::new(MW_FLOAT),
                CountryCode::MW,
                Decimal::new(10_000_000, 2),
            )
            .unwrap();
        ledger
            .register_provider(
                "MTN Money",
                PhoneNumber::new(ZM_FLOAT),
                CountryCode::ZM,
                Decimal::new(1_000_000, 2),
            )
            .unwrap();

        let user = ledger
            .register_user(NewUser {
                phone_number: PhoneNumber::new(MW_PHONE),
                full_name: "Chisomo Banda".to_string(),
                country: CountryCode::MW,
                email: None,
            })
            .unwrap();

        (ledger, user, temp)
    }

    fn fund_wallet(ledger: &Ledger, user_id: Uuid, balance: Decimal) -> Wallet {
        let store = ledger.storage();
        let mut wallet = store.primary_wallet(user_id).unwrap();
        wallet.available_balance = balance;
        store.put_wallet(&wallet).unwrap();
        wallet
    }

    #[tokio::test]
    async fn test_register_user_opens_primary_wallet() {
        let (ledger, user, _temp) = seeded_ledger().await;

        assert!(user.mobile_verified);
        let wallet = ledger.storage().primary_wallet(user.id).unwrap();
        assert!(wallet.is_primary);
        assert_eq!(wallet.currency, Currency::MWK);
        assert_eq!(wallet.available_balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_open_wallet_demotes_old_primary() {
        let (ledger, user, _temp) = seeded_ledger().await;
        let old_primary = ledger.storage().primary_wallet(user.id).unwrap();

        let new_primary = ledger.open_wallet(user.id, CountryCode::ZM, true).unwrap();

        let current = ledger.storage().primary_wallet(user.id).unwrap();
        assert_eq!(current.id, new_primary.id);
        assert!(!ledger.storage().get_wallet(old_primary.id).unwrap().is_primary);

        // Duplicate country is rejected
        assert!(ledger.open_wallet(user.id, CountryCode::ZM, false).is_err());
    }

    #[tokio::test]
    async fn test_wallet_load() {
        let (ledger, user, _temp) = seeded_ledger().await;

        let receipt = ledger
            .load_wallet(
                user.id,
                &PhoneNumber::new(MW_FLOAT),
                Decimal::new(100000, 2), // 1000
                Currency::MWK,
            )
            .await
            .unwrap();

        // Load fee: 2.00 + 0.5% of 1000 = 7.00
        assert_eq!(receipt.fees.total, Decimal::new(700, 2));
        assert_eq!(receipt.total_deduction, Decimal::new(100700, 2));

        let wallet = ledger.storage().primary_wallet(user.id).unwrap();
        assert_eq!(wallet.available_balance, Decimal::new(100000, 2));

        // Float debited amount + fee; clearing account absorbed the total
        assert_eq!(
            receipt.change("provider").unwrap().delta(),
            Decimal::new(-100700, 2)
        );
        assert_eq!(
            receipt.change("country:MW").unwrap().delta(),
            Decimal::new(100700, 2)
        );

        let country = ledger
            .storage()
            .country_account(CountryCode::MW)
            .unwrap()
            .unwrap();
        assert_eq!(country.incoming_pool, Decimal::new(100700, 2));
    }

    #[tokio::test]
    async fn test_load_rejects_insufficient_float() {
        let (ledger, user, _temp) = seeded_ledger().await;

        let result = ledger
            .load_wallet(
                user.id,
                &PhoneNumber::new(MW_FLOAT),
                Decimal::new(100_000_000, 2), // more than the float holds
                Currency::MWK,
            )
            .await;

        assert!(matches!(result, Err(Error::InsufficientFunds { .. })));

        // Nothing moved
        let wallet = ledger.storage().primary_wallet(user.id).unwrap();
        assert_eq!(wallet.available_balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_cross_border_payout_flow() {
        let (ledger, user, _temp) = seeded_ledger().await;
        fund_wallet(&ledger, user.id, Decimal::new(200000, 2)); // 2000 MWK

        let receipt = ledger
            .cashout(
                user.id,
                &PhoneNumber::new(ZM_FLOAT),
                Decimal::new(50000, 2), // 500 MWK
                Currency::MWK,
                false,
            )
            .await
            .unwrap();

        // Cross-border fee: 10 + 2.5% of 500 = 22.50; deduction 522.50
        assert_eq!(receipt.fees.total, Decimal::new(2250, 2));
        assert_eq!(receipt.total_deduction, Decimal::new(52250, 2));

        // Fallback rate 0.0032: 500 MWK -> 1.60 ZMW
        assert_eq!(receipt.converted_amount, Some(Decimal::new(160, 2)));
        assert_eq!(receipt.fx_rate, Some(Decimal::new(32, 4).round_dp(6)));

        assert_eq!(
            receipt.change("wallet").unwrap().delta(),
            Decimal::new(-52250, 2)
        );
        assert_eq!(
            receipt.change("country:MW").unwrap().delta(),
            Decimal::new(52250, 2)
        );
        assert_eq!(
            receipt.change("country:ZM").unwrap().delta(),
            Decimal::new(-160, 2)
        );
        assert_eq!(
            receipt.change("provider").unwrap().delta(),
            Decimal::new(160, 2)
        );

        // Conservation: deltas in the receiving leg and the paying leg
        // cancel exactly; the fee stays inside the paying country account
        let paying: Decimal = receipt.change("wallet").unwrap().delta()
            + receipt.change("country:MW").unwrap().delta();
        let receiving: Decimal = receipt.change("country:ZM").unwrap().delta()
            + receipt.change("provider").unwrap().delta();
        assert_eq!(paying, Decimal::ZERO);
        assert_eq!(receiving, Decimal::ZERO);

        // Post-commit records
        let tx = ledger.storage().get_transaction(receipt.transaction_id).unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert!(!tx.settled);
        let instruction_id = tx.payout_instruction_id.unwrap();
        let instruction = ledger.storage().get_instruction(instruction_id).unwrap();
        assert_eq!(
            instruction.status,
            crate::types::InstructionStatus::PayoutCompleted
        );

        let obligation = ledger
            .storage()
            .pending_settlement_for(CountryCode::MW, CountryCode::ZM)
            .unwrap()
            .unwrap();
        assert_eq!(obligation.total_amount, Decimal::new(160, 2));

        let unsettled = ledger.storage().unsettled_transactions().unwrap();
        assert_eq!(unsettled.len(), 1);

        // Audit snapshot captured every touched balance
        let audits = ledger.storage().audit_entries().unwrap();
        assert!(audits.iter().any(|e| e.action == "PAYOUT_COMPLETED"));
    }

    #[tokio::test]
    async fn test_payout_boundary_exact_balance() {
        let (ledger, user, _temp) = seeded_ledger().await;

        // Local payout of 500: fee 5 + 1% = 10, total 510
        let total = Decimal::new(51000, 2);
        fund_wallet(&ledger, user.id, total);

        let receipt = ledger
            .cashout(
                user.id,
                &PhoneNumber::new(MW_FLOAT),
                Decimal::new(50000, 2),
                Currency::MWK,
                false,
            )
            .await
            .unwrap();

        assert_eq!(receipt.total_deduction, total);
        let wallet = ledger.storage().primary_wallet(user.id).unwrap();
        assert_eq!(wallet.available_balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_payout_boundary_one_cent_short() {
        let (ledger, user, _temp) = seeded_ledger().await;
        fund_wallet(&ledger, user.id, Decimal::new(50999, 2)); // 509.99

        let result = ledger
            .cashout(
                user.id,
                &PhoneNumber::new(MW_FLOAT),
                Decimal::new(50000, 2),
                Currency::MWK,
                false,
            )
            .await;

        assert!(matches!(result, Err(Error::InsufficientFunds { .. })));
        let wallet = ledger.storage().primary_wallet(user.id).unwrap();
        assert_eq!(wallet.available_balance, Decimal::new(50999, 2));
    }

    #[tokio::test]
    async fn test_guest_surcharge_on_unregistered_recipient() {
        let (ledger, user, _temp) = seeded_ledger().await;
        fund_wallet(&ledger, user.id, Decimal::new(200000, 2));

        // ZM float phone has no registered user
        let receipt = ledger
            .cashout(
                user.id,
                &PhoneNumber::new(ZM_FLOAT),
                Decimal::new(50000, 2),
                Currency::MWK,
                true,
            )
            .await
            .unwrap();

        assert_eq!(receipt.tx_type, TransactionType::GuestPayout);
        assert_eq!(receipt.fees.guest_surcharge, Decimal::new(1000, 2));
        // 10 + 2.5% of 500 + 10 = 32.50
        assert_eq!(receipt.fees.total, Decimal::new(3250, 2));
    }

    #[tokio::test]
    async fn test_missing_country_account_is_configuration_error() {
        let (ledger, _temp) = test_ledger().await;

        ledger
            .open_country_account(CountryCode::MW, Decimal::ZERO)
            .unwrap();
        ledger
            .register_provider(
                "MTN Money",
                PhoneNumber::new(ZM_FLOAT),
                CountryCode::ZM,
                Decimal::new(1_000_000, 2),
            )
            .unwrap();

        let user = ledger
            .register_user(NewUser {
                phone_number: PhoneNumber::new(MW_PHONE),
                full_name: "Chisomo Banda".to_string(),
                country: CountryCode::MW,
                email: None,
            })
            .unwrap();
        fund_wallet(&ledger, user.id, Decimal::new(200000, 2));

        // No ZM country account opened
        let result = ledger
            .cashout(
                user.id,
                &PhoneNumber::new(ZM_FLOAT),
                Decimal::new(50000, 2),
                Currency::MWK,
                false,
            )
            .await;

        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn test_cross_border_send_between_wallets() {
        let (ledger, sender, _temp) = seeded_ledger().await;
        fund_wallet(&ledger, sender.id, Decimal::new(200000, 2));

        let recipient = ledger
            .register_user(NewUser {
                phone_number: PhoneNumber::new("+260971000002"),
                full_name: "Mutale Zulu".to_string(),
                country: CountryCode::ZM,
                email: None,
            })
            .unwrap();

        let receipt = ledger
            .send_cross_border(
                sender.id,
                &PhoneNumber::new("+260971000002"),
                Decimal::new(50000, 2),
                Currency::MWK,
                "school fees",
            )
            .await
            .unwrap();

        assert_eq!(receipt.fees.total, Decimal::new(2250, 2));
        assert_eq!(receipt.converted_amount, Some(Decimal::new(160, 2)));

        let recipient_wallet = ledger.storage().primary_wallet(recipient.id).unwrap();
        assert_eq!(recipient_wallet.available_balance, Decimal::new(160, 2));

        // Sender corridor pays out, recipient corridor receives
        assert_eq!(
            receipt.change("country:MW").unwrap().delta(),
            Decimal::new(-52250, 2)
        );
        assert_eq!(
            receipt.change("country:ZM").unwrap().delta(),
            Decimal::new(160, 2)
        );

        // Wallet-bound instruction stays pending for the settlement pass
        let tx = ledger.storage().get_transaction(receipt.transaction_id).unwrap();
        let instruction = ledger
            .storage()
            .get_instruction(tx.payout_instruction_id.unwrap())
            .unwrap();
        assert_eq!(instruction.status, crate::types::InstructionStatus::Pending);
        assert_eq!(instruction.payout_method, PayoutMethod::WalletTransfer);
    }

    #[tokio::test]
    async fn test_travel_override_makes_corridor_local() {
        let (ledger, sender, _temp) = seeded_ledger().await;
        fund_wallet(&ledger, sender.id, Decimal::new(200000, 2));

        ledger
            .register_user(NewUser {
                phone_number: PhoneNumber::new("+260971000002"),
                full_name: "Mutale Zulu".to_string(),
                country: CountryCode::ZM,
                email: None,
            })
            .unwrap();

        // Sender is physically in ZM; the corridor becomes ZM -> ZM
        ledger
            .set_travel_status(sender.id, true, Some(CountryCode::ZM))
            .unwrap();

        let receipt = ledger
            .send_cross_border(
                sender.id,
                &PhoneNumber::new("+260971000002"),
                Decimal::new(50000, 2),
                Currency::MWK,
                "visit",
            )
            .await
            .unwrap();

        // Local fee: 5 + 1% of 500 = 10
        assert_eq!(receipt.fees.total, Decimal::new(1000, 2));
        let tx = ledger.storage().get_transaction(receipt.transaction_id).unwrap();
        assert!(tx.is_travel_transaction);
        assert!(!tx.is_cross_border());
    }

    #[tokio::test]
    async fn test_bill_payment() {
        let (ledger, user, _temp) = seeded_ledger().await;
        fund_wallet(&ledger, user.id, Decimal::new(200000, 2)); // 2000

        let (_biller, account) = ledger
            .register_biller("ESCOM", "ESCOM", "utility", FeeKind::Percent, Decimal::ONE)
            .unwrap();

        let receipt = ledger
            .pay_bill(user.id, "ESCOM", "ACC-12345", Decimal::new(100000, 2), "wallet")
            .await
            .unwrap();

        // 1000 at 1% biller fee: fee 10, total 1010, wallet 2000 -> 990
        assert_eq!(receipt.fees.total, Decimal::new(1000, 2));
        assert_eq!(receipt.total_deduction, Decimal::new(101000, 2));

        let wallet = ledger.storage().primary_wallet(user.id).unwrap();
        assert_eq!(wallet.available_balance, Decimal::new(99000, 2));

        // Biller account received the bill amount only
        let stored = ledger
            .storage()
            .biller_account_for(_biller.id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.id, account.id);
        assert_eq!(stored.current_balance, Decimal::new(100000, 2));
    }

    #[tokio::test]
    async fn test_unknown_biller() {
        let (ledger, user, _temp) = seeded_ledger().await;
        fund_wallet(&ledger, user.id, Decimal::new(200000, 2));

        let result = ledger
            .pay_bill(user.id, "NOPE", "ACC-1", Decimal::new(10000, 2), "wallet")
            .await;
        assert!(matches!(result, Err(Error::BillerNotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_payouts_one_wins() {
        let (ledger, user, _temp) = seeded_ledger().await;
        // 1000 balance; each local payout of 500 costs 510
        fund_wallet(&ledger, user.id, Decimal::new(100000, 2));

        let ledger = Arc::new(ledger);
        let a = {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger
                    .cashout(
                        user.id,
                        &PhoneNumber::new(MW_FLOAT),
                        Decimal::new(50000, 2),
                        Currency::MWK,
                        false,
                    )
                    .await
            })
        };
        let b = {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger
                    .cashout(
                        user.id,
                        &PhoneNumber::new(MW_FLOAT),
                        Decimal::new(50000, 2),
                        Currency::MWK,
                        false,
                    )
                    .await
            })
        };

        let results = vec![a.await.unwrap(), b.await.unwrap()];
        let successes = results.iter().filter(|r| r.is_ok()).count();
        let insufficient = results
            .iter()
            .filter(|r| matches!(r, Err(Error::InsufficientFunds { .. })))
            .count();

        assert_eq!(successes, 1);
        assert_eq!(insufficient, 1);

        let wallet = ledger.storage().primary_wallet(user.id).unwrap();
        assert_eq!(wallet.available_balance, Decimal::new(49000, 2));
    }

    #[tokio::test]
    async fn test_payout_quote_matches_execution() {
        let (ledger, user, _temp) = seeded_ledger().await;
        fund_wallet(&ledger, user.id, Decimal::new(200000, 2));

        let quote = ledger
            .payout_quote(user.id, &PhoneNumber::new(ZM_FLOAT), Decimal::new(50000, 2))
            .await
            .unwrap();
        // Quote to an unregistered recipient carries the surcharge
        assert!(quote.is_cross_border);
        assert!(!quote.recipient_is_registered);
        assert_eq!(quote.fees.guest_surcharge, Decimal::new(1000, 2));

        let receipt = ledger
            .cashout(
                user.id,
                &PhoneNumber::new(ZM_FLOAT),
                Decimal::new(50000, 2),
                Currency::MWK,
                true,
            )
            .await
            .unwrap();

        assert_eq!(quote.fees.total, receipt.fees.total);
        assert_eq!(quote.total_deduction, receipt.total_deduction);
        assert_eq!(quote.receive_amount, receipt.converted_amount.unwrap());
    }

    #[tokio::test]
    async fn test_currency_mismatch_rejected() {
        let (ledger, user, _temp) = seeded_ledger().await;
        fund_wallet(&ledger, user.id, Decimal::new(200000, 2));

        let result = ledger
            .cashout(
                user.id,
                &PhoneNumber::new(MW_FLOAT),
                Decimal::new(50000, 2),
                Currency::ZMW,
                false,
            )
            .await;
        assert!(matches!(result, Err(Error::CurrencyMismatch(_))));
    }
}
