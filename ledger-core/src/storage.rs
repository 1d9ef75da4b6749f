//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `users` - Registered users (key: user_id)
//! - `wallets` - Per-country wallets (key: wallet_id)
//! - `providers` - Mobile-money floats (key: provider_id)
//! - `country_accounts` - Clearing accounts (key: country code)
//! - `billers` / `biller_accounts` - Bill issuers and their accounts
//! - `transactions` - Immutable money movements (key: transaction_id)
//! - `instructions` - Payout instructions (key: instruction_id)
//! - `settlements` - Intercountry obligations (key: settlement_id)
//! - `bill_payments` - Bill payment records (key: bill_payment_id)
//! - `audit_logs` - Append-only audit entries (key: entry_id)
//! - `indices` - Secondary indices for fast lookups
//!
//! The union of all rows mutated by one ledger operation is written as a
//! single `WriteBatch`: either every balance commits or none does.

use crate::{
    error::{Error, Result},
    types::{
        AuditLogEntry, Biller, BillerAccount, BillPayment, CountryAccount, CountryCode,
        IntercountrySettlement, MobileProviderAccount, PayoutInstruction, PhoneNumber,
        SettlementStatus, Transaction, TransactionStatus, User, Wallet,
    },
    Config,
};
use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB,
};
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_USERS: &str = "users";
const CF_WALLETS: &str = "wallets";
const CF_PROVIDERS: &str = "providers";
const CF_COUNTRY_ACCOUNTS: &str = "country_accounts";
const CF_BILLERS: &str = "billers";
const CF_BILLER_ACCOUNTS: &str = "biller_accounts";
const CF_TRANSACTIONS: &str = "transactions";
const CF_INSTRUCTIONS: &str = "instructions";
const CF_SETTLEMENTS: &str = "settlements";
const CF_BILL_PAYMENTS: &str = "bill_payments";
const CF_AUDIT_LOGS: &str = "audit_logs";
const CF_INDICES: &str = "indices";

/// Index key prefixes
const IDX_USER_PHONE: &[u8] = b"up|";
const IDX_PROVIDER_PHONE: &[u8] = b"pp|";
const IDX_PRIMARY_WALLET: &[u8] = b"wp|";
const IDX_USER_WALLETS: &[u8] = b"wu|";
const IDX_BILLER_CODE: &[u8] = b"bc|";
const IDX_BILLER_ACCOUNT: &[u8] = b"ba|";
const IDX_UNSETTLED_TX: &[u8] = b"tu|";
const IDX_PENDING_SETTLEMENT: &[u8] = b"is|";

/// Balance mutations of one operation, committed as a unit
#[derive(Debug, Default, Clone)]
pub struct BalanceCommit {
    /// Wallets to write back
    pub wallets: Vec<Wallet>,

    /// Provider floats to write back
    pub providers: Vec<MobileProviderAccount>,

    /// Country clearing accounts to write back
    pub country_accounts: Vec<CountryAccount>,

    /// Biller accounts to write back
    pub biller_accounts: Vec<BillerAccount>,
}

/// Outcome of a mark-settled batch
#[derive(Debug, Clone, Default)]
pub struct MarkSettledReport {
    /// Transactions flipped by this call
    pub settled: Vec<Uuid>,

    /// Transactions already settled before this call (skipped)
    pub already_settled: Vec<Uuid>,

    /// Requested ids with no matching transaction
    pub missing: Vec<Uuid>,
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_USERS, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_WALLETS, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_PROVIDERS, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_COUNTRY_ACCOUNTS, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_BILLERS, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_BILLER_ACCOUNTS, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Self::cf_options_append()),
            ColumnFamilyDescriptor::new(CF_INSTRUCTIONS, Self::cf_options_append()),
            ColumnFamilyDescriptor::new(CF_SETTLEMENTS, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_BILL_PAYMENTS, Self::cf_options_append()),
            ColumnFamilyDescriptor::new(CF_AUDIT_LOGS, Self::cf_options_append()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!("Opened RocksDB at {:?}", path);

        Ok(Self { db: Arc::new(db) })
    }

    // Column family options

    fn cf_options_state() -> Options {
        let mut opts = Options::default();
        // Frequently read, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_append() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn get_decoded<T: serde::de::DeserializeOwned>(
        &self,
        cf_name: &str,
        key: &[u8],
    ) -> Result<Option<T>> {
        let cf = self.cf_handle(cf_name)?;
        match self.db.get_cf(&cf, key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_encoded<T: serde::Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf_handle(cf_name)?;
        self.db.put_cf(&cf, key, bincode::serialize(value)?)?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    // User operations

    /// Insert or update a user, maintaining the phone index
    pub fn put_user(&self, user: &User) -> Result<()> {
        self.put_encoded(CF_USERS, user.id.as_bytes(), user)?;

        let cf = self.cf_handle(CF_INDICES)?;
        let key = Self::index_key(IDX_USER_PHONE, user.phone_number.as_str().as_bytes());
        self.db.put_cf(&cf, key, user.id.as_bytes())?;
        Ok(())
    }

    /// Get user by ID
    pub fn get_user(&self, user_id: Uuid) -> Result<User> {
        self.get_decoded(CF_USERS, user_id.as_bytes())?
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))
    }

    /// Get user by phone number, if registered
    pub fn user_by_phone(&self, phone: &PhoneNumber) -> Result<Option<User>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let key = Self::index_key(IDX_USER_PHONE, phone.as_str().as_bytes());
        match self.db.get_cf(&cf, key)? {
            Some(id_bytes) => {
                let user_id = Self::uuid_from_bytes(&id_bytes)?;
                Ok(Some(self.get_user(user_id)?))
            }
            None => Ok(None),
        }
    }

    // Wallet operations

    /// Insert or update a wallet, maintaining ownership indices
    pub fn put_wallet(&self, wallet: &Wallet) -> Result<()> {
        self.put_encoded(CF_WALLETS, wallet.id.as_bytes(), wallet)?;

        let cf = self.cf_handle(CF_INDICES)?;
        let mut user_wallet = IDX_USER_WALLETS.to_vec();
        user_wallet.extend_from_slice(wallet.user_id.as_bytes());
        user_wallet.extend_from_slice(wallet.id.as_bytes());
        self.db.put_cf(&cf, user_wallet, b"")?;

        if wallet.is_primary {
            let key = Self::index_key(IDX_PRIMARY_WALLET, wallet.user_id.as_bytes());
            self.db.put_cf(&cf, key, wallet.id.as_bytes())?;
        }
        Ok(())
    }

    /// Get wallet by ID
    pub fn get_wallet(&self, wallet_id: Uuid) -> Result<Wallet> {
        self.get_decoded(CF_WALLETS, wallet_id.as_bytes())?
            .ok_or_else(|| Error::WalletNotFound(wallet_id.to_string()))
    }

    /// Get a user's primary wallet
    pub fn primary_wallet(&self, user_id: Uuid) -> Result<Wallet> {
        let cf = self.cf_handle(CF_INDICES)?;
        let key = Self::index_key(IDX_PRIMARY_WALLET, user_id.as_bytes());
        let id_bytes = self
            .db
            .get_cf(&cf, key)?
            .ok_or_else(|| Error::WalletNotFound(format!("primary wallet for {}", user_id)))?;

        self.get_wallet(Self::uuid_from_bytes(&id_bytes)?)
    }

    /// All wallets owned by a user
    pub fn wallets_for_user(&self, user_id: Uuid) -> Result<Vec<Wallet>> {
        let mut prefix = IDX_USER_WALLETS.to_vec();
        prefix.extend_from_slice(user_id.as_bytes());

        let mut wallets = Vec::new();
        for (key, _) in self.scan_prefix(&prefix)? {
            if key.len() >= prefix.len() + 16 {
                let wallet_id = Self::uuid_from_bytes(&key[prefix.len()..prefix.len() + 16])?;
                wallets.push(self.get_wallet(wallet_id)?);
            }
        }
        Ok(wallets)
    }

    // Provider operations

    /// Insert or update a provider float, maintaining the phone index
    pub fn put_provider(&self, provider: &MobileProviderAccount) -> Result<()> {
        self.put_encoded(CF_PROVIDERS, provider.id.as_bytes(), provider)?;

        let cf = self.cf_handle(CF_INDICES)?;
        let key = Self::index_key(IDX_PROVIDER_PHONE, provider.phone_number.as_str().as_bytes());
        self.db.put_cf(&cf, key, provider.id.as_bytes())?;
        Ok(())
    }

    /// Get provider by ID
    pub fn get_provider(&self, provider_id: Uuid) -> Result<MobileProviderAccount> {
        self.get_decoded(CF_PROVIDERS, provider_id.as_bytes())?
            .ok_or_else(|| Error::ProviderNotFound(provider_id.to_string()))
    }

    /// Get provider float by phone number, if wired
    pub fn provider_by_phone(&self, phone: &PhoneNumber) -> Result<Option<MobileProviderAccount>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let key = Self::index_key(IDX_PROVIDER_PHONE, phone.as_str().as_bytes());
        match self.db.get_cf(&cf, key)? {
            Some(id_bytes) => {
                let provider_id = Self::uuid_from_bytes(&id_bytes)?;
                Ok(Some(self.get_provider(provider_id)?))
            }
            None => Ok(None),
        }
    }

    // Country account operations

    /// Insert or update a country clearing account
    pub fn put_country_account(&self, account: &CountryAccount) -> Result<()> {
        self.put_encoded(
            CF_COUNTRY_ACCOUNTS,
            account.country.code().as_bytes(),
            account,
        )
    }

    /// Get the clearing account for a country, if opened
    pub fn country_account(&self, country: CountryCode) -> Result<Option<CountryAccount>> {
        self.get_decoded(CF_COUNTRY_ACCOUNTS, country.code().as_bytes())
    }

    // Biller operations

    /// Insert or update a biller, maintaining the code index
    pub fn put_biller(&self, biller: &Biller) -> Result<()> {
        self.put_encoded(CF_BILLERS, biller.id.as_bytes(), biller)?;

        let cf = self.cf_handle(CF_INDICES)?;
        let key = Self::index_key(IDX_BILLER_CODE, biller.code.as_bytes());
        self.db.put_cf(&cf, key, biller.id.as_bytes())?;
        Ok(())
    }

    /// Get biller by lookup code
    pub fn biller_by_code(&self, code: &str) -> Result<Option<Biller>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let key = Self::index_key(IDX_BILLER_CODE, code.as_bytes());
        match self.db.get_cf(&cf, key)? {
            Some(id_bytes) => {
                let biller_id = Self::uuid_from_bytes(&id_bytes)?;
                Ok(self.get_decoded(CF_BILLERS, biller_id.as_bytes())?)
            }
            None => Ok(None),
        }
    }

    /// Insert or update a biller account, maintaining the biller index
    pub fn put_biller_account(&self, account: &BillerAccount) -> Result<()> {
        self.put_encoded(CF_BILLER_ACCOUNTS, account.id.as_bytes(), account)?;

        let cf = self.cf_handle(CF_INDICES)?;
        let key = Self::index_key(IDX_BILLER_ACCOUNT, account.biller_id.as_bytes());
        self.db.put_cf(&cf, key, account.id.as_bytes())?;
        Ok(())
    }

    /// Get the receiving account for a biller, if configured
    pub fn biller_account_for(&self, biller_id: Uuid) -> Result<Option<BillerAccount>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let key = Self::index_key(IDX_BILLER_ACCOUNT, biller_id.as_bytes());
        match self.db.get_cf(&cf, key)? {
            Some(id_bytes) => {
                let account_id = Self::uuid_from_bytes(&id_bytes)?;
                Ok(self.get_decoded(CF_BILLER_ACCOUNTS, account_id.as_bytes())?)
            }
            None => Ok(None),
        }
    }

    // Balance unit of work

    /// Apply every balance mutation of one operation atomically
    ///
    /// The union of all mutated rows for one request is one write batch:
    /// either all of {wallets, providers, country accounts, biller
    /// accounts} become visible or none do.
    pub fn commit_balances(&self, commit: &BalanceCommit) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf_wallets = self.cf_handle(CF_WALLETS)?;
        for wallet in &commit.wallets {
            batch.put_cf(&cf_wallets, wallet.id.as_bytes(), bincode::serialize(wallet)?);
        }

        let cf_providers = self.cf_handle(CF_PROVIDERS)?;
        for provider in &commit.providers {
            batch.put_cf(
                &cf_providers,
                provider.id.as_bytes(),
                bincode::serialize(provider)?,
            );
        }

        let cf_countries = self.cf_handle(CF_COUNTRY_ACCOUNTS)?;
        for account in &commit.country_accounts {
            batch.put_cf(
                &cf_countries,
                account.country.code().as_bytes(),
                bincode::serialize(account)?,
            );
        }

        let cf_biller_accounts = self.cf_handle(CF_BILLER_ACCOUNTS)?;
        for account in &commit.biller_accounts {
            batch.put_cf(
                &cf_biller_accounts,
                account.id.as_bytes(),
                bincode::serialize(account)?,
            );
        }

        self.db.write(batch)?;
        Ok(())
    }

    // Transaction operations

    /// Record a transaction, maintaining the unsettled index
    pub fn record_transaction(&self, tx: &Transaction) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        batch.put_cf(&cf, tx.id.as_bytes(), bincode::serialize(tx)?);

        if tx.status == TransactionStatus::Completed && !tx.settled {
            let cf_indices = self.cf_handle(CF_INDICES)?;
            let key = Self::index_key(IDX_UNSETTLED_TX, tx.id.as_bytes());
            batch.put_cf(&cf_indices, key, b"");
        }

        self.db.write(batch)?;

        tracing::debug!(
            transaction_id = %tx.id,
            reference = %tx.reference,
            "Transaction recorded"
        );
        Ok(())
    }

    /// Get transaction by ID
    pub fn get_transaction(&self, tx_id: Uuid) -> Result<Transaction> {
        self.get_decoded(CF_TRANSACTIONS, tx_id.as_bytes())?
            .ok_or_else(|| Error::TransactionNotFound(tx_id.to_string()))
    }

    /// Overwrite a transaction record (settlement linkage only)
    pub fn update_transaction(&self, tx: &Transaction) -> Result<()> {
        self.put_encoded(CF_TRANSACTIONS, tx.id.as_bytes(), tx)
    }

    /// All transactions, unordered
    pub fn transactions(&self) -> Result<Vec<Transaction>> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);

        let mut txs = Vec::new();
        for item in iter {
            let (_, value) = item?;
            txs.push(bincode::deserialize(&value)?);
        }
        Ok(txs)
    }

    /// All completed-but-unsettled transactions (via index)
    pub fn unsettled_transactions(&self) -> Result<Vec<Transaction>> {
        let mut txs = Vec::new();
        for (key, _) in self.scan_prefix(IDX_UNSETTLED_TX)? {
            if key.len() >= IDX_UNSETTLED_TX.len() + 16 {
                let tx_id = Self::uuid_from_bytes(
                    &key[IDX_UNSETTLED_TX.len()..IDX_UNSETTLED_TX.len() + 16],
                )?;
                txs.push(self.get_transaction(tx_id)?);
            }
        }
        Ok(txs)
    }

    /// Flip the settled flag on a batch of transactions
    ///
    /// Idempotent: already-settled ids are reported, not re-stamped, so
    /// re-marking never changes settlement history or summaries.
    pub fn mark_transactions_settled(
        &self,
        tx_ids: &[Uuid],
        reference: &str,
        settled_at: DateTime<Utc>,
    ) -> Result<MarkSettledReport> {
        let mut report = MarkSettledReport::default();
        let mut batch = WriteBatch::default();

        let cf_tx = self.cf_handle(CF_TRANSACTIONS)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;

        for &tx_id in tx_ids {
            let mut tx = match self.get_decoded::<Transaction>(CF_TRANSACTIONS, tx_id.as_bytes())? {
                Some(tx) => tx,
                None => {
                    report.missing.push(tx_id);
                    continue;
                }
            };

            if tx.settled {
                report.already_settled.push(tx_id);
                continue;
            }

            tx.settled = true;
            tx.settled_at = Some(settled_at);
            tx.settlement_reference = Some(reference.to_string());

            batch.put_cf(&cf_tx, tx.id.as_bytes(), bincode::serialize(&tx)?);
            batch.delete_cf(&cf_indices, Self::index_key(IDX_UNSETTLED_TX, tx.id.as_bytes()));
            report.settled.push(tx_id);
        }

        self.db.write(batch)?;
        Ok(report)
    }

    // Instruction operations

    /// Record a payout instruction
    pub fn put_instruction(&self, instruction: &PayoutInstruction) -> Result<()> {
        self.put_encoded(CF_INSTRUCTIONS, instruction.id.as_bytes(), instruction)
    }

    /// Get instruction by ID
    pub fn get_instruction(&self, instruction_id: Uuid) -> Result<PayoutInstruction> {
        self.get_decoded(CF_INSTRUCTIONS, instruction_id.as_bytes())?
            .ok_or_else(|| Error::InstructionNotFound(instruction_id.to_string()))
    }

    // Intercountry settlement operations

    /// Insert or update a settlement, maintaining the pending-corridor index
    pub fn put_settlement(&self, settlement: &IntercountrySettlement) -> Result<()> {
        self.put_encoded(CF_SETTLEMENTS, settlement.id.as_bytes(), settlement)?;

        let cf = self.cf_handle(CF_INDICES)?;
        let key = Self::corridor_index_key(settlement.from_country, settlement.to_country);
        match settlement.status {
            SettlementStatus::Pending => {
                self.db.put_cf(&cf, key, settlement.id.as_bytes())?;
            }
            SettlementStatus::Settled => {
                self.db.delete_cf(&cf, key)?;
            }
        }
        Ok(())
    }

    /// Pending obligation for a corridor, if any
    pub fn pending_settlement_for(
        &self,
        from: CountryCode,
        to: CountryCode,
    ) -> Result<Option<IntercountrySettlement>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let key = Self::corridor_index_key(from, to);
        match self.db.get_cf(&cf, key)? {
            Some(id_bytes) => {
                let settlement_id = Self::uuid_from_bytes(&id_bytes)?;
                Ok(self.get_decoded(CF_SETTLEMENTS, settlement_id.as_bytes())?)
            }
            None => Ok(None),
        }
    }

    // Bill payment operations

    /// Record a bill payment
    pub fn put_bill_payment(&self, payment: &BillPayment) -> Result<()> {
        self.put_encoded(CF_BILL_PAYMENTS, payment.id.as_bytes(), payment)
    }

    // Audit operations

    /// Append an audit entry
    pub fn append_audit(&self, entry: &AuditLogEntry) -> Result<()> {
        self.put_encoded(CF_AUDIT_LOGS, entry.id.as_bytes(), entry)
    }

    /// All audit entries, unordered
    pub fn audit_entries(&self) -> Result<Vec<AuditLogEntry>> {
        let cf = self.cf_handle(CF_AUDIT_LOGS)?;
        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);

        let mut entries = Vec::new();
        for item in iter {
            let (_, value) = item?;
            entries.push(bincode::deserialize(&value)?);
        }
        Ok(entries)
    }

    // Index key helpers

    fn index_key(prefix: &[u8], suffix: &[u8]) -> Vec<u8> {
        let mut key = prefix.to_vec();
        key.extend_from_slice(suffix);
        key
    }

    fn corridor_index_key(from: CountryCode, to: CountryCode) -> Vec<u8> {
        let mut key = IDX_PENDING_SETTLEMENT.to_vec();
        key.extend_from_slice(from.code().as_bytes());
        key.extend_from_slice(to.code().as_bytes());
        key
    }

    fn uuid_from_bytes(bytes: &[u8]) -> Result<Uuid> {
        let array: [u8; 16] = bytes
            .try_into()
            .map_err(|_| Error::Storage("Malformed index value".to_string()))?;
        Ok(Uuid::from_bytes(array))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        Currency, FeeBreakdown, TransactionType, WalletStatus,
    };
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Storage::open(&config).unwrap(), temp_dir)
    }

    fn test_user(phone: &str) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            phone_number: PhoneNumber::new(phone),
            full_name: "Test User".to_string(),
            country: CountryCode::MW,
            email: None,
            is_active: true,
            mobile_verified: true,
            is_traveling: false,
            current_country: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn test_wallet(user_id: Uuid, primary: bool) -> Wallet {
        let now = Utc::now();
        Wallet {
            id: Uuid::new_v4(),
            user_id,
            country: CountryCode::MW,
            currency: Currency::MWK,
            available_balance: Decimal::new(100000, 2),
            is_primary: primary,
            status: WalletStatus::Active,
            last_transaction_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn test_transaction(settled: bool) -> Transaction {
        let now = Utc::now();
        Transaction {
            id: Uuid::new_v4(),
            reference: crate::types::operation_reference("PAY", now),
            tx_type: TransactionType::WalletCashout,
            sender_user_id: Some(Uuid::new_v4()),
            sender_wallet_id: Some(Uuid::new_v4()),
            sender_phone: Some(PhoneNumber::new("+265991000001")),
            sender_country: CountryCode::MW,
            sender_currency: Currency::MWK,
            recipient_user_id: None,
            recipient_wallet_id: None,
            recipient_phone: Some(PhoneNumber::new("+260971000001")),
            recipient_country: CountryCode::ZM,
            recipient_currency: Currency::ZMW,
            amount: Decimal::new(50000, 2),
            currency: Currency::MWK,
            fees: FeeBreakdown::zero(),
            total_deduction: Decimal::new(50000, 2),
            fx_rate: Some(Decimal::new(32, 4)),
            converted_amount: Some(Decimal::new(160, 2)),
            converted_currency: Some(Currency::ZMW),
            source_country_account_id: Some(Uuid::new_v4()),
            destination_country_account_id: Some(Uuid::new_v4()),
            is_travel_transaction: false,
            status: TransactionStatus::Completed,
            description: "test".to_string(),
            settled,
            settled_at: None,
            settlement_reference: None,
            payout_instruction_id: None,
            created_at: now,
            completed_at: Some(now),
        }
    }

    #[test]
    fn test_user_phone_lookup() {
        let (storage, _temp) = test_storage();
        let user = test_user("+265991000001");
        storage.put_user(&user).unwrap();

        let found = storage
            .user_by_phone(&PhoneNumber::new("+265991000001"))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, user.id);

        assert!(storage
            .user_by_phone(&PhoneNumber::new("+265991999999"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_primary_wallet_lookup() {
        let (storage, _temp) = test_storage();
        let user = test_user("+265991000001");
        storage.put_user(&user).unwrap();

        let secondary = test_wallet(user.id, false);
        let primary = test_wallet(user.id, true);
        storage.put_wallet(&secondary).unwrap();
        storage.put_wallet(&primary).unwrap();

        let found = storage.primary_wallet(user.id).unwrap();
        assert_eq!(found.id, primary.id);

        let all = storage.wallets_for_user(user.id).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_country_account_roundtrip() {
        let (storage, _temp) = test_storage();
        let now = Utc::now();
        let account = CountryAccount {
            id: Uuid::new_v4(),
            country: CountryCode::ZM,
            currency: Currency::ZMW,
            current_balance: Decimal::new(500000, 2),
            incoming_pool: Decimal::ZERO,
            outgoing_pool: Decimal::ZERO,
            updated_at: now,
        };
        storage.put_country_account(&account).unwrap();

        let found = storage.country_account(CountryCode::ZM).unwrap().unwrap();
        assert_eq!(found.id, account.id);
        assert!(storage.country_account(CountryCode::ZA).unwrap().is_none());
    }

    #[test]
    fn test_commit_balances_visible_together() {
        let (storage, _temp) = test_storage();
        let user = test_user("+265991000001");
        let mut wallet = test_wallet(user.id, true);
        storage.put_wallet(&wallet).unwrap();

        let now = Utc::now();
        let account = CountryAccount {
            id: Uuid::new_v4(),
            country: CountryCode::MW,
            currency: Currency::MWK,
            current_balance: Decimal::ZERO,
            incoming_pool: Decimal::ZERO,
            outgoing_pool: Decimal::ZERO,
            updated_at: now,
        };
        storage.put_country_account(&account).unwrap();

        wallet.available_balance = Decimal::new(47750, 2);
        let mut updated_account = account.clone();
        updated_account.current_balance = Decimal::new(52250, 2);

        storage
            .commit_balances(&BalanceCommit {
                wallets: vec![wallet.clone()],
                country_accounts: vec![updated_account],
                ..Default::default()
            })
            .unwrap();

        assert_eq!(
            storage.get_wallet(wallet.id).unwrap().available_balance,
            Decimal::new(47750, 2)
        );
        assert_eq!(
            storage
                .country_account(CountryCode::MW)
                .unwrap()
                .unwrap()
                .current_balance,
            Decimal::new(52250, 2)
        );
    }

    #[test]
    fn test_unsettled_index() {
        let (storage, _temp) = test_storage();

        let unsettled = test_transaction(false);
        let settled = test_transaction(true);
        storage.record_transaction(&unsettled).unwrap();
        storage.record_transaction(&settled).unwrap();

        let found = storage.unsettled_transactions().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, unsettled.id);
    }

    #[test]
    fn test_mark_settled_idempotent() {
        let (storage, _temp) = test_storage();
        let tx = test_transaction(false);
        storage.record_transaction(&tx).unwrap();

        let now = Utc::now();
        let first = storage
            .mark_transactions_settled(&[tx.id], "STL123", now)
            .unwrap();
        assert_eq!(first.settled, vec![tx.id]);
        assert!(first.already_settled.is_empty());

        let second = storage
            .mark_transactions_settled(&[tx.id], "STL124", now)
            .unwrap();
        assert!(second.settled.is_empty());
        assert_eq!(second.already_settled, vec![tx.id]);

        // Reference from the first call survives
        let stored = storage.get_transaction(tx.id).unwrap();
        assert_eq!(stored.settlement_reference.as_deref(), Some("STL123"));
        assert!(storage.unsettled_transactions().unwrap().is_empty());
    }

    #[test]
    fn test_mark_settled_reports_missing() {
        let (storage, _temp) = test_storage();
        let ghost = Uuid::new_v4();
        let report = storage
            .mark_transactions_settled(&[ghost], "STL1", Utc::now())
            .unwrap();
        assert_eq!(report.missing, vec![ghost]);
    }

    #[test]
    fn test_pending_settlement_corridor_index() {
        let (storage, _temp) = test_storage();
        let now = Utc::now();
        let mut settlement = IntercountrySettlement {
            id: Uuid::new_v4(),
            reference: "STL1".to_string(),
            from_country: CountryCode::MW,
            to_country: CountryCode::ZM,
            total_amount: Decimal::new(160, 2),
            currency: Currency::ZMW,
            instruction_ids: vec![Uuid::new_v4()],
            total_instructions: 1,
            status: SettlementStatus::Pending,
            method: "bilateral".to_string(),
            created_at: now,
            updated_at: now,
        };
        storage.put_settlement(&settlement).unwrap();

        let pending = storage
            .pending_settlement_for(CountryCode::MW, CountryCode::ZM)
            .unwrap()
            .unwrap();
        assert_eq!(pending.id, settlement.id);

        // Settling removes it from the corridor index
        settlement.status = SettlementStatus::Settled;
        storage.put_settlement(&settlement).unwrap();
        assert!(storage
            .pending_settlement_for(CountryCode::MW, CountryCode::ZM)
            .unwrap()
            .is_none());
    }
}
