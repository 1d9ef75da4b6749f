//! Error types for the ledger

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// User not found
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// Wallet not found
    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    /// Mobile provider float not found
    #[error("Mobile provider not found: {0}")]
    ProviderNotFound(String),

    /// Biller not found
    #[error("Biller not found: {0}")]
    BillerNotFound(String),

    /// Transaction not found
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// Payout instruction not found
    #[error("Payout instruction not found: {0}")]
    InstructionNotFound(String),

    /// Source balance cannot cover the deduction
    #[error("Insufficient funds: need {required}, have {available}")]
    InsufficientFunds {
        /// Total deduction the operation needs
        required: Decimal,
        /// Balance actually available
        available: Decimal,
    },

    /// Account exists but is not active
    #[error("Account inactive: {0}")]
    InactiveAccount(String),

    /// Requested currency does not match the account currency
    #[error("Currency mismatch: {0}")]
    CurrencyMismatch(String),

    /// Server-side wiring problem (missing country account, biller account),
    /// distinct from user error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Request is malformed (non-positive amount, duplicate wallet, ...)
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Concurrency error
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
