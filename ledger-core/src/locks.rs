//! Per-account serialization for the commit step
//!
//! Two concurrent operations touching the same wallet or country account
//! must not both read a stale balance and commit conflicting writes. The
//! registry hands out one async mutex per account key; an operation
//! acquires every key it will mutate, in canonical sorted order, for the
//! duration of its re-read/apply/commit step. Operations on disjoint
//! accounts proceed fully in parallel.

use crate::types::CountryCode;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Key identifying one balance-bearing account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccountKey {
    /// User wallet
    Wallet(Uuid),
    /// Mobile provider float
    Provider(Uuid),
    /// Country clearing account
    Country(CountryCode),
    /// Biller receiving account
    BillerAccount(Uuid),
}

/// Registry of per-account locks
#[derive(Default)]
pub struct AccountLocks {
    inner: DashMap<AccountKey, Arc<Mutex<()>>>,
}

impl AccountLocks {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire every key in canonical order; guards release on drop
    pub async fn acquire(&self, mut keys: Vec<AccountKey>) -> Vec<OwnedMutexGuard<()>> {
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let lock = Arc::clone(
                &self
                    .inner
                    .entry(key)
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            );
            guards.push(lock.lock_owned().await);
        }
        guards
    }
}
