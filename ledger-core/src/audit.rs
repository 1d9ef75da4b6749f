//! Audit logging
//!
//! Every balance mutation gets an append-only entry with before/after
//! snapshots, independent of the transaction record. Audit writes are
//! post-commit side effects: a failure is surfaced to the caller for
//! logging but never reverses committed balances.

use crate::storage::Storage;
use crate::types::{AuditLogEntry, BalanceChange};
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Writer for append-only audit entries
pub struct AuditLogger {
    store: Arc<Storage>,
}

impl AuditLogger {
    /// Create a logger over the shared store
    pub fn new(store: Arc<Storage>) -> Self {
        Self { store }
    }

    /// Record an action with explicit before/after snapshots
    pub fn record(
        &self,
        action: &str,
        table_name: &str,
        record_id: Uuid,
        old_values: serde_json::Value,
        new_values: serde_json::Value,
        changed_by: Option<Uuid>,
    ) -> Result<AuditLogEntry> {
        let entry = AuditLogEntry {
            id: Uuid::new_v4(),
            action: action.to_string(),
            table_name: table_name.to_string(),
            record_id,
            old_values,
            new_values,
            changed_by,
            changed_by_system: changed_by.is_none(),
            created_at: Utc::now(),
        };

        self.store.append_audit(&entry)?;
        Ok(entry)
    }

    /// Record the balance movements of one committed operation
    pub fn record_balances(
        &self,
        action: &str,
        table_name: &str,
        record_id: Uuid,
        changes: &[BalanceChange],
        changed_by: Option<Uuid>,
    ) -> Result<AuditLogEntry> {
        let (old_values, new_values) = Self::snapshots(changes);
        self.record(action, table_name, record_id, old_values, new_values, changed_by)
    }

    fn snapshots(changes: &[BalanceChange]) -> (serde_json::Value, serde_json::Value) {
        let mut old = serde_json::Map::new();
        let mut new = serde_json::Map::new();

        for change in changes {
            old.insert(
                change.account.clone(),
                serde_json::json!({
                    "balance": change.before.to_string(),
                    "currency": change.currency.code(),
                }),
            );
            new.insert(
                change.account.clone(),
                serde_json::json!({
                    "balance": change.after.to_string(),
                    "currency": change.currency.code(),
                }),
            );
        }

        (
            serde_json::Value::Object(old),
            serde_json::Value::Object(new),
        )
    }
}
