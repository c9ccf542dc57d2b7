// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Embedded Store
//!
//! All durable state lives in a single redb database (pure Rust, ACID).
//! redb serialises write transactions, so every conditional update below is
//! a read-check-write inside one write transaction and cannot lose updates.
//!
//! ## Table Layout
//!
//! ```text
//! payment_attempts      order_id            -> PaymentAttempt (JSON)
//! payment_transitions   order_id | seq_be   -> PaymentTransition (JSON, append-only)
//! user_payment_index    user_id | order_id  -> ()
//! subscriptions         user_id             -> StoredSubscription (JSON)
//! subscription_credits  order_id            -> SubscriptionCredit (JSON)
//! profiles              user_id             -> StoredProfile (JSON)
//! ```
//!
//! Composite keys are length-prefixed so that no user or order id can be a
//! byte prefix of another.

use std::path::Path;

use redb::Database;

pub mod ledger;
pub mod profiles;
pub mod subscriptions;

pub use ledger::{
    PaymentAttempt, PaymentLedger, PaymentStatus, PaymentTransition, StatusUpdate,
    TransitionOutcome, TransitionSource,
};
pub use profiles::{ProfileStore, StoredProfile};
pub use subscriptions::{
    CreditOutcome, RevokeOutcome, StoredSubscription, SubscriptionCredit, SubscriptionSource,
    SubscriptionStatus, SubscriptionStore,
};

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("blocking store task failed: {0}")]
    Blocking(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Run store work on the blocking pool. redb commits fsync, so callers on
/// the async executor go through here.
pub async fn blocking<T, E, F>(f: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<StoreError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(e) => Err(StoreError::Blocking(e.to_string()).into()),
    }
}

// =============================================================================
// Store
// =============================================================================

/// Handle to the embedded database shared by all repositories.
pub struct Store {
    db: Database,
}

impl Store {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ledger::PAYMENT_ATTEMPTS)?;
            let _ = write_txn.open_table(ledger::PAYMENT_TRANSITIONS)?;
            let _ = write_txn.open_table(ledger::USER_PAYMENT_INDEX)?;
            let _ = write_txn.open_table(subscriptions::SUBSCRIPTIONS)?;
            let _ = write_txn.open_table(subscriptions::SUBSCRIPTION_CREDITS)?;
            let _ = write_txn.open_table(profiles::PROFILES)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    pub(crate) fn db(&self) -> &Database {
        &self.db
    }

    /// Liveness check used by the readiness endpoint.
    pub fn is_readable(&self) -> bool {
        use redb::ReadableDatabase;

        match self.db.begin_read() {
            Ok(txn) => txn.open_table(profiles::PROFILES).is_ok(),
            Err(_) => false,
        }
    }
}

// =============================================================================
// Composite Key Helpers
// =============================================================================

/// `len(head) as u32 BE | head | tail`.
pub(crate) fn composite_key(head: &str, tail: &[u8]) -> Vec<u8> {
    let mut key = key_prefix(head);
    key.extend_from_slice(tail);
    key
}

/// Prefix shared by every composite key with the given head.
pub(crate) fn key_prefix(head: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(4 + head.len());
    prefix.extend_from_slice(&(head.len() as u32).to_be_bytes());
    prefix.extend_from_slice(head.as_bytes());
    prefix
}

/// Upper bound for a range scan over one head.
pub(crate) fn key_prefix_end(head: &str) -> Vec<u8> {
    let mut end = key_prefix(head);
    end.extend_from_slice(&[0xFF; 64]);
    end
}

#[cfg(test)]
pub(crate) fn temp_store() -> (std::sync::Arc<Store>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(&dir.path().join("test.redb")).unwrap();
    (std::sync::Arc::new(store), dir)
}
