// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Payment attempt ledger.
//!
//! Status only moves forward along a fixed graph, and every move goes through
//! [`PaymentLedger::compare_and_set`]. Callbacks, polls and the reconciler all
//! share that primitive, so concurrent reports for the same order resolve to
//! exactly one applied transition.

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{composite_key, key_prefix, key_prefix_end, Store, StoreError, StoreResult};
use crate::models::BillingCycle;

/// Primary record: `order_id -> PaymentAttempt` (JSON).
pub(super) const PAYMENT_ATTEMPTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("payment_attempts");

/// Append-only history: `order_id | seq_be -> PaymentTransition` (JSON).
pub(super) const PAYMENT_TRANSITIONS: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("payment_transitions");

/// `user_id | order_id -> ()`.
pub(super) const USER_PAYMENT_INDEX: TableDefinition<&[u8], ()> =
    TableDefinition::new("user_payment_index");

/// Bound on optimistic retries in [`PaymentLedger::advance`].
const MAX_ADVANCE_ATTEMPTS: usize = 8;

/// Payment attempt lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Attempt recorded, gateway not yet confirmed the order.
    Created,
    /// Gateway accepted the order; waiting for the outcome.
    Processing,
    /// Gateway confirmed payment.
    Succeeded,
    /// Gateway reported failure, or rejected the order.
    Failed,
    /// A succeeded payment was refunded.
    Refunded,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 5] = [
        PaymentStatus::Created,
        PaymentStatus::Processing,
        PaymentStatus::Succeeded,
        PaymentStatus::Failed,
        PaymentStatus::Refunded,
    ];

    /// Whether `self -> next` is an edge of the forward graph.
    ///
    /// `created -> succeeded` exists because a callback may land before the
    /// order-creation call records `processing`.
    pub fn can_advance_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Created, Processing)
                | (Created, Succeeded)
                | (Created, Failed)
                | (Processing, Succeeded)
                | (Processing, Failed)
                | (Succeeded, Refunded)
        )
    }

    /// No further gateway outcome is expected.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PaymentStatus::Succeeded | PaymentStatus::Failed | PaymentStatus::Refunded
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Created => "created",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What caused a status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransitionSource {
    /// Order creation against the gateway.
    Checkout,
    /// Signed server-to-server callback.
    Callback,
    /// Client-driven or reconciler status poll.
    Poll,
}

/// Persisted payment attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PaymentAttempt {
    /// Merchant-side order identifier (unique, also the gateway's merchant transaction id).
    pub order_id: String,
    pub user_id: String,
    /// Amount in minor units (paise).
    pub amount_minor_units: u64,
    pub currency: String,
    pub plan_slug: String,
    pub billing_cycle: BillingCycle,
    pub status: PaymentStatus,
    /// Gateway-side transaction id, once reported.
    #[serde(default)]
    pub gateway_transaction_id: Option<String>,
    /// Hosted checkout URL returned when the gateway accepted the order.
    #[serde(default)]
    pub redirect_url: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_transition_at: DateTime<Utc>,
}

impl PaymentAttempt {
    pub fn new(
        order_id: impl Into<String>,
        user_id: impl Into<String>,
        amount_minor_units: u64,
        plan_slug: impl Into<String>,
        billing_cycle: BillingCycle,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            user_id: user_id.into(),
            amount_minor_units,
            currency: crate::models::CURRENCY.to_string(),
            plan_slug: plan_slug.into(),
            billing_cycle,
            status: PaymentStatus::Created,
            gateway_transaction_id: None,
            redirect_url: None,
            failure_reason: None,
            created_at: now,
            last_transition_at: now,
        }
    }
}

/// One row of an attempt's transition history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PaymentTransition {
    pub order_id: String,
    pub seq: u32,
    pub from: PaymentStatus,
    pub to: PaymentStatus,
    pub source: TransitionSource,
    #[serde(default)]
    pub gateway_transaction_id: Option<String>,
    pub at: DateTime<Utc>,
}

/// Requested move plus the data that travels with it.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub next: PaymentStatus,
    pub source: TransitionSource,
    pub gateway_transaction_id: Option<String>,
    pub redirect_url: Option<String>,
    pub failure_reason: Option<String>,
}

impl StatusUpdate {
    pub fn new(next: PaymentStatus, source: TransitionSource) -> Self {
        Self {
            next,
            source,
            gateway_transaction_id: None,
            redirect_url: None,
            failure_reason: None,
        }
    }

    pub fn with_gateway_transaction_id(mut self, id: Option<String>) -> Self {
        self.gateway_transaction_id = id;
        self
    }

    pub fn with_redirect_url(mut self, url: Option<String>) -> Self {
        self.redirect_url = url;
        self
    }

    pub fn with_failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }
}

/// Result of a conditional status update.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// The move was applied; carries the updated attempt.
    Applied(PaymentAttempt),
    /// Status did not match or the move is not forward; carries the current attempt.
    Unchanged(PaymentAttempt),
    NotFound,
}

impl TransitionOutcome {
    pub fn attempt(&self) -> Option<&PaymentAttempt> {
        match self {
            TransitionOutcome::Applied(attempt) | TransitionOutcome::Unchanged(attempt) => {
                Some(attempt)
            }
            TransitionOutcome::NotFound => None,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }
}

/// Repository over the payment tables.
pub struct PaymentLedger<'a> {
    store: &'a Store,
}

impl<'a> PaymentLedger<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Record a new attempt in `created`.
    pub fn insert_created(&self, attempt: &PaymentAttempt) -> StoreResult<()> {
        let json = serde_json::to_vec(attempt)?;
        let write_txn = self.store.db().begin_write()?;
        {
            let mut table = write_txn.open_table(PAYMENT_ATTEMPTS)?;
            if table.get(attempt.order_id.as_str())?.is_some() {
                return Err(StoreError::AlreadyExists(attempt.order_id.clone()));
            }
            table.insert(attempt.order_id.as_str(), json.as_slice())?;

            let mut index = write_txn.open_table(USER_PAYMENT_INDEX)?;
            let key = composite_key(&attempt.user_id, attempt.order_id.as_bytes());
            index.insert(key.as_slice(), ())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, order_id: &str) -> StoreResult<Option<PaymentAttempt>> {
        let read_txn = self.store.db().begin_read()?;
        let table = read_txn.open_table(PAYMENT_ATTEMPTS)?;
        match table.get(order_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Apply `expected -> update.next` only if the attempt is currently in
    /// `expected` and the move is forward. Attempt row and history row are
    /// written in the same transaction.
    pub fn compare_and_set(
        &self,
        order_id: &str,
        expected: PaymentStatus,
        update: StatusUpdate,
        now: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome> {
        let write_txn = self.store.db().begin_write()?;
        let outcome = {
            let mut table = write_txn.open_table(PAYMENT_ATTEMPTS)?;
            let existing = match table.get(order_id)? {
                Some(value) => value.value().to_vec(),
                None => return Ok(TransitionOutcome::NotFound),
            };
            let mut attempt: PaymentAttempt = serde_json::from_slice(&existing)?;

            if attempt.status != expected || !expected.can_advance_to(update.next) {
                TransitionOutcome::Unchanged(attempt)
            } else {
                attempt.status = update.next;
                attempt.last_transition_at = now;
                if update.gateway_transaction_id.is_some() {
                    attempt.gateway_transaction_id = update.gateway_transaction_id.clone();
                }
                if update.redirect_url.is_some() {
                    attempt.redirect_url = update.redirect_url;
                }
                if update.failure_reason.is_some() {
                    attempt.failure_reason = update.failure_reason;
                }
                table.insert(order_id, serde_json::to_vec(&attempt)?.as_slice())?;

                let mut history = write_txn.open_table(PAYMENT_TRANSITIONS)?;
                let prefix = key_prefix(order_id);
                let prefix_end = key_prefix_end(order_id);
                let seq = history
                    .range(prefix.as_slice()..prefix_end.as_slice())?
                    .count() as u32;
                let transition = PaymentTransition {
                    order_id: order_id.to_string(),
                    seq,
                    from: expected,
                    to: update.next,
                    source: update.source,
                    gateway_transaction_id: update.gateway_transaction_id,
                    at: now,
                };
                let key = composite_key(order_id, &seq.to_be_bytes());
                history.insert(key.as_slice(), serde_json::to_vec(&transition)?.as_slice())?;

                TransitionOutcome::Applied(attempt)
            }
        };

        if outcome.is_applied() {
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }
        Ok(outcome)
    }

    /// Move the attempt to `update.next` from whatever status it is in now,
    /// if that is a forward move. Retries when another writer changed the
    /// status between the read and the conditional write.
    pub fn advance(
        &self,
        order_id: &str,
        update: StatusUpdate,
        now: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome> {
        for _ in 0..MAX_ADVANCE_ATTEMPTS {
            let current = match self.get(order_id)? {
                Some(attempt) => attempt,
                None => return Ok(TransitionOutcome::NotFound),
            };
            if !current.status.can_advance_to(update.next) {
                return Ok(TransitionOutcome::Unchanged(current));
            }

            match self.compare_and_set(order_id, current.status, update.clone(), now)? {
                TransitionOutcome::Unchanged(latest) if latest.status != current.status => {
                    continue;
                }
                outcome => return Ok(outcome),
            }
        }

        match self.get(order_id)? {
            Some(attempt) => Ok(TransitionOutcome::Unchanged(attempt)),
            None => Ok(TransitionOutcome::NotFound),
        }
    }

    /// All attempts of a user, newest first.
    pub fn list_by_user(&self, user_id: &str) -> StoreResult<Vec<PaymentAttempt>> {
        let read_txn = self.store.db().begin_read()?;
        let index = read_txn.open_table(USER_PAYMENT_INDEX)?;
        let attempts = read_txn.open_table(PAYMENT_ATTEMPTS)?;

        let prefix = key_prefix(user_id);
        let prefix_end = key_prefix_end(user_id);
        let mut results = Vec::new();
        for entry in index.range(prefix.as_slice()..prefix_end.as_slice())? {
            let (key, _) = entry?;
            let Some(order_bytes) = key.value().get(prefix.len()..) else {
                continue;
            };
            let Ok(order_id) = std::str::from_utf8(order_bytes) else {
                continue;
            };
            if let Some(value) = attempts.get(order_id)? {
                results.push(serde_json::from_slice::<PaymentAttempt>(value.value())?);
            }
        }

        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(results)
    }

    /// Non-terminal attempts whose last transition is at or before `older_than`.
    pub fn list_unsettled(&self, older_than: DateTime<Utc>) -> StoreResult<Vec<PaymentAttempt>> {
        let read_txn = self.store.db().begin_read()?;
        let table = read_txn.open_table(PAYMENT_ATTEMPTS)?;

        let mut results = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            let attempt: PaymentAttempt = serde_json::from_slice(value.value())?;
            if !attempt.status.is_terminal() && attempt.last_transition_at <= older_than {
                results.push(attempt);
            }
        }

        results.sort_by(|a, b| a.last_transition_at.cmp(&b.last_transition_at));
        Ok(results)
    }

    /// Transition history in application order.
    pub fn transitions(&self, order_id: &str) -> StoreResult<Vec<PaymentTransition>> {
        let read_txn = self.store.db().begin_read()?;
        let history = read_txn.open_table(PAYMENT_TRANSITIONS)?;

        let prefix = key_prefix(order_id);
        let prefix_end = key_prefix_end(order_id);
        let mut results = Vec::new();
        for entry in history.range(prefix.as_slice()..prefix_end.as_slice())? {
            let (_, value) = entry?;
            results.push(serde_json::from_slice(value.value())?);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::storage::temp_store;

    fn attempt(order_id: &str, user_id: &str, now: DateTime<Utc>) -> PaymentAttempt {
        PaymentAttempt::new(order_id, user_id, 84_900, "basic", BillingCycle::Monthly, now)
    }

    #[test]
    fn forward_graph_is_exactly_the_allowed_edges() {
        use PaymentStatus::*;
        let allowed = [
            (Created, Processing),
            (Created, Succeeded),
            (Created, Failed),
            (Processing, Succeeded),
            (Processing, Failed),
            (Succeeded, Refunded),
        ];
        for from in PaymentStatus::ALL {
            for to in PaymentStatus::ALL {
                assert_eq!(
                    from.can_advance_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn insert_rejects_duplicate_order_id() {
        let (store, _dir) = temp_store();
        let ledger = PaymentLedger::new(&store);
        let now = Utc::now();

        ledger.insert_created(&attempt("ord-1", "user-a", now)).unwrap();
        let err = ledger
            .insert_created(&attempt("ord-1", "user-b", now))
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(id) if id == "ord-1"));

        let stored = ledger.get("ord-1").unwrap().unwrap();
        assert_eq!(stored.user_id, "user-a");
    }

    #[test]
    fn compare_and_set_applies_once_and_records_history() {
        let (store, _dir) = temp_store();
        let ledger = PaymentLedger::new(&store);
        let now = Utc::now();
        ledger.insert_created(&attempt("ord-1", "user-a", now)).unwrap();

        let update = StatusUpdate::new(PaymentStatus::Succeeded, TransitionSource::Callback)
            .with_gateway_transaction_id(Some("T123".into()));
        let first = ledger
            .compare_and_set("ord-1", PaymentStatus::Created, update.clone(), now)
            .unwrap();
        assert!(first.is_applied());
        assert_eq!(
            first.attempt().unwrap().gateway_transaction_id.as_deref(),
            Some("T123")
        );

        let second = ledger
            .compare_and_set("ord-1", PaymentStatus::Created, update, now)
            .unwrap();
        assert!(matches!(second, TransitionOutcome::Unchanged(ref a) if a.status == PaymentStatus::Succeeded));

        let history = ledger.transitions("ord-1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from, PaymentStatus::Created);
        assert_eq!(history[0].to, PaymentStatus::Succeeded);
        assert_eq!(history[0].source, TransitionSource::Callback);
    }

    #[test]
    fn backward_moves_are_rejected() {
        let (store, _dir) = temp_store();
        let ledger = PaymentLedger::new(&store);
        let now = Utc::now();
        ledger.insert_created(&attempt("ord-1", "user-a", now)).unwrap();
        ledger
            .advance(
                "ord-1",
                StatusUpdate::new(PaymentStatus::Failed, TransitionSource::Poll),
                now,
            )
            .unwrap();

        let outcome = ledger
            .advance(
                "ord-1",
                StatusUpdate::new(PaymentStatus::Succeeded, TransitionSource::Callback),
                now,
            )
            .unwrap();
        assert!(matches!(outcome, TransitionOutcome::Unchanged(ref a) if a.status == PaymentStatus::Failed));
    }

    #[test]
    fn advance_walks_from_current_status() {
        let (store, _dir) = temp_store();
        let ledger = PaymentLedger::new(&store);
        let now = Utc::now();
        ledger.insert_created(&attempt("ord-1", "user-a", now)).unwrap();

        for next in [PaymentStatus::Processing, PaymentStatus::Succeeded, PaymentStatus::Refunded] {
            let outcome = ledger
                .advance("ord-1", StatusUpdate::new(next, TransitionSource::Poll), now)
                .unwrap();
            assert!(outcome.is_applied(), "advance to {next}");
        }

        let seqs: Vec<u32> = ledger
            .transitions("ord-1")
            .unwrap()
            .iter()
            .map(|t| t.seq)
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn unknown_order_is_not_found() {
        let (store, _dir) = temp_store();
        let ledger = PaymentLedger::new(&store);
        let outcome = ledger
            .advance(
                "missing",
                StatusUpdate::new(PaymentStatus::Succeeded, TransitionSource::Callback),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(outcome, TransitionOutcome::NotFound);
    }

    #[test]
    fn list_by_user_is_newest_first_and_scoped() {
        let (store, _dir) = temp_store();
        let ledger = PaymentLedger::new(&store);
        let now = Utc::now();
        ledger.insert_created(&attempt("ord-old", "user-a", now - Duration::hours(2))).unwrap();
        ledger.insert_created(&attempt("ord-new", "user-a", now)).unwrap();
        ledger.insert_created(&attempt("ord-other", "user-ab", now)).unwrap();

        let ids: Vec<String> = ledger
            .list_by_user("user-a")
            .unwrap()
            .into_iter()
            .map(|a| a.order_id)
            .collect();
        assert_eq!(ids, vec!["ord-new".to_string(), "ord-old".to_string()]);
    }

    #[test]
    fn list_unsettled_respects_grace_window_and_status() {
        let (store, _dir) = temp_store();
        let ledger = PaymentLedger::new(&store);
        let now = Utc::now();
        let old = now - Duration::minutes(10);
        ledger.insert_created(&attempt("ord-stale", "user-a", old)).unwrap();
        ledger.insert_created(&attempt("ord-fresh", "user-a", now)).unwrap();
        ledger.insert_created(&attempt("ord-done", "user-a", old)).unwrap();
        ledger
            .compare_and_set(
                "ord-done",
                PaymentStatus::Created,
                StatusUpdate::new(PaymentStatus::Failed, TransitionSource::Poll),
                old,
            )
            .unwrap();

        let ids: Vec<String> = ledger
            .list_unsettled(now - Duration::minutes(1))
            .unwrap()
            .into_iter()
            .map(|a| a.order_id)
            .collect();
        assert_eq!(ids, vec!["ord-stale".to_string()]);
    }

    #[test]
    fn concurrent_reports_apply_exactly_one_transition() {
        let (store, _dir) = temp_store();
        let now = Utc::now();
        PaymentLedger::new(&store)
            .insert_created(&attempt("ord-race", "user-a", now))
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let next = if i % 2 == 0 {
                        PaymentStatus::Succeeded
                    } else {
                        PaymentStatus::Failed
                    };
                    PaymentLedger::new(&store)
                        .advance("ord-race", StatusUpdate::new(next, TransitionSource::Poll), now)
                        .unwrap()
                        .is_applied()
                })
            })
            .collect();

        let applied = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|applied| *applied)
            .count();
        assert_eq!(applied, 1);
        assert_eq!(PaymentLedger::new(&store).transitions("ord-race").unwrap().len(), 1);
    }
}
