// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Subscription rows and the per-order credit ledger.
//!
//! A subscription is extended at most once per order id: the credit record
//! and the subscription row are written in the same transaction.

use chrono::{DateTime, Duration, Utc};
use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{PaymentAttempt, Store, StoreError, StoreResult};
use crate::models::BillingCycle;

/// `user_id -> StoredSubscription` (JSON).
pub(super) const SUBSCRIPTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("subscriptions");

/// `order_id -> SubscriptionCredit` (JSON).
pub(super) const SUBSCRIPTION_CREDITS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("subscription_credits");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    Expired,
    Canceled,
}

/// Where the current period came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionSource {
    Payment,
    /// Provisioned by an operator (trials, support grants).
    Manual,
}

/// Persisted subscription record, one per user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StoredSubscription {
    pub user_id: String,
    pub plan_slug: String,
    pub billing_cycle: BillingCycle,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    #[serde(default)]
    pub trial_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub canceled_at: Option<DateTime<Utc>>,
    pub source: SubscriptionSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredSubscription {
    /// Active or trialing with a period that has not ended yet.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.status,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing
        ) && self.current_period_end >= now
    }

    /// Running status whose period has ended.
    pub fn needs_expiry(&self, now: DateTime<Utc>) -> bool {
        self.lapsed_status(now).is_some()
    }

    /// Status after lazy expiry, if the period has lapsed.
    fn lapsed_status(&self, now: DateTime<Utc>) -> Option<SubscriptionStatus> {
        let running = matches!(
            self.status,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing
        );
        if !running || self.current_period_end >= now {
            return None;
        }
        if self.cancel_at_period_end {
            Some(SubscriptionStatus::Canceled)
        } else {
            Some(SubscriptionStatus::Expired)
        }
    }
}

/// One credited order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SubscriptionCredit {
    pub order_id: String,
    pub user_id: String,
    pub plan_slug: String,
    pub billing_cycle: BillingCycle,
    pub days: i64,
    /// Window this order paid for. Shifted earlier when an order credited
    /// before it is refunded.
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub credited_at: DateTime<Utc>,
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CreditOutcome {
    Credited(StoredSubscription),
    /// The order id was credited before; nothing changed.
    AlreadyCredited,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RevokeOutcome {
    Revoked(StoredSubscription),
    AlreadyRevoked,
    /// Nothing was credited for this order id.
    NotCredited,
}

/// Repository over the subscription tables.
pub struct SubscriptionStore<'a> {
    store: &'a Store,
}

impl<'a> SubscriptionStore<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn get(&self, user_id: &str) -> StoreResult<Option<StoredSubscription>> {
        let read_txn = self.store.db().begin_read()?;
        let table = read_txn.open_table(SUBSCRIPTIONS)?;
        match table.get(user_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_credit(&self, order_id: &str) -> StoreResult<Option<SubscriptionCredit>> {
        let read_txn = self.store.db().begin_read()?;
        let table = read_txn.open_table(SUBSCRIPTION_CREDITS)?;
        match table.get(order_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Extend the user's subscription by one billing period for `order_id`.
    ///
    /// A live period is extended from its end; otherwise a new period starts
    /// at `now`.
    pub fn credit(&self, attempt: &PaymentAttempt, now: DateTime<Utc>) -> StoreResult<CreditOutcome> {
        let order_id = attempt.order_id.as_str();
        let user_id = attempt.user_id.as_str();
        let plan_slug = attempt.plan_slug.as_str();
        let billing_cycle = attempt.billing_cycle;

        let write_txn = self.store.db().begin_write()?;
        let outcome = {
            let mut credits = write_txn.open_table(SUBSCRIPTION_CREDITS)?;
            if credits.get(order_id)?.is_some() {
                CreditOutcome::AlreadyCredited
            } else {
                let mut subs = write_txn.open_table(SUBSCRIPTIONS)?;
                let existing = subs.get(user_id)?.map(|value| value.value().to_vec());
                let existing: Option<StoredSubscription> = match existing {
                    Some(bytes) => Some(serde_json::from_slice(&bytes)?),
                    None => None,
                };

                let days = billing_cycle.period_days();
                let extension = Duration::days(days);
                let window_start = match &existing {
                    Some(sub) if sub.is_live_at(now) => sub.current_period_end,
                    _ => now,
                };
                let updated = match existing {
                    Some(mut sub) => {
                        if !sub.is_live_at(now) {
                            sub.current_period_start = now;
                        }
                        sub.current_period_end = window_start + extension;
                        sub.plan_slug = plan_slug.to_string();
                        sub.billing_cycle = billing_cycle;
                        sub.status = SubscriptionStatus::Active;
                        sub.cancel_at_period_end = false;
                        sub.canceled_at = None;
                        sub.source = SubscriptionSource::Payment;
                        sub.updated_at = now;
                        sub
                    }
                    None => StoredSubscription {
                        user_id: user_id.to_string(),
                        plan_slug: plan_slug.to_string(),
                        billing_cycle,
                        status: SubscriptionStatus::Active,
                        current_period_start: now,
                        current_period_end: now + extension,
                        trial_end: None,
                        cancel_at_period_end: false,
                        canceled_at: None,
                        source: SubscriptionSource::Payment,
                        created_at: now,
                        updated_at: now,
                    },
                };

                let credit = SubscriptionCredit {
                    order_id: order_id.to_string(),
                    user_id: user_id.to_string(),
                    plan_slug: plan_slug.to_string(),
                    billing_cycle,
                    days,
                    period_start: window_start,
                    period_end: window_start + extension,
                    credited_at: now,
                    revoked_at: None,
                };
                subs.insert(user_id, serde_json::to_vec(&updated)?.as_slice())?;
                credits.insert(order_id, serde_json::to_vec(&credit)?.as_slice())?;
                CreditOutcome::Credited(updated)
            }
        };

        match outcome {
            CreditOutcome::Credited(_) => write_txn.commit()?,
            CreditOutcome::AlreadyCredited => write_txn.abort()?,
        }
        Ok(outcome)
    }

    /// Take back the period granted for the attempt's order (refund path).
    ///
    /// When the order was never credited a revoked tombstone is recorded, so
    /// a late credit for the same order is a no-op.
    pub fn revoke(&self, attempt: &PaymentAttempt, now: DateTime<Utc>) -> StoreResult<RevokeOutcome> {
        let order_id = attempt.order_id.as_str();
        let write_txn = self.store.db().begin_write()?;
        let outcome = {
            let mut credits = write_txn.open_table(SUBSCRIPTION_CREDITS)?;
            let existing = credits.get(order_id)?.map(|value| value.value().to_vec());

            match existing {
                None => {
                    let tombstone = SubscriptionCredit {
                        order_id: order_id.to_string(),
                        user_id: attempt.user_id.clone(),
                        plan_slug: attempt.plan_slug.clone(),
                        billing_cycle: attempt.billing_cycle,
                        days: 0,
                        period_start: now,
                        period_end: now,
                        credited_at: now,
                        revoked_at: Some(now),
                    };
                    credits.insert(order_id, serde_json::to_vec(&tombstone)?.as_slice())?;
                    RevokeOutcome::NotCredited
                }
                Some(bytes) => {
                    let mut credit: SubscriptionCredit = serde_json::from_slice(&bytes)?;
                    if credit.revoked_at.is_some() {
                        RevokeOutcome::AlreadyRevoked
                    } else {
                        credit.revoked_at = Some(now);
                        credits.insert(order_id, serde_json::to_vec(&credit)?.as_slice())?;

                        let mut subs = write_txn.open_table(SUBSCRIPTIONS)?;
                        let sub_bytes = subs
                            .get(credit.user_id.as_str())?
                            .map(|value| value.value().to_vec());
                        match sub_bytes {
                            Some(bytes) => {
                                let mut sub: StoredSubscription = serde_json::from_slice(&bytes)?;
                                let removed = overlap(
                                    (credit.period_start, credit.period_end),
                                    (sub.current_period_start, sub.current_period_end),
                                );
                                if removed > Duration::zero() {
                                    sub.current_period_end -= removed;
                                    if sub.current_period_end < now {
                                        sub.status = SubscriptionStatus::Expired;
                                    }
                                    sub.updated_at = now;
                                    subs.insert(
                                        credit.user_id.as_str(),
                                        serde_json::to_vec(&sub)?.as_slice(),
                                    )?;

                                    // Periods stacked after the refunded one move up.
                                    let mut later = Vec::new();
                                    for entry in credits.iter()? {
                                        let (_, value) = entry?;
                                        let other: SubscriptionCredit =
                                            serde_json::from_slice(value.value())?;
                                        if other.user_id == credit.user_id
                                            && other.revoked_at.is_none()
                                            && other.period_start >= credit.period_end
                                        {
                                            later.push(other);
                                        }
                                    }
                                    for mut other in later {
                                        other.period_start -= removed;
                                        other.period_end -= removed;
                                        credits.insert(
                                            other.order_id.as_str(),
                                            serde_json::to_vec(&other)?.as_slice(),
                                        )?;
                                    }
                                }
                                RevokeOutcome::Revoked(sub)
                            }
                            None => RevokeOutcome::NotCredited,
                        }
                    }
                }
            }
        };

        match outcome {
            RevokeOutcome::AlreadyRevoked => write_txn.abort()?,
            _ => write_txn.commit()?,
        }
        Ok(outcome)
    }

    /// Persist lazy expiry. The lapse check and the write happen in the same
    /// write transaction.
    pub fn expire_if_lapsed(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<StoredSubscription>> {
        let write_txn = self.store.db().begin_write()?;
        let (sub, changed) = {
            let mut subs = write_txn.open_table(SUBSCRIPTIONS)?;
            let bytes = match subs.get(user_id)? {
                Some(value) => value.value().to_vec(),
                None => return Ok(None),
            };
            let mut sub: StoredSubscription = serde_json::from_slice(&bytes)?;
            match sub.lapsed_status(now) {
                Some(status) => {
                    sub.status = status;
                    sub.updated_at = now;
                    subs.insert(user_id, serde_json::to_vec(&sub)?.as_slice())?;
                    (sub, true)
                }
                None => (sub, false),
            }
        };

        if changed {
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }
        Ok(Some(sub))
    }

    /// Start (or restart) a trial unless a paid period is still running.
    pub fn start_trial(
        &self,
        user_id: &str,
        plan_slug: &str,
        billing_cycle: BillingCycle,
        trial_days: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<StoredSubscription> {
        let trial_end = now + Duration::days(trial_days);
        let updated = self.modify(user_id, |existing| {
            let sub = match existing {
                Some(sub) if sub.is_live_at(now) && sub.status == SubscriptionStatus::Active => sub,
                Some(mut sub) => {
                    sub.plan_slug = plan_slug.to_string();
                    sub.billing_cycle = billing_cycle;
                    sub.status = SubscriptionStatus::Trialing;
                    sub.current_period_start = now;
                    sub.current_period_end = trial_end;
                    sub.trial_end = Some(trial_end);
                    sub.cancel_at_period_end = false;
                    sub.canceled_at = None;
                    sub.source = SubscriptionSource::Manual;
                    sub.updated_at = now;
                    sub
                }
                None => StoredSubscription {
                    user_id: user_id.to_string(),
                    plan_slug: plan_slug.to_string(),
                    billing_cycle,
                    status: SubscriptionStatus::Trialing,
                    current_period_start: now,
                    current_period_end: trial_end,
                    trial_end: Some(trial_end),
                    cancel_at_period_end: false,
                    canceled_at: None,
                    source: SubscriptionSource::Manual,
                    created_at: now,
                    updated_at: now,
                },
            };
            Some(sub)
        })?;
        updated.ok_or_else(|| StoreError::NotFound(user_id.to_string()))
    }

    /// Cancel now, or flag cancellation at the end of the current period.
    pub fn cancel(
        &self,
        user_id: &str,
        at_period_end: bool,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<StoredSubscription>> {
        self.modify(user_id, |existing| {
            existing.map(|mut sub| {
                if at_period_end && sub.is_live_at(now) {
                    sub.cancel_at_period_end = true;
                } else {
                    sub.status = SubscriptionStatus::Canceled;
                    sub.current_period_end = sub.current_period_end.min(now);
                }
                sub.canceled_at = Some(now);
                sub.updated_at = now;
                sub
            })
        })
    }

    /// Read-modify-write of one subscription row in a single transaction.
    /// Returning `None` from `f` leaves the table untouched.
    fn modify<F>(&self, user_id: &str, f: F) -> StoreResult<Option<StoredSubscription>>
    where
        F: FnOnce(Option<StoredSubscription>) -> Option<StoredSubscription>,
    {
        let write_txn = self.store.db().begin_write()?;
        let updated = {
            let mut subs = write_txn.open_table(SUBSCRIPTIONS)?;
            let existing = subs.get(user_id)?.map(|value| value.value().to_vec());
            let existing: Option<StoredSubscription> = match existing {
                Some(bytes) => Some(serde_json::from_slice(&bytes)?),
                None => None,
            };
            let updated = f(existing);
            if let Some(sub) = &updated {
                subs.insert(user_id, serde_json::to_vec(sub)?.as_slice())?;
            }
            updated
        };
        write_txn.commit()?;
        Ok(updated)
    }
}

/// Length of the intersection of two time windows.
fn overlap(a: (DateTime<Utc>, DateTime<Utc>), b: (DateTime<Utc>, DateTime<Utc>)) -> Duration {
    let start = a.0.max(b.0);
    let end = a.1.min(b.1);
    (end - start).max(Duration::zero())
}
