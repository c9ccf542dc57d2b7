// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::{
    models::BillingCycle,
    storage::{
        CreditOutcome, PaymentAttempt, PaymentStatus, RevokeOutcome, Store, StoreResult,
        StoredSubscription, SubscriptionStatus, SubscriptionStore,
    },
};

/// What the user is entitled to right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementState {
    None,
    Trialing,
    Active,
    Expired,
    Canceled,
}

impl EntitlementState {
    pub const ALL: [EntitlementState; 5] = [
        EntitlementState::None,
        EntitlementState::Trialing,
        EntitlementState::Active,
        EntitlementState::Expired,
        EntitlementState::Canceled,
    ];

    /// Grants access to protected routes.
    pub fn is_entitled(self) -> bool {
        matches!(self, EntitlementState::Active | EntitlementState::Trialing)
    }
}

/// Effect of settling a terminal payment attempt against the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    Credited,
    Revoked,
    /// Already applied earlier, or nothing to apply for this status.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SubscriptionSummary {
    pub entitlement: EntitlementState,
    pub subscription: Option<StoredSubscription>,
    /// Whole days until the current period ends; 0 once it has ended.
    pub days_until_expiry: i64,
}

#[derive(Clone)]
pub struct SubscriptionResolver {
    store: Arc<Store>,
}

impl SubscriptionResolver {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn resolve(&self, user_id: &str) -> StoreResult<EntitlementState> {
        self.resolve_at(user_id, Utc::now())
    }

    pub fn resolve_at(&self, user_id: &str, now: DateTime<Utc>) -> StoreResult<EntitlementState> {
        Ok(match self.current(user_id, now)? {
            Some(sub) => entitlement_of(&sub, now),
            None => EntitlementState::None,
        })
    }

    pub fn status_summary(&self, user_id: &str, now: DateTime<Utc>) -> StoreResult<SubscriptionSummary> {
        let subscription = self.current(user_id, now)?;
        let (entitlement, days_until_expiry) = match &subscription {
            Some(sub) => (
                entitlement_of(sub, now),
                (sub.current_period_end - now).num_days().max(0),
            ),
            None => (EntitlementState::None, 0),
        };
        Ok(SubscriptionSummary {
            entitlement,
            subscription,
            days_until_expiry,
        })
    }

    /// Apply a terminal attempt to the subscription. Safe to call repeatedly:
    /// a succeeded order is credited once, a refunded one revoked once.
    pub fn settle(&self, attempt: &PaymentAttempt, now: DateTime<Utc>) -> StoreResult<SettleOutcome> {
        let subs = SubscriptionStore::new(&self.store);
        match attempt.status {
            PaymentStatus::Succeeded => match subs.credit(attempt, now)? {
                CreditOutcome::Credited(sub) => {
                    info!(
                        order_id = %attempt.order_id,
                        user_id = %attempt.user_id,
                        plan = %attempt.plan_slug,
                        period_end = %sub.current_period_end,
                        "Subscription credited"
                    );
                    Ok(SettleOutcome::Credited)
                }
                CreditOutcome::AlreadyCredited => Ok(SettleOutcome::Unchanged),
            },
            PaymentStatus::Refunded => match subs.revoke(attempt, now)? {
                RevokeOutcome::Revoked(sub) => {
                    info!(
                        order_id = %attempt.order_id,
                        user_id = %attempt.user_id,
                        period_end = %sub.current_period_end,
                        "Subscription credit revoked"
                    );
                    Ok(SettleOutcome::Revoked)
                }
                RevokeOutcome::AlreadyRevoked | RevokeOutcome::NotCredited => {
                    Ok(SettleOutcome::Unchanged)
                }
            },
            _ => Ok(SettleOutcome::Unchanged),
        }
    }

    /// Operator-provisioned trial.
    pub fn grant_trial(
        &self,
        user_id: &str,
        plan_slug: &str,
        billing_cycle: BillingCycle,
        trial_days: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<StoredSubscription> {
        let sub = SubscriptionStore::new(&self.store).start_trial(
            user_id,
            plan_slug,
            billing_cycle,
            trial_days,
            now,
        )?;
        info!(user_id = %user_id, plan = %plan_slug, trial_days, status = ?sub.status, "Trial provisioned");
        Ok(sub)
    }

    pub fn cancel(
        &self,
        user_id: &str,
        at_period_end: bool,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<StoredSubscription>> {
        let sub = SubscriptionStore::new(&self.store).cancel(user_id, at_period_end, now)?;
        if sub.is_some() {
            info!(user_id = %user_id, at_period_end, "Subscription canceled");
        }
        Ok(sub)
    }

    /// Stored row with lazy expiry applied.
    fn current(&self, user_id: &str, now: DateTime<Utc>) -> StoreResult<Option<StoredSubscription>> {
        let subs = SubscriptionStore::new(&self.store);
        match subs.get(user_id)? {
            Some(sub) if sub.needs_expiry(now) => subs.expire_if_lapsed(user_id, now),
            other => Ok(other),
        }
    }
}

fn entitlement_of(sub: &StoredSubscription, now: DateTime<Utc>) -> EntitlementState {
    match sub.status {
        SubscriptionStatus::Active | SubscriptionStatus::Trialing if sub.current_period_end < now => {
            EntitlementState::Expired
        }
        SubscriptionStatus::Active => EntitlementState::Active,
        SubscriptionStatus::Trialing => EntitlementState::Trialing,
        SubscriptionStatus::Expired => EntitlementState::Expired,
        SubscriptionStatus::Canceled => EntitlementState::Canceled,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::storage::{temp_store, PaymentLedger, StatusUpdate, TransitionSource};

    fn succeeded(store: &Store, order_id: &str, user_id: &str, now: DateTime<Utc>) -> PaymentAttempt {
        let ledger = PaymentLedger::new(store);
        ledger
            .insert_created(&PaymentAttempt::new(
                order_id,
                user_id,
                84_900,
                "basic",
                BillingCycle::Monthly,
                now,
            ))
            .unwrap();
        ledger
            .advance(
                order_id,
                StatusUpdate::new(PaymentStatus::Succeeded, TransitionSource::Callback),
                now,
            )
            .unwrap()
            .attempt()
            .cloned()
            .unwrap()
    }

    #[test]
    fn unknown_user_has_no_entitlement() {
        let (store, _dir) = temp_store();
        let resolver = SubscriptionResolver::new(store);
        assert_eq!(resolver.resolve("nobody").unwrap(), EntitlementState::None);
    }

    #[test]
    fn settled_payment_grants_active() {
        let (store, _dir) = temp_store();
        let resolver = SubscriptionResolver::new(store.clone());
        let now = Utc::now();
        let attempt = succeeded(&store, "ord-1", "user-a", now);

        assert_eq!(resolver.settle(&attempt, now).unwrap(), SettleOutcome::Credited);
        assert_eq!(resolver.settle(&attempt, now).unwrap(), SettleOutcome::Unchanged);
        assert_eq!(resolver.resolve_at("user-a", now).unwrap(), EntitlementState::Active);
    }

    #[test]
    fn non_terminal_attempts_do_not_settle() {
        let (store, _dir) = temp_store();
        let resolver = SubscriptionResolver::new(store);
        let now = Utc::now();
        let attempt = PaymentAttempt::new("ord-1", "user-a", 84_900, "basic", BillingCycle::Monthly, now);

        assert_eq!(resolver.settle(&attempt, now).unwrap(), SettleOutcome::Unchanged);
        assert_eq!(resolver.resolve_at("user-a", now).unwrap(), EntitlementState::None);
    }

    #[test]
    fn lapsed_period_expires_lazily_and_persists() {
        let (store, _dir) = temp_store();
        let resolver = SubscriptionResolver::new(store.clone());
        let start = Utc::now();
        let attempt = succeeded(&store, "ord-1", "user-a", start);
        resolver.settle(&attempt, start).unwrap();

        let later = start + Duration::days(31);
        assert_eq!(resolver.resolve_at("user-a", later).unwrap(), EntitlementState::Expired);

        let stored = SubscriptionStore::new(&store).get("user-a").unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Expired);
    }

    #[test]
    fn refund_revokes_entitlement() {
        let (store, _dir) = temp_store();
        let resolver = SubscriptionResolver::new(store.clone());
        let now = Utc::now();
        let attempt = succeeded(&store, "ord-1", "user-a", now);
        resolver.settle(&attempt, now).unwrap();

        let refunded = PaymentLedger::new(&store)
            .advance(
                "ord-1",
                StatusUpdate::new(PaymentStatus::Refunded, TransitionSource::Callback),
                now,
            )
            .unwrap()
            .attempt()
            .cloned()
            .unwrap();
        let later = now + Duration::minutes(1);
        assert_eq!(resolver.settle(&refunded, later).unwrap(), SettleOutcome::Revoked);
        assert_eq!(resolver.resolve_at("user-a", later).unwrap(), EntitlementState::Expired);
    }

    #[test]
    fn trial_and_cancellation() {
        let (store, _dir) = temp_store();
        let resolver = SubscriptionResolver::new(store);
        let now = Utc::now();

        resolver
            .grant_trial("user-a", "premium", BillingCycle::Monthly, 7, now)
            .unwrap();
        assert_eq!(resolver.resolve_at("user-a", now).unwrap(), EntitlementState::Trialing);

        resolver.cancel("user-a", false, now).unwrap();
        assert_eq!(resolver.resolve_at("user-a", now).unwrap(), EntitlementState::Canceled);
        assert!(resolver.cancel("nobody", false, now).unwrap().is_none());
    }

    #[test]
    fn summary_reports_days_until_expiry() {
        let (store, _dir) = temp_store();
        let resolver = SubscriptionResolver::new(store.clone());
        let now = Utc::now();
        let attempt = succeeded(&store, "ord-1", "user-a", now);
        resolver.settle(&attempt, now).unwrap();

        let summary = resolver
            .status_summary("user-a", now + Duration::days(10))
            .unwrap();
        assert_eq!(summary.entitlement, EntitlementState::Active);
        assert_eq!(summary.days_until_expiry, 20);

        let empty = resolver.status_summary("nobody", now).unwrap();
        assert_eq!(empty.entitlement, EntitlementState::None);
        assert_eq!(empty.days_until_expiry, 0);
        assert!(empty.subscription.is_none());
    }

    #[test]
    fn entitlement_flags() {
        let entitled: Vec<_> = EntitlementState::ALL
            .into_iter()
            .filter(|state| state.is_entitled())
            .collect();
        assert_eq!(entitled, vec![EntitlementState::Trialing, EntitlementState::Active]);
    }
}
