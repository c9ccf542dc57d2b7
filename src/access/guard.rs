// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fact gathering in front of [`resolve`].
//!
//! The guard reads the three facts concurrently and feeds them to the
//! resolver only once every read has finished. A failed read fails the whole
//! check; the caller is never evaluated on partial facts.

use std::{future::Future, sync::Arc};

use chrono::Utc;
use tracing::debug;

use super::{
    resolver::{resolve, AccessDecision, IdentityFacts},
    routes::RouteId,
};
use crate::{
    auth::AuthenticatedUser,
    storage::{ProfileStore, Store, StoreError},
    subscription::{EntitlementState, SubscriptionResolver},
};

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("fact source unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Where the guard learns about the caller.
pub trait FactSource: Send + Sync {
    /// Whether the caller's session is still live.
    fn authenticated(
        &self,
        user: &AuthenticatedUser,
    ) -> impl Future<Output = Result<bool, GuardError>> + Send;

    fn onboarding_completed(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<bool, GuardError>> + Send;

    fn entitlement(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<EntitlementState, GuardError>> + Send;
}

/// Result of one guard evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardOutcome {
    pub facts: IdentityFacts,
    pub decision: AccessDecision,
    /// Where to go next. `None` when access is allowed or when the caller is
    /// already on the redirect target.
    pub navigate_to: Option<RouteId>,
}

impl GuardOutcome {
    pub fn new(facts: IdentityFacts, current: &RouteId) -> Self {
        let decision = resolve(&facts, current);
        let navigate_to = decision
            .redirect_to
            .clone()
            .filter(|target| target != current);
        Self {
            facts,
            decision,
            navigate_to,
        }
    }
}

pub struct AccessGuard<S> {
    source: S,
}

impl<S: FactSource> AccessGuard<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Gather all facts for `user`. Anonymous callers need no reads.
    pub async fn facts(&self, user: Option<&AuthenticatedUser>) -> Result<IdentityFacts, GuardError> {
        let Some(user) = user else {
            return Ok(IdentityFacts::anonymous());
        };

        let (authenticated, onboarding_completed, entitlement) = tokio::try_join!(
            self.source.authenticated(user),
            self.source.onboarding_completed(&user.user_id),
            self.source.entitlement(&user.user_id),
        )?;

        if !authenticated {
            return Ok(IdentityFacts::anonymous());
        }

        Ok(IdentityFacts {
            authenticated,
            onboarding_completed,
            entitlement,
        })
    }

    pub async fn check(
        &self,
        user: Option<&AuthenticatedUser>,
        current: &RouteId,
    ) -> Result<GuardOutcome, GuardError> {
        let facts = self.facts(user).await?;
        let outcome = GuardOutcome::new(facts, current);
        debug!(
            route = %current,
            allow = outcome.decision.allow,
            reason = ?outcome.decision.reason,
            navigate_to = ?outcome.navigate_to,
            "Access resolved"
        );
        Ok(outcome)
    }
}

/// Long-lived view of one caller, for consumers that observe fact changes
/// (for example a push channel). Resolves again only when the facts or the
/// route actually change.
#[derive(Debug, Default)]
pub struct GuardSession {
    last: Option<(IdentityFacts, RouteId)>,
}

impl GuardSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a fresh outcome when the inputs changed, `None` otherwise.
    pub fn observe(&mut self, facts: IdentityFacts, route: RouteId) -> Option<GuardOutcome> {
        if self
            .last
            .as_ref()
            .is_some_and(|(seen_facts, seen_route)| *seen_facts == facts && *seen_route == route)
        {
            return None;
        }
        let outcome = GuardOutcome::new(facts, &route);
        self.last = Some((facts, route));
        Some(outcome)
    }
}

/// Facts read from the local store. Entitlement is derived on every call.
#[derive(Clone)]
pub struct StoreFacts {
    store: Arc<Store>,
    subscriptions: SubscriptionResolver,
}

impl StoreFacts {
    pub fn new(store: Arc<Store>, subscriptions: SubscriptionResolver) -> Self {
        Self {
            store,
            subscriptions,
        }
    }
}

impl FactSource for StoreFacts {
    async fn authenticated(&self, user: &AuthenticatedUser) -> Result<bool, GuardError> {
        Ok(user.expires_at == 0 || user.expires_at > Utc::now().timestamp())
    }

    async fn onboarding_completed(&self, user_id: &str) -> Result<bool, GuardError> {
        let store = self.store.clone();
        let user_id = user_id.to_string();
        tokio::task::spawn_blocking(move || ProfileStore::new(&store).onboarding_completed(&user_id))
            .await
            .map_err(|e| GuardError::Unavailable(e.to_string()))?
            .map_err(GuardError::from)
    }

    async fn entitlement(&self, user_id: &str) -> Result<EntitlementState, GuardError> {
        let subscriptions = self.subscriptions.clone();
        let user_id = user_id.to_string();
        tokio::task::spawn_blocking(move || subscriptions.resolve(&user_id))
            .await
            .map_err(|e| GuardError::Unavailable(e.to_string()))?
            .map_err(GuardError::from)
    }
}
