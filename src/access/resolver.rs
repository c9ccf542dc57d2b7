// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::routes::RouteId;
use crate::subscription::EntitlementState;

/// Everything the gate knows about the caller, already resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct IdentityFacts {
    pub authenticated: bool,
    pub onboarding_completed: bool,
    pub entitlement: EntitlementState,
}

impl IdentityFacts {
    pub fn anonymous() -> Self {
        Self {
            authenticated: false,
            onboarding_completed: false,
            entitlement: EntitlementState::None,
        }
    }
}

/// Which precedence rule produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AccessReason {
    PublicRoute,
    Unauthenticated,
    OnboardingIncomplete,
    EntitlementRequired,
    /// Entitled user sent back from a step they already finished.
    StepCompleted,
    Entitled,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AccessDecision {
    pub allow: bool,
    /// Set exactly when `allow` is false.
    #[schema(value_type = Option<String>, example = "/paywall")]
    pub redirect_to: Option<RouteId>,
    pub reason: AccessReason,
}

impl AccessDecision {
    fn allow(reason: AccessReason) -> Self {
        Self {
            allow: true,
            redirect_to: None,
            reason,
        }
    }

    fn redirect(to: RouteId, reason: AccessReason) -> Self {
        Self {
            allow: false,
            redirect_to: Some(to),
            reason,
        }
    }
}

/// Decide whether `route` may be shown to a caller described by `facts`.
///
/// Rules are evaluated in a fixed order and the first match wins:
///
/// 1. public routes are always allowed
/// 2. anonymous callers go to the landing page
/// 3. until onboarding is complete only the onboarding page is allowed
/// 4. without entitlement only the paywall and checkout pages are allowed
/// 5. entitled callers may use the app, but onboarding and the paywall send
///    them to the dashboard
/// 6. anything else goes to the dashboard
pub fn resolve(facts: &IdentityFacts, route: &RouteId) -> AccessDecision {
    if route.is_public() {
        return AccessDecision::allow(AccessReason::PublicRoute);
    }

    if !facts.authenticated {
        return AccessDecision::redirect(RouteId::Landing, AccessReason::Unauthenticated);
    }

    if !facts.onboarding_completed {
        return match route {
            RouteId::Onboarding => AccessDecision::allow(AccessReason::OnboardingIncomplete),
            _ => AccessDecision::redirect(RouteId::Onboarding, AccessReason::OnboardingIncomplete),
        };
    }

    if !facts.entitlement.is_entitled() {
        return if route.is_checkout_flow() {
            AccessDecision::allow(AccessReason::EntitlementRequired)
        } else {
            AccessDecision::redirect(RouteId::Paywall, AccessReason::EntitlementRequired)
        };
    }

    match route {
        RouteId::Onboarding | RouteId::Paywall => {
            AccessDecision::redirect(RouteId::Dashboard, AccessReason::StepCompleted)
        }
        route if route.is_application() => AccessDecision::allow(AccessReason::Entitled),
        _ => AccessDecision::redirect(RouteId::Dashboard, AccessReason::Fallback),
    }
}
