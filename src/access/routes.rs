// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Closed set of app routes the gate knows how to reason about.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Public pages. Anyone may see them whatever their state.
const LANDING: &[&str] = &["/", "/landing", "/home"];
const LEGAL: &[&str] = &["/legal", "/terms", "/privacy", "/refund-policy", "/contact"];
const SIGN_IN: &[&str] = &[
    "/login",
    "/signin",
    "/signup",
    "/auth",
    "/auth/callback",
    "/reset-password",
];
const PAYMENT_CALLBACK: &[&str] = &["/payments/callback", "/payment/callback", "/api/payments/callback"];
const ERROR_PAGE: &[&str] = &["/error", "/404", "/500"];

const ONBOARDING: &[&str] = &["/onboarding"];
const PAYWALL: &[&str] = &["/paywall", "/pricing", "/plans"];
const PAYMENT_INITIATION: &[&str] = &["/checkout", "/payment", "/payment/checkout"];
const PAYMENT_RESULT: &[&str] = &[
    "/payment/success",
    "/payment/failure",
    "/payment/status",
    "/payment/phonepe/success",
];
const DASHBOARD: &[&str] = &["/dashboard"];

/// Prefixes of in-app feature pages that sit behind the paywall.
const APPLICATION_PREFIXES: &[&str] = &[
    "/workout-dashboard",
    "/workout-activity",
    "/workouts",
    "/health-plan",
    "/health-plan-generation",
    "/health-assessment",
    "/plan-details",
    "/patient-dashboard",
    "/nutrition",
    "/meditation",
    "/fitness",
    "/progress",
    "/profile",
    "/settings",
];

/// Serialized as its path, so `"/paywall"` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum RouteId {
    Landing,
    Legal,
    SignIn,
    PaymentCallback,
    ErrorPage,
    Onboarding,
    Paywall,
    PaymentInitiation,
    PaymentResult,
    Dashboard,
    /// Gated feature page, carrying its normalized path.
    Application(String),
    /// Anything not recognized, carrying its normalized path.
    Unknown(String),
}

impl RouteId {
    /// Classify a request path. Query strings and fragments are ignored,
    /// trailing slashes and letter case are normalized.
    pub fn from_path(path: &str) -> RouteId {
        let path = normalize(path);
        let lookup = |table: &[&str]| table.contains(&path.as_str());

        if lookup(LANDING) {
            RouteId::Landing
        } else if lookup(LEGAL) {
            RouteId::Legal
        } else if lookup(SIGN_IN) {
            RouteId::SignIn
        } else if lookup(PAYMENT_CALLBACK) {
            RouteId::PaymentCallback
        } else if lookup(ERROR_PAGE) {
            RouteId::ErrorPage
        } else if lookup(ONBOARDING) {
            RouteId::Onboarding
        } else if lookup(PAYWALL) {
            RouteId::Paywall
        } else if lookup(PAYMENT_INITIATION) {
            RouteId::PaymentInitiation
        } else if lookup(PAYMENT_RESULT) {
            RouteId::PaymentResult
        } else if lookup(DASHBOARD) {
            RouteId::Dashboard
        } else if APPLICATION_PREFIXES
            .iter()
            .any(|prefix| path == *prefix || path.starts_with(&format!("{prefix}/")))
        {
            RouteId::Application(path)
        } else {
            RouteId::Unknown(path)
        }
    }

    /// Canonical path a redirect to this route should navigate to.
    pub fn path(&self) -> &str {
        match self {
            RouteId::Landing => LANDING[0],
            RouteId::Legal => LEGAL[0],
            RouteId::SignIn => SIGN_IN[0],
            RouteId::PaymentCallback => PAYMENT_CALLBACK[0],
            RouteId::ErrorPage => ERROR_PAGE[0],
            RouteId::Onboarding => ONBOARDING[0],
            RouteId::Paywall => PAYWALL[0],
            RouteId::PaymentInitiation => PAYMENT_INITIATION[0],
            RouteId::PaymentResult => PAYMENT_RESULT[0],
            RouteId::Dashboard => DASHBOARD[0],
            RouteId::Application(path) | RouteId::Unknown(path) => path,
        }
    }

    pub fn is_public(&self) -> bool {
        matches!(
            self,
            RouteId::Landing
                | RouteId::Legal
                | RouteId::SignIn
                | RouteId::PaymentCallback
                | RouteId::ErrorPage
        )
    }

    /// Pages an authenticated, onboarded user without entitlement may use.
    pub fn is_checkout_flow(&self) -> bool {
        matches!(
            self,
            RouteId::Paywall | RouteId::PaymentInitiation | RouteId::PaymentResult
        )
    }

    /// Routes an entitled user may open.
    pub fn is_application(&self) -> bool {
        matches!(
            self,
            RouteId::Dashboard
                | RouteId::Application(_)
                | RouteId::PaymentInitiation
                | RouteId::PaymentResult
        )
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

impl From<String> for RouteId {
    fn from(path: String) -> Self {
        RouteId::from_path(&path)
    }
}

impl From<RouteId> for String {
    fn from(route: RouteId) -> Self {
        route.path().to_string()
    }
}

fn normalize(path: &str) -> String {
    let path = path
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_paths() {
        assert_eq!(RouteId::from_path("/"), RouteId::Landing);
        assert_eq!(RouteId::from_path(""), RouteId::Landing);
        assert_eq!(RouteId::from_path("/terms"), RouteId::Legal);
        assert_eq!(RouteId::from_path("/login"), RouteId::SignIn);
        assert_eq!(RouteId::from_path("/payments/callback"), RouteId::PaymentCallback);
        assert_eq!(RouteId::from_path("/404"), RouteId::ErrorPage);
        assert_eq!(RouteId::from_path("/onboarding/"), RouteId::Onboarding);
        assert_eq!(RouteId::from_path("/Paywall"), RouteId::Paywall);
        assert_eq!(RouteId::from_path("/checkout"), RouteId::PaymentInitiation);
        assert_eq!(
            RouteId::from_path("/payment/success?orderId=ORD_1&plan=basic"),
            RouteId::PaymentResult
        );
        assert_eq!(RouteId::from_path("/dashboard#top"), RouteId::Dashboard);
    }

    #[test]
    fn application_routes_match_by_prefix() {
        assert_eq!(
            RouteId::from_path("/health-plan/week/3"),
            RouteId::Application("/health-plan/week/3".into())
        );
        assert_eq!(
            RouteId::from_path("workout-dashboard"),
            RouteId::Application("/workout-dashboard".into())
        );
        // A shared prefix is not a path segment boundary.
        assert_eq!(
            RouteId::from_path("/profileX"),
            RouteId::Unknown("/profilex".into())
        );
    }

    #[test]
    fn canonical_paths_round_trip() {
        for route in [
            RouteId::Landing,
            RouteId::Legal,
            RouteId::SignIn,
            RouteId::PaymentCallback,
            RouteId::ErrorPage,
            RouteId::Onboarding,
            RouteId::Paywall,
            RouteId::PaymentInitiation,
            RouteId::PaymentResult,
            RouteId::Dashboard,
        ] {
            assert_eq!(RouteId::from_path(route.path()), route);
        }
    }

    #[test]
    fn serializes_as_path() {
        let json = serde_json::to_string(&RouteId::Paywall).unwrap();
        assert_eq!(json, "\"/paywall\"");
        let parsed: RouteId = serde_json::from_str("\"/health-plan/today\"").unwrap();
        assert_eq!(parsed, RouteId::Application("/health-plan/today".into()));
    }

    #[test]
    fn public_routes() {
        assert!(RouteId::Landing.is_public());
        assert!(RouteId::PaymentCallback.is_public());
        assert!(!RouteId::Paywall.is_public());
        assert!(!RouteId::Unknown("/x".into()).is_public());
    }
}
