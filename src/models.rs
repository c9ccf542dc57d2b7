// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Shared Domain Types
//!
//! Small value types shared by the ledger, the gateway client and the
//! subscription resolver.
//!
//! ## Order Identifier Format
//!
//! The order id doubles as the gateway's merchant transaction id, which
//! accepts at most 38 characters of `[A-Za-z0-9_-]`. Generated ids use
//! [`generate_order_id`] and always satisfy [`is_valid_order_id`].

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Settlement currency for all attempts.
pub const CURRENCY: &str = "INR";

/// Maximum order id length accepted by the gateway.
pub const MAX_ORDER_ID_LEN: usize = 38;

// =============================================================================
// Billing Cycle
// =============================================================================

/// Subscription billing cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    Monthly,
    #[serde(alias = "yearly")]
    Annual,
}

impl BillingCycle {
    /// Length of one paid period in days.
    pub fn period_days(self) -> i64 {
        match self {
            BillingCycle::Monthly => 30,
            BillingCycle::Annual => 365,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BillingCycle::Monthly => "monthly",
            BillingCycle::Annual => "annual",
        }
    }
}

impl std::fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BillingCycle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monthly" => Ok(BillingCycle::Monthly),
            "annual" | "yearly" => Ok(BillingCycle::Annual),
            other => Err(format!("unknown billing cycle: {other}")),
        }
    }
}

// =============================================================================
// Order Identifiers
// =============================================================================

pub fn is_valid_order_id(order_id: &str) -> bool {
    !order_id.is_empty()
        && order_id.len() <= MAX_ORDER_ID_LEN
        && order_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// `ORD_` followed by a dash-free v4 UUID (36 characters).
pub fn generate_order_id() -> String {
    format!("ORD_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn billing_cycle_parses_aliases() {
        assert_eq!("monthly".parse::<BillingCycle>(), Ok(BillingCycle::Monthly));
        assert_eq!("Annual".parse::<BillingCycle>(), Ok(BillingCycle::Annual));
        assert_eq!("yearly".parse::<BillingCycle>(), Ok(BillingCycle::Annual));
        assert!("weekly".parse::<BillingCycle>().is_err());
    }

    #[test]
    fn billing_cycle_serde_accepts_yearly() {
        let cycle: BillingCycle = serde_json::from_str("\"yearly\"").unwrap();
        assert_eq!(cycle, BillingCycle::Annual);
        assert_eq!(serde_json::to_string(&cycle).unwrap(), "\"annual\"");
    }

    #[test]
    fn period_lengths() {
        assert_eq!(BillingCycle::Monthly.period_days(), 30);
        assert_eq!(BillingCycle::Annual.period_days(), 365);
    }

    #[test]
    fn order_id_validation() {
        assert!(is_valid_order_id("ORD_abc-123"));
        assert!(!is_valid_order_id(""));
        assert!(!is_valid_order_id("has space"));
        assert!(!is_valid_order_id("pipe|char"));
        assert!(!is_valid_order_id(&"a".repeat(39)));
        assert!(is_valid_order_id(&"a".repeat(38)));
    }

    #[test]
    fn generated_order_ids_are_valid_and_unique() {
        let a = generate_order_id();
        let b = generate_order_id();
        assert!(is_valid_order_id(&a), "{a}");
        assert_eq!(a.len(), 36);
        assert_ne!(a, b);
    }
}
