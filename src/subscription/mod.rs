// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Subscriptions
//!
//! Entitlement is derived on every read from the stored subscription row and
//! the current time. A period that has ended is expired lazily: the read that
//! notices it persists the new status with a conditional write.
//!
//! Successful payments extend the period once per order id, and refunds take
//! back exactly what that order granted.

pub mod catalog;
pub mod resolver;

pub use catalog::{Plan, PlanCatalog};
pub use resolver::{
    EntitlementState, SettleOutcome, SubscriptionResolver, SubscriptionSummary,
};
