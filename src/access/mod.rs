// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Access Gating
//!
//! Route access is decided by a single pure function over fully-resolved
//! facts about the caller:
//!
//! ```text
//!   identity ─┐
//!   profile  ─┼─► IdentityFacts ─► resolve(facts, route) ─► AccessDecision
//!   entitle. ─┘
//! ```
//!
//! [`resolver::resolve`] never performs I/O. Gathering the facts, waiting for
//! all of them, and not redirecting onto the page the caller is already on
//! belong to [`guard::AccessGuard`].

pub mod guard;
pub mod resolver;
pub mod routes;

pub use guard::{AccessGuard, FactSource, GuardError, GuardOutcome, GuardSession, StoreFacts};
pub use resolver::{resolve, AccessDecision, AccessReason, IdentityFacts};
pub use routes::RouteId;
