// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wellness Gate - Access Gating & Payment Confirmation Service
//!
//! Decides which screen a user may see from three facts (authenticated,
//! onboarded, entitled), and keeps those facts honest by confirming
//! subscription payments with a checksum-signed hosted payment gateway.
//!
//! ## Modules
//!
//! - `access` - Route table, pure access resolver and the async guard
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Bearer JWT authentication and roles
//! - `callback` - Signed gateway callback verification
//! - `gateway` - Payment gateway client (order creation, status polling)
//! - `reconciler` - Background settlement of orders with lost callbacks
//! - `storage` - Payment ledger, subscriptions and profiles (redb)
//! - `subscription` - Plan catalog and entitlement resolution

pub mod access;
pub mod api;
pub mod auth;
pub mod callback;
pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod reconciler;
pub mod state;
pub mod storage;
pub mod subscription;
