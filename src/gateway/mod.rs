// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Payment Gateway
//!
//! Hosted-checkout integration with a checksum-signed payment gateway
//! (PhonePe PG v1 wire format).
//!
//! - [`signature`]: `X-VERIFY` checksum codec and key ring
//! - [`transport`]: HTTP seam (`reqwest` in production, scripted in tests)
//! - [`phonepe`]: pay and status endpoints, response classification
//! - [`retry`]: bounded exponential backoff
//! - [`client`]: order creation and status polling over the ledger

pub mod client;
pub mod error;
pub mod phonepe;
pub mod retry;
pub mod signature;
pub mod transport;

pub use client::{CreateOrder, CreatedOrder, PaymentGatewayClient};
pub use error::{GatewayError, PaymentError};
pub use phonepe::{GatewayEnvironment, MerchantConfig, PhonePeApi};
pub use retry::{RetryPolicy, RetrySchedule};
pub use signature::{KeyRing, SignatureError, SigningKey};
pub use transport::{GatewayTransport, HttpTransport};
