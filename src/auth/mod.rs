// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Bearer-token authentication for the gate API.
//!
//! ## Auth Flow
//!
//! 1. The app signs the user in with the identity provider
//! 2. The app sends `Authorization: Bearer <JWT>`
//! 3. The server:
//!    - Verifies the HS256 signature with the shared project secret
//!    - Checks expiry, and issuer / audience when configured
//!    - Extracts:
//!      - `sub` → canonical `user_id`
//!      - `app_metadata.role` → [`Role`]
//!
//! ## Security
//!
//! - Payment, subscription and onboarding endpoints require authentication
//! - The gateway callback is authenticated by its checksum, not by a token
//! - Clock skew tolerance is 60 seconds
//! - Structure-only decoding exists only in test builds and the `dev` feature

pub mod claims;
pub mod error;
pub mod extractor;
pub mod roles;

pub use claims::{AuthenticatedUser, TokenClaims};
pub use error::AuthError;
pub use extractor::{AdminOnly, Auth, AuthConfig, OptionalAuth};
pub use roles::Role;
