// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use crate::storage::StoreError;

use super::transport::TransportError;

/// Classified gateway failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Transport failure or timeout. Retryable.
    #[error("payment gateway unreachable: {0}")]
    Unreachable(String),

    /// 5xx or an unparseable body. Retryable.
    #[error("payment gateway error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// The gateway refused the request. Terminal.
    #[error("payment gateway rejected the request ({code}): {message}")]
    Rejected { code: String, message: String },
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Unreachable(_) | GatewayError::ServerError { .. }
        )
    }
}

impl From<TransportError> for GatewayError {
    fn from(error: TransportError) -> Self {
        GatewayError::Unreachable(error.to_string())
    }
}

/// Error surfaced by order creation and status polling.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("order {0} already exists")]
    DuplicateOrder(String),

    #[error("order {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("storage error: {0}")]
    Storage(StoreError),
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::Gateway(error) => error.is_retryable(),
            _ => false,
        }
    }
}

impl From<StoreError> for PaymentError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::AlreadyExists(order_id) => PaymentError::DuplicateOrder(order_id),
            other => PaymentError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(GatewayError::Unreachable("timeout".into()).is_retryable());
        assert!(GatewayError::ServerError {
            status: 502,
            message: "bad gateway".into()
        }
        .is_retryable());
        assert!(!GatewayError::Rejected {
            code: "BAD_REQUEST".into(),
            message: "invalid amount".into()
        }
        .is_retryable());
        assert!(!PaymentError::InvalidInput("amount".into()).is_retryable());
    }

    #[test]
    fn already_exists_maps_to_duplicate_order() {
        let error: PaymentError = StoreError::AlreadyExists("ORD_1".into()).into();
        assert!(matches!(error, PaymentError::DuplicateOrder(id) if id == "ORD_1"));
    }
}
