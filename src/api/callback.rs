// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Inbound gateway callback.
//!
//! Authenticated by its checksum only. Every verified callback is answered
//! with 200 so the gateway stops retrying; a bad checksum or an undecodable
//! payload gets 400.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;

use crate::{
    callback::{AckResult, RejectReason},
    error::ApiError,
    gateway::phonepe::VERIFY_HEADER,
    state::AppState,
    storage::{self, PaymentStatus},
};

/// Either `{ payload, signature }`, or the gateway's native `{ response }`
/// body with the checksum in `X-VERIFY`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CallbackRequest {
    /// Base64 JSON payload.
    #[serde(alias = "response")]
    pub payload: String,
    #[serde(default)]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CallbackOutcome {
    Applied,
    Duplicate,
    Ignored,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CallbackAck {
    pub success: bool,
    pub outcome: CallbackOutcome,
    pub order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PaymentStatus>,
}

#[utoipa::path(
    post,
    path = "/payments/callback",
    tag = "Gateway",
    request_body = CallbackRequest,
    params(("X-VERIFY" = Option<String>, Header, description = "Checksum, when not in the body")),
    responses(
        (status = 200, description = "Acknowledged", body = CallbackAck),
        (status = 400, description = "Checksum invalid, or body or payload undecodable"),
        (status = 500, description = "Storage failure; the gateway should retry")
    )
)]
pub async fn payment_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CallbackRequest>, JsonRejection>,
) -> Result<Json<CallbackAck>, ApiError> {
    let Json(request) = body.map_err(|rejection| {
        warn!(target: "security", error = %rejection.body_text(), "Gateway callback body rejected");
        ApiError::bad_request("undecodable callback body").with_code("malformed_payload")
    })?;

    let signature = request
        .signature
        .or_else(|| {
            headers
                .get(VERIFY_HEADER)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_default();

    if signature.trim().is_empty() {
        warn!(target: "security", "Gateway callback without checksum rejected");
        return Err(ApiError::bad_request("missing checksum").with_code("invalid_signature"));
    }

    let callbacks = state.callbacks.clone();
    let result =
        storage::blocking(move || callbacks.handle_callback(&request.payload, &signature)).await?;

    let ack = match result {
        AckResult::Applied { order_id, status } => CallbackAck {
            success: true,
            outcome: CallbackOutcome::Applied,
            order_id,
            status: Some(status),
        },
        AckResult::Duplicate { order_id, status } => CallbackAck {
            success: true,
            outcome: CallbackOutcome::Duplicate,
            order_id,
            status: Some(status),
        },
        AckResult::Ignored { order_id, .. } => CallbackAck {
            success: true,
            outcome: CallbackOutcome::Ignored,
            order_id,
            status: None,
        },
        AckResult::Rejected(RejectReason::InvalidSignature) => {
            return Err(ApiError::bad_request("checksum mismatch").with_code("invalid_signature"))
        }
        AckResult::Rejected(RejectReason::MalformedPayload) => {
            return Err(ApiError::bad_request("undecodable payload").with_code("malformed_payload"))
        }
    };

    Ok(Json(ack))
}
