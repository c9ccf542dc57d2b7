// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Payment order endpoints.
//!
//! Orders are created for a catalog plan; the amount always comes from the
//! catalog, never from the client. Users only see their own orders. An order
//! owned by someone else is reported as not found.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    auth::{Auth, AuthenticatedUser},
    error::ApiError,
    gateway::{CreateOrder, PaymentError},
    models::{generate_order_id, BillingCycle, CURRENCY},
    state::AppState,
    storage::{self, PaymentAttempt, PaymentLedger, PaymentStatus, PaymentTransition},
};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    /// Client-chosen idempotency key. Generated when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[schema(example = "basic")]
    pub plan_slug: String,
    pub billing_cycle: BillingCycle,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateOrderResponse {
    pub order_id: String,
    /// Hosted checkout page to send the user to.
    pub redirect_url: Option<String>,
    pub status: PaymentStatus,
    pub amount_minor_units: u64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<PaymentAttempt>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderDetailResponse {
    pub order: PaymentAttempt,
    pub transitions: Vec<PaymentTransition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PollResponse {
    pub order_id: String,
    pub status: PaymentStatus,
    /// False means the gateway has not reported an outcome yet; try again
    /// later.
    pub settled: bool,
}

/// Start a checkout for a plan.
#[utoipa::path(
    post,
    path = "/v1/payments/orders",
    tag = "Payments",
    security(("bearer_auth" = [])),
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order registered with the gateway", body = CreateOrderResponse),
        (status = 400, description = "Invalid plan, cycle or order id"),
        (status = 401, description = "Unauthorized"),
        (status = 402, description = "Gateway rejected the order"),
        (status = 409, description = "Order id already used"),
        (status = 503, description = "Gateway unavailable; the order is kept and reconciled later")
    )
)]
pub async fn create_order(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CreateOrderResponse>), ApiError> {
    let amount = state
        .payments
        .catalog()
        .price(&request.plan_slug, request.billing_cycle)
        .ok_or_else(|| PaymentError::InvalidInput(format!("unknown plan: {}", request.plan_slug)))?;

    let order_id = request.order_id.unwrap_or_else(generate_order_id);
    let created = state
        .payments
        .create_order(CreateOrder {
            order_id,
            amount_minor_units: amount,
            user_id: user.user_id,
            plan_slug: request.plan_slug,
            billing_cycle: request.billing_cycle,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateOrderResponse {
            order_id: created.order_id,
            redirect_url: created.redirect_url,
            status: created.status,
            amount_minor_units: amount,
            currency: CURRENCY.to_string(),
        }),
    ))
}

/// List the caller's orders, newest first.
#[utoipa::path(
    get,
    path = "/v1/payments/orders",
    tag = "Payments",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Caller's orders", body = OrderListResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn list_orders(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<OrderListResponse>, ApiError> {
    let store = state.store.clone();
    let orders =
        storage::blocking(move || PaymentLedger::new(&store).list_by_user(&user.user_id)).await?;
    let total = orders.len();
    Ok(Json(OrderListResponse { orders, total }))
}

/// Read one order and its transition history.
#[utoipa::path(
    get,
    path = "/v1/payments/orders/{order_id}",
    tag = "Payments",
    security(("bearer_auth" = [])),
    params(("order_id" = String, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order found", body = OrderDetailResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Order not found")
    )
)]
pub async fn get_order(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderDetailResponse>, ApiError> {
    let order = owned_order(&state, &user, &order_id).await?;
    let store = state.store.clone();
    let transitions =
        storage::blocking(move || PaymentLedger::new(&store).transitions(&order_id)).await?;
    Ok(Json(OrderDetailResponse { order, transitions }))
}

/// Ask the gateway for the outcome when the callback is late.
///
/// Waits within the bounded polling window and returns the status reached.
#[utoipa::path(
    post,
    path = "/v1/payments/orders/{order_id}/poll",
    tag = "Payments",
    security(("bearer_auth" = [])),
    params(("order_id" = String, Path, description = "Order id")),
    responses(
        (status = 200, description = "Current status", body = PollResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Order not found"),
        (status = 503, description = "Gateway unavailable")
    )
)]
pub async fn poll_order(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<PollResponse>, ApiError> {
    owned_order(&state, &user, &order_id).await?;
    let status = state.payments.poll_status(&order_id).await?;
    Ok(Json(PollResponse {
        order_id,
        status,
        settled: status.is_terminal(),
    }))
}

async fn owned_order(
    state: &AppState,
    user: &AuthenticatedUser,
    order_id: &str,
) -> Result<PaymentAttempt, ApiError> {
    let store = state.store.clone();
    let key = order_id.to_string();
    let order = storage::blocking(move || PaymentLedger::new(&store).get(&key)).await?;
    order
        .filter(|order| user.can_access(&order.user_id))
        .ok_or_else(|| PaymentError::NotFound(order_id.to_string()).into())
}
