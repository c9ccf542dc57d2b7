// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Plans, subscription status, onboarding and operator trials.

use axum::{extract::State, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    auth::{AdminOnly, Auth},
    error::ApiError,
    models::BillingCycle,
    state::AppState,
    storage::{self, ProfileStore, StoredProfile, StoredSubscription},
    subscription::{Plan, SubscriptionSummary},
};

const MAX_TRIAL_DAYS: i64 = 90;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PlanResponse {
    pub slug: String,
    pub name: String,
    pub monthly_price: u64,
    pub annual_price: u64,
    pub currency: String,
}

impl From<&Plan> for PlanResponse {
    fn from(plan: &Plan) -> Self {
        Self {
            slug: plan.slug.to_string(),
            name: plan.name.to_string(),
            monthly_price: plan.monthly_price,
            annual_price: plan.annual_price,
            currency: crate::models::CURRENCY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CancelRequest {
    /// Keep access until the paid period ends. Defaults to true.
    #[serde(default = "default_true")]
    pub at_period_end: bool,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct GrantTrialRequest {
    pub user_id: String,
    #[schema(example = "premium")]
    pub plan_slug: String,
    pub billing_cycle: BillingCycle,
    #[schema(example = 7)]
    pub trial_days: i64,
}

fn default_true() -> bool {
    true
}

/// Purchasable plans with per-cycle prices in minor units.
#[utoipa::path(
    get,
    path = "/v1/plans",
    tag = "Subscription",
    responses((status = 200, description = "Plan catalog", body = Vec<PlanResponse>))
)]
pub async fn list_plans(State(state): State<AppState>) -> Json<Vec<PlanResponse>> {
    Json(state.payments.catalog().plans().iter().map(PlanResponse::from).collect())
}

/// Caller's entitlement, subscription row and days left.
#[utoipa::path(
    get,
    path = "/v1/subscription",
    tag = "Subscription",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Subscription summary", body = SubscriptionSummary),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn get_subscription(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<SubscriptionSummary>, ApiError> {
    let subscriptions = state.subscriptions.clone();
    let summary =
        storage::blocking(move || subscriptions.status_summary(&user.user_id, Utc::now())).await?;
    Ok(Json(summary))
}

#[utoipa::path(
    post,
    path = "/v1/subscription/cancel",
    tag = "Subscription",
    security(("bearer_auth" = [])),
    request_body = CancelRequest,
    responses(
        (status = 200, description = "Subscription canceled", body = StoredSubscription),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "No subscription")
    )
)]
pub async fn cancel_subscription(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<StoredSubscription>, ApiError> {
    let subscriptions = state.subscriptions.clone();
    storage::blocking(move || subscriptions.cancel(&user.user_id, request.at_period_end, Utc::now()))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("no subscription to cancel"))
}

/// Record that the caller finished onboarding. Repeat calls are no-ops.
#[utoipa::path(
    post,
    path = "/v1/onboarding/complete",
    tag = "Subscription",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Profile after completion", body = StoredProfile),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn complete_onboarding(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<StoredProfile>, ApiError> {
    let store = state.store.clone();
    let user_id = user.user_id.clone();
    let profile = storage::blocking(move || {
        ProfileStore::new(&store).mark_onboarding_completed(&user_id, Utc::now())
    })
    .await?;
    tracing::info!(user_id = %user.user_id, "Onboarding completed");
    Ok(Json(profile))
}

/// Provision a trial for a user (operator tool).
#[utoipa::path(
    post,
    path = "/v1/admin/subscriptions/trial",
    tag = "Admin",
    security(("bearer_auth" = [])),
    request_body = GrantTrialRequest,
    responses(
        (status = 200, description = "Resulting subscription", body = StoredSubscription),
        (status = 400, description = "Unknown plan or trial length out of range"),
        (status = 403, description = "Admin role required")
    )
)]
pub async fn grant_trial(
    AdminOnly(admin): AdminOnly,
    State(state): State<AppState>,
    Json(request): Json<GrantTrialRequest>,
) -> Result<Json<StoredSubscription>, ApiError> {
    if !state.payments.catalog().contains(&request.plan_slug) {
        return Err(ApiError::bad_request(format!("unknown plan: {}", request.plan_slug)));
    }
    if !(1..=MAX_TRIAL_DAYS).contains(&request.trial_days) {
        return Err(ApiError::bad_request(format!(
            "trial_days must be between 1 and {MAX_TRIAL_DAYS}"
        )));
    }
    if request.user_id.trim().is_empty() {
        return Err(ApiError::bad_request("user_id is required"));
    }

    let subscriptions = state.subscriptions.clone();
    let GrantTrialRequest {
        user_id,
        plan_slug,
        billing_cycle,
        trial_days,
    } = request;
    let target = user_id.clone();
    let subscription = storage::blocking(move || {
        subscriptions.grant_trial(&target, &plan_slug, billing_cycle, trial_days, Utc::now())
    })
    .await?;
    tracing::info!(admin = %admin.user_id, user_id = %user_id, "Trial granted by operator");
    Ok(Json(subscription))
}
