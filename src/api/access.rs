// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    access::{AccessDecision, IdentityFacts, RouteId},
    auth::OptionalAuth,
    error::ApiError,
    state::AppState,
};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ResolveAccessRequest {
    /// Path the app is about to show, e.g. `/dashboard`.
    #[schema(example = "/dashboard")]
    pub route: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ResolveAccessResponse {
    pub facts: IdentityFacts,
    pub decision: AccessDecision,
    /// Path to navigate to, absent when the app should stay where it is.
    pub navigate_to: Option<String>,
}

/// Decide whether the caller may see a route.
///
/// Anonymous requests are answered too. Facts are read fresh on every call.
#[utoipa::path(
    post,
    path = "/v1/access/resolve",
    tag = "Access",
    security((), ("bearer_auth" = [])),
    request_body = ResolveAccessRequest,
    responses(
        (status = 200, description = "Access decision", body = ResolveAccessResponse),
        (status = 503, description = "Facts could not be read; deny and retry")
    )
)]
pub async fn resolve_access(
    OptionalAuth(user): OptionalAuth,
    State(state): State<AppState>,
    Json(request): Json<ResolveAccessRequest>,
) -> Result<Json<ResolveAccessResponse>, ApiError> {
    let route = RouteId::from_path(&request.route);
    let outcome = state.guard.check(user.as_ref(), &route).await?;

    Ok(Json(ResolveAccessResponse {
        facts: outcome.facts,
        decision: outcome.decision,
        navigate_to: outcome.navigate_to.map(|target| target.path().to_string()),
    }))
}
