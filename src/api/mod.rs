// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::Request,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    access::{AccessDecision, AccessReason, IdentityFacts},
    error::ErrorBody,
    models::BillingCycle,
    state::AppState,
    storage::{
        PaymentAttempt, PaymentStatus, PaymentTransition, StoredProfile, StoredSubscription,
        SubscriptionSource, SubscriptionStatus, TransitionSource,
    },
    subscription::{EntitlementState, SubscriptionSummary},
};

pub mod access;
pub mod callback;
pub mod health;
pub mod payments;
pub mod subscription;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/access/resolve", post(access::resolve_access))
        .route(
            "/payments/orders",
            get(payments::list_orders).post(payments::create_order),
        )
        .route("/payments/orders/{order_id}", get(payments::get_order))
        .route("/payments/orders/{order_id}/poll", post(payments::poll_order))
        .route("/plans", get(subscription::list_plans))
        .route("/subscription", get(subscription::get_subscription))
        .route("/subscription/cancel", post(subscription::cancel_subscription))
        .route("/onboarding/complete", post(subscription::complete_onboarding))
        .route("/admin/subscriptions/trial", post(subscription::grant_trial));

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/payments/callback", post(callback::payment_callback))
        .nest("/v1", v1_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-");
                    tracing::info_span!(
                        "http",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = %request_id,
                    )
                }))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .layer(CorsLayer::permissive())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        health::readiness,
        callback::payment_callback,
        access::resolve_access,
        payments::create_order,
        payments::list_orders,
        payments::get_order,
        payments::poll_order,
        subscription::list_plans,
        subscription::get_subscription,
        subscription::cancel_subscription,
        subscription::complete_onboarding,
        subscription::grant_trial
    ),
    components(
        schemas(
            ErrorBody,
            BillingCycle,
            PaymentStatus,
            TransitionSource,
            PaymentAttempt,
            PaymentTransition,
            SubscriptionStatus,
            SubscriptionSource,
            StoredSubscription,
            StoredProfile,
            EntitlementState,
            SubscriptionSummary,
            IdentityFacts,
            AccessReason,
            AccessDecision,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse,
            callback::CallbackRequest,
            callback::CallbackAck,
            callback::CallbackOutcome,
            access::ResolveAccessRequest,
            access::ResolveAccessResponse,
            payments::CreateOrderRequest,
            payments::CreateOrderResponse,
            payments::OrderListResponse,
            payments::OrderDetailResponse,
            payments::PollResponse,
            subscription::PlanResponse,
            subscription::CancelRequest,
            subscription::GrantTrialRequest
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Liveness and readiness checks"),
        (name = "Gateway", description = "Signed payment gateway callbacks"),
        (name = "Access", description = "Route access decisions"),
        (name = "Payments", description = "Checkout orders and status polling"),
        (name = "Subscription", description = "Plans, entitlement and onboarding"),
        (name = "Admin", description = "Operator tools")
    )
)]
struct ApiDoc;
