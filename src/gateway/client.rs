// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Order creation and status polling against the gateway.
//!
//! Both paths report gateway outcomes through the same ledger transition
//! primitive the callback uses, so whichever report lands first wins and
//! later ones are no-ops.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tracing::{info, warn};

use super::{
    error::{GatewayError, PaymentError},
    phonepe::{GatewayPaymentState, PayRequest, PhonePeApi, StatusReport},
    retry::RetryPolicy,
};
use crate::{
    models::{is_valid_order_id, BillingCycle},
    storage::{
        self, PaymentAttempt, PaymentLedger, PaymentStatus, StatusUpdate, Store, TransitionOutcome,
        TransitionSource,
    },
    subscription::{PlanCatalog, SubscriptionResolver},
};

/// Default age after which an attempt the gateway never acknowledged, and
/// now reports as unknown, is considered abandoned.
pub const DEFAULT_ABANDON_AFTER: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub order_id: String,
    pub amount_minor_units: u64,
    pub user_id: String,
    pub plan_slug: String,
    pub billing_cycle: BillingCycle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedOrder {
    pub order_id: String,
    pub redirect_url: Option<String>,
    pub status: PaymentStatus,
}

pub struct PaymentGatewayClient {
    store: Arc<Store>,
    api: PhonePeApi,
    subscriptions: SubscriptionResolver,
    catalog: PlanCatalog,
    retry: RetryPolicy,
    abandon_after: Duration,
}

impl PaymentGatewayClient {
    pub fn new(
        store: Arc<Store>,
        api: PhonePeApi,
        subscriptions: SubscriptionResolver,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            api,
            subscriptions,
            catalog: PlanCatalog,
            retry,
            abandon_after: DEFAULT_ABANDON_AFTER,
        }
    }

    pub fn with_abandon_after(mut self, abandon_after: Duration) -> Self {
        self.abandon_after = abandon_after;
        self
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    /// Record the attempt, then register it with the gateway.
    ///
    /// The attempt is persisted before any network call. A gateway rejection
    /// fails the attempt; exhausting retries on transient errors leaves it in
    /// `processing` for the reconciler, since the gateway may have accepted it.
    pub async fn create_order(&self, order: CreateOrder) -> Result<CreatedOrder, PaymentError> {
        self.validate(&order)?;

        let attempt = PaymentAttempt::new(
            order.order_id.clone(),
            order.user_id.clone(),
            order.amount_minor_units,
            order.plan_slug.clone(),
            order.billing_cycle,
            Utc::now(),
        );
        self.with_store(move |store, _| Ok(PaymentLedger::new(store).insert_created(&attempt)?))
            .await?;
        info!(
            order_id = %order.order_id,
            user_id = %order.user_id,
            amount = order.amount_minor_units,
            plan = %order.plan_slug,
            cycle = %order.billing_cycle,
            "Payment attempt created"
        );

        let request = PayRequest {
            order_id: &order.order_id,
            user_id: &order.user_id,
            amount_minor_units: order.amount_minor_units,
            plan_slug: &order.plan_slug,
            billing_cycle: order.billing_cycle,
        };

        let mut schedule = self.retry.schedule();
        let error = loop {
            match self.api.pay(&request).await {
                Ok(redirect_url) => {
                    let update = StatusUpdate::new(PaymentStatus::Processing, TransitionSource::Checkout)
                        .with_redirect_url(Some(redirect_url.clone()));
                    let outcome = self.leave_created(&order.order_id, update).await?;
                    let status = outcome
                        .attempt()
                        .map(|a| a.status)
                        .unwrap_or(PaymentStatus::Processing);
                    info!(order_id = %order.order_id, status = %status, "Gateway accepted order");
                    return Ok(CreatedOrder {
                        order_id: order.order_id,
                        redirect_url: Some(redirect_url),
                        status,
                    });
                }
                Err(error) if error.is_retryable() => match schedule.next_delay() {
                    Some(delay) => {
                        warn!(
                            order_id = %order.order_id,
                            error = %error,
                            retry_in_ms = delay.as_millis() as u64,
                            "Gateway pay call failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => break error,
                },
                Err(error) => break error,
            }
        };

        let (next, reason) = match &error {
            GatewayError::Rejected { code, .. } => (PaymentStatus::Failed, code.clone()),
            _ => (PaymentStatus::Processing, "gateway outcome unknown".to_string()),
        };
        self.leave_created(
            &order.order_id,
            StatusUpdate::new(next, TransitionSource::Checkout).with_failure_reason(reason),
        )
        .await?;
        warn!(order_id = %order.order_id, error = %error, status = %next, "Order creation did not complete");
        Err(error.into())
    }

    /// Drive a non-terminal attempt towards a terminal status by asking the
    /// gateway, within the retry policy's window.
    ///
    /// Returns the status at the end of the window; a non-terminal result
    /// means "still processing", not an error.
    pub async fn poll_status(&self, order_id: &str) -> Result<PaymentStatus, PaymentError> {
        let mut schedule = self.retry.schedule();

        loop {
            let attempt = self.load(order_id).await?;
            if attempt.status.is_terminal() {
                let status = attempt.status;
                self.settle(attempt).await?;
                return Ok(status);
            }

            match self.api.check_status(order_id).await {
                Ok(report) => {
                    if let Some(status) = self.apply_report(&attempt, report).await? {
                        return Ok(status);
                    }
                }
                Err(error) if error.is_retryable() => {
                    warn!(order_id = %order_id, error = %error, "Gateway status check failed");
                }
                Err(error) => return Err(error.into()),
            }

            match schedule.next_delay() {
                Some(delay) => tokio::time::sleep(delay).await,
                None => {
                    let status = self.load(order_id).await?.status;
                    info!(order_id = %order_id, status = %status, "Polling window exhausted");
                    return Ok(status);
                }
            }
        }
    }

    /// One status check, no retries. Used by the background reconciler,
    /// whose sweep interval stands in for backoff.
    pub async fn reconcile_once(&self, order_id: &str) -> Result<PaymentStatus, PaymentError> {
        let attempt = self.load(order_id).await?;
        if attempt.status.is_terminal() {
            let status = attempt.status;
            self.settle(attempt).await?;
            return Ok(status);
        }

        let report = self.api.check_status(order_id).await?;
        Ok(self.apply_report(&attempt, report).await?.unwrap_or(attempt.status))
    }

    /// Returns the terminal status once the report settled the attempt.
    async fn apply_report(
        &self,
        attempt: &PaymentAttempt,
        report: StatusReport,
    ) -> Result<Option<PaymentStatus>, PaymentError> {
        let update = match report.state {
            GatewayPaymentState::Completed => {
                StatusUpdate::new(PaymentStatus::Succeeded, TransitionSource::Poll)
                    .with_gateway_transaction_id(report.gateway_transaction_id)
            }
            GatewayPaymentState::Failed => StatusUpdate::new(PaymentStatus::Failed, TransitionSource::Poll)
                .with_gateway_transaction_id(report.gateway_transaction_id)
                .with_failure_reason(report.code),
            GatewayPaymentState::NotFound if self.is_abandoned(attempt) => {
                StatusUpdate::new(PaymentStatus::Failed, TransitionSource::Poll)
                    .with_failure_reason("gateway has no record of the order")
            }
            GatewayPaymentState::Pending | GatewayPaymentState::NotFound => return Ok(None),
        };

        let order_id = attempt.order_id.clone();
        self.with_store(move |store, subscriptions| {
            let outcome = PaymentLedger::new(store).advance(&order_id, update, Utc::now())?;
            let current = match &outcome {
                TransitionOutcome::NotFound => return Err(PaymentError::NotFound(order_id)),
                TransitionOutcome::Applied(current) | TransitionOutcome::Unchanged(current) => current,
            };
            if outcome.is_applied() {
                info!(order_id = %current.order_id, status = %current.status, "Payment settled by poll");
            }
            subscriptions.settle(current, Utc::now())?;
            Ok(current.status.is_terminal().then_some(current.status))
        })
        .await
    }

    async fn load(&self, order_id: &str) -> Result<PaymentAttempt, PaymentError> {
        let order_id = order_id.to_string();
        self.with_store(move |store, _| {
            PaymentLedger::new(store)
                .get(&order_id)?
                .ok_or_else(|| PaymentError::NotFound(order_id.clone()))
        })
        .await
    }

    async fn settle(&self, attempt: PaymentAttempt) -> Result<(), PaymentError> {
        self.with_store(move |_, subscriptions| {
            subscriptions.settle(&attempt, Utc::now())?;
            Ok(())
        })
        .await
    }

    /// First transition out of `created`, taken by the checkout path.
    async fn leave_created(
        &self,
        order_id: &str,
        update: StatusUpdate,
    ) -> Result<TransitionOutcome, PaymentError> {
        let order_id = order_id.to_string();
        self.with_store(move |store, _| {
            Ok(PaymentLedger::new(store).compare_and_set(
                &order_id,
                PaymentStatus::Created,
                update,
                Utc::now(),
            )?)
        })
        .await
    }

    /// Ledger and subscription writes run on the blocking pool.
    async fn with_store<T, F>(&self, f: F) -> Result<T, PaymentError>
    where
        F: FnOnce(&Store, &SubscriptionResolver) -> Result<T, PaymentError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        let subscriptions = self.subscriptions.clone();
        storage::blocking(move || f(&store, &subscriptions)).await
    }

    /// No checkout page was ever issued for the attempt and it is old enough.
    /// Covers `processing` attempts left behind by exhausted pay retries.
    fn is_abandoned(&self, attempt: &PaymentAttempt) -> bool {
        let age = Utc::now() - attempt.created_at;
        !attempt.status.is_terminal()
            && attempt.redirect_url.is_none()
            && age.to_std().is_ok_and(|age| age >= self.abandon_after)
    }

    fn validate(&self, order: &CreateOrder) -> Result<(), PaymentError> {
        if !is_valid_order_id(&order.order_id) {
            return Err(PaymentError::InvalidInput(
                "order id must be 1-38 characters of [A-Za-z0-9_-]".to_string(),
            ));
        }
        if order.amount_minor_units == 0 {
            return Err(PaymentError::InvalidInput(
                "amount must be greater than zero".to_string(),
            ));
        }
        if order.user_id.trim().is_empty() {
            return Err(PaymentError::InvalidInput("user id is required".to_string()));
        }
        if !self.catalog.contains(&order.plan_slug) {
            return Err(PaymentError::InvalidInput(format!(
                "unknown plan: {}",
                order.plan_slug
            )));
        }
        Ok(())
    }
}
