// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Payment Reconciler
//!
//! Background task that settles payment attempts whose callback never
//! arrived. The gateway callback stays the primary confirmation path; this is
//! the fallback that keeps an attempt from sitting in `processing` forever
//! when the user closed the tab or the callback was lost.
//!
//! ## Strategy
//!
//! Every `interval` (default 30 s) the reconciler:
//! 1. Lists attempts still `created` or `processing` whose last transition is
//!    older than `grace` (default 60 s), giving the callback time to land.
//! 2. Asks the gateway once for each, through the same conditional ledger
//!    update the callback uses.
//!
//! Attempts are never deleted. An attempt the gateway keeps reporting as
//! pending is simply looked at again on the next sweep.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    gateway::PaymentGatewayClient,
    storage::{PaymentLedger, Store},
};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_GRACE: Duration = Duration::from_secs(60);

/// Counts from one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub settled: usize,
    pub failed: usize,
}

pub struct PaymentReconciler {
    store: Arc<Store>,
    payments: Arc<PaymentGatewayClient>,
    interval: Duration,
    grace: Duration,
}

impl PaymentReconciler {
    pub fn new(store: Arc<Store>, payments: Arc<PaymentGatewayClient>) -> Self {
        Self {
            store,
            payments,
            interval: DEFAULT_INTERVAL,
            grace: DEFAULT_GRACE,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Run until the cancellation token is triggered.
    ///
    /// ```rust,ignore
    /// tokio::spawn(reconciler.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            grace_secs = self.grace.as_secs(),
            "Payment reconciler starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Payment reconciler shutting down");
                return;
            }

            self.sweep().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Payment reconciler shutting down");
                    return;
                }
            }
        }
    }

    /// One pass over unsettled attempts.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let cutoff = match chrono::Duration::from_std(self.grace) {
            Ok(grace) => Utc::now() - grace,
            Err(_) => Utc::now(),
        };

        let pending = match PaymentLedger::new(&self.store).list_unsettled(cutoff) {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "Reconciler: failed to list unsettled attempts");
                return report;
            }
        };

        if pending.is_empty() {
            return report;
        }

        info!(count = pending.len(), "Reconciler: checking unsettled attempts");

        for attempt in &pending {
            report.examined += 1;
            match self.payments.reconcile_once(&attempt.order_id).await {
                Ok(status) if status.is_terminal() => {
                    report.settled += 1;
                    info!(
                        order_id = %attempt.order_id,
                        status = %status,
                        "Reconciler: settled attempt"
                    );
                }
                Ok(status) => {
                    debug!(order_id = %attempt.order_id, status = %status, "Reconciler: still pending");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        order_id = %attempt.order_id,
                        error = %e,
                        "Reconciler: status check failed"
                    );
                }
            }
        }

        report
    }
}
