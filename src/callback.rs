// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Gateway Callback Verification
//!
//! The gateway reports payment outcomes server-to-server as a base64 JSON
//! payload plus an `X-VERIFY` checksum. Processing order:
//!
//! 1. Verify the checksum against every key in the ring. Failure rejects the
//!    callback without reading or writing any state.
//! 2. Decode the payload. Undecodable payloads are rejected.
//! 3. Unknown orders and unmapped states are acknowledged and ignored.
//! 4. The reported state is applied with a forward-only ledger transition.
//!    Repeats and stale reports are acknowledged as duplicates.
//! 5. A succeeded attempt credits the subscription once per order; a
//!    refunded one revokes that credit.
//!
//! Every accepted callback is acknowledged, so gateway retries of the same
//! event are harmless.

use std::sync::Arc;

use base64ct::{Base64, Encoding};
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::{
    gateway::{
        phonepe::{map_payment_state, GatewayPaymentState},
        KeyRing,
    },
    storage::{
        PaymentLedger, PaymentStatus, StatusUpdate, Store, StoreResult, TransitionOutcome,
        TransitionSource,
    },
    subscription::SubscriptionResolver,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InvalidSignature,
    MalformedPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckResult {
    /// The callback moved the attempt forward.
    Applied {
        order_id: String,
        status: PaymentStatus,
    },
    /// Repeat or stale report; the attempt is unchanged.
    Duplicate {
        order_id: String,
        status: PaymentStatus,
    },
    /// Verified but not actionable (unknown order, unmapped state).
    Ignored { order_id: String, reason: String },
    Rejected(RejectReason),
}

impl AckResult {
    pub fn is_rejected(&self) -> bool {
        matches!(self, AckResult::Rejected(_))
    }
}

#[derive(Debug, Deserialize)]
struct CallbackEnvelope {
    #[serde(default)]
    code: String,
    data: CallbackData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallbackData {
    merchant_transaction_id: String,
    #[serde(default)]
    transaction_id: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    amount: Option<u64>,
}

pub struct CallbackVerifier {
    keys: KeyRing,
    signing_path: String,
    store: Arc<Store>,
    subscriptions: SubscriptionResolver,
}

impl CallbackVerifier {
    pub fn new(
        keys: KeyRing,
        signing_path: impl Into<String>,
        store: Arc<Store>,
        subscriptions: SubscriptionResolver,
    ) -> Self {
        Self {
            keys,
            signing_path: signing_path.into(),
            store,
            subscriptions,
        }
    }

    pub fn handle_callback(&self, encoded_payload: &str, signature: &str) -> StoreResult<AckResult> {
        let encoded_payload = encoded_payload.trim();

        let Some(key) = self
            .keys
            .verify_encoded(encoded_payload, &self.signing_path, signature)
        else {
            warn!(
                target: "security",
                payload_len = encoded_payload.len(),
                "Callback signature verification failed"
            );
            return Ok(AckResult::Rejected(RejectReason::InvalidSignature));
        };

        let envelope = match decode(encoded_payload) {
            Ok(envelope) => envelope,
            Err(reason) => {
                warn!(key_index = %key.index(), error = %reason, "Callback payload undecodable");
                return Ok(AckResult::Rejected(RejectReason::MalformedPayload));
            }
        };
        let data = envelope.data;
        let order_id = data.merchant_transaction_id;

        let ledger = PaymentLedger::new(&self.store);
        let Some(attempt) = ledger.get(&order_id)? else {
            info!(order_id = %order_id, "Callback for unknown order ignored");
            return Ok(AckResult::Ignored {
                order_id,
                reason: "unknown order".to_string(),
            });
        };

        let Some(next) = reported_status(&envelope.code, data.state.as_deref()) else {
            info!(order_id = %order_id, code = %envelope.code, "Callback state not actionable");
            return Ok(AckResult::Ignored {
                order_id,
                reason: format!("unmapped state {}", envelope.code),
            });
        };

        if next == PaymentStatus::Succeeded {
            if let Some(amount) = data.amount.filter(|a| *a != attempt.amount_minor_units) {
                error!(
                    target: "security",
                    order_id = %order_id,
                    expected = attempt.amount_minor_units,
                    reported = amount,
                    "Callback amount does not match attempt"
                );
                return Ok(AckResult::Ignored {
                    order_id,
                    reason: "amount mismatch".to_string(),
                });
            }
        }

        let mut update = StatusUpdate::new(next, TransitionSource::Callback)
            .with_gateway_transaction_id(data.transaction_id);
        if next == PaymentStatus::Failed {
            update = update.with_failure_reason(envelope.code.clone());
        }

        let now = Utc::now();
        match ledger.advance(&order_id, update, now)? {
            TransitionOutcome::Applied(attempt) => {
                info!(
                    order_id = %order_id,
                    status = %attempt.status,
                    key_index = %key.index(),
                    "Callback applied"
                );
                self.subscriptions.settle(&attempt, now)?;
                Ok(AckResult::Applied {
                    order_id,
                    status: attempt.status,
                })
            }
            TransitionOutcome::Unchanged(attempt) => {
                info!(
                    order_id = %order_id,
                    reported = %next,
                    current = %attempt.status,
                    "Duplicate or stale callback"
                );
                self.subscriptions.settle(&attempt, now)?;
                Ok(AckResult::Duplicate {
                    order_id,
                    status: attempt.status,
                })
            }
            TransitionOutcome::NotFound => Ok(AckResult::Ignored {
                order_id,
                reason: "unknown order".to_string(),
            }),
        }
    }
}

fn decode(encoded_payload: &str) -> Result<CallbackEnvelope, String> {
    let bytes = Base64::decode_vec(encoded_payload).map_err(|e| format!("base64: {e}"))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("json: {e}"))
}

fn reported_status(code: &str, state: Option<&str>) -> Option<PaymentStatus> {
    let refunded = code.eq_ignore_ascii_case("PAYMENT_REFUNDED")
        || state.is_some_and(|s| s.eq_ignore_ascii_case("REFUNDED"));
    if refunded {
        return Some(PaymentStatus::Refunded);
    }
    match map_payment_state(code, state) {
        GatewayPaymentState::Completed => Some(PaymentStatus::Succeeded),
        GatewayPaymentState::Failed => Some(PaymentStatus::Failed),
        GatewayPaymentState::Pending => Some(PaymentStatus::Processing),
        GatewayPaymentState::NotFound => None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        gateway::signature,
        models::BillingCycle,
        storage::{temp_store, PaymentAttempt},
        subscription::EntitlementState,
    };

    pub(crate) const SALT: &str = "callback-salt";

    /// Encoded payload and a valid signature for it.
    pub(crate) fn signed_callback(order_id: &str, code: &str, state: &str, amount: u64) -> (String, String) {
        let body = json!({
            "success": code == "PAYMENT_SUCCESS",
            "code": code,
            "message": code,
            "data": {
                "merchantId": "MERCHANT",
                "merchantTransactionId": order_id,
                "transactionId": format!("T-{order_id}"),
                "amount": amount,
                "state": state,
                "responseCode": "SUCCESS"
            }
        });
        let encoded = Base64::encode_string(body.to_string().as_bytes());
        let signature = signature::sign_encoded(&encoded, "", SALT, "1");
        (encoded, signature)
    }

    struct Fixture {
        verifier: CallbackVerifier,
        store: Arc<Store>,
        subscriptions: SubscriptionResolver,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let (store, dir) = temp_store();
        let subscriptions = SubscriptionResolver::new(store.clone());
        let verifier = CallbackVerifier::new(
            KeyRing::parse(&format!("{SALT}:1")).unwrap(),
            "",
            store.clone(),
            subscriptions.clone(),
        );
        PaymentLedger::new(&store)
            .insert_created(&PaymentAttempt::new(
                "ORD_1",
                "user-a",
                84_900,
                "basic",
                BillingCycle::Monthly,
                Utc::now(),
            ))
            .unwrap();
        Fixture {
            verifier,
            store,
            subscriptions,
            _dir: dir,
        }
    }

    fn status(f: &Fixture) -> PaymentStatus {
        PaymentLedger::new(&f.store).get("ORD_1").unwrap().unwrap().status
    }

    #[test]
    fn valid_success_callback_applies_and_credits() {
        let f = fixture();
        let (payload, sig) = signed_callback("ORD_1", "PAYMENT_SUCCESS", "COMPLETED", 84_900);

        let ack = f.verifier.handle_callback(&payload, &sig).unwrap();
        assert_eq!(
            ack,
            AckResult::Applied {
                order_id: "ORD_1".into(),
                status: PaymentStatus::Succeeded
            }
        );
        assert_eq!(f.subscriptions.resolve("user-a").unwrap(), EntitlementState::Active);

        let attempt = PaymentLedger::new(&f.store).get("ORD_1").unwrap().unwrap();
        assert_eq!(attempt.gateway_transaction_id.as_deref(), Some("T-ORD_1"));
    }

    #[test]
    fn replayed_callback_is_idempotent() {
        let f = fixture();
        let (payload, sig) = signed_callback("ORD_1", "PAYMENT_SUCCESS", "COMPLETED", 84_900);

        f.verifier.handle_callback(&payload, &sig).unwrap();
        let period_end = f
            .subscriptions
            .status_summary("user-a", Utc::now())
            .unwrap()
            .subscription
            .unwrap()
            .current_period_end;

        for _ in 0..3 {
            let ack = f.verifier.handle_callback(&payload, &sig).unwrap();
            assert!(matches!(ack, AckResult::Duplicate { status: PaymentStatus::Succeeded, .. }));
        }

        let after = f
            .subscriptions
            .status_summary("user-a", Utc::now())
            .unwrap()
            .subscription
            .unwrap()
            .current_period_end;
        assert_eq!(period_end, after);
        assert_eq!(PaymentLedger::new(&f.store).transitions("ORD_1").unwrap().len(), 1);
    }

    #[test]
    fn forged_signature_changes_nothing() {
        let f = fixture();
        let (payload, _) = signed_callback("ORD_1", "PAYMENT_SUCCESS", "COMPLETED", 84_900);
        let forged = signature::sign_encoded(&payload, "", "attacker-salt", "1");

        for candidate in [forged.as_str(), "", "deadbeef###1"] {
            let ack = f.verifier.handle_callback(&payload, candidate).unwrap();
            assert_eq!(ack, AckResult::Rejected(RejectReason::InvalidSignature));
        }
        assert_eq!(status(&f), PaymentStatus::Created);
        assert_eq!(f.subscriptions.resolve("user-a").unwrap(), EntitlementState::None);
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let f = fixture();
        let (_, sig) = signed_callback("ORD_1", "PAYMENT_ERROR", "FAILED", 84_900);
        let (tampered, _) = signed_callback("ORD_1", "PAYMENT_SUCCESS", "COMPLETED", 84_900);

        let ack = f.verifier.handle_callback(&tampered, &sig).unwrap();
        assert!(ack.is_rejected());
        assert_eq!(status(&f), PaymentStatus::Created);
    }

    #[test]
    fn undecodable_payload_is_rejected_after_signature_check() {
        let f = fixture();
        let payload = Base64::encode_string(b"not json");
        let sig = signature::sign_encoded(&payload, "", SALT, "1");

        let ack = f.verifier.handle_callback(&payload, &sig).unwrap();
        assert_eq!(ack, AckResult::Rejected(RejectReason::MalformedPayload));
    }

    #[test]
    fn unknown_order_is_ignored() {
        let f = fixture();
        let (payload, sig) = signed_callback("ORD_other", "PAYMENT_SUCCESS", "COMPLETED", 84_900);

        let ack = f.verifier.handle_callback(&payload, &sig).unwrap();
        assert!(matches!(ack, AckResult::Ignored { ref order_id, .. } if order_id == "ORD_other"));
    }

    #[test]
    fn failure_after_success_is_a_duplicate() {
        let f = fixture();
        let (ok_payload, ok_sig) = signed_callback("ORD_1", "PAYMENT_SUCCESS", "COMPLETED", 84_900);
        let (fail_payload, fail_sig) = signed_callback("ORD_1", "PAYMENT_ERROR", "FAILED", 84_900);

        f.verifier.handle_callback(&ok_payload, &ok_sig).unwrap();
        let ack = f.verifier.handle_callback(&fail_payload, &fail_sig).unwrap();
        assert!(matches!(ack, AckResult::Duplicate { status: PaymentStatus::Succeeded, .. }));
        assert_eq!(f.subscriptions.resolve("user-a").unwrap(), EntitlementState::Active);
    }

    #[test]
    fn amount_mismatch_does_not_credit() {
        let f = fixture();
        let (payload, sig) = signed_callback("ORD_1", "PAYMENT_SUCCESS", "COMPLETED", 100);

        let ack = f.verifier.handle_callback(&payload, &sig).unwrap();
        assert!(matches!(ack, AckResult::Ignored { .. }));
        assert_eq!(status(&f), PaymentStatus::Created);
    }

    #[test]
    fn refund_callback_revokes_credit() {
        let f = fixture();
        let (ok_payload, ok_sig) = signed_callback("ORD_1", "PAYMENT_SUCCESS", "COMPLETED", 84_900);
        let (refund_payload, refund_sig) =
            signed_callback("ORD_1", "PAYMENT_REFUNDED", "REFUNDED", 84_900);

        f.verifier.handle_callback(&ok_payload, &ok_sig).unwrap();
        let ack = f.verifier.handle_callback(&refund_payload, &refund_sig).unwrap();
        assert!(matches!(ack, AckResult::Applied { status: PaymentStatus::Refunded, .. }));
        assert_ne!(f.subscriptions.resolve("user-a").unwrap(), EntitlementState::Active);
    }

    #[test]
    fn rotated_key_is_accepted() {
        let (store, _dir) = temp_store();
        let subscriptions = SubscriptionResolver::new(store.clone());
        let verifier = CallbackVerifier::new(
            KeyRing::parse(&format!("new-salt:2,{SALT}:1")).unwrap(),
            "",
            store.clone(),
            subscriptions,
        );
        let (payload, sig) = signed_callback("ORD_x", "PAYMENT_SUCCESS", "COMPLETED", 1);
        assert!(!verifier.handle_callback(&payload, &sig).unwrap().is_rejected());
    }

    #[test]
    fn reported_status_mapping() {
        assert_eq!(
            reported_status("PAYMENT_SUCCESS", Some("COMPLETED")),
            Some(PaymentStatus::Succeeded)
        );
        assert_eq!(
            reported_status("PAYMENT_ERROR", None),
            Some(PaymentStatus::Failed)
        );
        assert_eq!(
            reported_status("PAYMENT_PENDING", Some("PENDING")),
            Some(PaymentStatus::Processing)
        );
        assert_eq!(
            reported_status("PAYMENT_REFUNDED", None),
            Some(PaymentStatus::Refunded)
        );
        assert_eq!(reported_status("TRANSACTION_NOT_FOUND", None), None);
    }
}
