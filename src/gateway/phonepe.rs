// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! PhonePe PG v1 hosted checkout: pay and status endpoints.

use std::sync::Arc;

use base64ct::{Base64, Encoding};
use serde_json::{json, Value};
use tracing::debug;

use super::{
    error::GatewayError,
    signature::KeyRing,
    transport::{GatewayMethod, GatewayRequest, GatewayResponse, GatewayTransport},
};
use crate::models::BillingCycle;

pub const PAY_PATH: &str = "/pg/v1/pay";
pub const SANDBOX_BASE_URL: &str = "https://api-preprod.phonepe.com/apis/pg-sandbox";
pub const PRODUCTION_BASE_URL: &str = "https://api.phonepe.com/apis/hermes";

pub const VERIFY_HEADER: &str = "X-VERIFY";
const MERCHANT_HEADER: &str = "X-MERCHANT-ID";
const TRANSACTION_NOT_FOUND: &str = "TRANSACTION_NOT_FOUND";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayEnvironment {
    Sandbox,
    Production,
}

impl GatewayEnvironment {
    pub fn default_base_url(self) -> &'static str {
        match self {
            GatewayEnvironment::Sandbox => SANDBOX_BASE_URL,
            GatewayEnvironment::Production => PRODUCTION_BASE_URL,
        }
    }
}

impl std::str::FromStr for GatewayEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" | "uat" | "preprod" => Ok(GatewayEnvironment::Sandbox),
            "production" | "prod" => Ok(GatewayEnvironment::Production),
            other => Err(format!("unknown gateway environment: {other}")),
        }
    }
}

/// Merchant identity and return URLs.
#[derive(Debug, Clone)]
pub struct MerchantConfig {
    pub merchant_id: String,
    /// Front-end origin the user returns to after checkout.
    pub redirect_base_url: String,
    /// Public URL of `POST /payments/callback`.
    pub callback_url: String,
}

pub struct PayRequest<'a> {
    pub order_id: &'a str,
    pub user_id: &'a str,
    pub amount_minor_units: u64,
    pub plan_slug: &'a str,
    pub billing_cycle: BillingCycle,
}

/// Gateway's view of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayPaymentState {
    Pending,
    Completed,
    Failed,
    /// The gateway has no record of the order.
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub state: GatewayPaymentState,
    pub code: String,
    pub gateway_transaction_id: Option<String>,
}

pub struct PhonePeApi {
    merchant: MerchantConfig,
    keys: KeyRing,
    transport: Arc<dyn GatewayTransport>,
}

impl PhonePeApi {
    pub fn new(merchant: MerchantConfig, keys: KeyRing, transport: Arc<dyn GatewayTransport>) -> Self {
        Self {
            merchant,
            keys,
            transport,
        }
    }

    pub fn merchant_id(&self) -> &str {
        &self.merchant.merchant_id
    }

    /// Create a hosted checkout session; returns the redirect URL.
    pub async fn pay(&self, request: &PayRequest<'_>) -> Result<String, GatewayError> {
        let payload = json!({
            "merchantId": self.merchant.merchant_id,
            "merchantTransactionId": request.order_id,
            "merchantUserId": request.user_id,
            "amount": request.amount_minor_units,
            "redirectUrl": self.redirect_url(request),
            "redirectMode": "REDIRECT",
            "callbackUrl": self.merchant.callback_url,
            "paymentInstrument": { "type": "PAY_PAGE" }
        });
        let encoded = Base64::encode_string(payload.to_string().as_bytes());
        let signature = self.keys.sign_encoded(&encoded, PAY_PATH);

        let response = self
            .transport
            .send(GatewayRequest {
                method: GatewayMethod::Post,
                path: PAY_PATH.to_string(),
                headers: vec![
                    (VERIFY_HEADER, signature),
                    (MERCHANT_HEADER, self.merchant.merchant_id.clone()),
                ],
                body: Some(json!({ "request": encoded })),
            })
            .await?;

        let body = classify(&response)?;
        if !body.get("success").and_then(Value::as_bool).unwrap_or(false) {
            return Err(rejection(response.status, &body));
        }

        body.pointer("/data/instrumentResponse/redirectInfo/url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| GatewayError::ServerError {
                status: response.status,
                message: "missing redirect url in pay response".to_string(),
            })
    }

    pub async fn check_status(&self, order_id: &str) -> Result<StatusReport, GatewayError> {
        let path = status_path(&self.merchant.merchant_id, order_id);
        let signature = self.keys.sign(b"", &path);

        let response = self
            .transport
            .send(GatewayRequest {
                method: GatewayMethod::Get,
                path: path.clone(),
                headers: vec![
                    (VERIFY_HEADER, signature),
                    (MERCHANT_HEADER, self.merchant.merchant_id.clone()),
                ],
                body: None,
            })
            .await?;

        let body = match classify(&response) {
            Ok(body) => body,
            Err(GatewayError::Rejected { code, .. }) if code == TRANSACTION_NOT_FOUND => {
                return Ok(StatusReport {
                    state: GatewayPaymentState::NotFound,
                    code,
                    gateway_transaction_id: None,
                });
            }
            Err(error) => return Err(error),
        };

        let code = body
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let state = body.pointer("/data/state").and_then(Value::as_str);
        let report = StatusReport {
            state: map_payment_state(&code, state),
            gateway_transaction_id: body
                .pointer("/data/transactionId")
                .and_then(Value::as_str)
                .map(str::to_string),
            code,
        };
        debug!(order_id = %order_id, code = %report.code, state = ?report.state, "Gateway status checked");
        Ok(report)
    }

    fn redirect_url(&self, request: &PayRequest<'_>) -> String {
        let base = self.merchant.redirect_base_url.trim_end_matches('/');
        let query: String = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("orderId", request.order_id)
            .append_pair("plan", request.plan_slug)
            .append_pair("cycle", request.billing_cycle.as_str())
            .finish();
        format!("{base}/payment/success?{query}")
    }
}

pub fn status_path(merchant_id: &str, order_id: &str) -> String {
    format!("/pg/v1/status/{merchant_id}/{order_id}")
}

/// `data.state` wins when present; otherwise the response code decides.
pub fn map_payment_state(code: &str, state: Option<&str>) -> GatewayPaymentState {
    if let Some(state) = state {
        match state.trim().to_ascii_uppercase().as_str() {
            "COMPLETED" => return GatewayPaymentState::Completed,
            "FAILED" => return GatewayPaymentState::Failed,
            "PENDING" => return GatewayPaymentState::Pending,
            _ => {}
        }
    }
    match code.trim().to_ascii_uppercase().as_str() {
        "PAYMENT_SUCCESS" => GatewayPaymentState::Completed,
        "PAYMENT_ERROR" | "PAYMENT_DECLINED" | "TIMED_OUT" | "AUTHORIZATION_FAILED"
        | "PAYMENT_CANCELLED" => GatewayPaymentState::Failed,
        TRANSACTION_NOT_FOUND => GatewayPaymentState::NotFound,
        _ => GatewayPaymentState::Pending,
    }
}

/// Any 4xx is a rejection, whatever its body. 5xx, and success bodies that
/// do not parse, are server errors.
fn classify(response: &GatewayResponse) -> Result<Value, GatewayError> {
    let status = response.status;
    if (400..500).contains(&status) {
        return Err(match serde_json::from_str::<Value>(&response.body) {
            Ok(body) => rejection(status, &body),
            Err(_) => GatewayError::Rejected {
                code: format!("HTTP_{status}"),
                message: truncate(&response.body),
            },
        });
    }
    if status >= 500 {
        return Err(GatewayError::ServerError {
            status,
            message: truncate(&response.body),
        });
    }

    let body: Value = serde_json::from_str(&response.body).map_err(|e| GatewayError::ServerError {
        status,
        message: format!("invalid JSON body: {e}"),
    })?;

    if !(200..300).contains(&status) {
        return Err(rejection(status, &body));
    }
    Ok(body)
}

fn rejection(status: u16, body: &Value) -> GatewayError {
    GatewayError::Rejected {
        code: body
            .get("code")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP_{status}")),
        message: body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{
        signature,
        transport::testing::{self, ScriptedTransport},
    };

    const SALT: &str = "salt-key";

    fn api(transport: Arc<ScriptedTransport>) -> PhonePeApi {
        PhonePeApi::new(
            MerchantConfig {
                merchant_id: "MERCHANT".into(),
                redirect_base_url: "https://app.example.com/".into(),
                callback_url: "https://api.example.com/payments/callback".into(),
            },
            KeyRing::parse(&format!("{SALT}:1")).unwrap(),
            transport,
        )
    }

    fn pay_request() -> PayRequest<'static> {
        PayRequest {
            order_id: "ORD_1",
            user_id: "user-a",
            amount_minor_units: 84_900,
            plan_slug: "basic",
            billing_cycle: BillingCycle::Monthly,
        }
    }

    #[tokio::test]
    async fn pay_sends_signed_encoded_payload() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_pay(testing::pay_accepted("https://checkout.example/pay/1"));
        let api = api(transport.clone());

        let redirect = api.pay(&pay_request()).await.unwrap();
        assert_eq!(redirect, "https://checkout.example/pay/1");

        let request = &transport.requests()[0];
        assert_eq!(request.path, PAY_PATH);
        assert_eq!(request.header("X-MERCHANT-ID"), Some("MERCHANT"));

        let encoded = request.body.as_ref().unwrap()["request"].as_str().unwrap();
        let expected = signature::sign_encoded(encoded, PAY_PATH, SALT, "1");
        assert_eq!(request.header("X-VERIFY"), Some(expected.as_str()));

        let payload: Value = serde_json::from_slice(&Base64::decode_vec(encoded).unwrap()).unwrap();
        assert_eq!(payload["merchantTransactionId"], "ORD_1");
        assert_eq!(payload["amount"], 84_900);
        assert_eq!(payload["redirectMode"], "REDIRECT");
        assert_eq!(payload["paymentInstrument"]["type"], "PAY_PAGE");
        assert_eq!(
            payload["redirectUrl"],
            "https://app.example.com/payment/success?orderId=ORD_1&plan=basic&cycle=monthly"
        );
    }

    #[tokio::test]
    async fn pay_classifies_failures() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push_pay(testing::rejected(400, "BAD_REQUEST"))
            .push_pay(testing::server_error())
            .push_pay(testing::unreachable())
            .push_pay(Ok(GatewayResponse {
                status: 200,
                body: "<html>".into(),
            }));
        let api = api(transport);

        assert!(matches!(
            api.pay(&pay_request()).await,
            Err(GatewayError::Rejected { code, .. }) if code == "BAD_REQUEST"
        ));
        assert!(matches!(
            api.pay(&pay_request()).await,
            Err(GatewayError::ServerError { status: 503, .. })
        ));
        assert!(matches!(
            api.pay(&pay_request()).await,
            Err(GatewayError::Unreachable(_))
        ));
        assert!(matches!(
            api.pay(&pay_request()).await,
            Err(GatewayError::ServerError { status: 200, .. })
        ));
    }

    #[tokio::test]
    async fn client_errors_without_json_are_rejections() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push_pay(Ok(GatewayResponse {
                status: 401,
                body: "<html>Unauthorized</html>".into(),
            }))
            .push_pay(Ok(GatewayResponse {
                status: 413,
                body: String::new(),
            }))
            .push_status(Ok(GatewayResponse {
                status: 403,
                body: "forbidden".into(),
            }));
        let api = api(transport);

        let error = api.pay(&pay_request()).await.unwrap_err();
        assert!(!error.is_retryable());
        assert!(matches!(error, GatewayError::Rejected { ref code, .. } if code == "HTTP_401"));
        assert!(matches!(
            api.pay(&pay_request()).await,
            Err(GatewayError::Rejected { code, .. }) if code == "HTTP_413"
        ));
        assert!(matches!(
            api.check_status("ORD_1").await,
            Err(GatewayError::Rejected { code, .. }) if code == "HTTP_403"
        ));
    }

    #[tokio::test]
    async fn check_status_signs_path_and_maps_state() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_status(Ok(testing::status_response(
            "PAYMENT_SUCCESS",
            "COMPLETED",
            Some("T2401"),
        )));
        let api = api(transport.clone());

        let report = api.check_status("ORD_1").await.unwrap();
        assert_eq!(report.state, GatewayPaymentState::Completed);
        assert_eq!(report.gateway_transaction_id.as_deref(), Some("T2401"));

        let request = &transport.requests()[0];
        assert_eq!(request.path, "/pg/v1/status/MERCHANT/ORD_1");
        let expected = signature::sign(b"", "/pg/v1/status/MERCHANT/ORD_1", SALT, "1");
        assert_eq!(request.header("X-VERIFY"), Some(expected.as_str()));
    }

    #[tokio::test]
    async fn check_status_treats_missing_transaction_as_not_found() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_status(testing::rejected(404, "TRANSACTION_NOT_FOUND"));
        let report = api(transport).check_status("ORD_1").await.unwrap();
        assert_eq!(report.state, GatewayPaymentState::NotFound);
    }

    #[test]
    fn payment_state_mapping_is_stable() {
        assert_eq!(
            map_payment_state("PAYMENT_SUCCESS", None),
            GatewayPaymentState::Completed
        );
        assert_eq!(
            map_payment_state("PAYMENT_ERROR", None),
            GatewayPaymentState::Failed
        );
        assert_eq!(
            map_payment_state("PAYMENT_PENDING", Some("PENDING")),
            GatewayPaymentState::Pending
        );
        assert_eq!(
            map_payment_state("PAYMENT_SUCCESS", Some("FAILED")),
            GatewayPaymentState::Failed
        );
        assert_eq!(
            map_payment_state("INTERNAL_SERVER_ERROR", None),
            GatewayPaymentState::Pending
        );
    }

    #[test]
    fn environment_parsing() {
        assert_eq!(
            "UAT".parse::<GatewayEnvironment>().unwrap().default_base_url(),
            SANDBOX_BASE_URL
        );
        assert_eq!(
            "production".parse::<GatewayEnvironment>().unwrap(),
            GatewayEnvironment::Production
        );
        assert!("staging".parse::<GatewayEnvironment>().is_err());
    }
}
