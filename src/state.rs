// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::{
    access::{AccessGuard, StoreFacts},
    auth::AuthConfig,
    callback::CallbackVerifier,
    config::GatewayConfig,
    gateway::{GatewayTransport, PaymentGatewayClient, PhonePeApi},
    storage::Store,
    subscription::SubscriptionResolver,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub payments: Arc<PaymentGatewayClient>,
    pub callbacks: Arc<CallbackVerifier>,
    pub subscriptions: SubscriptionResolver,
    pub guard: Arc<AccessGuard<StoreFacts>>,
    pub auth_config: AuthConfig,
}

impl AppState {
    /// Wire the services over one store. The transport is injected so tests
    /// can script the gateway.
    pub fn new(
        store: Arc<Store>,
        gateway: &GatewayConfig,
        transport: Arc<dyn GatewayTransport>,
        auth_config: AuthConfig,
    ) -> Self {
        let subscriptions = SubscriptionResolver::new(store.clone());
        let api = PhonePeApi::new(gateway.merchant.clone(), gateway.keys.clone(), transport);
        let payments = PaymentGatewayClient::new(
            store.clone(),
            api,
            subscriptions.clone(),
            gateway.retry,
        )
        .with_abandon_after(gateway.abandon_after);
        let callbacks = CallbackVerifier::new(
            gateway.keys.clone(),
            gateway.callback_signing_path.clone(),
            store.clone(),
            subscriptions.clone(),
        );
        let guard = AccessGuard::new(StoreFacts::new(store.clone(), subscriptions.clone()));

        Self {
            store,
            payments: Arc::new(payments),
            callbacks: Arc::new(callbacks),
            subscriptions,
            guard: Arc::new(guard),
            auth_config,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{sync::Arc, time::Duration};

    use super::AppState;
    use crate::{
        auth::{extractor::tests::TEST_SECRET, AuthConfig},
        callback::tests::SALT,
        config::GatewayConfig,
        gateway::{
            transport::testing::ScriptedTransport, GatewayEnvironment, KeyRing, MerchantConfig,
            RetryPolicy,
        },
        storage::temp_store,
    };

    pub(crate) struct TestState {
        pub state: AppState,
        pub transport: Arc<ScriptedTransport>,
        _dir: tempfile::TempDir,
    }

    pub(crate) fn gateway_config() -> GatewayConfig {
        GatewayConfig {
            environment: GatewayEnvironment::Sandbox,
            base_url: "http://gateway.test".into(),
            merchant: MerchantConfig {
                merchant_id: "MERCHANT".into(),
                redirect_base_url: "https://app.example.com".into(),
                callback_url: "https://api.example.com/payments/callback".into(),
            },
            keys: KeyRing::parse(&format!("{SALT}:1")).unwrap(),
            callback_signing_path: String::new(),
            timeout: Duration::from_secs(1),
            retry: RetryPolicy::immediate(2),
            abandon_after: Duration::from_secs(900),
        }
    }

    pub(crate) fn test_state() -> TestState {
        let (store, dir) = temp_store();
        let transport = Arc::new(ScriptedTransport::new());
        let state = AppState::new(
            store,
            &gateway_config(),
            transport.clone(),
            AuthConfig {
                jwt_secret: Some(TEST_SECRET.to_string()),
                issuer: Some("test".to_string()),
                audience: Some("authenticated".to_string()),
            },
        );
        TestState {
            state,
            transport,
            _dir: dir,
        }
    }
}
