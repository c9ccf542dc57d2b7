// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HTTP seam between the gateway client and the network.

use std::{future::Future, pin::Pin, time::Duration};

use reqwest::Client;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayMethod {
    Get,
    Post,
}

/// Request relative to the gateway base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayRequest {
    pub method: GatewayMethod,
    pub path: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Option<Value>,
}

impl GatewayRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Raw status and body; classification happens in the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("gateway request timed out: {0}")]
    Timeout(String),

    #[error("gateway connection failed: {0}")]
    Connect(String),
}

pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<GatewayResponse, TransportError>> + Send + 'a>>;

/// Object-safe so the client can hold `Arc<dyn GatewayTransport>`.
pub trait GatewayTransport: Send + Sync {
    fn send(&self, request: GatewayRequest) -> TransportFuture<'_>;
}

/// Production transport over reqwest with rustls.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    http: Client,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Connect(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }
}

impl GatewayTransport for HttpTransport {
    fn send(&self, request: GatewayRequest) -> TransportFuture<'_> {
        Box::pin(async move {
            let url = format!("{}{}", self.base_url, request.path);
            let mut builder = match request.method {
                GatewayMethod::Get => self.http.get(&url),
                GatewayMethod::Post => self.http.post(&url),
            };
            builder = builder.header("Content-Type", "application/json");
            for (name, value) in &request.headers {
                builder = builder.header(*name, value);
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let response = builder.send().await.map_err(classify_reqwest_error)?;
            let status = response.status().as_u16();
            let body = response.text().await.map_err(classify_reqwest_error)?;
            Ok(GatewayResponse { status, body })
        })
    }
}

fn classify_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(error.to_string())
    } else {
        TransportError::Connect(error.to_string())
    }
}
