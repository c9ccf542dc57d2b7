// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! All settings come from the environment and are read once at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Directory holding the database file | `./data` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `PHONEPE_MERCHANT_ID` | Merchant id issued by the gateway | Required |
//! | `PHONEPE_SALT_KEYS` | `secret:index` pairs, comma separated, newest first | Required |
//! | `PHONEPE_ENV` | `sandbox` or `production` | `sandbox` |
//! | `PHONEPE_BASE_URL` | Override for the gateway base URL | per `PHONEPE_ENV` |
//! | `PHONEPE_REDIRECT_BASE_URL` | App origin the user returns to after checkout | Required |
//! | `PHONEPE_CALLBACK_URL` | Public URL of `POST /payments/callback` | Required |
//! | `PHONEPE_CALLBACK_SIGNING_PATH` | Path component of the callback checksum | empty |
//! | `PHONEPE_TIMEOUT_SECS` | Per-request gateway timeout | `10` |
//! | `PAYMENT_RETRY_MAX_ATTEMPTS` | Attempts per gateway call, including the first | `8` |
//! | `PAYMENT_POLL_MAX_WAIT_SECS` | Cap on total backoff per call | `60` |
//! | `PAYMENT_ABANDON_AFTER_SECS` | Age after which an order unknown to the gateway fails | `900` |
//! | `RECONCILER_ENABLED` | Run the background reconciler | `true` |
//! | `RECONCILER_INTERVAL_SECS` | Seconds between reconciler sweeps | `30` |
//! | `RECONCILER_GRACE_SECS` | Minimum attempt age before the reconciler looks at it | `60` |
//! | `AUTH_JWT_SECRET` | HS256 secret for user access tokens | Required outside `dev` builds |
//! | `AUTH_JWT_ISSUER` | Expected `iss` claim | Optional |
//! | `AUTH_JWT_AUDIENCE` | Expected `aud` claim | Optional |

use std::{fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use crate::{
    auth::AuthConfig,
    gateway::{GatewayEnvironment, KeyRing, MerchantConfig, RetryPolicy},
};

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const PHONEPE_MERCHANT_ID_ENV: &str = "PHONEPE_MERCHANT_ID";
pub const PHONEPE_SALT_KEYS_ENV: &str = "PHONEPE_SALT_KEYS";
pub const PHONEPE_ENV_ENV: &str = "PHONEPE_ENV";
pub const PHONEPE_BASE_URL_ENV: &str = "PHONEPE_BASE_URL";
pub const PHONEPE_REDIRECT_BASE_URL_ENV: &str = "PHONEPE_REDIRECT_BASE_URL";
pub const PHONEPE_CALLBACK_URL_ENV: &str = "PHONEPE_CALLBACK_URL";
pub const PHONEPE_CALLBACK_SIGNING_PATH_ENV: &str = "PHONEPE_CALLBACK_SIGNING_PATH";
pub const PHONEPE_TIMEOUT_SECS_ENV: &str = "PHONEPE_TIMEOUT_SECS";

pub const PAYMENT_RETRY_MAX_ATTEMPTS_ENV: &str = "PAYMENT_RETRY_MAX_ATTEMPTS";
pub const PAYMENT_POLL_MAX_WAIT_SECS_ENV: &str = "PAYMENT_POLL_MAX_WAIT_SECS";
pub const PAYMENT_ABANDON_AFTER_SECS_ENV: &str = "PAYMENT_ABANDON_AFTER_SECS";

pub const RECONCILER_ENABLED_ENV: &str = "RECONCILER_ENABLED";
pub const RECONCILER_INTERVAL_SECS_ENV: &str = "RECONCILER_INTERVAL_SECS";
pub const RECONCILER_GRACE_SECS_ENV: &str = "RECONCILER_GRACE_SECS";

pub const AUTH_JWT_SECRET_ENV: &str = "AUTH_JWT_SECRET";
pub const AUTH_JWT_ISSUER_ENV: &str = "AUTH_JWT_ISSUER";
pub const AUTH_JWT_AUDIENCE_ENV: &str = "AUTH_JWT_AUDIENCE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(format!("expected json or pretty, got {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub environment: GatewayEnvironment,
    pub base_url: String,
    pub merchant: MerchantConfig,
    pub keys: KeyRing,
    pub callback_signing_path: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub abandon_after: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct ReconcilerConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub grace: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub log_format: LogFormat,
    pub gateway: GatewayConfig,
    pub reconciler: ReconcilerConfig,
    pub auth: AuthConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. `from_env` passes the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let environment: GatewayEnvironment = env.or_default(PHONEPE_ENV_ENV, GatewayEnvironment::Sandbox)?;
        let base_url = env
            .optional(PHONEPE_BASE_URL_ENV)
            .unwrap_or_else(|| environment.default_base_url().to_string());

        let keys = KeyRing::parse(&env.required(PHONEPE_SALT_KEYS_ENV)?).map_err(|e| {
            ConfigError::Invalid {
                name: PHONEPE_SALT_KEYS_ENV,
                reason: e.to_string(),
            }
        })?;

        let max_attempts: u32 = env.or_default(PAYMENT_RETRY_MAX_ATTEMPTS_ENV, 8)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: PAYMENT_RETRY_MAX_ATTEMPTS_ENV,
                reason: "must be at least 1".to_string(),
            });
        }
        let retry = RetryPolicy {
            max_attempts,
            max_total_wait: Some(env.seconds(PAYMENT_POLL_MAX_WAIT_SECS_ENV, 60)?),
            ..RetryPolicy::default()
        };

        let gateway = GatewayConfig {
            environment,
            base_url,
            merchant: MerchantConfig {
                merchant_id: env.required(PHONEPE_MERCHANT_ID_ENV)?,
                redirect_base_url: env.required(PHONEPE_REDIRECT_BASE_URL_ENV)?,
                callback_url: env.required(PHONEPE_CALLBACK_URL_ENV)?,
            },
            keys,
            callback_signing_path: env.optional(PHONEPE_CALLBACK_SIGNING_PATH_ENV).unwrap_or_default(),
            timeout: env.seconds(PHONEPE_TIMEOUT_SECS_ENV, 10)?,
            retry,
            abandon_after: env.seconds(PAYMENT_ABANDON_AFTER_SECS_ENV, 900)?,
        };

        let reconciler = ReconcilerConfig {
            enabled: env.or_default(RECONCILER_ENABLED_ENV, true)?,
            interval: env.seconds(RECONCILER_INTERVAL_SECS_ENV, 30)?,
            grace: env.seconds(RECONCILER_GRACE_SECS_ENV, 60)?,
        };

        let auth = AuthConfig {
            jwt_secret: env.optional(AUTH_JWT_SECRET_ENV),
            issuer: env.optional(AUTH_JWT_ISSUER_ENV),
            audience: env.optional(AUTH_JWT_AUDIENCE_ENV),
        };

        Ok(Self {
            host: env.optional(HOST_ENV).unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env.or_default(PORT_ENV, 8080)?,
            data_dir: PathBuf::from(env.optional(DATA_DIR_ENV).unwrap_or_else(|| "./data".to_string())),
            log_format: env.or_default(LOG_FORMAT_ENV, LogFormat::Pretty)?,
            gateway,
            reconciler,
            auth,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("gate.redb")
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    /// Set and non-blank.
    fn optional(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.optional(name).ok_or(ConfigError::Missing(name))
    }

    fn or_default<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.optional(name) {
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                reason: e.to_string(),
            }),
            None => Ok(default),
        }
    }

    fn seconds(&self, name: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.or_default(name, default).map(Duration::from_secs)
    }
}
