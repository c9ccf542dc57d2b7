// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{process::ExitCode, sync::Arc};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use wellness_gate_server::{
    api::router,
    config::{AppConfig, LogFormat},
    gateway::HttpTransport,
    reconciler::PaymentReconciler,
    state::AppState,
    storage::Store,
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(config.log_format);

    match serve(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "Server failed");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=debug"));

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

async fn serve(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let database_path = config.database_path();
    let store = Arc::new(Store::open(&database_path)?);
    info!(path = %database_path.display(), "Database opened");

    let transport = HttpTransport::new(&config.gateway.base_url, config.gateway.timeout)?;
    if config.auth.jwt_secret.is_none() {
        warn!(target: "security", "AUTH_JWT_SECRET is not set; authenticated routes will reject every token");
    }

    let state = AppState::new(
        store.clone(),
        &config.gateway,
        Arc::new(transport),
        config.auth.clone(),
    );

    let shutdown = CancellationToken::new();
    let reconciler = if config.reconciler.enabled {
        let reconciler = PaymentReconciler::new(store, state.payments.clone())
            .with_interval(config.reconciler.interval)
            .with_grace(config.reconciler.grace);
        Some(tokio::spawn(reconciler.run(shutdown.clone())))
    } else {
        info!("Payment reconciler disabled");
        None
    };

    let addr = config.bind_address();
    let listener = TcpListener::bind(&addr).await?;
    info!(
        addr = %addr,
        gateway = ?config.gateway.environment,
        "Wellness gate listening (docs at /docs)"
    );

    let server_shutdown = shutdown.clone();
    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
                _ = server_shutdown.cancelled() => {}
            }
        })
        .await;

    shutdown.cancel();
    if let Some(handle) = reconciler {
        if let Err(err) = handle.await {
            warn!(error = %err, "Reconciler task ended abnormally");
        }
    }

    result.map_err(Into::into)
}
