#![forbid(unsafe_code)]

use std::path::PathBuf;

use signup::config::Configuration;
use signup::telemetry::{self, OTLP_ENDPOINT_ENV};
use tokio::net::TcpListener;
use tokio::signal;

const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

#[tokio::main]
async fn main() {
    let provider = match telemetry::init(std::env::var(OTLP_ENDPOINT_ENV).ok().as_deref()) {
        Ok(provider) => provider,
        Err(error) => {
            eprintln!("Cannot initialize telemetry: {error}");
            std::process::exit(1);
        },
    };

    let mut config = Configuration::default();
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        config = config.path(PathBuf::from(path));
    }
    let config = match config.read() {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(%error, "invalid configuration");
            std::process::exit(1);
        },
    };

    let metrics = if config.telemetry.metrics {
        match telemetry::setup_metrics_recorder() {
            Ok(handle) => Some(handle),
            Err(error) => {
                tracing::warn!(%error, "Prometheus recorder not installed");
                None
            },
        }
    } else {
        None
    };

    // Without a document store the service is useless.
    let state = match signup::initialize_state(config.clone(), metrics).await {
        Ok(state) => state,
        Err(error) => {
            tracing::error!(%error, "cannot initialize application state");
            std::process::exit(1);
        },
    };

    let addr = config.server.socket_addr();
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(%error, %addr, "cannot bind listener");
            std::process::exit(1);
        },
    };
    tracing::info!(%addr, "server is listening");

    if let Err(error) = axum::serve(listener, signup::app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(%error, "server stopped unexpectedly");
    }

    if let Some(provider) = provider {
        if let Err(error) = provider.shutdown() {
            tracing::warn!(%error, "tracer provider did not flush");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!(%error, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(error) => {
                tracing::error!(%error, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutting down gracefully");
}
