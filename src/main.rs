//! sflow-collector binary: bind, decode, produce, render, emit.

mod config;
mod decoder;
mod extract;
mod flow;
mod format;
mod ingest;
mod packet;
mod producer;
mod transport;

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, prelude::*};

use crate::config::CollectorConfig;
use crate::format::Formatter;
use crate::ingest::{CollectorMetrics, IngestService, Pipeline};

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_ansi(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cfg = CollectorConfig::parse();
    if let Err(err) = cfg.validate() {
        tracing::error!("invalid configuration: {err:#}");
        std::process::exit(1);
    }

    let document = match cfg.load_schema() {
        Ok(document) => document,
        Err(err) => {
            tracing::error!("failed to load schema document: {err:#}");
            std::process::exit(1);
        }
    };

    let rules = match extract::compile_rules(&document) {
        Ok(rules) => rules,
        Err(err) => {
            tracing::error!("failed to compile extraction rules: {err:#}");
            std::process::exit(1);
        }
    };
    let formatter = match Formatter::new(cfg.format, &document) {
        Ok(formatter) => formatter,
        Err(err) => {
            tracing::error!("failed to build formatter: {err:#}");
            std::process::exit(1);
        }
    };
    let pipeline = Arc::new(Pipeline { rules, formatter });

    let transport = match transport::build_transport(&cfg) {
        Ok(transport) => transport,
        Err(err) => {
            tracing::error!("failed to set up transport: {err:#}");
            std::process::exit(1);
        }
    };

    let metrics = Arc::new(CollectorMetrics::default());
    let shutdown = CancellationToken::new();

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("shutdown signal received");
        signal_shutdown.cancel();
    });

    let service = IngestService::new(cfg, pipeline, transport, metrics);
    if let Err(err) = service.run(shutdown).await {
        tracing::error!("collector failed: {err:#}");
        std::process::exit(1);
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(err) => {
            tracing::warn!("failed to install SIGTERM handler: {err}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
