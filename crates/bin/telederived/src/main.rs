//! # telederived, the telemetry derivation daemon
//!
//! Composition root that wires all adapters together and starts the workers.
//!
//! ## Responsibilities
//! - Load configuration (config file, env vars) and initialize logging
//! - Open the `SQLite` pool and run migrations
//! - Connect to the MQTT broker and spawn its event loop
//! - Start the telemetry, write-through and reconcile workers
//! - Serve the health check and reconfiguration webhook
//! - Stop everything on SIGTERM/SIGINT
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer. No derivation logic belongs here.

mod config;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

use telederive_adapter_http_axum::signature::SignatureVerifier;
use telederive_adapter_http_axum::state::AppState;
use telederive_adapter_storage_sqlite_sqlx::SqliteConfigStore;
use telederive_app::reconcile_worker::{ReconcileReason, ReconcileTrigger, run_reconcile_loop};
use telederive_app::reconciler::SubscriptionReconciler;
use telederive_app::rule_set::RuleSetHandle;
use telederive_app::state_cache::DeviceStateCache;
use telederive_app::telemetry_service::TelemetryService;
use telederive_app::write_through::{WriteThrough, run_write_through};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.logging.filter))
        .init();

    run(config).await
}

async fn run(config: Config) -> anyhow::Result<()> {
    let store_timeout = config.store_timeout();

    // Database
    let db = telederive_adapter_storage_sqlite_sqlx::Config {
        database_url: config.database.url.clone(),
        max_connections: config.database.max_connections,
    }
    .build()
    .await
    .context("failed to open database")?;
    let store = SqliteConfigStore::new(db.pool().clone());

    // Shared state
    let cache = Arc::new(DeviceStateCache::new());
    let rules = Arc::new(RuleSetHandle::default());
    let (stop, shutdown) = watch::channel(false);
    let (trigger, requests) = ReconcileTrigger::channel(config.runtime.reconcile_capacity);

    // Bus
    let session = telederive_adapter_mqtt::connect(&config.mqtt)
        .await
        .context("failed to connect to MQTT broker")?;
    let (inbound_tx, inbound_rx) = mpsc::channel(config.mqtt.inbound_capacity);
    let (bus, event_loop) =
        session.spawn_event_loop(&config.mqtt, inbound_tx, trigger.clone(), shutdown.clone());

    // Workers
    let (write_through, snapshots) = WriteThrough::channel(config.runtime.write_through_capacity);
    let persister = tokio::spawn(run_write_through(store.clone(), snapshots, store_timeout));

    let telemetry = TelemetryService::new(
        store.clone(),
        bus.clone(),
        Arc::clone(&cache),
        Arc::clone(&rules),
        write_through,
        store_timeout,
    );
    telemetry.warm_up().await;

    let reconciler = Arc::new(SubscriptionReconciler::new(
        store,
        bus.clone(),
        rules,
        cache,
        store_timeout,
    ));
    let reconciling = tokio::spawn(run_reconcile_loop(
        reconciler,
        requests,
        config.reconcile_backoff(),
        shutdown.clone(),
    ));
    trigger
        .request(ReconcileReason::Startup)
        .context("reconcile worker did not start")?;

    let telemetry_shutdown = shutdown.clone();
    let processing =
        tokio::spawn(async move { telemetry.run(inbound_rx, telemetry_shutdown).await });

    // HTTP
    let state = AppState::new(
        SignatureVerifier::new(config.reconfigure.secret.as_deref()),
        trigger,
    );
    let app = telederive_adapter_http_axum::router::build(state);

    let bind_addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "telederived listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    // The persister drains once the telemetry worker drops its sender.
    tracing::info!("shutting down");
    if let Err(err) = bus.disconnect().await {
        tracing::debug!(error = %err, "MQTT disconnect failed");
    }
    let _ = stop.send(true);
    for (name, task) in [
        ("telemetry", processing),
        ("reconcile", reconciling),
        ("event loop", event_loop),
        ("write-through", persister),
    ] {
        if let Err(err) = task.await {
            tracing::warn!(task = name, error = %err, "worker ended abnormally");
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
