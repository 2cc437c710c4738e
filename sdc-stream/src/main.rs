//! sdc-stream - Main entry point
//!
//! Startup sequence:
//! 1. Parse arguments, read the TOML bootstrap file, initialize tracing
//! 2. Resolve configuration (CLI > environment > TOML > defaults)
//! 3. Load model artifacts (fatal on failure)
//! 4. Wire collaborators: no-op in test mode, Kinesis + metrics store otherwise
//! 5. Serve HTTP until SIGINT/SIGTERM, then drain the monitor pool

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sdc_common::config::load_toml_config;
use sdc_common::db::init_database;
use sdc_common::events::PREDICTION_COLUMN;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sdc_stream::artifacts::{ArtifactBundle, ArtifactLoader};
use sdc_stream::config::{Args, ServiceConfig, TomlConfig, MODULE_NAME};
use sdc_stream::dispatch::{DispatchCore, SideEffects};
use sdc_stream::emit::KinesisEmitter;
use sdc_stream::monitoring::{MetricsStore, StoreReporter};
use sdc_stream::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let toml: TomlConfig = load_toml_config(args.config.as_deref(), MODULE_NAME)
        .context("Failed to load configuration file")?;

    init_tracing(&toml.logging.level);
    info!(
        "Starting sdc-stream v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("SDC_GIT_HASH"),
        env!("SDC_BUILD_TIMESTAMP"),
        env!("SDC_BUILD_PROFILE")
    );

    let config = ServiceConfig::from_env(&args, toml)
        .map_err(anyhow::Error::msg)
        .context("Invalid configuration")?;

    let loader = ArtifactLoader::from_settings(&config.artifacts)
        .context("Failed to configure artifact loader")?;
    let bundle = Arc::new(
        loader
            .load()
            .await
            .context("Failed to load model artifacts")?,
    );
    info!(
        "Model {} version {} ready",
        config.artifacts.model_name,
        bundle.version_id()
    );

    let side_effects = if config.test_run {
        info!("TEST_RUN enabled: emission and monitoring disabled");
        SideEffects::disabled()
    } else {
        live_side_effects(&config, &bundle).await?
    };

    let dispatch = Arc::new(DispatchCore::new(
        bundle,
        config.artifacts.model_name.clone(),
        side_effects,
        config.emission_policy,
        config.monitoring.pool_settings(),
    ));
    info!(
        emission_policy = %config.emission_policy,
        max_in_flight = config.monitoring.max_in_flight,
        "Dispatch core ready"
    );

    let app = build_router(AppState::new(Arc::clone(&dispatch), config.test_run));

    let addr = config.socket_addr().map_err(anyhow::Error::msg)?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("sdc-stream listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    dispatch.drain(config.monitoring.shutdown_grace()).await;
    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(level: &str) {
    let default_filter = format!("sdc_stream={0},sdc_common={0},tower_http={0}", level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Kinesis emitter plus metrics-store reporter
async fn live_side_effects(config: &ServiceConfig, bundle: &ArtifactBundle) -> Result<SideEffects> {
    info!("Metrics database: {}", config.database_path().display());
    let pool = init_database(config.database_path())
        .await
        .context("Failed to open metrics database")?;

    let store = MetricsStore::open(pool, &monitored_columns(bundle))
        .await
        .context("Failed to prepare metrics tables")?;

    let emitter =
        KinesisEmitter::from_environment(config.kinesis_endpoint.as_deref(), config.output_stream.as_str())
            .await;
    info!(
        stream = %emitter.stream_name(),
        endpoint = config.kinesis_endpoint.as_deref().unwrap_or("aws"),
        "Publishing predictions"
    );

    let reporter =
        StoreReporter::new(store).with_categorical_columns(bundle.model().categorical_features());
    Ok(SideEffects::live(Arc::new(emitter), Arc::new(reporter)))
}

/// Model inputs plus any extra reference columns
fn monitored_columns(bundle: &ArtifactBundle) -> Vec<String> {
    let mut columns: BTreeSet<String> = bundle.model().feature_names().into_iter().collect();
    if let Some(reference) = bundle.reference() {
        columns.extend(reference.iter().flat_map(|row| row.keys().cloned()));
    }
    columns.remove(PREDICTION_COLUMN);
    columns.into_iter().collect()
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
