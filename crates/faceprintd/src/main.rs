use anyhow::{Context, Result};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod throttle;

use config::{BusKind, Config};
use dbus_interface::{FaceprintService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("faceprintd starting");

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(
        model = %config.model_path.display(),
        db = %config.db_path.display(),
        bus = ?config.bus,
        threshold = config.pipeline.similarity_threshold,
        "configuration loaded"
    );

    let engine = engine::spawn_engine(&config).context("failed to start engine")?;
    let service = FaceprintService::new(
        engine,
        Duration::from_millis(config.min_verify_interval_ms),
    );

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("failed to acquire {BUS_NAME} on the {:?} bus", config.bus))?;

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "faceprintd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("faceprintd shutting down");

    Ok(())
}
