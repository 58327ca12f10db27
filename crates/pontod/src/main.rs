use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod store;

use config::Config;
use dbus_interface::{CheckpointService, BUS_NAME, OBJECT_PATH};
use engine::{Collaborators, Engine, UiNotifier};
use ponto_core::{CascadeDetector, PerceptualHasher};
use ponto_hw::{DeviceSlot, V4lCameraDevice};
use store::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("pontod starting");

    let config = Config::from_env();

    let store = Arc::new(
        SqliteStore::open(&config.db_path)
            .with_context(|| format!("failed to open database {}", config.db_path.display()))?,
    );
    let locator = CascadeDetector::load(&config.cascade_path_str())
        .with_context(|| format!("failed to load cascade {}", config.cascade_path.display()))?;

    let (ui_tx, ui_rx) = mpsc::unbounded_channel();
    let engine = Arc::new(Engine::new(
        Collaborators {
            camera: Arc::new(V4lCameraDevice::new(config.camera_device.clone())),
            slot: DeviceSlot::new(),
            locator: Arc::new(locator),
            hasher: Arc::new(PerceptualHasher::new()),
            directory: store.clone(),
            ledger: store.clone(),
        },
        config.engine_settings(),
        UiNotifier::new(ui_tx),
    ));

    let service = CheckpointService::new(engine, store.clone(), config.camera_device.clone());
    let conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on the session bus")?;

    let forwarder = tokio::spawn(dbus_interface::forward_ui_events(conn.clone(), ui_rx));

    tracing::info!(
        camera = %config.camera_device,
        db = %config.db_path.display(),
        employees = store.employee_count().unwrap_or(0),
        "pontod ready"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("pontod shutting down");
    forwarder.abort();

    Ok(())
}
