use anyhow::{Context, Result};
use rollcall_core::{FaceAnalyzer, OnnxAnalyzer};
use rollcall_store::SqliteStore;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod outcome;

use config::{BusKind, Config};
use dbus_interface::{RollcallService, BUS_NAME, OBJECT_PATH};
use engine::Services;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env()?;
    tracing::info!(
        data_dir = %config.data_dir.display(),
        model_dir = %config.model_dir.display(),
        threshold = ?config.match_threshold,
        min_corroboration = config.min_corroboration,
        "configuration loaded"
    );

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let store = Arc::new(
        SqliteStore::open(&config.db_path)
            .with_context(|| format!("opening {}", config.db_path.display()))?,
    );
    tracing::info!(path = %config.db_path.display(), "database opened");

    // Without models the daemon still serves listings and statistics.
    let analyzer: Option<Box<dyn FaceAnalyzer + Send>> = match OnnxAnalyzer::load(
        &config.scrfd_model_path(),
        &config.arcface_model_path(),
        config.detection_confidence,
    ) {
        Ok(analyzer) => {
            tracing::info!(dir = %config.model_dir.display(), "face models loaded");
            Some(Box::new(analyzer))
        }
        Err(e) => {
            tracing::warn!(error = %e, dir = %config.model_dir.display(), "face models not loaded; enrollment and attendance disabled");
            None
        }
    };

    let matcher = config.matcher(analyzer.as_ref().and_then(|a| a.match_threshold()));
    tracing::info!(threshold = matcher.threshold, "match threshold");

    let services = Services::new(
        store,
        matcher,
        config.sessions_dir(),
        config.sheets_dir(),
        config.reports_dir(),
    );
    let engine = engine::spawn_engine(services, analyzer)?;

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, RollcallService::new(engine))?
        .build()
        .await?;

    tracing::info!(bus = ?config.bus, name = BUS_NAME, "rollcalld ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
