//! zonewatchd - HTTP service for per-user video zone analysis
//!
//! This daemon:
//! 1. Loads configuration (ZONEWATCH_CONFIG file plus ZONEWATCH_* overrides)
//! 2. Opens the zone database and loads the detector
//! 3. Serves the analysis API until Ctrl-C

use anyhow::{Context, Result};
use std::sync::{mpsc, Arc};

use zonewatch::{
    api::{ApiConfig, ApiServer},
    SessionManager, SqliteZoneStore, ZonewatchConfig,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ZonewatchConfig::load()?;
    std::fs::create_dir_all(&config.upload_dir)
        .with_context(|| format!("create upload dir {}", config.upload_dir.display()))?;
    let zones = Arc::new(SqliteZoneStore::open(&config.db_path)?);
    let sessions = Arc::new(SessionManager::from_config(&config, zones));
    if !sessions.model_ready() {
        log::warn!("detector unavailable; analysis requests will fail until restart");
    }

    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
        max_body_bytes: config.max_upload_bytes,
        ..ApiConfig::default()
    };
    let api_handle = ApiServer::new(api_config, sessions).spawn()?;
    log::info!("analysis api listening on {}", api_handle.addr);
    log::info!(
        "zonewatchd running. zones in {}, uploads in {}",
        config.db_path,
        config.upload_dir.display()
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("zonewatchd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
