//! sitewatchd - hazard monitoring daemon
//!
//! Loads configuration, opens the sqlite store, wires the session
//! supervisor to HTTP collaborators, and serves the control API until
//! interrupted.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sitewatch::api::{ApiConfig, ApiServer};
use sitewatch::config::SitewatchConfig;
use sitewatch::ticket::SimulatedTicketFiler;
use sitewatch::{BroadcastRegistry, HttpCollaborators, MonitorManager, SqliteSessionStore};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = SitewatchConfig::load()?;
    log::info!("sitewatchd {} starting", env!("CARGO_PKG_VERSION"));
    log::info!(
        "db={} data_dir={} recognizer={} mapper={}",
        cfg.db_path,
        cfg.data_dir.display(),
        cfg.recognizer_url,
        cfg.mapper_url
    );

    let store = SqliteSessionStore::open(&cfg.db_path)?;
    let manager = Arc::new(MonitorManager::new(
        cfg.monitor_config(),
        Arc::new(Mutex::new(store)),
        Arc::new(BroadcastRegistry::new()),
        Arc::new(HttpCollaborators {
            recognizer_url: cfg.recognizer_url.clone(),
            mapper_url: cfg.mapper_url.clone(),
        }),
        Arc::new(Mutex::new(SimulatedTicketFiler)),
    ));

    let api_handle = ApiServer::new(
        ApiConfig {
            addr: cfg.api_addr.clone(),
        },
        manager,
    )
    .spawn()?;
    log::info!("monitoring api listening on {}", api_handle.addr);

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_handler = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted_handler.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("failed to install signal handler: {e}"))?;

    while !interrupted.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    log::info!("shutting down");
    api_handle.stop()?;
    Ok(())
}
