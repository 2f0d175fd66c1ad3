//! DRIFTVAULT — Autonomous Two-Venue Yield Rebalancing Vault
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores the vault snapshot from disk (or starts fresh), and runs the
//! periodic yield-check loop with graceful shutdown.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info};

use driftvault::api;
use driftvault::api::routes::ApiState;
use driftvault::config::AppConfig;
use driftvault::engine::RebalanceEngine;
use driftvault::events::EventLog;
use driftvault::oracle::YieldOracle;
use driftvault::policy::PolicyStore;
use driftvault::storage;
use driftvault::types::{Principal, VaultError, VenueId};
use driftvault::vault::Vault;
use driftvault::venues::fixed::FixedRateVenue;
use driftvault::venues::LendingVenue;

const BANNER: &str = r#"
 ____  ____  ___ _____ _______     ___   _   _ _   _____
|  _ \|  _ \|_ _|  ___|_   _\ \   / / \ | | | | | |_   _|
| | | | |_) || || |_    | |  \ \ / / _ \| | | | |   | |
| |_| |  _ < | ||  _|   | |   \ V / ___ \ |_| | |___| |
|____/|_| \_\___|_|     |_|    \_/_/   \_\___/|_____|_|

  Threshold-Driven Two-Venue Capital Allocator
  v0.1.0 — Autonomous Service
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging();

    // Print startup banner
    println!("{BANNER}");
    info!(
        service_name = %cfg.service.name,
        owner = %cfg.service.owner,
        check_interval_secs = cfg.service.check_interval_secs,
        "DRIFTVAULT starting up"
    );

    // -- Initialise components -------------------------------------------

    let events = Arc::new(EventLog::new());
    let owner = Principal::new(cfg.service.owner.clone());

    let venue_a = Arc::new(FixedRateVenue::with_apy_bps(
        &cfg.venues.venue_a.name,
        cfg.venues.venue_a.initial_apy_bps,
    ));
    let venue_b = Arc::new(FixedRateVenue::with_apy_bps(
        &cfg.venues.venue_b.name,
        cfg.venues.venue_b.initial_apy_bps,
    ));

    let policy = PolicyStore::with_config(
        owner.clone(),
        cfg.policy.clone(),
        Arc::clone(&events),
    );
    let oracle = YieldOracle::new(
        venue_a.clone() as Arc<dyn LendingVenue>,
        venue_b.clone() as Arc<dyn LendingVenue>,
        owner,
    );
    let engine = RebalanceEngine::new(oracle, Arc::clone(&events));
    let mut vault = Vault::new(
        venue_a.clone() as Arc<dyn LendingVenue>,
        venue_b.clone() as Arc<dyn LendingVenue>,
        policy,
        engine,
        Arc::clone(&events),
    );

    // -- Restore state ----------------------------------------------------

    let state_file = cfg.service.state_file.clone();
    match storage::load_snapshot(state_file.as_deref())? {
        Some(snapshot) => {
            vault.restore(snapshot);
            // Re-seed the in-memory venues with the restored allocations.
            let allocations = vault.allocations();
            venue_a.seed_balance(allocations.balance(VenueId::A));
            venue_b.seed_balance(allocations.balance(VenueId::B));
            info!(
                total_deposits = %vault.total_assets(),
                total_shares = %vault.total_shares(),
                "Resumed from saved snapshot"
            );
        }
        None => {
            info!("Fresh start");
        }
    }

    let vault = Arc::new(RwLock::new(vault));

    // -- API server -------------------------------------------------------

    if cfg.api.enabled {
        api::spawn_api(
            ApiState {
                vault: Arc::clone(&vault),
                events: Arc::clone(&events),
            },
            cfg.api.port,
        );
    }

    // -- Main loop --------------------------------------------------------

    let check_interval = Duration::from_secs(cfg.service.check_interval_secs);
    let mut interval = tokio::time::interval(check_interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.service.check_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_check(&vault, state_file.as_deref()).await;
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    // Save final snapshot
    let snapshot = vault.read().await.snapshot();
    storage::save_snapshot(&snapshot, state_file.as_deref())?;
    info!(
        total_deposits = %snapshot.ledger.total_deposits,
        total_shares = %snapshot.ledger.total_shares,
        "DRIFTVAULT shut down cleanly."
    );

    Ok(())
}

/// Run one yield check against the vault and persist the snapshot.
async fn run_check(vault: &Arc<RwLock<Vault>>, state_file: Option<&str>) {
    let mut guard = vault.write().await;
    match guard.check_yields_and_rebalance().await {
        Ok(Some(plan)) => {
            info!(
                from = %plan.from,
                to = %plan.to,
                amount = plan.amount,
                "Yield check rebalanced"
            );
        }
        Ok(None) => {
            info!("Yield check complete — no rebalance needed");
        }
        Err(VaultError::VaultPaused) | Err(VaultError::MonitoringPaused) => {
            info!("Yield check skipped — paused");
        }
        Err(e) => {
            error!(error = %e, "Yield check failed — continuing to next");
        }
    }

    let snapshot = guard.snapshot();
    drop(guard);

    if let Err(e) = storage::save_snapshot(&snapshot, state_file) {
        error!(error = %e, "Failed to save snapshot");
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("driftvault=info"));

    let json_logging = std::env::var("DRIFTVAULT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
