//! Persistence layer.
//!
//! Saves and loads the vault snapshot to/from a JSON file. The snapshot
//! carries exactly the ledger fields of the data model; there is no
//! auxiliary file format.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info};

use crate::vault::VaultSnapshot;

/// Default state file path.
const DEFAULT_STATE_FILE: &str = "driftvault_state.json";

/// Save the vault snapshot to a JSON file.
pub fn save_snapshot(snapshot: &VaultSnapshot, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    let json = serde_json::to_string_pretty(snapshot)
        .context("Failed to serialise vault snapshot")?;

    std::fs::write(path, &json)
        .context(format!("Failed to write snapshot to {path}"))?;

    debug!(
        path,
        total_deposits = %snapshot.ledger.total_deposits,
        "Snapshot saved"
    );
    Ok(())
}

/// Load the vault snapshot from a JSON file.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_snapshot(path: Option<&str>) -> Result<Option<VaultSnapshot>> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved snapshot found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .context(format!("Failed to read snapshot from {path}"))?;

    let snapshot: VaultSnapshot = serde_json::from_str(&json)
        .context(format!("Failed to parse snapshot from {path}"))?;

    info!(
        path,
        total_deposits = %snapshot.ledger.total_deposits,
        total_shares = %snapshot.ledger.total_shares,
        holders = snapshot.ledger.share_of.len(),
        "Snapshot loaded from disk"
    );

    Ok(Some(snapshot))
}

/// Delete the state file (for testing or reset).
pub fn delete_snapshot(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path)
            .context(format!("Failed to delete snapshot file {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
