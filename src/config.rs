//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Policy parameters reuse the bounded [`PolicyConfig`] so the file and
//! the store can never drift apart.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

use crate::policy::PolicyConfig;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub service: ServiceConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    pub venues: VenuesConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub name: String,
    /// Owner principal of the vault and policy store.
    pub owner: String,
    pub check_interval_secs: u64,
    /// Snapshot file path; None keeps the default.
    #[serde(default)]
    pub state_file: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VenuesConfig {
    pub venue_a: VenueConfig,
    pub venue_b: VenueConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VenueConfig {
    pub name: String,
    /// Rate the in-memory venue starts at, in annualized basis points.
    pub initial_apy_bps: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }
}
