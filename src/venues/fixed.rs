//! Fixed-rate in-memory venue.
//!
//! Holds a balance and serves a settable supply rate. The binary runs
//! against a pair of these until real venue adapters exist, and the test
//! suite drives rate changes through them deterministically.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Mutex;

use super::LendingVenue;
use crate::math::apy_bps_to_rate;

/// An in-memory venue with a settable rate and a forced-error hook.
pub struct FixedRateVenue {
    name: String,
    rate: Mutex<u128>,
    balance: Mutex<u128>,
    /// If set, all operations will return this error.
    force_error: Mutex<Option<String>>,
}

impl FixedRateVenue {
    /// Create a venue serving the given 1e27-scaled rate.
    pub fn new(name: &str, rate: u128) -> Self {
        Self {
            name: name.to_string(),
            rate: Mutex::new(rate),
            balance: Mutex::new(0),
            force_error: Mutex::new(None),
        }
    }

    /// Create a venue from an annualized basis-point yield.
    pub fn with_apy_bps(name: &str, apy_bps: u64) -> Self {
        Self::new(name, apy_bps_to_rate(apy_bps))
    }

    /// Change the served rate (1e27 fixed-point).
    pub fn set_rate(&self, rate: u128) {
        *self.rate.lock().unwrap() = rate;
    }

    /// Change the served rate, expressed in basis points.
    pub fn set_apy_bps(&self, apy_bps: u64) {
        self.set_rate(apy_bps_to_rate(apy_bps));
    }

    /// Seed the held balance directly (snapshot restore).
    pub fn seed_balance(&self, balance: u128) {
        *self.balance.lock().unwrap() = balance;
    }

    /// Asset currently held by this venue.
    pub fn balance(&self) -> u128 {
        *self.balance.lock().unwrap()
    }

    /// Force all subsequent operations to return an error.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    /// Clear any forced error.
    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    fn check_error(&self) -> Result<()> {
        if let Some(err) = self.force_error.lock().unwrap().as_ref() {
            return Err(anyhow!("{}", err));
        }
        Ok(())
    }
}

#[async_trait]
impl LendingVenue for FixedRateVenue {
    async fn current_rate(&self) -> Result<u128> {
        self.check_error()?;
        Ok(*self.rate.lock().unwrap())
    }

    async fn deposit(&self, amount: u128) -> Result<()> {
        self.check_error()?;
        let mut balance = self.balance.lock().unwrap();
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| anyhow!("Balance overflow on {}", self.name))?;
        Ok(())
    }

    async fn withdraw(&self, amount: u128) -> Result<()> {
        self.check_error()?;
        let mut balance = self.balance.lock().unwrap();
        if *balance < amount {
            return Err(anyhow!(
                "Insufficient venue balance: need {amount}, have {}",
                *balance
            ));
        }
        *balance -= amount;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
