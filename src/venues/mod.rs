//! Venue integrations.
//!
//! Defines the `LendingVenue` trait — the capability surface the vault
//! consumes from each yield-bearing destination — and an in-memory
//! fixed-rate implementation used by the binary and the test suite.
//!
//! A venue is trusted only for the values it returns, never for side
//! effects beyond what it reports: the vault's ledger is mutated before
//! any venue call and rolled back if the call fails.

pub mod fixed;

use anyhow::Result;
use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

/// Abstraction over yield-bearing venues.
///
/// Implementors expose a queryable supply rate and accept deposits and
/// withdrawals of the pooled asset.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LendingVenue: Send + Sync {
    /// Current supply rate in 1e27 fixed-point (5e25 = 5% APY).
    async fn current_rate(&self) -> Result<u128>;

    /// Move `amount` of the asset into this venue.
    async fn deposit(&self, amount: u128) -> Result<()>;

    /// Pull `amount` of the asset back out of this venue.
    async fn withdraw(&self, amount: u128) -> Result<()>;

    /// Venue name for logging and identification.
    fn name(&self) -> &str;
}
