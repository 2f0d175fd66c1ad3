//! Shared types for the DRIFTVAULT service.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that venue, oracle, engine,
//! and vault modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Asset amounts and share balances, in base units of the pooled asset.
pub type Amount = u128;

// ---------------------------------------------------------------------------
// Principal
// ---------------------------------------------------------------------------

/// An account identity — a depositor, the owner, or an authorized operator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Principal(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Principal {
    fn from(id: &str) -> Self {
        Principal(id.to_string())
    }
}

// ---------------------------------------------------------------------------
// Venues
// ---------------------------------------------------------------------------

/// Identifier for one of the two yield venues the vault allocates across.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VenueId {
    A,
    B,
}

impl VenueId {
    /// The other venue.
    pub fn opposite(&self) -> Self {
        match self {
            VenueId::A => VenueId::B,
            VenueId::B => VenueId::A,
        }
    }

    /// Both venues (useful for iteration).
    pub const BOTH: [VenueId; 2] = [VenueId::A, VenueId::B];
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VenueId::A => write!(f, "venue-a"),
            VenueId::B => write!(f, "venue-b"),
        }
    }
}

/// Allocated balances per venue, in base units.
///
/// The vault's conservation invariant ties these to `total_deposits`:
/// whatever is not allocated here sits in the vault-held buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocations {
    pub venue_a: Amount,
    pub venue_b: Amount,
}

impl Allocations {
    /// Total allocated across both venues.
    pub fn total(&self) -> Result<Amount, VaultError> {
        self.venue_a
            .checked_add(self.venue_b)
            .ok_or(VaultError::ArithmeticOverflow)
    }

    /// Allocated balance of a single venue.
    pub fn balance(&self, venue: VenueId) -> Amount {
        match venue {
            VenueId::A => self.venue_a,
            VenueId::B => self.venue_b,
        }
    }

    /// Add to a venue's allocation.
    pub fn credit(&mut self, venue: VenueId, amount: Amount) -> Result<(), VaultError> {
        let slot = match venue {
            VenueId::A => &mut self.venue_a,
            VenueId::B => &mut self.venue_b,
        };
        *slot = slot
            .checked_add(amount)
            .ok_or(VaultError::ArithmeticOverflow)?;
        Ok(())
    }

    /// Remove from a venue's allocation. Underflow is an internal
    /// accounting error and is rejected rather than wrapped.
    pub fn debit(&mut self, venue: VenueId, amount: Amount) -> Result<(), VaultError> {
        let slot = match venue {
            VenueId::A => &mut self.venue_a,
            VenueId::B => &mut self.venue_b,
        };
        *slot = slot
            .checked_sub(amount)
            .ok_or(VaultError::ArithmeticOverflow)?;
        Ok(())
    }
}

impl fmt::Display for Allocations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A={} B={}", self.venue_a, self.venue_b)
    }
}

/// One row of the allocation table exposed to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolAllocation {
    pub venue: VenueId,
    pub name: String,
    pub balance: Amount,
    pub percentage_bps: u32,
    pub is_active: bool,
}

// ---------------------------------------------------------------------------
// Yield data
// ---------------------------------------------------------------------------

/// One observation of both venues' annualized yields.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct YieldData {
    pub apy_a_bps: u64,
    pub apy_b_bps: u64,
    /// Absolute difference between the two APYs.
    pub divergence_bps: u64,
    pub observed_at: DateTime<Utc>,
}

impl YieldData {
    pub fn new(apy_a_bps: u64, apy_b_bps: u64) -> Self {
        Self {
            apy_a_bps,
            apy_b_bps,
            divergence_bps: apy_a_bps.abs_diff(apy_b_bps),
            observed_at: Utc::now(),
        }
    }

    /// The venue currently yielding more, or None on an exact tie.
    pub fn higher_venue(&self) -> Option<VenueId> {
        match self.apy_a_bps.cmp(&self.apy_b_bps) {
            std::cmp::Ordering::Greater => Some(VenueId::A),
            std::cmp::Ordering::Less => Some(VenueId::B),
            std::cmp::Ordering::Equal => None,
        }
    }
}

impl fmt::Display for YieldData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "A={}bps B={}bps diff={}bps",
            self.apy_a_bps, self.apy_b_bps, self.divergence_bps,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for DRIFTVAULT.
///
/// Validation and authorization failures reject the whole operation before
/// any mutation; venue failures roll the ledger back to its pre-operation
/// state. Nothing is partially applied.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Deposit below minimum: {amount} < {minimum}")]
    BelowMinimum { amount: Amount, minimum: Amount },

    #[error("Insufficient shares: requested {requested}, available {available}")]
    InsufficientShares { requested: Amount, available: Amount },

    #[error("Amount resolves to zero shares")]
    ZeroShares,

    #[error("Threshold too high: {value} bps exceeds cap of {max} bps")]
    ThresholdTooHigh { value: u32, max: u32 },

    #[error("{field} out of range: {value} bps exceeds 10000")]
    PercentageTooHigh { field: &'static str, value: u32 },

    #[error("Arithmetic overflow")]
    ArithmeticOverflow,

    #[error("Not authorized: {principal}")]
    NotAuthorized { principal: Principal },

    #[error("Already paused")]
    AlreadyPaused,

    #[error("Already active")]
    AlreadyActive,

    #[error("Monitoring is paused")]
    MonitoringPaused,

    #[error("Vault is paused")]
    VaultPaused,

    #[error("Venue error ({venue}): {message}")]
    Venue { venue: String, message: String },
}

impl VaultError {
    /// Wrap an error reported by the external venue capability.
    pub fn venue(name: &str, err: anyhow::Error) -> Self {
        VaultError::Venue {
            venue: name.to_string(),
            message: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
