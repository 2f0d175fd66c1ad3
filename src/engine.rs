//! Rebalance decision engine.
//!
//! Compares the oracle's yield observation against policy thresholds and
//! produces a sized rebalance plan — or nothing. The engine decides;
//! executing the move against the venues is the vault's job.

use std::sync::Arc;
use tracing::{debug, info};

use crate::events::{EventLog, VaultEvent};
use crate::math::bps_of;
use crate::oracle::YieldOracle;
use crate::policy::PolicyConfig;
use crate::types::{Allocations, Amount, VaultError, VenueId, YieldData};

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// A decided rebalance: move `amount` from the lower-yield venue to the
/// higher-yield venue.
#[derive(Debug, Clone)]
pub struct RebalancePlan {
    pub from: VenueId,
    pub to: VenueId,
    pub amount: Amount,
    /// The observation that triggered this plan.
    pub data: YieldData,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct RebalanceEngine {
    oracle: YieldOracle,
    events: Arc<EventLog>,
}

impl RebalanceEngine {
    pub fn new(oracle: YieldOracle, events: Arc<EventLog>) -> Self {
        Self { oracle, events }
    }

    pub fn oracle(&self) -> &YieldOracle {
        &self.oracle
    }

    pub fn oracle_mut(&mut self) -> &mut YieldOracle {
        &mut self.oracle
    }

    /// Refresh yields and decide whether a rebalance is warranted.
    ///
    /// Triggers only when the divergence is strictly greater than the
    /// threshold — a divergence exactly at the threshold does not move
    /// funds — and only when something is allocated and auto-rebalancing
    /// is enabled.
    pub async fn decide(
        &mut self,
        policy: &PolicyConfig,
        allocations: &Allocations,
    ) -> Result<Option<RebalancePlan>, VaultError> {
        let data = self.oracle.refresh().await?;
        let total = allocations.total()?;

        if !policy.auto_rebalance_enabled {
            debug!(%data, "Auto-rebalance disabled");
            return Ok(None);
        }

        if total == 0 {
            debug!(%data, "Nothing allocated");
            return Ok(None);
        }

        if data.divergence_bps <= policy.rebalance_threshold_bps as u64 {
            debug!(
                %data,
                threshold_bps = policy.rebalance_threshold_bps,
                "Divergence within threshold"
            );
            return Ok(None);
        }

        // Divergence is non-zero here, so a higher venue always exists.
        let Some(to) = data.higher_venue() else {
            return Ok(None);
        };
        let from = to.opposite();

        self.events.emit(VaultEvent::RebalanceTriggered {
            apy_a_bps: data.apy_a_bps,
            apy_b_bps: data.apy_b_bps,
            divergence_bps: data.divergence_bps,
        });

        let amount = self.size_move(policy, allocations, total, from, to)?;
        if amount == 0 {
            debug!(%from, %to, "Caps left nothing to move");
            return Ok(None);
        }

        info!(
            %from,
            %to,
            amount,
            divergence_bps = data.divergence_bps,
            threshold_bps = policy.rebalance_threshold_bps,
            "Rebalance decided"
        );

        Ok(Some(RebalancePlan {
            from,
            to,
            amount,
            data,
        }))
    }

    /// Size the move: the configured fraction of the allocated total,
    /// capped by the receiver's headroom up to the maximum allocation
    /// share, and by the donor's balance.
    fn size_move(
        &self,
        policy: &PolicyConfig,
        allocations: &Allocations,
        total: Amount,
        from: VenueId,
        to: VenueId,
    ) -> Result<Amount, VaultError> {
        let requested = bps_of(total, policy.rebalance_percentage_bps)?;
        let max_receiver = bps_of(total, policy.max_allocation_percentage_bps)?;
        let headroom = max_receiver.saturating_sub(allocations.balance(to));
        Ok(requested.min(headroom).min(allocations.balance(from)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
