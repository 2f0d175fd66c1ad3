//! Yield oracle.
//!
//! Reads both venues' fixed-point supply rates, converts them to
//! comparable annualized basis-point figures, and keeps the last
//! observation. Monitoring can be paused by the owner independently of
//! the vault's own pause state.

use std::sync::Arc;
use tracing::{debug, info};

use crate::math::rate_to_apy_bps;
use crate::types::{Principal, VaultError, YieldData};
use crate::venues::LendingVenue;

pub struct YieldOracle {
    venue_a: Arc<dyn LendingVenue>,
    venue_b: Arc<dyn LendingVenue>,
    owner: Principal,
    paused: bool,
    last: Option<YieldData>,
}

impl YieldOracle {
    pub fn new(
        venue_a: Arc<dyn LendingVenue>,
        venue_b: Arc<dyn LendingVenue>,
        owner: Principal,
    ) -> Self {
        Self {
            venue_a,
            venue_b,
            owner,
            paused: false,
            last: None,
        }
    }

    // -- Reads ------------------------------------------------------------

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Last persisted observation, if any check has run yet.
    pub fn last(&self) -> Option<YieldData> {
        self.last
    }

    /// Read both venues and derive comparable annualized yields.
    /// Does not persist anything — see [`refresh`](Self::refresh).
    pub async fn current_yield_data(&self) -> Result<YieldData, VaultError> {
        let (rate_a, rate_b) = futures::future::join(
            self.venue_a.current_rate(),
            self.venue_b.current_rate(),
        )
        .await;

        let rate_a = rate_a.map_err(|e| VaultError::venue(self.venue_a.name(), e))?;
        let rate_b = rate_b.map_err(|e| VaultError::venue(self.venue_b.name(), e))?;

        let apy_a_bps = rate_to_apy_bps(rate_a)?;
        let apy_b_bps = rate_to_apy_bps(rate_b)?;

        let data = YieldData::new(apy_a_bps, apy_b_bps);
        debug!(%data, "Yield data computed");
        Ok(data)
    }

    // -- Mutations --------------------------------------------------------

    /// Recompute yields and persist the observation.
    /// Fails while monitoring is paused.
    pub async fn refresh(&mut self) -> Result<YieldData, VaultError> {
        if self.paused {
            return Err(VaultError::MonitoringPaused);
        }
        let data = self.current_yield_data().await?;
        self.last = Some(data);
        Ok(data)
    }

    /// Pause or resume monitoring. Owner only. Idempotent.
    pub fn set_paused(&mut self, caller: &Principal, paused: bool) -> Result<(), VaultError> {
        if caller != &self.owner {
            return Err(VaultError::NotAuthorized {
                principal: caller.clone(),
            });
        }
        info!(paused, "Yield monitoring pause state changed");
        self.paused = paused;
        Ok(())
    }

    /// Restore the last persisted observation (snapshot load).
    pub fn restore_last(&mut self, last: Option<YieldData>) {
        self.last = last;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
