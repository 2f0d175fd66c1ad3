//! Policy store — bounded configuration and the authorization guard.
//!
//! Holds every tunable parameter the rebalancing core consults, the owner
//! principal, and the set of authorized operators. Every mutator goes
//! through a single capability check: caller is the owner or a member of
//! the authorized set.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

use crate::events::{EventLog, VaultEvent};
use crate::math::BPS_DENOMINATOR;
use crate::types::{Amount, Principal, VaultError};

/// Hard cap on the rebalance threshold: 500 bps (5%).
pub const MAX_REBALANCE_THRESHOLD_BPS: u32 = 500;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Bounded policy parameters.
///
/// Defaults: trigger on a 0.5% yield divergence, move 10% of allocated
/// funds per rebalance, never push a venue past 90% of the total, minimum
/// deposit 0.01 of an 18-decimal asset, 1% emergency-withdraw fee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub rebalance_threshold_bps: u32,
    pub rebalance_percentage_bps: u32,
    pub max_allocation_percentage_bps: u32,
    #[serde(deserialize_with = "de_amount")]
    pub min_deposit_amount: Amount,
    pub emergency_withdraw_fee_bps: u32,
    pub auto_rebalance_enabled: bool,
    pub paused: bool,
}

/// Deserialize an [`Amount`] (u128) from any integer or string form.
///
/// The `toml` crate cannot deserialize `u128` directly (it forwards
/// integers as `i64`), so go through `deserialize_any` and widen. JSON
/// snapshots, which carry `u128` natively, still round-trip losslessly.
fn de_amount<'de, D>(deserializer: D) -> Result<Amount, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct AmountVisitor;

    impl Visitor<'_> for AmountVisitor {
        type Value = Amount;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an unsigned integer amount")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
            Ok(v as Amount)
        }

        fn visit_u128<E: de::Error>(self, v: u128) -> Result<Amount, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
            Amount::try_from(v).map_err(|_| de::Error::custom("negative amount"))
        }

        fn visit_i128<E: de::Error>(self, v: i128) -> Result<Amount, E> {
            Amount::try_from(v).map_err(|_| de::Error::custom("negative amount"))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
            v.parse::<Amount>().map_err(de::Error::custom)
        }
    }

    deserializer.deserialize_any(AmountVisitor)
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            rebalance_threshold_bps: 50,
            rebalance_percentage_bps: 1_000,
            max_allocation_percentage_bps: 9_000,
            min_deposit_amount: 10_000_000_000_000_000,
            emergency_withdraw_fee_bps: 100,
            auto_rebalance_enabled: true,
            paused: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Policy store
// ---------------------------------------------------------------------------

/// Owner + authorized-set guarded configuration store.
pub struct PolicyStore {
    config: PolicyConfig,
    owner: Principal,
    authorized: HashSet<Principal>,
    events: Arc<EventLog>,
}

impl PolicyStore {
    /// Create a store with default parameters, owned by `owner`.
    pub fn new(owner: Principal, events: Arc<EventLog>) -> Self {
        Self::with_config(owner, PolicyConfig::default(), events)
    }

    pub fn with_config(owner: Principal, config: PolicyConfig, events: Arc<EventLog>) -> Self {
        Self {
            config,
            owner,
            authorized: HashSet::new(),
            events,
        }
    }

    /// Rebuild a store from persisted state.
    pub fn restore(
        owner: Principal,
        config: PolicyConfig,
        authorized: HashSet<Principal>,
        events: Arc<EventLog>,
    ) -> Self {
        Self {
            config,
            owner,
            authorized,
            events,
        }
    }

    // -- Reads ------------------------------------------------------------

    /// Snapshot of all bounded parameters.
    pub fn config(&self) -> PolicyConfig {
        self.config.clone()
    }

    pub fn owner(&self) -> &Principal {
        &self.owner
    }

    pub fn is_paused(&self) -> bool {
        self.config.paused
    }

    /// Whether a principal may mutate policy (owner always may).
    pub fn is_authorized(&self, principal: &Principal) -> bool {
        principal == &self.owner || self.authorized.contains(principal)
    }

    pub fn authorized(&self) -> &HashSet<Principal> {
        &self.authorized
    }

    // -- Capability checks ------------------------------------------------

    fn ensure_authorized(&self, caller: &Principal) -> Result<(), VaultError> {
        if self.is_authorized(caller) {
            Ok(())
        } else {
            Err(VaultError::NotAuthorized {
                principal: caller.clone(),
            })
        }
    }

    fn ensure_owner(&self, caller: &Principal) -> Result<(), VaultError> {
        if caller == &self.owner {
            Ok(())
        } else {
            Err(VaultError::NotAuthorized {
                principal: caller.clone(),
            })
        }
    }

    fn emit_update(&self, field: &str, value: String) {
        info!(field, %value, "Policy updated");
        self.events.emit(VaultEvent::ConfigUpdated {
            field: field.to_string(),
            value,
        });
    }

    // -- Parameter updates (owner or authorized) --------------------------

    pub fn update_rebalance_threshold(
        &mut self,
        caller: &Principal,
        value: u32,
    ) -> Result<(), VaultError> {
        self.ensure_authorized(caller)?;
        if value > MAX_REBALANCE_THRESHOLD_BPS {
            return Err(VaultError::ThresholdTooHigh {
                value,
                max: MAX_REBALANCE_THRESHOLD_BPS,
            });
        }
        self.config.rebalance_threshold_bps = value;
        self.emit_update("rebalance_threshold_bps", value.to_string());
        Ok(())
    }

    pub fn update_rebalance_percentage(
        &mut self,
        caller: &Principal,
        value: u32,
    ) -> Result<(), VaultError> {
        self.ensure_authorized(caller)?;
        Self::ensure_bps("rebalance_percentage_bps", value)?;
        self.config.rebalance_percentage_bps = value;
        self.emit_update("rebalance_percentage_bps", value.to_string());
        Ok(())
    }

    pub fn update_max_allocation_percentage(
        &mut self,
        caller: &Principal,
        value: u32,
    ) -> Result<(), VaultError> {
        self.ensure_authorized(caller)?;
        Self::ensure_bps("max_allocation_percentage_bps", value)?;
        self.config.max_allocation_percentage_bps = value;
        self.emit_update("max_allocation_percentage_bps", value.to_string());
        Ok(())
    }

    pub fn update_emergency_withdraw_fee(
        &mut self,
        caller: &Principal,
        value: u32,
    ) -> Result<(), VaultError> {
        self.ensure_authorized(caller)?;
        Self::ensure_bps("emergency_withdraw_fee_bps", value)?;
        self.config.emergency_withdraw_fee_bps = value;
        self.emit_update("emergency_withdraw_fee_bps", value.to_string());
        Ok(())
    }

    pub fn update_min_deposit_amount(
        &mut self,
        caller: &Principal,
        value: Amount,
    ) -> Result<(), VaultError> {
        self.ensure_authorized(caller)?;
        self.config.min_deposit_amount = value;
        self.emit_update("min_deposit_amount", value.to_string());
        Ok(())
    }

    pub fn set_auto_rebalance(
        &mut self,
        caller: &Principal,
        enabled: bool,
    ) -> Result<(), VaultError> {
        self.ensure_authorized(caller)?;
        self.config.auto_rebalance_enabled = enabled;
        self.emit_update("auto_rebalance_enabled", enabled.to_string());
        Ok(())
    }

    fn ensure_bps(field: &'static str, value: u32) -> Result<(), VaultError> {
        if value > BPS_DENOMINATOR {
            Err(VaultError::PercentageTooHigh { field, value })
        } else {
            Ok(())
        }
    }

    // -- Authorization management (owner only) ----------------------------

    pub fn authorize_user(
        &mut self,
        caller: &Principal,
        principal: Principal,
    ) -> Result<(), VaultError> {
        self.ensure_owner(caller)?;
        info!(%principal, "User authorized");
        self.authorized.insert(principal.clone());
        self.events.emit(VaultEvent::UserAuthorized { principal });
        Ok(())
    }

    pub fn deauthorize_user(
        &mut self,
        caller: &Principal,
        principal: &Principal,
    ) -> Result<(), VaultError> {
        self.ensure_owner(caller)?;
        info!(%principal, "User deauthorized");
        self.authorized.remove(principal);
        self.events.emit(VaultEvent::UserDeauthorized {
            principal: principal.clone(),
        });
        Ok(())
    }

    // -- Pause control (owner only) ---------------------------------------

    pub fn pause(&mut self, caller: &Principal) -> Result<(), VaultError> {
        self.ensure_owner(caller)?;
        if self.config.paused {
            return Err(VaultError::AlreadyPaused);
        }
        self.config.paused = true;
        self.emit_update("paused", "true".to_string());
        Ok(())
    }

    pub fn unpause(&mut self, caller: &Principal) -> Result<(), VaultError> {
        self.ensure_owner(caller)?;
        if !self.config.paused {
            return Err(VaultError::AlreadyActive);
        }
        self.config.paused = false;
        self.emit_update("paused", "false".to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
