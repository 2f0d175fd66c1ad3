//! Vault — the authoritative ledger and transaction layer.
//!
//! Owns the share ledger, the venue allocations, the policy store, and
//! the rebalance engine. Every state-changing operation is applied as a
//! single all-or-nothing transaction: validation first, then ledger
//! effects, then venue interactions — with the ledger rolled back to its
//! pre-operation checkpoint if a venue call fails. Each admitted
//! operation is appended to an ordered operation log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

use crate::engine::{RebalanceEngine, RebalancePlan};
use crate::events::{EventLog, VaultEvent};
use crate::math::{bps_of, mul_div, BPS_DENOMINATOR};
use crate::policy::{PolicyConfig, PolicyStore};
use crate::types::{
    Allocations, Amount, PoolAllocation, Principal, VaultError, VenueId, YieldData,
};
use crate::venues::LendingVenue;

/// Allocation split for a fresh vault with nothing allocated yet.
const DEFAULT_ALLOCATION_BPS: (u32, u32) = (5_000, 5_000);

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// The share ledger.
///
/// Invariants, preserved by every transition:
/// - `sum(share_of) == total_shares`
/// - `total_deposits == vault_held + allocations.total()`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ledger {
    pub total_deposits: Amount,
    pub total_shares: Amount,
    pub share_of: HashMap<Principal, Amount>,
    /// Un-allocated buffer held by the vault itself. Normally zero;
    /// deposits are pushed straight into the venues.
    pub vault_held: Amount,
}

impl Ledger {
    pub fn shares_of(&self, principal: &Principal) -> Amount {
        self.share_of.get(principal).copied().unwrap_or(0)
    }

    fn credit_shares(&mut self, principal: &Principal, shares: Amount) {
        *self.share_of.entry(principal.clone()).or_insert(0) += shares;
    }

    fn debit_shares(&mut self, principal: &Principal, shares: Amount) {
        if let Some(balance) = self.share_of.get_mut(principal) {
            *balance -= shares;
            if *balance == 0 {
                self.share_of.remove(principal);
            }
        }
    }

    /// Sum of all per-principal balances (invariant checks).
    pub fn sum_shares(&self) -> Amount {
        self.share_of.values().sum()
    }
}

// ---------------------------------------------------------------------------
// Operation log
// ---------------------------------------------------------------------------

/// One admitted state-changing operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpRecord {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub description: String,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Persistable vault state — exactly the ledger fields of the data model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultSnapshot {
    pub ledger: Ledger,
    pub allocations: Allocations,
    pub allocation_bps: (u32, u32),
    pub policy: PolicyConfig,
    pub owner: Principal,
    pub authorized: HashSet<Principal>,
    pub last_yield: Option<YieldData>,
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

pub struct Vault {
    ledger: Ledger,
    allocations: Allocations,
    allocation_bps: (u32, u32),
    policy: PolicyStore,
    engine: RebalanceEngine,
    venue_a: Arc<dyn LendingVenue>,
    venue_b: Arc<dyn LendingVenue>,
    events: Arc<EventLog>,
    ops: Vec<OpRecord>,
}

impl Vault {
    pub fn new(
        venue_a: Arc<dyn LendingVenue>,
        venue_b: Arc<dyn LendingVenue>,
        policy: PolicyStore,
        engine: RebalanceEngine,
        events: Arc<EventLog>,
    ) -> Self {
        Self {
            ledger: Ledger::default(),
            allocations: Allocations::default(),
            allocation_bps: DEFAULT_ALLOCATION_BPS,
            policy,
            engine,
            venue_a,
            venue_b,
            events,
            ops: Vec::new(),
        }
    }

    // -- Reads ------------------------------------------------------------

    /// Total assets under management, in base units.
    pub fn total_assets(&self) -> Amount {
        self.ledger.total_deposits
    }

    pub fn total_shares(&self) -> Amount {
        self.ledger.total_shares
    }

    pub fn user_shares(&self, principal: &Principal) -> Amount {
        self.ledger.shares_of(principal)
    }

    /// Alias for [`user_shares`](Self::user_shares).
    pub fn balance_of(&self, principal: &Principal) -> Amount {
        self.user_shares(principal)
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn allocations(&self) -> Allocations {
        self.allocations
    }

    pub fn allocation_bps(&self) -> (u32, u32) {
        self.allocation_bps
    }

    /// The allocation table exposed to observers.
    pub fn pool_allocations(&self) -> Vec<PoolAllocation> {
        let (a_bps, b_bps) = self.allocation_bps;
        vec![
            PoolAllocation {
                venue: VenueId::A,
                name: self.venue_a.name().to_string(),
                balance: self.allocations.venue_a,
                percentage_bps: a_bps,
                is_active: !self.policy.is_paused(),
            },
            PoolAllocation {
                venue: VenueId::B,
                name: self.venue_b.name().to_string(),
                balance: self.allocations.venue_b,
                percentage_bps: b_bps,
                is_active: !self.policy.is_paused(),
            },
        ]
    }

    /// Last persisted yield observation.
    pub fn last_yield_data(&self) -> Option<YieldData> {
        self.engine.oracle().last()
    }

    /// Fresh yield observation straight from the venues. Read-only.
    pub async fn current_yield_data(&self) -> Result<YieldData, VaultError> {
        self.engine.oracle().current_yield_data().await
    }

    pub fn policy(&self) -> &PolicyStore {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut PolicyStore {
        &mut self.policy
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    /// The ordered operation log.
    pub fn ops(&self) -> &[OpRecord] {
        &self.ops
    }

    // -- Deposit ----------------------------------------------------------

    /// Deposit `amount` of the asset, minting shares to `receiver`.
    ///
    /// The first deposit mints 1:1; later deposits mint proportionally
    /// (`amount * total_shares / total_deposits`) so the share price
    /// never decreases from minting.
    pub async fn deposit(
        &mut self,
        caller: &Principal,
        amount: Amount,
        receiver: &Principal,
    ) -> Result<Amount, VaultError> {
        self.ensure_active()?;
        let cfg = self.policy.config();

        if amount < cfg.min_deposit_amount {
            return Err(VaultError::BelowMinimum {
                amount,
                minimum: cfg.min_deposit_amount,
            });
        }

        let shares = if self.ledger.total_shares == 0 {
            amount
        } else {
            mul_div(amount, self.ledger.total_shares, self.ledger.total_deposits)?
        };
        if shares == 0 {
            return Err(VaultError::ZeroShares);
        }

        let new_total_deposits = self
            .ledger
            .total_deposits
            .checked_add(amount)
            .ok_or(VaultError::ArithmeticOverflow)?;
        let new_total_shares = self
            .ledger
            .total_shares
            .checked_add(shares)
            .ok_or(VaultError::ArithmeticOverflow)?;

        let to_a = bps_of(amount, self.allocation_bps.0)?;
        let to_b = amount - to_a;

        // Effects
        let ledger_checkpoint = self.ledger.clone();
        let alloc_checkpoint = self.allocations;
        self.ledger.total_deposits = new_total_deposits;
        self.ledger.total_shares = new_total_shares;
        self.ledger.credit_shares(receiver, shares);
        self.allocations.credit(VenueId::A, to_a)?;
        self.allocations.credit(VenueId::B, to_b)?;

        // Interactions
        if let Err(e) = self.push_to_venues(to_a, to_b).await {
            self.ledger = ledger_checkpoint;
            self.allocations = alloc_checkpoint;
            return Err(e);
        }
        self.recompute_allocation_bps()?;

        info!(%caller, %receiver, amount, shares, "Deposit accepted");
        self.events.emit(VaultEvent::Deposit {
            sender: caller.clone(),
            owner: receiver.clone(),
            assets: amount,
            shares,
        });
        self.record_op(format!("deposit {amount} -> {shares} shares for {receiver}"));

        Ok(shares)
    }

    // -- Withdraw ---------------------------------------------------------

    /// Burn `shares` belonging to `owner` and pay the proportional asset
    /// amount to `receiver`. There is no allowance system: the caller
    /// must be the share owner.
    pub async fn withdraw(
        &mut self,
        caller: &Principal,
        shares: Amount,
        receiver: &Principal,
        owner: &Principal,
    ) -> Result<Amount, VaultError> {
        self.ensure_active()?;
        if caller != owner {
            return Err(VaultError::NotAuthorized {
                principal: caller.clone(),
            });
        }
        let amount = self.redeem_amount(owner, shares)?;
        let payout = self
            .apply_redemption(caller, shares, receiver, owner, amount)
            .await?;
        self.record_op(format!("withdraw {shares} shares -> {payout} for {owner}"));
        Ok(payout)
    }

    /// Escape hatch: redeem the caller's own shares even while the vault
    /// is paused, for a fee that stays in the pool and accrues to the
    /// remaining holders.
    pub async fn emergency_withdraw(
        &mut self,
        caller: &Principal,
        shares: Amount,
        receiver: &Principal,
    ) -> Result<Amount, VaultError> {
        let fee_bps = self.policy.config().emergency_withdraw_fee_bps;
        let amount = self.redeem_amount(caller, shares)?;
        let fee = bps_of(amount, fee_bps)?;
        let payout = amount - fee;
        let payout = self
            .apply_redemption(caller, shares, receiver, caller, payout)
            .await?;
        self.record_op(format!(
            "emergency withdraw {shares} shares -> {payout} (fee {fee}) for {caller}"
        ));
        Ok(payout)
    }

    /// Validate a redemption and compute the gross proportional amount.
    fn redeem_amount(&self, owner: &Principal, shares: Amount) -> Result<Amount, VaultError> {
        if shares == 0 {
            return Err(VaultError::ZeroShares);
        }
        let available = self.ledger.shares_of(owner);
        if shares > available {
            return Err(VaultError::InsufficientShares {
                requested: shares,
                available,
            });
        }
        mul_div(shares, self.ledger.total_deposits, self.ledger.total_shares)
    }

    /// Burn shares and pay out `payout` (at most the gross proportional
    /// amount; any difference stays in the pool). Shared by the plain and
    /// emergency withdraw paths.
    async fn apply_redemption(
        &mut self,
        caller: &Principal,
        shares: Amount,
        receiver: &Principal,
        owner: &Principal,
        payout: Amount,
    ) -> Result<Amount, VaultError> {
        let (from_held, from_a, from_b) = self.plan_withdrawal(payout)?;

        // Effects
        let ledger_checkpoint = self.ledger.clone();
        let alloc_checkpoint = self.allocations;
        self.ledger.total_shares -= shares;
        self.ledger.total_deposits -= payout;
        self.ledger.vault_held -= from_held;
        self.ledger.debit_shares(owner, shares);
        self.allocations.debit(VenueId::A, from_a)?;
        self.allocations.debit(VenueId::B, from_b)?;

        // Interactions
        if let Err(e) = self.pull_from_venues(from_a, from_b).await {
            self.ledger = ledger_checkpoint;
            self.allocations = alloc_checkpoint;
            return Err(e);
        }
        self.recompute_allocation_bps()?;

        info!(%caller, %owner, %receiver, shares, payout, "Withdrawal paid");
        self.events.emit(VaultEvent::Withdraw {
            sender: caller.clone(),
            receiver: receiver.clone(),
            owner: owner.clone(),
            assets: payout,
            shares,
        });

        Ok(payout)
    }

    /// Split a payout across the vault-held buffer and the two venue
    /// allocations, proportionally to their balances.
    fn plan_withdrawal(&self, amount: Amount) -> Result<(Amount, Amount, Amount), VaultError> {
        let from_held = amount.min(self.ledger.vault_held);
        let remaining = amount - from_held;
        if remaining == 0 {
            return Ok((from_held, 0, 0));
        }

        let total_alloc = self.allocations.total()?;
        if remaining > total_alloc {
            // Conservation breach — refuse rather than mint from nothing.
            return Err(VaultError::ArithmeticOverflow);
        }

        let mut from_a = mul_div(remaining, self.allocations.venue_a, total_alloc)?;
        let mut from_b = remaining - from_a;
        if from_b > self.allocations.venue_b {
            from_a += from_b - self.allocations.venue_b;
            from_b = self.allocations.venue_b;
        }
        Ok((from_held, from_a, from_b))
    }

    // -- Rebalance --------------------------------------------------------

    /// Check yields and, if the engine decides a move, execute it.
    pub async fn check_yields_and_rebalance(
        &mut self,
    ) -> Result<Option<RebalancePlan>, VaultError> {
        self.ensure_active()?;
        let cfg = self.policy.config();
        let allocations = self.allocations;

        let Some(plan) = self.engine.decide(&cfg, &allocations).await? else {
            return Ok(None);
        };

        // Effects
        let alloc_checkpoint = self.allocations;
        self.allocations.debit(plan.from, plan.amount)?;
        self.allocations.credit(plan.to, plan.amount)?;

        // Interactions
        let donor = Arc::clone(self.venue(plan.from));
        let receiver = Arc::clone(self.venue(plan.to));
        if let Err(e) = Self::shift_between_venues(&donor, &receiver, plan.amount).await {
            self.allocations = alloc_checkpoint;
            return Err(e);
        }
        self.recompute_allocation_bps()?;

        info!(
            from = %plan.from,
            to = %plan.to,
            amount = plan.amount,
            allocation_bps = ?self.allocation_bps,
            "Rebalance executed"
        );
        self.events.emit(VaultEvent::Rebalanced {
            from_venue: plan.from,
            to_venue: plan.to,
            amount: plan.amount,
        });
        self.record_op(format!(
            "rebalance {} -> {} amount {}",
            plan.from, plan.to, plan.amount
        ));

        Ok(Some(plan))
    }

    // -- Policy passthrough -----------------------------------------------

    /// Owner/authorized passthrough to the policy store.
    pub fn update_rebalance_threshold(
        &mut self,
        caller: &Principal,
        value: u32,
    ) -> Result<(), VaultError> {
        self.policy.update_rebalance_threshold(caller, value)?;
        self.record_op(format!("update rebalance_threshold_bps to {value}"));
        Ok(())
    }

    /// Owner-only passthrough to the oracle's pause flag.
    pub fn pause_monitoring(
        &mut self,
        caller: &Principal,
        paused: bool,
    ) -> Result<(), VaultError> {
        self.engine.oracle_mut().set_paused(caller, paused)
    }

    // -- Snapshot ---------------------------------------------------------

    pub fn snapshot(&self) -> VaultSnapshot {
        VaultSnapshot {
            ledger: self.ledger.clone(),
            allocations: self.allocations,
            allocation_bps: self.allocation_bps,
            policy: self.policy.config(),
            owner: self.policy.owner().clone(),
            authorized: self.policy.authorized().clone(),
            last_yield: self.last_yield_data(),
        }
    }

    /// Replace the vault's state with a persisted snapshot. Venue-held
    /// balances are not restored here; the caller re-seeds the venues.
    pub fn restore(&mut self, snapshot: VaultSnapshot) {
        self.ledger = snapshot.ledger;
        self.allocations = snapshot.allocations;
        self.allocation_bps = snapshot.allocation_bps;
        self.policy = PolicyStore::restore(
            snapshot.owner,
            snapshot.policy,
            snapshot.authorized,
            Arc::clone(&self.events),
        );
        self.engine.oracle_mut().restore_last(snapshot.last_yield);
    }

    // -- Internals --------------------------------------------------------

    fn ensure_active(&self) -> Result<(), VaultError> {
        if self.policy.is_paused() {
            Err(VaultError::VaultPaused)
        } else {
            Ok(())
        }
    }

    fn venue(&self, id: VenueId) -> &Arc<dyn LendingVenue> {
        match id {
            VenueId::A => &self.venue_a,
            VenueId::B => &self.venue_b,
        }
    }

    /// Recompute the allocation percentages from the actual balances.
    /// The pair always sums to exactly 10000.
    fn recompute_allocation_bps(&mut self) -> Result<(), VaultError> {
        let total = self.allocations.total()?;
        self.allocation_bps = if total == 0 {
            DEFAULT_ALLOCATION_BPS
        } else {
            let a = mul_div(
                self.allocations.venue_a,
                BPS_DENOMINATOR as Amount,
                total,
            )? as u32;
            (a, BPS_DENOMINATOR - a)
        };
        Ok(())
    }

    async fn push_to_venues(&self, to_a: Amount, to_b: Amount) -> Result<(), VaultError> {
        if to_a > 0 {
            self.venue_a
                .deposit(to_a)
                .await
                .map_err(|e| VaultError::venue(self.venue_a.name(), e))?;
        }
        if to_b > 0 {
            if let Err(e) = self.venue_b.deposit(to_b).await {
                // Unwind the first leg; the ledger is rolled back by the caller.
                if to_a > 0 {
                    if let Err(comp) = self.venue_a.withdraw(to_a).await {
                        warn!(error = %comp, "Compensating withdrawal failed");
                    }
                }
                return Err(VaultError::venue(self.venue_b.name(), e));
            }
        }
        Ok(())
    }

    async fn pull_from_venues(&self, from_a: Amount, from_b: Amount) -> Result<(), VaultError> {
        if from_a > 0 {
            self.venue_a
                .withdraw(from_a)
                .await
                .map_err(|e| VaultError::venue(self.venue_a.name(), e))?;
        }
        if from_b > 0 {
            if let Err(e) = self.venue_b.withdraw(from_b).await {
                if from_a > 0 {
                    if let Err(comp) = self.venue_a.deposit(from_a).await {
                        warn!(error = %comp, "Compensating re-deposit failed");
                    }
                }
                return Err(VaultError::venue(self.venue_b.name(), e));
            }
        }
        Ok(())
    }

    async fn shift_between_venues(
        donor: &Arc<dyn LendingVenue>,
        receiver: &Arc<dyn LendingVenue>,
        amount: Amount,
    ) -> Result<(), VaultError> {
        donor
            .withdraw(amount)
            .await
            .map_err(|e| VaultError::venue(donor.name(), e))?;
        if let Err(e) = receiver.deposit(amount).await {
            if let Err(comp) = donor.deposit(amount).await {
                warn!(error = %comp, "Compensating re-deposit failed");
            }
            return Err(VaultError::venue(receiver.name(), e));
        }
        Ok(())
    }

    fn record_op(&mut self, description: String) {
        let record = OpRecord {
            seq: self.ops.len() as u64,
            timestamp: Utc::now(),
            description,
        };
        self.ops.push(record);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::YieldOracle;
    use crate::venues::fixed::FixedRateVenue;

    struct Fixture {
        vault: Vault,
        venue_a: Arc<FixedRateVenue>,
        venue_b: Arc<FixedRateVenue>,
        events: Arc<EventLog>,
    }

    fn owner() -> Principal {
        Principal::from("owner")
    }

    fn alice() -> Principal {
        Principal::from("alice")
    }

    fn bob() -> Principal {
        Principal::from("bob")
    }

    /// Vault over two fixed-rate venues with a small minimum deposit.
    fn make_vault(apy_a_bps: u64, apy_b_bps: u64) -> Fixture {
        let venue_a = Arc::new(FixedRateVenue::with_apy_bps("aave-pool", apy_a_bps));
        let venue_b = Arc::new(FixedRateVenue::with_apy_bps("compound-pool", apy_b_bps));
        let events = Arc::new(EventLog::new());

        let policy = PolicyStore::with_config(
            owner(),
            PolicyConfig {
                min_deposit_amount: 10,
                ..Default::default()
            },
            Arc::clone(&events),
        );
        let oracle = YieldOracle::new(
            venue_a.clone() as Arc<dyn LendingVenue>,
            venue_b.clone() as Arc<dyn LendingVenue>,
            owner(),
        );
        let engine = RebalanceEngine::new(oracle, Arc::clone(&events));
        let vault = Vault::new(
            venue_a.clone() as Arc<dyn LendingVenue>,
            venue_b.clone() as Arc<dyn LendingVenue>,
            policy,
            engine,
            Arc::clone(&events),
        );

        Fixture {
            vault,
            venue_a,
            venue_b,
            events,
        }
    }

    /// Both ledger invariants: share-sum and conservation against the
    /// actual venue balances.
    fn assert_invariants(fx: &Fixture) {
        let ledger = fx.vault.ledger();
        assert_eq!(ledger.sum_shares(), ledger.total_shares);
        assert_eq!(
            ledger.total_deposits,
            ledger.vault_held + fx.vault.allocations().total().unwrap()
        );
        assert_eq!(
            fx.vault.allocations().venue_a + fx.vault.allocations().venue_b,
            fx.venue_a.balance() + fx.venue_b.balance()
        );
    }

    // -- Deposits ---------------------------------------------------------

    #[tokio::test]
    async fn test_first_deposit_mints_one_to_one() {
        let mut fx = make_vault(500, 500);
        let shares = fx.vault.deposit(&alice(), 100, &alice()).await.unwrap();

        assert_eq!(shares, 100);
        assert_eq!(fx.vault.total_assets(), 100);
        assert_eq!(fx.vault.total_shares(), 100);
        assert_eq!(fx.vault.user_shares(&alice()), 100);
        // Split 50/50 into the venues
        assert_eq!(fx.venue_a.balance(), 50);
        assert_eq!(fx.venue_b.balance(), 50);
        assert_invariants(&fx);
    }

    #[tokio::test]
    async fn test_deposit_below_minimum_rejected() {
        let mut fx = make_vault(500, 500);
        let result = fx.vault.deposit(&alice(), 9, &alice()).await;
        assert!(matches!(
            result,
            Err(VaultError::BelowMinimum { amount: 9, minimum: 10 })
        ));
        assert_eq!(fx.vault.total_assets(), 0);
    }

    #[tokio::test]
    async fn test_deposit_emits_record() {
        let mut fx = make_vault(500, 500);
        fx.vault.deposit(&alice(), 100, &bob()).await.unwrap();

        let records = fx.events.snapshot();
        assert!(records.iter().any(|r| matches!(
            &r.event,
            VaultEvent::Deposit { sender, owner, assets: 100, shares: 100 }
                if sender == &alice() && owner == &bob()
        )));
        assert_eq!(fx.vault.user_shares(&bob()), 100);
    }

    #[tokio::test]
    async fn test_second_depositor_same_price_mints_proportionally() {
        let mut fx = make_vault(500, 500);
        fx.vault.deposit(&alice(), 100, &alice()).await.unwrap();
        let shares = fx.vault.deposit(&bob(), 50, &bob()).await.unwrap();

        assert_eq!(shares, 50);
        assert_eq!(fx.vault.total_shares(), 150);
        assert_eq!(fx.vault.total_assets(), 150);
        assert_invariants(&fx);
    }

    #[tokio::test]
    async fn test_proportional_minting_after_share_price_rises() {
        let mut fx = make_vault(500, 500);
        fx.vault.deposit(&alice(), 1000, &alice()).await.unwrap();

        // Emergency withdraw leaves the 1% fee in the pool: 500 shares
        // burn for a 495 payout, so 505 assets back 500 shares.
        fx.vault
            .emergency_withdraw(&alice(), 500, &alice())
            .await
            .unwrap();
        assert_eq!(fx.vault.total_assets(), 505);
        assert_eq!(fx.vault.total_shares(), 500);

        // 101 assets buy 100 shares at the new 1.01 price.
        let shares = fx.vault.deposit(&bob(), 101, &bob()).await.unwrap();
        assert_eq!(shares, 100);
        assert_invariants(&fx);
    }

    #[tokio::test]
    async fn test_deposit_rolls_back_on_venue_failure() {
        let mut fx = make_vault(500, 500);
        fx.vault.deposit(&alice(), 100, &alice()).await.unwrap();
        let a_before = fx.venue_a.balance();

        fx.venue_b.set_error("maintenance window");
        let result = fx.vault.deposit(&alice(), 100, &alice()).await;
        assert!(matches!(result, Err(VaultError::Venue { .. })));

        // Ledger unchanged, first leg compensated.
        assert_eq!(fx.vault.total_assets(), 100);
        assert_eq!(fx.vault.total_shares(), 100);
        assert_eq!(fx.venue_a.balance(), a_before);

        fx.venue_b.clear_error();
        assert_invariants(&fx);
    }

    // -- Withdrawals ------------------------------------------------------

    #[tokio::test]
    async fn test_withdraw_partial() {
        let mut fx = make_vault(500, 500);
        fx.vault.deposit(&alice(), 100, &alice()).await.unwrap();

        let amount = fx
            .vault
            .withdraw(&alice(), 50, &alice(), &alice())
            .await
            .unwrap();

        assert_eq!(amount, 50);
        assert_eq!(fx.vault.user_shares(&alice()), 50);
        assert_eq!(fx.vault.total_assets(), 50);
        assert_eq!(fx.vault.total_shares(), 50);
        assert_invariants(&fx);
    }

    #[tokio::test]
    async fn test_withdraw_insufficient_shares() {
        let mut fx = make_vault(500, 500);
        fx.vault.deposit(&alice(), 100, &alice()).await.unwrap();

        let result = fx.vault.withdraw(&alice(), 200, &alice(), &alice()).await;
        assert!(matches!(
            result,
            Err(VaultError::InsufficientShares {
                requested: 200,
                available: 100,
            })
        ));
    }

    #[tokio::test]
    async fn test_withdraw_requires_share_owner() {
        let mut fx = make_vault(500, 500);
        fx.vault.deposit(&alice(), 100, &alice()).await.unwrap();

        let result = fx.vault.withdraw(&bob(), 50, &bob(), &alice()).await;
        assert!(matches!(result, Err(VaultError::NotAuthorized { .. })));
        assert_eq!(fx.vault.user_shares(&alice()), 100);
    }

    #[tokio::test]
    async fn test_round_trip_returns_exact_amount() {
        let mut fx = make_vault(500, 500);
        let shares = fx.vault.deposit(&alice(), 123, &alice()).await.unwrap();
        let amount = fx
            .vault
            .withdraw(&alice(), shares, &alice(), &alice())
            .await
            .unwrap();

        assert_eq!(amount, 123);
        assert_eq!(fx.vault.total_assets(), 0);
        assert_eq!(fx.vault.total_shares(), 0);
        assert_eq!(fx.vault.user_shares(&alice()), 0);
        assert_invariants(&fx);
    }

    #[tokio::test]
    async fn test_withdraw_emits_record() {
        let mut fx = make_vault(500, 500);
        fx.vault.deposit(&alice(), 100, &alice()).await.unwrap();
        fx.vault
            .withdraw(&alice(), 40, &bob(), &alice())
            .await
            .unwrap();

        assert!(fx.events.snapshot().iter().any(|r| matches!(
            &r.event,
            VaultEvent::Withdraw { receiver, assets: 40, shares: 40, .. }
                if receiver == &bob()
        )));
    }

    #[tokio::test]
    async fn test_emergency_withdraw_charges_fee() {
        let mut fx = make_vault(500, 500);
        fx.vault.deposit(&alice(), 1000, &alice()).await.unwrap();

        let payout = fx
            .vault
            .emergency_withdraw(&alice(), 1000, &alice())
            .await
            .unwrap();

        // 1% fee stays in the pool.
        assert_eq!(payout, 990);
        assert_eq!(fx.vault.total_shares(), 0);
        assert_eq!(fx.vault.total_assets(), 10);
        assert_invariants(&fx);
    }

    #[tokio::test]
    async fn test_emergency_withdraw_works_while_paused() {
        let mut fx = make_vault(500, 500);
        fx.vault.deposit(&alice(), 1000, &alice()).await.unwrap();
        fx.vault.policy_mut().pause(&owner()).unwrap();

        assert!(matches!(
            fx.vault.withdraw(&alice(), 100, &alice(), &alice()).await,
            Err(VaultError::VaultPaused)
        ));
        let payout = fx
            .vault
            .emergency_withdraw(&alice(), 100, &alice())
            .await
            .unwrap();
        assert_eq!(payout, 99);
        assert_invariants(&fx);
    }

    // -- Pause gating -----------------------------------------------------

    #[tokio::test]
    async fn test_pause_blocks_mutations_not_reads() {
        let mut fx = make_vault(500, 500);
        fx.vault.deposit(&alice(), 100, &alice()).await.unwrap();
        fx.vault.policy_mut().pause(&owner()).unwrap();

        assert!(matches!(
            fx.vault.deposit(&alice(), 100, &alice()).await,
            Err(VaultError::VaultPaused)
        ));
        assert!(matches!(
            fx.vault.withdraw(&alice(), 50, &alice(), &alice()).await,
            Err(VaultError::VaultPaused)
        ));
        assert!(matches!(
            fx.vault.check_yields_and_rebalance().await,
            Err(VaultError::VaultPaused)
        ));

        // Reads still work.
        assert_eq!(fx.vault.total_assets(), 100);
        assert_eq!(fx.vault.user_shares(&alice()), 100);
        assert!(!fx.vault.pool_allocations()[0].is_active);

        fx.vault.policy_mut().unpause(&owner()).unwrap();
        assert!(fx.vault.deposit(&alice(), 100, &alice()).await.is_ok());
    }

    // -- Rebalancing ------------------------------------------------------

    #[tokio::test]
    async fn test_rebalance_moves_funds_to_higher_yield() {
        let mut fx = make_vault(500, 500);
        fx.vault.deposit(&alice(), 1000, &alice()).await.unwrap();

        // No divergence — nothing happens.
        assert!(fx.vault.check_yields_and_rebalance().await.unwrap().is_none());

        // Venue A now yields 6% vs 5%: 100 bps divergence > 50 bps threshold.
        fx.venue_a.set_apy_bps(600);
        let plan = fx
            .vault
            .check_yields_and_rebalance()
            .await
            .unwrap()
            .expect("should rebalance");

        assert_eq!(plan.from, VenueId::B);
        assert_eq!(plan.to, VenueId::A);
        assert_eq!(plan.amount, 100); // 10% of 1000

        assert_eq!(fx.venue_a.balance(), 600);
        assert_eq!(fx.venue_b.balance(), 400);
        assert_eq!(fx.vault.allocation_bps(), (6000, 4000));
        assert_invariants(&fx);

        assert!(fx.events.snapshot().iter().any(|r| matches!(
            r.event,
            VaultEvent::Rebalanced {
                from_venue: VenueId::B,
                to_venue: VenueId::A,
                amount: 100,
            }
        )));
    }

    #[tokio::test]
    async fn test_small_divergence_does_not_rebalance() {
        let mut fx = make_vault(510, 500);
        fx.vault.deposit(&alice(), 1000, &alice()).await.unwrap();

        let plan = fx.vault.check_yields_and_rebalance().await.unwrap();
        assert!(plan.is_none());
        assert_eq!(fx.venue_a.balance(), 500);
        assert_eq!(fx.venue_b.balance(), 500);
    }

    #[tokio::test]
    async fn test_divergence_at_threshold_does_not_rebalance() {
        // 550 vs 500: divergence equals the 50 bps default threshold.
        let mut fx = make_vault(550, 500);
        fx.vault.deposit(&alice(), 1000, &alice()).await.unwrap();
        assert!(fx.vault.check_yields_and_rebalance().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_repeated_rebalances_respect_max_allocation() {
        let mut fx = make_vault(600, 500);
        fx.vault.deposit(&alice(), 1000, &alice()).await.unwrap();

        // 10% moves per check, receiver capped at 90% of total.
        for _ in 0..6 {
            fx.vault.check_yields_and_rebalance().await.unwrap();
        }
        assert_eq!(fx.venue_a.balance(), 900);
        assert_eq!(fx.venue_b.balance(), 100);

        // At the cap: further checks trigger but move nothing.
        let plan = fx.vault.check_yields_and_rebalance().await.unwrap();
        assert!(plan.is_none());
        assert_eq!(fx.venue_a.balance(), 900);
        assert_invariants(&fx);
    }

    #[tokio::test]
    async fn test_rebalance_rolls_back_on_venue_failure() {
        let mut fx = make_vault(600, 500);
        fx.vault.deposit(&alice(), 1000, &alice()).await.unwrap();

        fx.venue_a.set_error("bridge down");
        let result = fx.vault.check_yields_and_rebalance().await;
        assert!(matches!(result, Err(VaultError::Venue { .. })));

        // Allocations and percentages unchanged.
        assert_eq!(fx.vault.allocations().venue_a, 500);
        assert_eq!(fx.vault.allocations().venue_b, 500);
        assert_eq!(fx.vault.allocation_bps(), (5000, 5000));

        fx.venue_a.clear_error();
        assert_invariants(&fx);
    }

    #[tokio::test]
    async fn test_rebalance_with_monitoring_paused_fails() {
        let mut fx = make_vault(600, 500);
        fx.vault.deposit(&alice(), 1000, &alice()).await.unwrap();
        fx.vault.pause_monitoring(&owner(), true).unwrap();

        assert!(matches!(
            fx.vault.check_yields_and_rebalance().await,
            Err(VaultError::MonitoringPaused)
        ));

        fx.vault.pause_monitoring(&owner(), false).unwrap();
        assert!(fx.vault.check_yields_and_rebalance().await.unwrap().is_some());
    }

    // -- Policy passthrough & op log --------------------------------------

    #[tokio::test]
    async fn test_threshold_passthrough() {
        let mut fx = make_vault(500, 500);
        fx.vault.update_rebalance_threshold(&owner(), 75).unwrap();
        assert_eq!(fx.vault.policy().config().rebalance_threshold_bps, 75);

        assert!(matches!(
            fx.vault.update_rebalance_threshold(&owner(), 600),
            Err(VaultError::ThresholdTooHigh { .. })
        ));
        assert!(matches!(
            fx.vault.update_rebalance_threshold(&alice(), 75),
            Err(VaultError::NotAuthorized { .. })
        ));
    }

    #[tokio::test]
    async fn test_op_log_orders_operations() {
        let mut fx = make_vault(600, 500);
        fx.vault.deposit(&alice(), 1000, &alice()).await.unwrap();
        fx.vault
            .withdraw(&alice(), 100, &alice(), &alice())
            .await
            .unwrap();
        fx.vault.check_yields_and_rebalance().await.unwrap();

        let ops = fx.vault.ops();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].seq, 0);
        assert!(ops[0].description.starts_with("deposit"));
        assert!(ops[1].description.starts_with("withdraw"));
        assert!(ops[2].description.starts_with("rebalance"));
    }

    // -- Snapshot ---------------------------------------------------------

    #[tokio::test]
    async fn test_snapshot_restore_roundtrip() {
        let mut fx = make_vault(600, 500);
        fx.vault.deposit(&alice(), 1000, &alice()).await.unwrap();
        fx.vault.check_yields_and_rebalance().await.unwrap();
        fx.vault
            .policy_mut()
            .authorize_user(&owner(), bob())
            .unwrap();

        let snapshot = fx.vault.snapshot();

        let mut fresh = make_vault(600, 500);
        fresh.vault.restore(snapshot);

        assert_eq!(fresh.vault.total_assets(), 1000);
        assert_eq!(fresh.vault.total_shares(), 1000);
        assert_eq!(fresh.vault.user_shares(&alice()), 1000);
        assert_eq!(fresh.vault.allocation_bps(), (6000, 4000));
        assert!(fresh.vault.policy().is_authorized(&bob()));
        assert_eq!(fresh.vault.last_yield_data().unwrap().apy_a_bps, 600);
    }
}
