//! # Trove ledger
//!
//! The position ledger of the protocol. It owns the per-asset globals (registry, reward
//! accumulator, pools and parameters) and implements every trove state transition on records it is
//! handed by the caller. Trove records themselves live in the caller's `troves` table and refer to
//! assets only by `AssetIndex`.
//!
//! ## Apply, then mutate
//! A stored `TroveRecord` is stale as soon as any liquidation happens after it was written. The
//! only way to read a trove's collateral and debt for a business decision is through a
//! `MaterializedTrove`, which can only be obtained from the ledger after pending rewards have been
//! applied. The raw record only exposes explicitly named `recorded_*` accessors.
//!
//! ## Atomicity
//! Every public operation runs on a staged copy of the ledger and of the trove record. The copy is
//! committed only when the whole operation succeeded, so an error never leaves a partial write.

use crate::asset_registry::AssetRegistry;
use crate::errors::*;
use crate::oracle_adapter::{collateral_ratio, PriceSet};
use crate::pools::Pools;
use crate::rewards::{RewardAccumulator, RewardSnapshot};
use crate::shared_structs::{AssetIndex, TroveStatus};
use scrypto::prelude::*;

/// Protocol parameters of the ledger, changed only through `TroveLedger::set_parameters`.
#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq)]
pub struct LedgerParameters {
    /// Minimum collateral ratio. Troves below it can be liquidated.
    pub mcr: Decimal,
    /// Critical collateral ratio. The system is in recovery mode while its total collateral ratio
    /// is below it.
    pub ccr: Decimal,
    /// Fraction of liquidated collateral withheld from redistribution and paid to the liquidator.
    pub liquidation_incentive: Decimal,
    /// Smallest non-zero debt a trove may carry.
    pub minimum_debt: Decimal,
    /// Fraction of redeemed collateral left to the trove owner.
    pub redemption_fee: Decimal,
    /// Maximum number of troves in one batch liquidation.
    pub max_batch_size: u64,
    pub stop_openings: bool,
    pub stop_liquidations: bool,
}

impl Default for LedgerParameters {
    fn default() -> Self {
        Self {
            mcr: dec!("1.1"),
            ccr: dec!("1.5"),
            liquidation_incentive: dec!("0.005"),
            minimum_debt: Decimal::ONE,
            redemption_fee: dec!("0.005"),
            max_batch_size: 50,
            stop_openings: false,
            stop_liquidations: false,
        }
    }
}

impl LedgerParameters {
    pub fn validate(&self) -> TroveResult<()> {
        if self.mcr < Decimal::ONE || self.ccr < self.mcr {
            return Err(TroveError::InvalidAmount("thresholds must satisfy 1 <= mcr <= ccr"));
        }
        if self.liquidation_incentive.is_negative() || self.liquidation_incentive >= Decimal::ONE {
            return Err(TroveError::InvalidAmount("liquidation incentive must be in [0, 1)"));
        }
        if self.redemption_fee.is_negative() || self.redemption_fee >= Decimal::ONE {
            return Err(TroveError::InvalidAmount("redemption fee must be in [0, 1)"));
        }
        if self.minimum_debt.is_negative() {
            return Err(TroveError::InvalidAmount("minimum debt can not be negative"));
        }
        if self.max_batch_size == 0 {
            return Err(TroveError::InvalidAmount("batch size must be positive"));
        }
        Ok(())
    }
}

/// One row of the `troves` table.
#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq)]
pub struct TroveRecord {
    pub(crate) status: TroveStatus,
    pub(crate) collateral: BTreeMap<AssetIndex, Decimal>,
    pub(crate) debt: Decimal,
    pub(crate) stakes: BTreeMap<AssetIndex, Decimal>,
    pub(crate) snapshots: BTreeMap<AssetIndex, RewardSnapshot>,
}

impl Default for TroveRecord {
    fn default() -> Self {
        Self::with_status(TroveStatus::Nonexistent)
    }
}

impl TroveRecord {
    pub(crate) fn with_status(status: TroveStatus) -> Self {
        Self {
            status,
            collateral: BTreeMap::new(),
            debt: Decimal::ZERO,
            stakes: BTreeMap::new(),
            snapshots: BTreeMap::new(),
        }
    }

    pub fn status(&self) -> TroveStatus {
        self.status
    }

    /// Collateral as last written, without pending rewards.
    pub fn recorded_collateral(&self) -> &BTreeMap<AssetIndex, Decimal> {
        &self.collateral
    }

    /// Debt as last written, without pending rewards.
    pub fn recorded_debt(&self) -> Decimal {
        self.debt
    }

    pub fn stake(&self, asset: AssetIndex) -> Decimal {
        self.stakes.get(&asset).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn stakes(&self) -> &BTreeMap<AssetIndex, Decimal> {
        &self.stakes
    }

    pub fn snapshot(&self, asset: AssetIndex) -> Option<RewardSnapshot> {
        self.snapshots.get(&asset).copied()
    }

    fn ensure_active(&self) -> TroveResult<()> {
        if self.status == TroveStatus::Active {
            Ok(())
        } else {
            Err(TroveError::InvalidPosition(self.status))
        }
    }
}

/// A trove whose pending rewards have been applied against the ledger that produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MaterializedTrove {
    record: TroveRecord,
}

impl MaterializedTrove {
    pub fn status(&self) -> TroveStatus {
        self.record.status
    }

    pub fn collateral(&self, asset: AssetIndex) -> Decimal {
        self.record
            .collateral
            .get(&asset)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn collateral_entries(&self) -> &BTreeMap<AssetIndex, Decimal> {
        &self.record.collateral
    }

    pub fn debt(&self) -> Decimal {
        self.record.debt
    }

    pub fn stake(&self, asset: AssetIndex) -> Decimal {
        self.record.stake(asset)
    }

    pub fn stakes(&self) -> &BTreeMap<AssetIndex, Decimal> {
        &self.record.stakes
    }

    pub fn into_record(self) -> TroveRecord {
        self.record
    }

    fn set_collateral(&mut self, asset: AssetIndex, amount: Decimal) {
        if amount.is_zero() {
            self.record.collateral.remove(&asset);
        } else {
            self.record.collateral.insert(asset, amount);
        }
    }
}

/// Amounts handed back when a trove is closed by its owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClosedTrove {
    pub record: TroveRecord,
    pub collateral: Vec<(AssetIndex, Decimal)>,
    pub debt: Decimal,
}

/// Amounts produced by redeeming a trove.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Redemption {
    pub record: TroveRecord,
    pub icr: Decimal,
    /// Collateral paid to the redeemer.
    pub redeemed: Vec<(AssetIndex, Decimal)>,
    /// Collateral owed to the trove owner.
    pub leftovers: Vec<(AssetIndex, Decimal)>,
    pub debt: Decimal,
}

#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq)]
pub struct TroveLedger {
    pub(crate) registry: AssetRegistry,
    pub(crate) rewards: RewardAccumulator,
    pub(crate) pools: Pools,
    pub(crate) parameters: LedgerParameters,
}

impl Default for TroveLedger {
    fn default() -> Self {
        Self::new(LedgerParameters::default())
    }
}

impl TroveLedger {
    pub fn new(parameters: LedgerParameters) -> Self {
        Self {
            registry: AssetRegistry::new(),
            rewards: RewardAccumulator::new(),
            pools: Pools::new(),
            parameters,
        }
    }

    pub fn registry(&self) -> &AssetRegistry {
        &self.registry
    }

    pub fn rewards(&self) -> &RewardAccumulator {
        &self.rewards
    }

    pub fn pools(&self) -> &Pools {
        &self.pools
    }

    pub fn parameters(&self) -> &LedgerParameters {
        &self.parameters
    }

    pub fn set_parameters(&mut self, parameters: LedgerParameters) -> TroveResult<()> {
        parameters.validate()?;
        self.parameters = parameters;
        Ok(())
    }

    /// Registers a collateral asset and creates its zeroed accumulator and pool entries.
    pub fn register_asset(
        &mut self,
        resource_address: ResourceAddress,
        divisibility: u8,
    ) -> TroveResult<AssetIndex> {
        self.staged(|ledger| {
            let index = ledger.registry.register(resource_address, divisibility)?;
            ledger.rewards.add_asset();
            ledger.pools.add_asset();
            Ok(index)
        })
    }

    pub fn set_asset_active(&mut self, asset: AssetIndex, active: bool) -> TroveResult<()> {
        self.registry.set_active(asset, active)
    }

    /// Runs `operation` on a copy of the ledger and keeps the copy only on success.
    pub(crate) fn staged<T>(
        &mut self,
        operation: impl FnOnce(&mut Self) -> TroveResult<T>,
    ) -> TroveResult<T> {
        let mut staged = self.clone();
        let result = operation(&mut staged)?;
        *self = staged;
        Ok(result)
    }

    //==================================================================
    //                        MATERIALIZATION
    //==================================================================

    /// Materializes a trove's pending rewards into its record and moves the matching amounts from
    /// the default pool to the active pool. A second call without a liquidation in between changes
    /// nothing.
    ///
    /// # Errors
    /// * `InvalidPosition` if the trove is not active.
    pub fn apply_pending_rewards(&mut self, record: &mut TroveRecord) -> TroveResult<()> {
        let mut staged_record = record.clone();
        self.staged(|ledger| ledger.apply_pending_rewards_in_place(&mut staged_record))?;
        *record = staged_record;
        Ok(())
    }

    /// Consumes a stored record and returns its materialized view.
    pub fn materialize(&mut self, record: TroveRecord) -> TroveResult<MaterializedTrove> {
        self.staged(|ledger| ledger.materialize_in_place(record))
    }

    pub(crate) fn materialize_in_place(
        &mut self,
        mut record: TroveRecord,
    ) -> TroveResult<MaterializedTrove> {
        self.apply_pending_rewards_in_place(&mut record)?;
        Ok(MaterializedTrove { record })
    }

    fn apply_pending_rewards_in_place(&mut self, record: &mut TroveRecord) -> TroveResult<()> {
        record.ensure_active()?;

        let stakes: Vec<(AssetIndex, Decimal)> = record
            .stakes
            .iter()
            .map(|(asset, stake)| (*asset, *stake))
            .collect();

        for (asset, stake) in stakes {
            let snapshot = record
                .snapshots
                .get(&asset)
                .copied()
                .ok_or(TroveError::ArithmeticInvariantViolation("stake without snapshot"))?;
            let (pending_coll, pending_debt) = self.rewards.pending(asset, stake, &snapshot)?;

            if !pending_coll.is_zero() {
                let collateral = record.collateral.get(&asset).copied().unwrap_or(Decimal::ZERO);
                record.collateral.insert(
                    asset,
                    collateral.add_or(pending_coll, "trove collateral overflow")?,
                );
                self.pools.move_collateral_to_active(asset, pending_coll)?;
            }

            if !pending_debt.is_zero() {
                record.debt = record.debt.add_or(pending_debt, "trove debt overflow")?;
                self.pools.move_debt_to_active(pending_debt)?;
            }

            record.snapshots.insert(asset, self.rewards.snapshot(asset)?);
        }

        Ok(())
    }

    /// Recomputes a trove's stake for one asset from its current collateral and resets the asset's
    /// snapshot. Any orphaned amounts of the asset are handed to the new stake, after which the
    /// trove is materialized again. Returns whether orphans were absorbed.
    fn update_stake(&mut self, trove: &mut MaterializedTrove, asset: AssetIndex) -> TroveResult<bool> {
        let old_stake = trove.stake(asset);
        let new_stake = self.rewards.compute_stake(asset, trove.collateral(asset))?;
        self.set_stake(trove, asset, old_stake, new_stake)?;

        if !self.rewards.absorb_orphans(asset)? {
            return Ok(false);
        }
        self.apply_pending_rewards_in_place(&mut trove.record)?;

        // Orphans only exist while nobody stakes the asset, so this trove is its sole staker. Its
        // stake restarts at its collateral and the asset's stake ratio is taken from there.
        let absorbed_stake = trove.collateral(asset);
        self.set_stake(trove, asset, new_stake, absorbed_stake)?;
        let system_collateral = self.pools.system_collateral(asset)?;
        self.rewards.update_snapshots(asset, system_collateral)?;

        Ok(true)
    }

    fn set_stake(
        &mut self,
        trove: &mut MaterializedTrove,
        asset: AssetIndex,
        old_stake: Decimal,
        new_stake: Decimal,
    ) -> TroveResult<()> {
        self.rewards.replace_stake(asset, old_stake, new_stake)?;

        if new_stake.is_zero() {
            trove.record.stakes.remove(&asset);
            trove.record.snapshots.remove(&asset);
        } else {
            trove.record.stakes.insert(asset, new_stake);
            trove.record.snapshots.insert(asset, self.rewards.snapshot(asset)?);
        }

        Ok(())
    }

    /// Drops every stake of a trove from the live totals and empties the record.
    fn retire(&mut self, trove: MaterializedTrove, status: TroveStatus) -> TroveResult<TroveRecord> {
        for (asset, stake) in trove.record.stakes.iter() {
            self.rewards.replace_stake(*asset, *stake, Decimal::ZERO)?;
        }
        Ok(TroveRecord::with_status(status))
    }

    //==================================================================
    //                          HEALTH
    //==================================================================

    pub fn trove_icr(&self, trove: &MaterializedTrove, prices: &PriceSet) -> TroveResult<Decimal> {
        let value = prices.basket_value(
            trove
                .collateral_entries()
                .iter()
                .map(|(asset, amount)| (*asset, amount)),
        )?;
        collateral_ratio(value, trove.debt())
    }

    /// Total collateral ratio over both pools.
    pub fn total_collateral_ratio(&self, prices: &PriceSet) -> TroveResult<Decimal> {
        let mut system_collateral: Vec<(AssetIndex, Decimal)> = vec![];
        for (asset, _) in self.registry.iter() {
            system_collateral.push((asset, self.pools.system_collateral(asset)?));
        }

        let value = prices.basket_value(
            system_collateral
                .iter()
                .map(|(asset, amount)| (*asset, amount)),
        )?;
        collateral_ratio(value, self.pools.system_debt()?)
    }

    pub fn is_recovery_mode(&self, prices: &PriceSet) -> TroveResult<bool> {
        Ok(self.total_collateral_ratio(prices)? < self.parameters.ccr)
    }

    /// Checks a trove that was just made less healthy: at least the MCR in normal mode (without
    /// tipping the system into recovery mode), at least the CCR in recovery mode.
    fn check_health(
        &self,
        trove: &MaterializedTrove,
        prices: &PriceSet,
        recovery_mode: bool,
    ) -> TroveResult<()> {
        let icr = self.trove_icr(trove, prices)?;
        let required = if recovery_mode {
            self.parameters.ccr
        } else {
            self.parameters.mcr
        };

        if icr < required {
            return Err(TroveError::InsufficientCollateral { icr, required });
        }

        if !recovery_mode {
            let tcr = self.total_collateral_ratio(prices)?;
            if tcr < self.parameters.ccr {
                return Err(TroveError::InsufficientCollateral {
                    icr: tcr,
                    required: self.parameters.ccr,
                });
            }
        }

        Ok(())
    }

    //==================================================================
    //                       OWNER OPERATIONS
    //==================================================================

    /// Opens a trove with initial collateral deposits and debt.
    ///
    /// # Errors
    /// * `InvalidAmount` without collateral, with non-positive deposits or debt below the minimum.
    /// * `UnknownAsset` / `InactiveAsset` for assets that can not be deposited.
    /// * `InsufficientCollateral` if the trove would open below the required ratio.
    /// * `StalePrice` if a needed price is missing.
    pub fn open_trove(
        &mut self,
        deposits: Vec<(AssetIndex, Decimal)>,
        debt: Decimal,
        prices: &PriceSet,
    ) -> TroveResult<TroveRecord> {
        self.staged(|ledger| {
            if deposits.is_empty() {
                return Err(TroveError::InvalidAmount("a trove needs collateral"));
            }
            if debt.is_negative() || (!debt.is_zero() && debt < ledger.parameters.minimum_debt) {
                return Err(TroveError::InvalidAmount("debt below the minimum"));
            }

            let recovery_mode = ledger.is_recovery_mode(prices)?;
            let mut trove = ledger.materialize_in_place(TroveRecord::with_status(TroveStatus::Active))?;

            for (asset, amount) in deposits.iter() {
                ledger.registry.ensure_accepting(*asset)?;
                if !amount.is_positive() {
                    return Err(TroveError::InvalidAmount("deposits must be positive"));
                }
                let collateral = trove.collateral(*asset).add_or(*amount, "trove collateral overflow")?;
                trove.set_collateral(*asset, collateral);
                ledger.pools.deposit_collateral(*asset, *amount)?;
            }

            trove.record.debt = debt;
            ledger.pools.increase_debt(debt)?;

            let assets: Vec<AssetIndex> = trove.collateral_entries().keys().copied().collect();
            for asset in assets {
                ledger.update_stake(&mut trove, asset)?;
            }

            ledger.check_health(&trove, prices, recovery_mode)?;

            Ok(trove.into_record())
        })
    }

    /// Deposits or withdraws collateral and borrows or repays debt on an active trove.
    ///
    /// Positive collateral deltas are deposits, negative ones withdrawals. A positive `debt_delta`
    /// borrows, a negative one repays. Adjustments that make the trove less healthy must keep it
    /// above the required ratio. Deposits and repayments are always allowed unless a deposit
    /// absorbs orphaned debt.
    ///
    /// # Errors
    /// * `InvalidPosition` if the trove is not active.
    /// * `InvalidAmount` when withdrawing or repaying more than the trove holds.
    /// * `InsufficientDebtRepayment` if a repayment leaves a debt below the minimum.
    /// * `InsufficientCollateral` if a health-reducing adjustment breaks the required ratio.
    pub fn adjust_trove(
        &mut self,
        record: TroveRecord,
        collateral_deltas: Vec<(AssetIndex, Decimal)>,
        debt_delta: Decimal,
        prices: &PriceSet,
    ) -> TroveResult<TroveRecord> {
        self.staged(|ledger| {
            let recovery_mode = ledger.is_recovery_mode(prices)?;
            let mut trove = ledger.materialize_in_place(record)?;
            let mut reduces_health = false;
            let mut touched: Vec<AssetIndex> = vec![];

            for (asset, delta) in collateral_deltas.iter() {
                if delta.is_zero() {
                    continue;
                }
                ledger.registry.get(*asset)?;

                if delta.is_positive() {
                    ledger.registry.ensure_accepting(*asset)?;
                    let collateral = trove.collateral(*asset).add_or(*delta, "trove collateral overflow")?;
                    trove.set_collateral(*asset, collateral);
                    ledger.pools.deposit_collateral(*asset, *delta)?;
                } else {
                    let amount = -*delta;
                    if amount > trove.collateral(*asset) {
                        return Err(TroveError::InvalidAmount("withdrawal exceeds collateral"));
                    }
                    let collateral = trove.collateral(*asset).sub_or(amount, "trove collateral underflow")?;
                    trove.set_collateral(*asset, collateral);
                    ledger.pools.withdraw_collateral(*asset, amount)?;
                    reduces_health = true;
                }

                if !touched.contains(asset) {
                    touched.push(*asset);
                }
            }

            if debt_delta.is_positive() {
                trove.record.debt = trove.debt().add_or(debt_delta, "trove debt overflow")?;
                ledger.pools.increase_debt(debt_delta)?;
                reduces_health = true;
            } else if debt_delta.is_negative() {
                let repayment = -debt_delta;
                if repayment > trove.debt() {
                    return Err(TroveError::InvalidAmount("repayment exceeds debt"));
                }
                let remaining = trove.debt().sub_or(repayment, "trove debt underflow")?;
                if !remaining.is_zero() && remaining < ledger.parameters.minimum_debt {
                    return Err(TroveError::InsufficientDebtRepayment {
                        provided: repayment,
                        maximum: trove
                            .debt()
                            .sub_or(ledger.parameters.minimum_debt, "maximum partial repayment")?,
                    });
                }
                trove.record.debt = remaining;
                ledger.pools.decrease_debt(repayment)?;
            }

            if !trove.debt().is_zero() && trove.debt() < ledger.parameters.minimum_debt {
                return Err(TroveError::InvalidAmount("debt below the minimum"));
            }

            // absorbed orphans bring debt with them
            for asset in touched {
                if ledger.update_stake(&mut trove, asset)? {
                    reduces_health = true;
                }
            }

            if reduces_health {
                ledger.check_health(&trove, prices, recovery_mode)?;
            }

            Ok(trove.into_record())
        })
    }

    /// Closes a trove on behalf of its owner, releasing its entire collateral against its entire
    /// debt.
    pub fn close_trove(&mut self, record: TroveRecord) -> TroveResult<ClosedTrove> {
        self.staged(|ledger| {
            let trove = ledger.materialize_in_place(record)?;
            let collateral: Vec<(AssetIndex, Decimal)> = trove
                .collateral_entries()
                .iter()
                .map(|(asset, amount)| (*asset, *amount))
                .collect();
            let debt = trove.debt();

            for (asset, amount) in collateral.iter() {
                ledger.pools.withdraw_collateral(*asset, *amount)?;
            }
            ledger.pools.decrease_debt(debt)?;

            let record = ledger.retire(trove, TroveStatus::ClosedByOwner)?;

            Ok(ClosedTrove {
                record,
                collateral,
                debt,
            })
        })
    }

    /// Repays a trove's entire debt on behalf of a redeemer. The redeemer receives collateral worth
    /// the debt at current prices, pro-rata across the trove's assets and minus the redemption fee.
    /// Everything else is left over for the owner.
    ///
    /// # Errors
    /// * `NotRedeemable` if the trove is liquidatable or under-collateralized.
    /// * `InvalidAmount` if the trove has no debt.
    pub fn redeem_trove(&mut self, record: TroveRecord, prices: &PriceSet) -> TroveResult<Redemption> {
        self.staged(|ledger| {
            let tcr = ledger.total_collateral_ratio(prices)?;
            let recovery_mode = tcr < ledger.parameters.ccr;
            let trove = ledger.materialize_in_place(record)?;
            let debt = trove.debt();

            if debt.is_zero() {
                return Err(TroveError::InvalidAmount("nothing to redeem"));
            }

            let icr = ledger.trove_icr(&trove, prices)?;
            if icr < Decimal::ONE || icr < ledger.liquidation_threshold(recovery_mode, tcr) {
                return Err(TroveError::NotRedeemable { icr });
            }

            let value = prices.basket_value(
                trove
                    .collateral_entries()
                    .iter()
                    .map(|(asset, amount)| (*asset, amount)),
            )?;
            let fraction = debt.div_or(value, "redemption fraction")?;
            let kept = Decimal::ONE.sub_or(ledger.parameters.redemption_fee, "redemption fee")?;

            let mut redeemed = vec![];
            let mut leftovers = vec![];
            for (asset, amount) in trove.collateral_entries().iter() {
                let paid = amount
                    .mul_or(fraction, "redeemed collateral")?
                    .mul_or(kept, "redeemed collateral")?;
                let leftover = amount.sub_or(paid, "redemption leftovers")?;
                ledger.pools.withdraw_collateral(*asset, *amount)?;
                redeemed.push((*asset, paid));
                leftovers.push((*asset, leftover));
            }
            ledger.pools.decrease_debt(debt)?;

            let record = ledger.retire(trove, TroveStatus::ClosedByRedemption)?;

            Ok(Redemption {
                record,
                icr,
                redeemed,
                leftovers,
                debt,
            })
        })
    }

    /// Collateral ratio under which a trove is liquidatable. In recovery mode the threshold rises
    /// to the total collateral ratio.
    pub(crate) fn liquidation_threshold(&self, recovery_mode: bool, tcr: Decimal) -> Decimal {
        if recovery_mode && tcr > self.parameters.mcr {
            tcr
        } else {
            self.parameters.mcr
        }
    }

    //==================================================================
    //                          VIEWS
    //==================================================================

    /// Rewards a trove has accrued but not materialized yet.
    pub fn pending_rewards(
        &self,
        record: &TroveRecord,
    ) -> TroveResult<(BTreeMap<AssetIndex, Decimal>, Decimal)> {
        record.ensure_active()?;

        let mut collateral = BTreeMap::new();
        let mut debt = Decimal::ZERO;
        for (asset, stake) in record.stakes.iter() {
            let snapshot = record
                .snapshots
                .get(asset)
                .copied()
                .ok_or(TroveError::ArithmeticInvariantViolation("stake without snapshot"))?;
            let (pending_coll, pending_debt) = self.rewards.pending(*asset, *stake, &snapshot)?;
            if !pending_coll.is_zero() {
                collateral.insert(*asset, pending_coll);
            }
            debt = debt.add_or(pending_debt, "pending debt overflow")?;
        }

        Ok((collateral, debt))
    }

    /// Recorded amounts plus pending rewards, without writing anything.
    pub fn entire_collateral_and_debt(
        &self,
        record: &TroveRecord,
    ) -> TroveResult<(BTreeMap<AssetIndex, Decimal>, Decimal)> {
        let (pending_coll, pending_debt) = self.pending_rewards(record)?;

        let mut collateral = record.collateral.clone();
        for (asset, amount) in pending_coll {
            let entry = collateral.entry(asset).or_insert(Decimal::ZERO);
            *entry = entry.add_or(amount, "entire collateral overflow")?;
        }

        Ok((collateral, record.debt.add_or(pending_debt, "entire debt overflow")?))
    }

    /// Collateral ratio of a trove including its pending rewards.
    pub fn collateralization_ratio(
        &self,
        record: &TroveRecord,
        prices: &PriceSet,
    ) -> TroveResult<Decimal> {
        let (collateral, debt) = self.entire_collateral_and_debt(record)?;
        let value = prices.basket_value(collateral.iter().map(|(asset, amount)| (*asset, amount)))?;
        collateral_ratio(value, debt)
    }
}
