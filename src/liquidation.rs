//! # Liquidation
//!
//! Closes an under-collateralized trove and spreads its collateral and debt over every other trove
//! through the reward accumulator. A small share of the collateral is withheld as the liquidator's
//! incentive, the rest moves into the default pool.
//!
//! The trove's debt is split over its assets in proportion to the value of each asset in the trove
//! at the liquidation prices. Each share is distributed over the stakers of that asset only, so a
//! trove that never held an asset never receives debt through it.
//!
//! A batch runs the very same per-trove step for every candidate and refreshes the stake snapshots
//! once at the end, which leaves the ledger exactly where the same liquidations in a row would.

use crate::errors::*;
use crate::oracle_adapter::PriceSet;
use crate::shared_structs::{AssetIndex, TroveStatus};
use crate::trove_ledger::{TroveLedger, TroveRecord};
use scrypto::prelude::*;

/// Result of liquidating a single trove.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Liquidation {
    /// The closed record to store back.
    pub record: TroveRecord,
    pub icr: Decimal,
    pub recovery_mode: bool,
    /// Collateral moved to the default pool per asset.
    pub collateral_redistributed: Vec<(AssetIndex, Decimal)>,
    /// Debt moved to the default pool per asset.
    pub debt_redistributed: Vec<(AssetIndex, Decimal)>,
    /// Collateral withheld for the liquidator per asset.
    pub incentive: Vec<(AssetIndex, Decimal)>,
}

/// Result of a batch liquidation. `K` identifies troves for the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchLiquidation<K> {
    pub liquidated: Vec<(K, Liquidation)>,
    /// Candidates that were left untouched and why.
    pub skipped: Vec<(K, TroveError)>,
}

impl<K> BatchLiquidation<K> {
    /// Liquidator incentive summed per asset over the whole batch.
    pub fn total_incentive(&self) -> TroveResult<Vec<(AssetIndex, Decimal)>> {
        let mut totals: BTreeMap<AssetIndex, Decimal> = BTreeMap::new();
        for (_, liquidation) in self.liquidated.iter() {
            for (asset, amount) in liquidation.incentive.iter() {
                let total = totals.entry(*asset).or_insert(Decimal::ZERO);
                *total = total.add_or(*amount, "batch incentive overflow")?;
            }
        }
        Ok(totals.into_iter().collect())
    }
}

impl TroveLedger {
    /// Liquidates one trove.
    ///
    /// # Errors
    /// * `InvalidPosition` if the trove is not active.
    /// * `NotLiquidatable` if its collateral ratio is at or above the applicable threshold.
    /// * `StalePrice` if a needed price is missing.
    pub fn liquidate(&mut self, record: TroveRecord, prices: &PriceSet) -> TroveResult<Liquidation> {
        self.staged(|ledger| {
            let liquidation = ledger.liquidate_one(record, prices)?;
            ledger.refresh_snapshots()?;
            Ok(liquidation)
        })
    }

    /// Liquidates every eligible trove of `troves` in order.
    ///
    /// Troves that are not active, appear twice or are not liquidatable are skipped. Any other
    /// error aborts the whole batch.
    ///
    /// # Errors
    /// * `NothingToLiquidate` if no trove of the batch was liquidated.
    /// * `InvalidAmount` if the batch exceeds `max_batch_size`.
    pub fn liquidate_batch<K: Clone + PartialEq>(
        &mut self,
        troves: Vec<(K, TroveRecord)>,
        prices: &PriceSet,
    ) -> TroveResult<BatchLiquidation<K>> {
        if troves.len() as u64 > self.parameters.max_batch_size {
            return Err(TroveError::InvalidAmount("batch too large"));
        }

        self.staged(|ledger| {
            let mut batch = BatchLiquidation {
                liquidated: vec![],
                skipped: vec![],
            };

            for (key, record) in troves {
                if batch.liquidated.iter().any(|(done, _)| *done == key) {
                    batch
                        .skipped
                        .push((key, TroveError::InvalidPosition(TroveStatus::ClosedByLiquidation)));
                    continue;
                }

                match ledger.staged(|ledger| ledger.liquidate_one(record, prices)) {
                    Ok(liquidation) => batch.liquidated.push((key, liquidation)),
                    Err(error @ TroveError::NotLiquidatable { .. })
                    | Err(error @ TroveError::InvalidPosition(_)) => batch.skipped.push((key, error)),
                    Err(error) => return Err(error),
                }
            }

            if batch.liquidated.is_empty() {
                return Err(TroveError::NothingToLiquidate);
            }

            ledger.refresh_snapshots()?;

            Ok(batch)
        })
    }

    /// Whether a trove is liquidatable at the given prices, including its pending rewards.
    pub fn is_liquidatable(&self, record: &TroveRecord, prices: &PriceSet) -> TroveResult<bool> {
        let tcr = self.total_collateral_ratio(prices)?;
        let recovery_mode = tcr < self.parameters.ccr;
        let icr = self.collateralization_ratio(record, prices)?;
        Ok(icr < self.liquidation_threshold(recovery_mode, tcr))
    }

    /// The per-trove step shared by single and batch liquidation. Leaves the stake snapshots alone.
    fn liquidate_one(&mut self, record: TroveRecord, prices: &PriceSet) -> TroveResult<Liquidation> {
        if record.status() != TroveStatus::Active {
            return Err(TroveError::InvalidPosition(record.status()));
        }

        let tcr = self.total_collateral_ratio(prices)?;
        let recovery_mode = tcr < self.parameters.ccr;
        let trove = self.materialize_in_place(record)?;

        let icr = self.trove_icr(&trove, prices)?;
        let threshold = self.liquidation_threshold(recovery_mode, tcr);
        if icr >= threshold {
            return Err(TroveError::NotLiquidatable { icr, threshold });
        }

        let collateral: Vec<(AssetIndex, Decimal)> = trove
            .collateral_entries()
            .iter()
            .map(|(asset, amount)| (*asset, *amount))
            .collect();
        let debt = trove.debt();
        let debt_redistributed = self.allocate_debt(&collateral, debt, prices)?;

        for (asset, stake) in trove.stakes().iter() {
            self.rewards.replace_stake(*asset, *stake, Decimal::ZERO)?;
        }

        let mut collateral_redistributed = vec![];
        let mut incentive = vec![];
        for (asset, amount) in collateral.iter() {
            let withheld = amount.mul_or(
                self.parameters.liquidation_incentive,
                "liquidation incentive",
            )?;
            let redistributed = amount.sub_or(withheld, "liquidation incentive")?;

            self.pools.withdraw_collateral(*asset, withheld)?;
            self.pools.move_collateral_to_default(*asset, redistributed)?;

            collateral_redistributed.push((*asset, redistributed));
            incentive.push((*asset, withheld));
        }
        self.pools.move_debt_to_default(debt)?;

        for ((asset, redistributed), (_, allocated)) in
            collateral_redistributed.iter().zip(debt_redistributed.iter())
        {
            self.rewards.distribute(*asset, *redistributed, *allocated)?;
        }

        Ok(Liquidation {
            record: TroveRecord::with_status(TroveStatus::ClosedByLiquidation),
            icr,
            recovery_mode,
            collateral_redistributed,
            debt_redistributed,
            incentive,
        })
    }

    /// Splits `debt` over the assets of `collateral` by value. The last asset takes what rounding
    /// left over so the shares sum to `debt` exactly.
    fn allocate_debt(
        &self,
        collateral: &[(AssetIndex, Decimal)],
        debt: Decimal,
        prices: &PriceSet,
    ) -> TroveResult<Vec<(AssetIndex, Decimal)>> {
        let mut values = vec![];
        let mut total_value = Decimal::ZERO;
        for (asset, amount) in collateral.iter() {
            let value = amount.mul_or(prices.price_of(*asset)?, "collateral value overflow")?;
            total_value = total_value.add_or(value, "collateral value overflow")?;
            values.push((*asset, value));
        }

        if total_value.is_zero() {
            return if debt.is_zero() {
                Ok(values)
            } else {
                Err(TroveError::ArithmeticInvariantViolation("debt without collateral value"))
            };
        }

        let mut allocation = vec![];
        let mut allocated = Decimal::ZERO;
        let last = values.len() - 1;
        for (position, (asset, value)) in values.into_iter().enumerate() {
            let share = if position == last {
                debt.sub_or(allocated, "debt allocation")?
            } else {
                debt.mul_or(value, "debt allocation")?
                    .div_or(total_value, "debt allocation")?
            };
            allocated = allocated.add_or(share, "debt allocation")?;
            allocation.push((asset, share));
        }

        Ok(allocation)
    }

    /// Captures the stake and collateral totals of every asset after a round of liquidations.
    fn refresh_snapshots(&mut self) -> TroveResult<()> {
        let assets: Vec<AssetIndex> = self.registry.iter().map(|(asset, _)| asset).collect();
        for asset in assets {
            let system_collateral = self.pools.system_collateral(asset)?;
            self.rewards.update_snapshots(asset, system_collateral)?;
        }
        Ok(())
    }
}
