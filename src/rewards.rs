//! # Reward accumulator
//!
//! Per-asset running totals that make redistribution O(1):
//! - `l_coll`: liquidated collateral per unit of stake, summed over all liquidations.
//! - `l_debt`: liquidated debt per unit of stake, summed over all liquidations.
//!
//! A trove's pending reward for an asset is `stake * (L - snapshot)`, where the snapshot is the
//! value of `L` when the trove was last materialized. Liquidations only ever add to `L`.
//!
//! Divisions truncate to 18 decimals. The remainder of each division is carried in
//! `coll_error`/`debt_error` and added to the next distribution of the same asset.

use crate::errors::*;
use crate::shared_structs::AssetIndex;
use scrypto::prelude::*;

/// Accumulator values captured into a trove when it was last materialized.
#[derive(ScryptoSbor, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct RewardSnapshot {
    pub coll: Decimal,
    pub debt: Decimal,
}

#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq, Default)]
pub struct AssetRewards {
    pub l_coll: Decimal,
    pub l_debt: Decimal,
    /// Sum of the stakes of all active troves.
    pub total_stakes: Decimal,
    /// `total_stakes` right after the last liquidation.
    pub total_stakes_snapshot: Decimal,
    /// Active plus default pool collateral right after the last liquidation.
    pub total_collateral_snapshot: Decimal,
    pub coll_error: Decimal,
    pub debt_error: Decimal,
    /// Liquidated amounts that found no stake to land on. They sit in the default pool until
    /// the next trove stakes this asset.
    pub orphaned_coll: Decimal,
    pub orphaned_debt: Decimal,
}

#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq, Default)]
pub struct RewardAccumulator {
    assets: Vec<AssetRewards>,
}

impl RewardAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_asset(&mut self) {
        self.assets.push(AssetRewards::default());
    }

    pub fn get(&self, asset: AssetIndex) -> TroveResult<&AssetRewards> {
        self.assets
            .get(asset as usize)
            .ok_or(TroveError::UnknownAsset)
    }

    fn get_mut(&mut self, asset: AssetIndex) -> TroveResult<&mut AssetRewards> {
        self.assets
            .get_mut(asset as usize)
            .ok_or(TroveError::UnknownAsset)
    }

    pub fn snapshot(&self, asset: AssetIndex) -> TroveResult<RewardSnapshot> {
        let rewards = self.get(asset)?;
        Ok(RewardSnapshot {
            coll: rewards.l_coll,
            debt: rewards.l_debt,
        })
    }

    /// Reward accrued by `stake` since `snapshot` was taken.
    pub fn pending(
        &self,
        asset: AssetIndex,
        stake: Decimal,
        snapshot: &RewardSnapshot,
    ) -> TroveResult<(Decimal, Decimal)> {
        if stake.is_zero() {
            return Ok((Decimal::ZERO, Decimal::ZERO));
        }

        let rewards = self.get(asset)?;
        let coll_per_stake = rewards
            .l_coll
            .sub_or(snapshot.coll, "collateral snapshot ahead of accumulator")?;
        let debt_per_stake = rewards
            .l_debt
            .sub_or(snapshot.debt, "debt snapshot ahead of accumulator")?;

        Ok((
            stake.mul_or(coll_per_stake, "pending collateral overflow")?,
            stake.mul_or(debt_per_stake, "pending debt overflow")?,
        ))
    }

    /// Stake for `collateral` units of an asset at the current stake/collateral snapshot ratio.
    /// The ratio is one while either snapshot total is zero.
    pub fn compute_stake(&self, asset: AssetIndex, collateral: Decimal) -> TroveResult<Decimal> {
        let rewards = self.get(asset)?;

        if rewards.total_stakes_snapshot.is_zero() || rewards.total_collateral_snapshot.is_zero() {
            return Ok(collateral);
        }

        let stake = collateral
            .mul_or(rewards.total_stakes_snapshot, "stake overflow")?
            .div_or(rewards.total_collateral_snapshot, "stake division")?;

        // truncation can not push a stake above its collateral, but the ratio may drift above one
        // through dust left in the default pool
        Ok(if stake > collateral { collateral } else { stake })
    }

    /// Replaces `old_stake` with `new_stake` in the live stake total.
    pub fn replace_stake(
        &mut self,
        asset: AssetIndex,
        old_stake: Decimal,
        new_stake: Decimal,
    ) -> TroveResult<()> {
        let rewards = self.get_mut(asset)?;
        rewards.total_stakes = rewards
            .total_stakes
            .sub_or(old_stake, "total stakes underflow")?
            .add_or(new_stake, "total stakes overflow")?;
        Ok(())
    }

    /// Spreads liquidated collateral and debt of an asset over every unit of live stake.
    /// With no live stake the amounts are orphaned instead.
    pub fn distribute(
        &mut self,
        asset: AssetIndex,
        collateral: Decimal,
        debt: Decimal,
    ) -> TroveResult<()> {
        let rewards = self.get_mut(asset)?;

        if rewards.total_stakes.is_zero() {
            rewards.orphaned_coll = rewards
                .orphaned_coll
                .add_or(collateral, "orphaned collateral overflow")?;
            rewards.orphaned_debt = rewards
                .orphaned_debt
                .add_or(debt, "orphaned debt overflow")?;
            return Ok(());
        }

        let total_stakes = rewards.total_stakes;

        let coll_numerator = collateral.add_or(rewards.coll_error, "collateral numerator")?;
        let coll_per_stake = coll_numerator.div_or(total_stakes, "collateral per stake")?;
        rewards.coll_error = coll_numerator.sub_or(
            coll_per_stake.mul_or(total_stakes, "collateral error")?,
            "collateral error",
        )?;

        let debt_numerator = debt.add_or(rewards.debt_error, "debt numerator")?;
        let debt_per_stake = debt_numerator.div_or(total_stakes, "debt per stake")?;
        rewards.debt_error = debt_numerator.sub_or(
            debt_per_stake.mul_or(total_stakes, "debt error")?,
            "debt error",
        )?;

        rewards.l_coll = rewards
            .l_coll
            .add_or(coll_per_stake, "collateral accumulator overflow")?;
        rewards.l_debt = rewards
            .l_debt
            .add_or(debt_per_stake, "debt accumulator overflow")?;

        Ok(())
    }

    /// Hands orphaned amounts of an asset to the stake that now exists for it.
    /// Returns whether anything was absorbed.
    pub fn absorb_orphans(&mut self, asset: AssetIndex) -> TroveResult<bool> {
        let rewards = self.get(asset)?;
        if rewards.total_stakes.is_zero()
            || (rewards.orphaned_coll.is_zero() && rewards.orphaned_debt.is_zero())
        {
            return Ok(false);
        }

        let (collateral, debt) = (rewards.orphaned_coll, rewards.orphaned_debt);
        let rewards = self.get_mut(asset)?;
        rewards.orphaned_coll = Decimal::ZERO;
        rewards.orphaned_debt = Decimal::ZERO;

        self.distribute(asset, collateral, debt)?;
        Ok(true)
    }

    /// Captures the post-liquidation stake and collateral totals of an asset.
    pub fn update_snapshots(
        &mut self,
        asset: AssetIndex,
        system_collateral: Decimal,
    ) -> TroveResult<()> {
        let rewards = self.get_mut(asset)?;
        rewards.total_stakes_snapshot = rewards.total_stakes;
        rewards.total_collateral_snapshot = system_collateral;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}
