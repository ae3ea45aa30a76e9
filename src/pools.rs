//! # Active and Default pools
//!
//! Logical ledgers over the collateral held in custody by the trove manager:
//! - **Active pool:** collateral and debt recorded on open troves.
//! - **Default pool:** collateral and debt taken from liquidated troves that has not yet been
//!   materialized into any surviving trove.
//!
//! The pools only move amounts around. They never compute shares; that is the reward
//! accumulator's job. Every movement is checked, a pool balance can not go negative.

use crate::errors::*;
use crate::shared_structs::AssetIndex;
use scrypto::prelude::*;

#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq, Default)]
pub struct PoolBalance {
    /// Collateral per asset, indexed by `AssetIndex`.
    collateral: Vec<Decimal>,
    debt: Decimal,
}

impl PoolBalance {
    pub fn collateral(&self, asset: AssetIndex) -> Decimal {
        self.collateral
            .get(asset as usize)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn debt(&self) -> Decimal {
        self.debt
    }

    fn slot(&mut self, asset: AssetIndex) -> TroveResult<&mut Decimal> {
        self.collateral
            .get_mut(asset as usize)
            .ok_or(TroveError::UnknownAsset)
    }

    fn add_collateral(&mut self, asset: AssetIndex, amount: Decimal) -> TroveResult<()> {
        let slot = self.slot(asset)?;
        *slot = slot.add_or(amount, "pool collateral overflow")?;
        Ok(())
    }

    fn remove_collateral(&mut self, asset: AssetIndex, amount: Decimal) -> TroveResult<()> {
        let slot = self.slot(asset)?;
        *slot = slot.sub_or(amount, "pool collateral underflow")?;
        Ok(())
    }

    fn add_debt(&mut self, amount: Decimal) -> TroveResult<()> {
        self.debt = self.debt.add_or(amount, "pool debt overflow")?;
        Ok(())
    }

    fn remove_debt(&mut self, amount: Decimal) -> TroveResult<()> {
        self.debt = self.debt.sub_or(amount, "pool debt underflow")?;
        Ok(())
    }
}

#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq, Default)]
pub struct Pools {
    pub active: PoolBalance,
    pub default: PoolBalance,
}

impl Pools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a zero balance for a newly registered asset in both pools.
    pub fn add_asset(&mut self) {
        self.active.collateral.push(Decimal::ZERO);
        self.default.collateral.push(Decimal::ZERO);
    }

    /// Collateral entering the system from an owner.
    pub fn deposit_collateral(&mut self, asset: AssetIndex, amount: Decimal) -> TroveResult<()> {
        self.active.add_collateral(asset, amount)
    }

    /// Collateral leaving the system from the active pool (owner withdrawal, incentive payout,
    /// redemption).
    pub fn withdraw_collateral(&mut self, asset: AssetIndex, amount: Decimal) -> TroveResult<()> {
        self.active.remove_collateral(asset, amount)
    }

    pub fn increase_debt(&mut self, amount: Decimal) -> TroveResult<()> {
        self.active.add_debt(amount)
    }

    pub fn decrease_debt(&mut self, amount: Decimal) -> TroveResult<()> {
        self.active.remove_debt(amount)
    }

    /// Liquidated collateral parked in the default pool until survivors materialize it.
    pub fn move_collateral_to_default(
        &mut self,
        asset: AssetIndex,
        amount: Decimal,
    ) -> TroveResult<()> {
        self.active.remove_collateral(asset, amount)?;
        self.default.add_collateral(asset, amount)
    }

    pub fn move_debt_to_default(&mut self, amount: Decimal) -> TroveResult<()> {
        self.active.remove_debt(amount)?;
        self.default.add_debt(amount)
    }

    /// Pending rewards being materialized into a trove.
    pub fn move_collateral_to_active(
        &mut self,
        asset: AssetIndex,
        amount: Decimal,
    ) -> TroveResult<()> {
        self.default.remove_collateral(asset, amount)?;
        self.active.add_collateral(asset, amount)
    }

    pub fn move_debt_to_active(&mut self, amount: Decimal) -> TroveResult<()> {
        self.default.remove_debt(amount)?;
        self.active.add_debt(amount)
    }

    /// Collateral of an asset across both pools.
    pub fn system_collateral(&self, asset: AssetIndex) -> TroveResult<Decimal> {
        self.active
            .collateral(asset)
            .add_or(self.default.collateral(asset), "system collateral overflow")
    }

    /// Debt across both pools, equal to the circulating debt token supply.
    pub fn system_debt(&self) -> TroveResult<Decimal> {
        self.active
            .debt()
            .add_or(self.default.debt(), "system debt overflow")
    }
}
