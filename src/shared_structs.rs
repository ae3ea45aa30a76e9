//! # Shared structs
//! Data structures used by both the pure redistribution engine and the `TroveManager` blueprint.

use scrypto::prelude::*;

/// Dense index of a registered collateral asset. Positions refer to assets only through this.
pub type AssetIndex = u32;

/// Lifecycle of a trove. Every `Closed*` state is terminal.
#[derive(ScryptoSbor, PartialEq, Eq, Clone, Copy, Debug)]
pub enum TroveStatus {
    /// No trove was ever opened under this identity.
    Nonexistent,
    /// The trove is open and part of the active pool.
    Active,
    /// The owner repaid the full debt and withdrew the collateral.
    ClosedByOwner,
    /// The trove was liquidated and its collateral and debt redistributed.
    ClosedByLiquidation,
    /// The trove's debt was repaid by a redeemer in exchange for collateral.
    ClosedByRedemption,
}

impl TroveStatus {
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            TroveStatus::ClosedByOwner
                | TroveStatus::ClosedByLiquidation
                | TroveStatus::ClosedByRedemption
        )
    }
}

/// Data of a trove receipt NFT. The receipt's local id is the trove's owner identity, the
/// accounting itself lives in the trove manager's `troves` table.
#[derive(ScryptoSbor, NonFungibleData, Clone, Debug)]
pub struct TroveReceipt {
    /// Image of the NFT
    #[mutable]
    pub key_image_url: Url,
    /// Mirror of the trove's lifecycle status.
    #[mutable]
    pub status: TroveStatus,
    /// Collateral owed to the owner after a redemption, per collateral resource.
    #[mutable]
    pub leftover_collateral: Vec<(ResourceAddress, Decimal)>,
}

/// A trove's collateral per asset and its debt.
#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq, Default)]
pub struct CollateralAndDebt {
    pub collateral: Vec<(ResourceAddress, Decimal)>,
    pub debt: Decimal,
}

/// Summary of a trove returned by the trove manager's getters.
#[derive(ScryptoSbor, Clone, Debug)]
pub struct TroveInfo {
    pub trove_id: NonFungibleLocalId,
    pub status: TroveStatus,
    /// Amounts written into the trove record, without pending rewards.
    pub recorded: CollateralAndDebt,
    /// Redistribution rewards accrued since the trove was last touched.
    pub pending: CollateralAndDebt,
    /// Stake per collateral resource.
    pub stakes: Vec<(ResourceAddress, Decimal)>,
}

/// Per-asset global state returned by the trove manager's getters.
#[derive(ScryptoSbor, Clone, Debug)]
pub struct AssetGlobalsInfo {
    pub resource_address: ResourceAddress,
    pub index: AssetIndex,
    pub divisibility: u8,
    pub active: bool,
    pub l_coll: Decimal,
    pub l_debt: Decimal,
    pub total_stakes: Decimal,
    pub total_stakes_snapshot: Decimal,
    pub total_collateral_snapshot: Decimal,
    pub active_pool_collateral: Decimal,
    pub default_pool_collateral: Decimal,
    pub orphaned_collateral: Decimal,
    pub orphaned_debt: Decimal,
}

/// Aggregate debt of both pools.
#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq)]
pub struct PoolTotals {
    pub active_debt: Decimal,
    pub default_debt: Decimal,
}
