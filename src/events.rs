//! Defines events emitted by the trove manager.

use scrypto::prelude::*;
use crate::shared_structs::*;
use crate::trove_ledger::LedgerParameters;

/// Event emitted when a new collateral asset is registered.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventRegisterAsset {
    /// The `ResourceAddress` of the newly accepted collateral token.
    pub address: ResourceAddress,
    /// The dense index troves use to refer to the asset.
    pub index: AssetIndex,
}

/// Event emitted when a collateral asset starts or stops accepting deposits.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventChangeAsset {
    pub address: ResourceAddress,
    pub active: bool,
}

/// Event emitted when a trove is opened.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventNewTrove {
    /// The `NonFungibleLocalId` of the trove receipt.
    pub trove_id: NonFungibleLocalId,
    pub collateral: Vec<(ResourceAddress, Decimal)>,
    pub debt: Decimal,
}

/// Event emitted when an owner deposits, withdraws, borrows or repays.
/// Amounts include the redistribution rewards applied by the adjustment.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventAdjustTrove {
    pub trove_id: NonFungibleLocalId,
    pub collateral: Vec<(ResourceAddress, Decimal)>,
    pub debt: Decimal,
}

#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventCloseTrove {
    pub trove_id: NonFungibleLocalId,
}

/// Event emitted when a trove is liquidated and its amounts redistributed.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventLiquidateTrove {
    pub trove_id: NonFungibleLocalId,
    /// Collateral ratio of the trove at liquidation, pending rewards included.
    pub collateral_ratio: Decimal,
    pub recovery_mode: bool,
    /// Collateral moved to the default pool.
    pub redistributed_collateral: Vec<(ResourceAddress, Decimal)>,
    /// Debt moved to the default pool, split per collateral asset.
    pub redistributed_debt: Vec<(ResourceAddress, Decimal)>,
    /// Collateral paid to the liquidator.
    pub incentive: Vec<(ResourceAddress, Decimal)>,
}

/// Event emitted once per batch liquidation, next to one `EventLiquidateTrove` per liquidated trove.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventBatchLiquidation {
    pub liquidated: Vec<NonFungibleLocalId>,
    pub skipped: Vec<NonFungibleLocalId>,
}

/// Event emitted when a trove's debt is repaid by a redeemer.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventRedeemTrove {
    pub trove_id: NonFungibleLocalId,
    /// tUSD burned.
    pub debt: Decimal,
    /// Collateral paid to the redeemer.
    pub redeemed: Vec<(ResourceAddress, Decimal)>,
    /// Collateral set aside for the trove owner.
    pub leftovers: Vec<(ResourceAddress, Decimal)>,
}

#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventRetrieveLeftovers {
    pub trove_id: NonFungibleLocalId,
    pub collateral: Vec<(ResourceAddress, Decimal)>,
}

/// Event emitted whenever a protocol parameter is changed.
#[derive(ScryptoSbor, ScryptoEvent, Clone)]
pub struct EventChangeParameters {
    pub parameters: LedgerParameters,
}
