//! # Asset registry
//! Maps every accepted collateral resource to a dense `AssetIndex` and keeps its metadata.
//! Indices are handed out in registration order and never reused.

use crate::errors::*;
use crate::shared_structs::AssetIndex;
use scrypto::prelude::*;

/// Metadata of a registered collateral asset.
#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq)]
pub struct AssetInfo {
    pub resource_address: ResourceAddress,
    /// Divisibility of the collateral resource, used when paying collateral out.
    pub divisibility: u8,
    /// Inactive assets can no longer be deposited, but existing positions keep them.
    pub active: bool,
}

#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq, Default)]
pub struct AssetRegistry {
    assets: Vec<AssetInfo>,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self { assets: vec![] }
    }

    /// Adds a new collateral asset and returns its index.
    ///
    /// # Errors
    /// * `InvalidAmount` if the resource is already registered or the divisibility is out of range.
    pub fn register(
        &mut self,
        resource_address: ResourceAddress,
        divisibility: u8,
    ) -> TroveResult<AssetIndex> {
        if self.index_of(resource_address).is_ok() {
            return Err(TroveError::InvalidAmount("asset already registered"));
        }
        if divisibility > DIVISIBILITY_MAXIMUM {
            return Err(TroveError::InvalidAmount("divisibility out of range"));
        }

        let index = self.assets.len() as AssetIndex;
        self.assets.push(AssetInfo {
            resource_address,
            divisibility,
            active: true,
        });

        Ok(index)
    }

    pub fn set_active(&mut self, index: AssetIndex, active: bool) -> TroveResult<()> {
        let info = self
            .assets
            .get_mut(index as usize)
            .ok_or(TroveError::UnknownAsset)?;
        info.active = active;
        Ok(())
    }

    pub fn index_of(&self, resource_address: ResourceAddress) -> TroveResult<AssetIndex> {
        self.assets
            .iter()
            .position(|info| info.resource_address == resource_address)
            .map(|position| position as AssetIndex)
            .ok_or(TroveError::UnknownAsset)
    }

    pub fn get(&self, index: AssetIndex) -> TroveResult<&AssetInfo> {
        self.assets
            .get(index as usize)
            .ok_or(TroveError::UnknownAsset)
    }

    pub fn address_of(&self, index: AssetIndex) -> TroveResult<ResourceAddress> {
        self.get(index).map(|info| info.resource_address)
    }

    /// Fails with `InactiveAsset` when the asset may not receive new deposits.
    pub fn ensure_accepting(&self, index: AssetIndex) -> TroveResult<()> {
        if self.get(index)?.active {
            Ok(())
        } else {
            Err(TroveError::InactiveAsset(index))
        }
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (AssetIndex, &AssetInfo)> {
        self.assets
            .iter()
            .enumerate()
            .map(|(index, info)| (index as AssetIndex, info))
    }
}
