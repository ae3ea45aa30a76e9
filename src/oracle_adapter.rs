//! # Oracle adapter
//! Validated per-asset prices as consumed by the engine. The oracle component answers with an
//! optional price per collateral resource; anything missing or non-positive surfaces as
//! `StalePrice` the moment the engine needs it.

use crate::asset_registry::AssetRegistry;
use crate::errors::*;
use crate::shared_structs::AssetIndex;
use scrypto::prelude::*;

#[derive(ScryptoSbor, Clone, Debug, PartialEq, Eq, Default)]
pub struct PriceSet {
    /// Indexed by `AssetIndex`. `None` when the oracle had no usable price.
    prices: Vec<Option<Decimal>>,
}

impl PriceSet {
    /// Builds a price set in registry order from raw oracle answers.
    pub fn from_oracle(
        registry: &AssetRegistry,
        answers: Vec<(ResourceAddress, Option<Decimal>)>,
    ) -> Self {
        let mut prices: Vec<Option<Decimal>> = vec![None; registry.len()];

        for (resource_address, price) in answers {
            if let Ok(index) = registry.index_of(resource_address) {
                prices[index as usize] = price.filter(|price| price.is_positive());
            }
        }

        Self { prices }
    }

    /// Builds a price set directly from index-ordered prices.
    pub fn from_prices(prices: Vec<Decimal>) -> Self {
        Self {
            prices: prices
                .into_iter()
                .map(|price| Some(price).filter(|price| price.is_positive()))
                .collect(),
        }
    }

    pub fn price_of(&self, asset: AssetIndex) -> TroveResult<Decimal> {
        self.prices
            .get(asset as usize)
            .copied()
            .flatten()
            .ok_or(TroveError::StalePrice(asset))
    }

    /// Value of a collateral basket in debt-token units.
    pub fn basket_value<'a>(
        &self,
        basket: impl IntoIterator<Item = (AssetIndex, &'a Decimal)>,
    ) -> TroveResult<Decimal> {
        let mut value = Decimal::ZERO;
        for (asset, amount) in basket {
            if amount.is_zero() {
                continue;
            }
            let asset_value = amount.mul_or(self.price_of(asset)?, "collateral value overflow")?;
            value = value.add_or(asset_value, "collateral value overflow")?;
        }
        Ok(value)
    }
}

/// Collateral value divided by debt. Debt-free baskets are infinitely healthy.
pub fn collateral_ratio(value: Decimal, debt: Decimal) -> TroveResult<Decimal> {
    if debt.is_zero() {
        return Ok(Decimal::MAX);
    }
    value.div_or(debt, "collateral ratio")
}
