//! # Dummy Oracle Blueprint
//! Settable price feed for testing the trove manager without external dependencies.

use scrypto::prelude::*;

#[blueprint]
mod oracle {
    enable_method_auth! {
        methods {
            get_prices => PUBLIC;
            set_price => restrict_to: [OWNER];
            invalidate_price => restrict_to: [OWNER];
        }
    }

    struct Oracle {
        prices: HashMap<ResourceAddress, Decimal>,
    }

    impl Oracle {
        /// Instantiates the oracle with a price of one for every resource in `resources`.
        pub fn instantiate_oracle(resources: Vec<ResourceAddress>) -> Global<Oracle> {
            let prices: HashMap<ResourceAddress, Decimal> = resources
                .into_iter()
                .map(|resource| (resource, Decimal::ONE))
                .collect();

            Self { prices }
                .instantiate()
                .prepare_to_globalize(OwnerRole::None)
                .metadata(metadata! {
                    init {
                        "name" => "Dummy Trove Oracle".to_string(), updatable;
                        "description" => "A dummy oracle used for testing the trove manager".to_string(), updatable;
                    }
                })
                .globalize()
        }

        /// Batch price lookup. Resources without a price answer `None`.
        pub fn get_prices(
            &self,
            resources: Vec<ResourceAddress>,
        ) -> Vec<(ResourceAddress, Option<Decimal>)> {
            resources
                .into_iter()
                .map(|resource| (resource, self.prices.get(&resource).copied()))
                .collect()
        }

        pub fn set_price(&mut self, resource: ResourceAddress, price: Decimal) {
            self.prices.insert(resource, price);
        }

        /// Removes a price, simulating a feed that went stale.
        pub fn invalidate_price(&mut self, resource: ResourceAddress) {
            self.prices.remove(&resource);
        }
    }
}
