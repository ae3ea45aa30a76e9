//! # The Trove Manager Blueprint
//!
//! The component users interact with to borrow tUSD against a basket of collateral assets. It holds
//! every collateral token in custody, mints and burns tUSD, issues trove receipts and keeps the
//! redistribution ledger.
//!
//! ## Overview
//! - **Open a Trove:** Deposit one or more accepted collateral assets and mint tUSD against them
//!   (`open_trove`). The trove is represented by a receipt NFT.
//! - **Manage a Trove:** Deposit or withdraw collateral, borrow more or repay (`adjust_trove`).
//! - **Close a Trove:** Repay the full debt and take back all collateral (`close_trove`).
//! - **Liquidation:** Anyone can liquidate a trove whose collateral ratio dropped below the MCR, or
//!   below the system's ratio in recovery mode (`liquidate`, `liquidate_batch`). The trove's
//!   collateral and debt are spread over every other trove holding the same assets; the liquidator
//!   is paid a small share of the collateral.
//! - **Redemption:** Anyone can repay a healthy trove's debt in exchange for collateral of equal
//!   value minus a fee (`redeem_trove`). The rest is set aside for the owner
//!   (`retrieve_leftover_collateral`).
//!
//! ## Lazy redistribution
//! A liquidation never visits other troves. It only bumps per-asset accumulators; each trove picks
//! up its share the next time it is touched. Getters show both the recorded amounts and the pending
//! share.
//!
//! ## Prices
//! Prices are fetched from the configured oracle component for every registered asset on each call
//! that needs them. A missing price aborts the call.

use crate::errors::*;
use crate::events::*;
use crate::liquidation::Liquidation;
use crate::oracle_adapter::PriceSet;
use crate::shared_structs::*;
use crate::trove_ledger::{LedgerParameters, TroveLedger, TroveRecord};
use scrypto::prelude::*;
use scrypto_avltree::AvlTree;

#[blueprint]
#[types(ResourceAddress, CustodyVaults, NonFungibleLocalId, TroveEntry, TroveReceipt, Decimal, Vec<NonFungibleLocalId>, AvlTree<Decimal, Vec<NonFungibleLocalId>>)]
#[events(
    EventRegisterAsset,
    EventChangeAsset,
    EventNewTrove,
    EventAdjustTrove,
    EventCloseTrove,
    EventLiquidateTrove,
    EventBatchLiquidation,
    EventRedeemTrove,
    EventRetrieveLeftovers,
    EventChangeParameters,
)]
mod trove_manager {
    enable_method_auth! {
        methods {
            open_trove => PUBLIC;
            adjust_trove => PUBLIC;
            close_trove => PUBLIC;
            liquidate => PUBLIC;
            liquidate_batch => PUBLIC;
            redeem_trove => PUBLIC;
            retrieve_leftover_collateral => PUBLIC;
            register_asset => restrict_to: [OWNER];
            set_asset_active => restrict_to: [OWNER];
            set_thresholds => restrict_to: [OWNER];
            set_fees => restrict_to: [OWNER];
            set_minimum_debt => restrict_to: [OWNER];
            set_max_batch_size => restrict_to: [OWNER];
            set_stops => restrict_to: [OWNER];
            set_oracle => restrict_to: [OWNER];
            get_trove_infos => PUBLIC;
            get_recorded_collateral_and_debt => PUBLIC;
            get_pending_rewards => PUBLIC;
            get_entire_collateral_and_debt => PUBLIC;
            get_collateralization_ratio => PUBLIC;
            get_asset_globals => PUBLIC;
            get_pool_totals => PUBLIC;
            get_total_collateral_ratio => PUBLIC;
            is_recovery_mode => PUBLIC;
            get_next_liquidation_candidates => PUBLIC;
            get_next_redemption_candidates => PUBLIC;
            get_parameters => PUBLIC;
            get_tusd_address => PUBLIC;
            get_receipt_address => PUBLIC;
        }
    }

    struct TroveManager {
        /// Asset registry, reward accumulators, pool ledgers and parameters.
        ledger: TroveLedger,
        /// One record per trove receipt.
        troves: KeyValueStore<NonFungibleLocalId, TroveEntry>,
        /// Physical collateral per registered asset.
        custody: KeyValueStore<ResourceAddress, CustodyVaults>,
        /// Troves ordered by their collateral ratio at their last touch.
        sorted_troves: AvlTree<Decimal, Vec<NonFungibleLocalId>>,
        /// A counter to generate unique trove ids.
        trove_counter: u64,
        /// The `ResourceManager` for the trove receipt NFTs.
        receipt_manager: ResourceManager,
        /// The `ResourceManager` for the tUSD debt token.
        tusd_manager: ResourceManager,
        /// The price oracle component.
        oracle: Global<AnyComponent>,
        /// Oracle method answering `Vec<ResourceAddress> -> Vec<(ResourceAddress, Option<Decimal>)>`.
        oracle_method_name: String,
    }

    impl TroveManager {
        /// Instantiates the trove manager together with the tUSD token and the trove receipt NFT.
        ///
        /// # Arguments
        /// * `owner_role_address`: The `ResourceAddress` of the badge required for OWNER actions.
        /// * `oracle_address`: The `ComponentAddress` of the price oracle.
        /// * `oracle_method_name`: The batch price method of the oracle.
        ///
        /// # Returns
        /// * `Global<TroveManager>`: The new component. tUSD and receipt addresses are available
        ///   through `get_tusd_address` and `get_receipt_address`.
        pub fn instantiate(
            owner_role_address: ResourceAddress,
            oracle_address: ComponentAddress,
            oracle_method_name: String,
        ) -> Global<TroveManager> {
            let (address_reservation, component_address) =
                Runtime::allocate_component_address(TroveManager::blueprint_id());

            let tusd_manager: ResourceManager = ResourceBuilder::new_fungible(OwnerRole::Fixed(
                rule!(require(owner_role_address)),
            ))
            .divisibility(DIVISIBILITY_MAXIMUM)
            .metadata(metadata! (
                init {
                    "name" => "tUSD", updatable;
                    "symbol" => "tUSD", updatable;
                    "tags" => vec!["stablecoin", "defi", "usd"], updatable;
                }
            ))
            .mint_roles(mint_roles!(
                minter => rule!(require(global_caller(component_address)));
                minter_updater => rule!(deny_all);
            ))
            .burn_roles(burn_roles!(
                burner => rule!(require(global_caller(component_address)));
                burner_updater => rule!(deny_all);
            ))
            .create_with_no_initial_supply()
            .into();

            let receipt_manager: ResourceManager =
                ResourceBuilder::new_integer_non_fungible_with_registered_type::<TroveReceipt>(
                    OwnerRole::Fixed(rule!(require(owner_role_address))),
                )
                .metadata(metadata!(
                    init {
                        "name" => "Trove Receipt", locked;
                        "symbol" => "TROVE", locked;
                        "description" => "A receipt for your tUSD trove.", locked;
                    }
                ))
                .non_fungible_data_update_roles(non_fungible_data_update_roles!(
                    non_fungible_data_updater => rule!(require(global_caller(component_address)));
                    non_fungible_data_updater_updater => rule!(deny_all);
                ))
                .mint_roles(mint_roles!(
                    minter => rule!(require(global_caller(component_address)));
                    minter_updater => rule!(deny_all);
                ))
                .create_with_no_initial_supply()
                .into();

            Self {
                ledger: TroveLedger::new(LedgerParameters::default()),
                troves: KeyValueStore::new_with_registered_type(),
                custody: KeyValueStore::new_with_registered_type(),
                sorted_troves: AvlTree::new(),
                trove_counter: 0,
                receipt_manager,
                tusd_manager,
                oracle: Global::from(oracle_address),
                oracle_method_name,
            }
            .instantiate()
            .prepare_to_globalize(OwnerRole::Fixed(rule!(require(owner_role_address))))
            .with_address(address_reservation)
            .metadata(metadata! {
                init {
                    "name" => "Trove Manager".to_string(), updatable;
                    "description" => "Multi-collateral troves with lazy redistribution of liquidations".to_string(), updatable;
                }
            })
            .globalize()
        }

        //==================================================================
        //                       TROVE OWNER METHODS
        //==================================================================

        /// Opens a trove, minting `debt` tUSD against the deposited collateral.
        ///
        /// # Arguments
        /// * `collateral`: Buckets of registered, active collateral assets.
        /// * `debt`: The `Decimal` amount of tUSD to mint.
        ///
        /// # Returns
        /// * `(Bucket, Bucket)`: The minted tUSD and the trove receipt.
        ///
        /// # Panics
        /// * If openings are stopped.
        /// * If a bucket holds an unknown or inactive asset.
        /// * If the trove would open below the MCR (the CCR in recovery mode) or push the system
        ///   into recovery mode.
        pub fn open_trove(&mut self, collateral: Vec<Bucket>, debt: Decimal) -> (Bucket, Bucket) {
            assert!(
                !self.ledger.parameters().stop_openings,
                "Not allowed to open troves right now."
            );

            let prices = self.fetch_prices();
            let deposits = self.deposit_amounts(&collateral);
            let record = self.ledger.open_trove(deposits, debt, &prices).or_abort();

            for bucket in collateral {
                self.put_collateral(bucket);
            }

            self.trove_counter += 1;
            let trove_id = NonFungibleLocalId::integer(self.trove_counter);

            let receipt = self.receipt_manager.mint_non_fungible(
                &trove_id,
                TroveReceipt {
                    key_image_url: Url::of("https://trove.protocol/trove-receipt.png"),
                    status: TroveStatus::Active,
                    leftover_collateral: vec![],
                },
            );

            let event = EventNewTrove {
                trove_id: trove_id.clone(),
                collateral: self.with_addresses(record.recorded_collateral()),
                debt: record.recorded_debt(),
            };
            self.store_record(trove_id, record, &prices);

            Runtime::emit_event(event);

            (self.mint_tusd(debt), receipt)
        }

        /// Deposits or withdraws collateral and borrows or repays tUSD in one step.
        ///
        /// # Arguments
        /// * `receipt_proof`: A `NonFungibleProof` of the trove receipt.
        /// * `deposits`: Buckets of collateral to add.
        /// * `withdrawals`: Collateral amounts to take out.
        /// * `debt_delta`: Positive to borrow, negative to repay.
        /// * `repayment`: tUSD covering a repayment. Whatever is not needed is returned.
        ///
        /// # Returns
        /// * `(Vec<Bucket>, Option<Bucket>)`: The withdrawn collateral, and the borrowed tUSD or the
        ///   unused repayment.
        ///
        /// # Panics
        /// * If the trove is not active.
        /// * If the repayment does not cover a negative `debt_delta`.
        /// * If a health-reducing adjustment leaves the trove below the required ratio.
        pub fn adjust_trove(
            &mut self,
            receipt_proof: NonFungibleProof,
            deposits: Vec<Bucket>,
            withdrawals: Vec<(ResourceAddress, Decimal)>,
            debt_delta: Decimal,
            repayment: Option<Bucket>,
        ) -> (Vec<Bucket>, Option<Bucket>) {
            let trove_id = self.trove_id_from_proof(receipt_proof);
            let prices = self.fetch_prices();

            let mut collateral_deltas = self.deposit_amounts(&deposits);
            for (address, amount) in withdrawals.iter() {
                assert!(amount.is_positive(), "Withdrawals must be positive.");
                let asset = self.ledger.registry().index_of(*address).or_abort();
                collateral_deltas.push((asset, -*amount));
            }

            let record = self.load_record(&trove_id);
            let record = self
                .ledger
                .adjust_trove(record, collateral_deltas, debt_delta, &prices)
                .or_abort();

            for bucket in deposits {
                self.put_collateral(bucket);
            }

            let withdrawn: Vec<Bucket> = withdrawals
                .into_iter()
                .map(|(address, amount)| self.take_collateral(address, amount))
                .collect();

            let tusd = if debt_delta.is_positive() {
                if let Some(mut repayment) = repayment {
                    repayment.put(self.mint_tusd(debt_delta));
                    Some(repayment)
                } else {
                    Some(self.mint_tusd(debt_delta))
                }
            } else if debt_delta.is_negative() {
                let mut repayment = repayment.expect("A repayment needs a tUSD payment.");
                assert!(
                    repayment.resource_address() == self.tusd_manager.address(),
                    "Invalid tUSD payment."
                );
                assert!(
                    repayment.amount() >= -debt_delta,
                    "Not enough tUSD supplied to repay."
                );
                self.tusd_manager.burn(repayment.take(-debt_delta));
                Some(repayment)
            } else {
                repayment
            };

            let event = EventAdjustTrove {
                trove_id: trove_id.clone(),
                collateral: self.with_addresses(record.recorded_collateral()),
                debt: record.recorded_debt(),
            };
            self.store_record(trove_id, record, &prices);

            Runtime::emit_event(event);

            (withdrawn, tusd)
        }

        /// Closes a trove by repaying its entire debt, pending redistributed debt included.
        ///
        /// # Returns
        /// * `(Vec<Bucket>, Bucket)`: The trove's entire collateral and the unused payment.
        ///
        /// # Panics
        /// * If the trove is not active.
        /// * If `payment` is not tUSD or does not cover the debt.
        pub fn close_trove(
            &mut self,
            receipt_proof: NonFungibleProof,
            mut payment: Bucket,
        ) -> (Vec<Bucket>, Bucket) {
            let trove_id = self.trove_id_from_proof(receipt_proof);
            let prices = self.fetch_prices();

            let closed = self.ledger.close_trove(self.load_record(&trove_id)).or_abort();

            assert!(
                payment.resource_address() == self.tusd_manager.address(),
                "Invalid tUSD payment."
            );
            assert!(
                payment.amount() >= closed.debt,
                "not enough tUSD supplied to close completely"
            );
            self.tusd_manager.burn(payment.take(closed.debt));

            let collateral: Vec<Bucket> = closed
                .collateral
                .iter()
                .map(|(asset, amount)| {
                    let address = self.ledger.registry().address_of(*asset).or_abort();
                    self.take_collateral(address, *amount)
                })
                .collect();

            self.store_record(trove_id.clone(), closed.record, &prices);
            self.receipt_manager
                .update_non_fungible_data(&trove_id, "status", TroveStatus::ClosedByOwner);

            Runtime::emit_event(EventCloseTrove { trove_id });

            (collateral, payment)
        }

        /// Allows the owner of a redeemed trove to take back the collateral the redemption left.
        ///
        /// # Panics
        /// * If the trove was not redeemed or nothing is left.
        pub fn retrieve_leftover_collateral(&mut self, receipt_proof: NonFungibleProof) -> Vec<Bucket> {
            let trove_id = self.trove_id_from_proof(receipt_proof);
            let receipt_data: TroveReceipt = self.receipt_manager.get_non_fungible_data(&trove_id);

            assert!(
                receipt_data.status == TroveStatus::ClosedByRedemption,
                "Trove not redeemed"
            );
            assert!(
                !receipt_data.leftover_collateral.is_empty(),
                "No collateral leftover"
            );

            self.receipt_manager.update_non_fungible_data(
                &trove_id,
                "leftover_collateral",
                Vec::<(ResourceAddress, Decimal)>::new(),
            );

            let leftovers: Vec<Bucket> = receipt_data
                .leftover_collateral
                .iter()
                .map(|(address, amount)| self.take_leftovers(*address, *amount))
                .collect();

            Runtime::emit_event(EventRetrieveLeftovers {
                trove_id,
                collateral: receipt_data.leftover_collateral,
            });

            leftovers
        }

        //==================================================================
        //                  LIQUIDATION AND REDEMPTION
        //==================================================================

        /// Liquidates a trove whose collateral ratio is below the applicable threshold.
        ///
        /// The trove's collateral minus the liquidation incentive and its entire debt are
        /// redistributed over all other troves holding the same assets.
        ///
        /// # Returns
        /// * `Vec<Bucket>`: The liquidation incentive, one bucket per collateral asset.
        ///
        /// # Panics
        /// * If liquidations are stopped.
        /// * If the trove is not active or not liquidatable.
        pub fn liquidate(&mut self, trove_id: NonFungibleLocalId) -> Vec<Bucket> {
            assert!(
                !self.ledger.parameters().stop_liquidations,
                "Not allowed to liquidate troves right now."
            );

            let prices = self.fetch_prices();
            let record = self.load_record(&trove_id);
            let old_ratio = self.sorted_ratio(&trove_id);

            let liquidation = self.ledger.liquidate(record, &prices).or_abort();

            info!(
                "Liquidated trove {:?} at collateral ratio {}",
                trove_id, liquidation.icr
            );

            self.close_liquidated(trove_id, old_ratio, &liquidation);

            liquidation
                .incentive
                .iter()
                .map(|(asset, amount)| {
                    let address = self.ledger.registry().address_of(*asset).or_abort();
                    self.take_collateral(address, *amount)
                })
                .collect()
        }

        /// Liquidates every liquidatable trove of `trove_ids` in order. Troves that are not
        /// liquidatable or not active are skipped. The final state equals liquidating the same
        /// troves one after the other.
        ///
        /// # Returns
        /// * `Vec<Bucket>`: The summed liquidation incentive, one bucket per collateral asset.
        ///
        /// # Panics
        /// * If liquidations are stopped.
        /// * If no trove of the batch could be liquidated.
        pub fn liquidate_batch(&mut self, trove_ids: Vec<NonFungibleLocalId>) -> Vec<Bucket> {
            assert!(
                !self.ledger.parameters().stop_liquidations,
                "Not allowed to liquidate troves right now."
            );

            let prices = self.fetch_prices();
            let troves: Vec<(NonFungibleLocalId, TroveRecord)> = trove_ids
                .iter()
                .map(|trove_id| (trove_id.clone(), self.load_record(trove_id)))
                .collect();

            let batch = self.ledger.liquidate_batch(troves, &prices).or_abort();

            debug!(
                "Batch liquidation: {} liquidated, {} skipped",
                batch.liquidated.len(),
                batch.skipped.len()
            );

            for (trove_id, liquidation) in batch.liquidated.iter() {
                let old_ratio = self.sorted_ratio(trove_id);
                self.close_liquidated(trove_id.clone(), old_ratio, liquidation);
            }

            Runtime::emit_event(EventBatchLiquidation {
                liquidated: batch.liquidated.iter().map(|(id, _)| id.clone()).collect(),
                skipped: batch.skipped.iter().map(|(id, _)| id.clone()).collect(),
            });

            batch
                .total_incentive()
                .or_abort()
                .into_iter()
                .map(|(asset, amount)| {
                    let address = self.ledger.registry().address_of(asset).or_abort();
                    self.take_collateral(address, amount)
                })
                .collect()
        }

        /// Repays the entire debt of a healthy trove in exchange for collateral worth the debt,
        /// minus the redemption fee. The rest of the trove's collateral is kept for its owner.
        ///
        /// # Returns
        /// * `(Vec<Bucket>, Bucket)`: The redeemed collateral and the unused payment.
        ///
        /// # Panics
        /// * If the trove is liquidatable or below 100% collateralization.
        /// * If `payment` is not tUSD or does not cover the debt.
        pub fn redeem_trove(
            &mut self,
            trove_id: NonFungibleLocalId,
            mut payment: Bucket,
        ) -> (Vec<Bucket>, Bucket) {
            let prices = self.fetch_prices();
            let old_ratio = self.sorted_ratio(&trove_id);

            let redemption = self
                .ledger
                .redeem_trove(self.load_record(&trove_id), &prices)
                .or_abort();

            assert!(
                payment.resource_address() == self.tusd_manager.address(),
                "Invalid tUSD payment."
            );
            assert!(
                payment.amount() >= redemption.debt,
                "Not enough tUSD to redeem."
            );
            self.tusd_manager.burn(payment.take(redemption.debt));

            let redeemed: Vec<Bucket> = redemption
                .redeemed
                .iter()
                .map(|(asset, amount)| {
                    let address = self.ledger.registry().address_of(*asset).or_abort();
                    self.take_collateral(address, *amount)
                })
                .collect();

            let leftovers = self.list_with_addresses(&redemption.leftovers);
            for (address, amount) in leftovers.iter() {
                let bucket = self.take_collateral(*address, *amount);
                self.put_leftovers(bucket);
            }

            if let Some(ratio) = old_ratio {
                self.remove_ratio(ratio, &trove_id);
            }
            self.troves.insert(
                trove_id.clone(),
                TroveEntry {
                    record: redemption.record.clone(),
                    sorted_ratio: None,
                },
            );

            self.receipt_manager.update_non_fungible_data(
                &trove_id,
                "status",
                TroveStatus::ClosedByRedemption,
            );
            self.receipt_manager.update_non_fungible_data(
                &trove_id,
                "leftover_collateral",
                leftovers.clone(),
            );

            Runtime::emit_event(EventRedeemTrove {
                trove_id,
                debt: redemption.debt,
                redeemed: self.list_with_addresses(&redemption.redeemed),
                leftovers,
            });

            (redeemed, payment)
        }

        //==================================================================
        //                         ADMIN METHODS
        //==================================================================

        /// Accepts a new fungible collateral asset.
        pub fn register_asset(&mut self, address: ResourceAddress) {
            let divisibility = match ResourceManager::from_address(address).resource_type() {
                ResourceType::Fungible { divisibility } => divisibility,
                ResourceType::NonFungible { .. } => panic!("Collateral must be fungible."),
            };

            let index = self.ledger.register_asset(address, divisibility).or_abort();

            self.custody.insert(
                address,
                CustodyVaults {
                    vault: Vault::new(address),
                    leftovers: Vault::new(address),
                },
            );

            Runtime::emit_event(EventRegisterAsset { address, index });
        }

        /// Opens or closes an asset for new deposits. Troves already holding it are unaffected.
        pub fn set_asset_active(&mut self, address: ResourceAddress, active: bool) {
            let index = self.ledger.registry().index_of(address).or_abort();
            self.ledger.set_asset_active(index, active).or_abort();

            Runtime::emit_event(EventChangeAsset { address, active });
        }

        pub fn set_thresholds(&mut self, mcr: Decimal, ccr: Decimal) {
            let mut parameters = self.ledger.parameters().clone();
            parameters.mcr = mcr;
            parameters.ccr = ccr;
            self.change_parameters(parameters);
        }

        /// Sets the share of liquidated collateral paid to liquidators and the share of redeemed
        /// collateral left to trove owners.
        pub fn set_fees(&mut self, liquidation_incentive: Decimal, redemption_fee: Decimal) {
            let mut parameters = self.ledger.parameters().clone();
            parameters.liquidation_incentive = liquidation_incentive;
            parameters.redemption_fee = redemption_fee;
            self.change_parameters(parameters);
        }

        pub fn set_minimum_debt(&mut self, minimum_debt: Decimal) {
            let mut parameters = self.ledger.parameters().clone();
            parameters.minimum_debt = minimum_debt;
            self.change_parameters(parameters);
        }

        pub fn set_max_batch_size(&mut self, max_batch_size: u64) {
            let mut parameters = self.ledger.parameters().clone();
            parameters.max_batch_size = max_batch_size;
            self.change_parameters(parameters);
        }

        /// Pauses or resumes liquidations and trove openings.
        pub fn set_stops(&mut self, liquidations: bool, openings: bool) {
            let mut parameters = self.ledger.parameters().clone();
            parameters.stop_liquidations = liquidations;
            parameters.stop_openings = openings;
            self.change_parameters(parameters);
        }

        pub fn set_oracle(&mut self, oracle_address: ComponentAddress, method_name: String) {
            self.oracle = Global::from(oracle_address);
            self.oracle_method_name = method_name;
        }

        //==================================================================
        //                            GETTERS
        //==================================================================

        /// Recorded amounts, pending rewards and stakes of a list of troves.
        pub fn get_trove_infos(&self, trove_ids: Vec<NonFungibleLocalId>) -> Vec<TroveInfo> {
            trove_ids
                .into_iter()
                .map(|trove_id| {
                    let record = self.load_record(&trove_id);
                    let pending = if record.status() == TroveStatus::Active {
                        let (collateral, debt) = self.ledger.pending_rewards(&record).or_abort();
                        CollateralAndDebt {
                            collateral: self.with_addresses(&collateral),
                            debt,
                        }
                    } else {
                        CollateralAndDebt::default()
                    };

                    TroveInfo {
                        trove_id,
                        status: record.status(),
                        recorded: self.recorded(&record),
                        pending,
                        stakes: self.with_addresses(record.stakes()),
                    }
                })
                .collect()
        }

        /// Collateral and debt as last written, without pending redistribution rewards.
        pub fn get_recorded_collateral_and_debt(&self, trove_id: NonFungibleLocalId) -> CollateralAndDebt {
            self.recorded(&self.load_record(&trove_id))
        }

        /// Redistribution rewards a trove has accrued since it was last touched.
        pub fn get_pending_rewards(&self, trove_id: NonFungibleLocalId) -> CollateralAndDebt {
            let (collateral, debt) = self
                .ledger
                .pending_rewards(&self.load_record(&trove_id))
                .or_abort();
            CollateralAndDebt {
                collateral: self.with_addresses(&collateral),
                debt,
            }
        }

        pub fn get_entire_collateral_and_debt(&self, trove_id: NonFungibleLocalId) -> CollateralAndDebt {
            let (collateral, debt) = self
                .ledger
                .entire_collateral_and_debt(&self.load_record(&trove_id))
                .or_abort();
            CollateralAndDebt {
                collateral: self.with_addresses(&collateral),
                debt,
            }
        }

        /// Current collateral ratio of a trove, pending rewards included.
        pub fn get_collateralization_ratio(&self, trove_id: NonFungibleLocalId) -> Decimal {
            let prices = self.fetch_prices();
            self.ledger
                .collateralization_ratio(&self.load_record(&trove_id), &prices)
                .or_abort()
        }

        pub fn get_asset_globals(&self) -> Vec<AssetGlobalsInfo> {
            let pools = self.ledger.pools();
            self.ledger
                .registry()
                .iter()
                .map(|(index, info)| {
                    let rewards = self.ledger.rewards().get(index).or_abort();
                    AssetGlobalsInfo {
                        resource_address: info.resource_address,
                        index,
                        divisibility: info.divisibility,
                        active: info.active,
                        l_coll: rewards.l_coll,
                        l_debt: rewards.l_debt,
                        total_stakes: rewards.total_stakes,
                        total_stakes_snapshot: rewards.total_stakes_snapshot,
                        total_collateral_snapshot: rewards.total_collateral_snapshot,
                        active_pool_collateral: pools.active.collateral(index),
                        default_pool_collateral: pools.default.collateral(index),
                        orphaned_collateral: rewards.orphaned_coll,
                        orphaned_debt: rewards.orphaned_debt,
                    }
                })
                .collect()
        }

        pub fn get_pool_totals(&self) -> PoolTotals {
            PoolTotals {
                active_debt: self.ledger.pools().active.debt(),
                default_debt: self.ledger.pools().default.debt(),
            }
        }

        pub fn get_total_collateral_ratio(&self) -> Decimal {
            let prices = self.fetch_prices();
            self.ledger.total_collateral_ratio(&prices).or_abort()
        }

        pub fn is_recovery_mode(&self) -> bool {
            let prices = self.fetch_prices();
            self.ledger.is_recovery_mode(&prices).or_abort()
        }

        /// Up to `amount` troves that are liquidatable right now, lowest recorded collateral ratio
        /// first.
        pub fn get_next_liquidation_candidates(&self, amount: u64) -> Vec<NonFungibleLocalId> {
            let prices = self.fetch_prices();
            self.scan_sorted_troves(amount, |ledger, record| {
                ledger.is_liquidatable(record, &prices).or_abort()
            })
        }

        /// Up to `amount` troves that can be redeemed right now, lowest recorded collateral ratio
        /// first.
        pub fn get_next_redemption_candidates(&self, amount: u64) -> Vec<NonFungibleLocalId> {
            let prices = self.fetch_prices();
            self.scan_sorted_troves(amount, |ledger, record| {
                let liquidatable = ledger.is_liquidatable(record, &prices).or_abort();
                let ratio = ledger.collateralization_ratio(record, &prices).or_abort();
                let (_, debt) = ledger.entire_collateral_and_debt(record).or_abort();
                !liquidatable && ratio >= Decimal::ONE && debt.is_positive()
            })
        }

        pub fn get_parameters(&self) -> LedgerParameters {
            self.ledger.parameters().clone()
        }

        pub fn get_tusd_address(&self) -> ResourceAddress {
            self.tusd_manager.address()
        }

        pub fn get_receipt_address(&self) -> ResourceAddress {
            self.receipt_manager.address()
        }

        //==================================================================
        //                            HELPERS
        //==================================================================

        fn fetch_prices(&self) -> PriceSet {
            let addresses: Vec<ResourceAddress> = self
                .ledger
                .registry()
                .iter()
                .map(|(_, info)| info.resource_address)
                .collect();

            let answers: Vec<(ResourceAddress, Option<Decimal>)> = self
                .oracle
                .call_raw(&self.oracle_method_name, scrypto_args!(addresses));

            PriceSet::from_oracle(self.ledger.registry(), answers)
        }

        fn trove_id_from_proof(&self, receipt_proof: NonFungibleProof) -> NonFungibleLocalId {
            let receipt_proof = receipt_proof.check_with_message(
                self.receipt_manager.address(),
                "Incorrect proof! Are you sure this trove is yours?",
            );
            receipt_proof.non_fungible::<TroveReceipt>().local_id().clone()
        }

        fn load_record(&self, trove_id: &NonFungibleLocalId) -> TroveRecord {
            self.troves
                .get(trove_id)
                .map(|entry| entry.record.clone())
                .unwrap_or_default()
        }

        fn sorted_ratio(&self, trove_id: &NonFungibleLocalId) -> Option<Decimal> {
            self.troves.get(trove_id).and_then(|entry| entry.sorted_ratio)
        }

        /// Writes a trove record back and moves the trove to its new place in the sorted index.
        fn store_record(&mut self, trove_id: NonFungibleLocalId, record: TroveRecord, prices: &PriceSet) {
            if let Some(ratio) = self.sorted_ratio(&trove_id) {
                self.remove_ratio(ratio, &trove_id);
            }

            let sorted_ratio = if record.status() == TroveStatus::Active {
                let ratio = self.ledger.collateralization_ratio(&record, prices).or_abort();
                self.insert_ratio(ratio, trove_id.clone());
                Some(ratio)
            } else {
                None
            };

            self.troves.insert(trove_id, TroveEntry { record, sorted_ratio });
        }

        fn close_liquidated(
            &mut self,
            trove_id: NonFungibleLocalId,
            old_ratio: Option<Decimal>,
            liquidation: &Liquidation,
        ) {
            if let Some(ratio) = old_ratio {
                self.remove_ratio(ratio, &trove_id);
            }
            self.troves.insert(
                trove_id.clone(),
                TroveEntry {
                    record: liquidation.record.clone(),
                    sorted_ratio: None,
                },
            );
            self.receipt_manager.update_non_fungible_data(
                &trove_id,
                "status",
                TroveStatus::ClosedByLiquidation,
            );

            Runtime::emit_event(EventLiquidateTrove {
                trove_id,
                collateral_ratio: liquidation.icr,
                recovery_mode: liquidation.recovery_mode,
                redistributed_collateral: self.list_with_addresses(&liquidation.collateral_redistributed),
                redistributed_debt: self.list_with_addresses(&liquidation.debt_redistributed),
                incentive: self.list_with_addresses(&liquidation.incentive),
            });
        }

        /// Insert a trove into the sorted index under `ratio`.
        fn insert_ratio(&mut self, ratio: Decimal, trove_id: NonFungibleLocalId) {
            let mut trove_ids: Vec<NonFungibleLocalId> = self
                .sorted_troves
                .get(&ratio)
                .map(|trove_ids| trove_ids.to_vec())
                .unwrap_or_default();
            trove_ids.push(trove_id);
            self.sorted_troves.insert(ratio, trove_ids);
        }

        /// Remove a trove from the sorted index, dropping the entry once it is empty.
        fn remove_ratio(&mut self, ratio: Decimal, trove_id: &NonFungibleLocalId) {
            let mut trove_ids: Vec<NonFungibleLocalId> = match self.sorted_troves.get(&ratio) {
                Some(trove_ids) => trove_ids.to_vec(),
                None => return,
            };

            trove_ids.retain(|id| id != trove_id);

            if trove_ids.is_empty() {
                self.sorted_troves.remove(&ratio);
            } else {
                self.sorted_troves.insert(ratio, trove_ids);
            }
        }

        fn scan_sorted_troves(
            &self,
            amount: u64,
            accept: impl Fn(&TroveLedger, &TroveRecord) -> bool,
        ) -> Vec<NonFungibleLocalId> {
            let mut candidates: Vec<NonFungibleLocalId> = vec![];
            if amount == 0 {
                return candidates;
            }

            for (_, trove_ids, _) in self.sorted_troves.range(Decimal::ZERO..) {
                for trove_id in trove_ids {
                    let record = self.load_record(&trove_id);
                    if accept(&self.ledger, &record) {
                        candidates.push(trove_id);
                        if candidates.len() as u64 >= amount {
                            return candidates;
                        }
                    }
                }
            }

            candidates
        }

        fn change_parameters(&mut self, parameters: LedgerParameters) {
            self.ledger.set_parameters(parameters.clone()).or_abort();
            Runtime::emit_event(EventChangeParameters { parameters });
        }

        /// Engine deposit amounts of a list of collateral buckets.
        fn deposit_amounts(&self, buckets: &[Bucket]) -> Vec<(AssetIndex, Decimal)> {
            buckets
                .iter()
                .map(|bucket| {
                    let asset = self
                        .ledger
                        .registry()
                        .index_of(bucket.resource_address())
                        .or_abort();
                    (asset, bucket.amount())
                })
                .collect()
        }

        fn recorded(&self, record: &TroveRecord) -> CollateralAndDebt {
            CollateralAndDebt {
                collateral: self.with_addresses(record.recorded_collateral()),
                debt: record.recorded_debt(),
            }
        }

        fn with_addresses(&self, amounts: &BTreeMap<AssetIndex, Decimal>) -> Vec<(ResourceAddress, Decimal)> {
            let amounts: Vec<(AssetIndex, Decimal)> =
                amounts.iter().map(|(asset, amount)| (*asset, *amount)).collect();
            self.list_with_addresses(&amounts)
        }

        fn list_with_addresses(&self, amounts: &[(AssetIndex, Decimal)]) -> Vec<(ResourceAddress, Decimal)> {
            amounts
                .iter()
                .map(|(asset, amount)| {
                    (self.ledger.registry().address_of(*asset).or_abort(), *amount)
                })
                .collect()
        }

        fn mint_tusd(&mut self, amount: Decimal) -> Bucket {
            if amount.is_zero() {
                Bucket::new(self.tusd_manager.address())
            } else {
                self.tusd_manager.mint(amount)
            }
        }

        /// Put collateral in custody.
        fn put_collateral(&mut self, bucket: Bucket) {
            match self.custody.get_mut(&bucket.resource_address()) {
                Some(mut custody) => custody.vault.put(bucket),
                None => panic!("This collateral is not accepted"),
            }
        }

        /// Take collateral out of custody, rounded down to the asset's divisibility.
        fn take_collateral(&mut self, address: ResourceAddress, amount: Decimal) -> Bucket {
            match self.custody.get_mut(&address) {
                Some(mut custody) => custody
                    .vault
                    .take_advanced(amount, WithdrawStrategy::Rounded(RoundingMode::ToZero)),
                None => panic!("This collateral is not accepted"),
            }
        }

        fn put_leftovers(&mut self, bucket: Bucket) {
            match self.custody.get_mut(&bucket.resource_address()) {
                Some(mut custody) => custody.leftovers.put(bucket),
                None => panic!("This collateral is not accepted"),
            }
        }

        fn take_leftovers(&mut self, address: ResourceAddress, amount: Decimal) -> Bucket {
            match self.custody.get_mut(&address) {
                Some(mut custody) => custody
                    .leftovers
                    .take_advanced(amount, WithdrawStrategy::Rounded(RoundingMode::ToZero)),
                None => panic!("This collateral is not accepted"),
            }
        }
    }
}

/// Vaults physically holding one collateral asset.
#[derive(ScryptoSbor)]
pub struct CustodyVaults {
    /// Collateral of the active and default pools.
    pub vault: Vault,
    /// Collateral owed to owners of redeemed troves.
    pub leftovers: Vault,
}

/// A trove record and the ratio it is filed under in the sorted index.
#[derive(ScryptoSbor, Clone, Debug)]
pub struct TroveEntry {
    pub record: TroveRecord,
    pub sorted_ratio: Option<Decimal>,
}
