//! Property tests for the redistribution engine.
//!
//! Random two-asset trove books are opened at healthy prices, prices then crash and every trove is
//! offered for liquidation in random order. After every step the ledger must keep:
//! - conservation: active plus default pool plus incentives paid out equals deposits minus
//!   withdrawals for every asset, and the pools hold exactly the debt borrowed minus repaid
//! - allocation: pool totals cover the entire collateral and debt of the open troves, up to
//!   truncation dust
//! - monotone accumulators
//! - no negative balances or pending rewards
//! - no mutation when an operation fails

use proptest::prelude::*;
use trove_protocol::errors::*;
use trove_protocol::oracle_adapter::PriceSet;
use trove_protocol::shared_structs::*;
use trove_protocol::trove_ledger::*;

use scrypto::prelude::*;

const ASSETS: [AssetIndex; 2] = [0, 1];

fn resource(seed: u8) -> ResourceAddress {
    let mut raw = [seed; NodeId::LENGTH];
    raw[0] = EntityType::GlobalFungibleResourceManager as u8;
    ResourceAddress::new_or_panic(raw)
}

fn new_ledger() -> TroveLedger {
    let mut ledger = TroveLedger::default();
    ledger.register_asset(resource(1), 18).unwrap();
    ledger.register_asset(resource(2), 18).unwrap();
    ledger
}

/// (collateral of asset 0, collateral of asset 1, collateral ratio in percent at opening)
fn trove_strategy() -> impl Strategy<Value = (u64, u64, u64)> {
    (0u64..1_000, 0u64..1_000, 120u64..400).prop_filter("a trove needs collateral", |(x, y, _)| {
        *x + *y > 0
    })
}

/// Collateral and debt that entered or left the system, per asset.
#[derive(Default)]
struct Flows {
    deposited: [Decimal; 2],
    withdrawn: [Decimal; 2],
    incentives: [Decimal; 2],
    borrowed: Decimal,
    repaid: Decimal,
}

fn open_book(
    ledger: &mut TroveLedger,
    troves: &[(u64, u64, u64)],
    prices: &PriceSet,
    flows: &mut Flows,
) -> Vec<TroveRecord> {
    let mut records = vec![];
    for (x, y, ratio) in troves.iter() {
        let mut deposits = vec![];
        if *x > 0 {
            deposits.push((0, Decimal::from(*x)));
        }
        if *y > 0 {
            deposits.push((1, Decimal::from(*y)));
        }

        let value = prices
            .basket_value(deposits.iter().map(|(asset, amount)| (*asset, amount)))
            .unwrap();
        let debt = value * dec!(100) / Decimal::from(*ratio);

        // A book that would breach the total ratio is simply smaller.
        if let Ok(record) = ledger.open_trove(deposits.clone(), debt, prices) {
            for (asset, amount) in deposits {
                flows.deposited[asset as usize] = flows.deposited[asset as usize] + amount;
            }
            flows.borrowed = flows.borrowed + debt;
            records.push(record);
        }
    }
    records
}

fn check_conservation(ledger: &TroveLedger, flows: &Flows) -> Result<(), TestCaseError> {
    for asset in ASSETS {
        let i = asset as usize;
        let held = ledger.pools().active.collateral(asset) + ledger.pools().default.collateral(asset);
        prop_assert_eq!(
            held + flows.incentives[i],
            flows.deposited[i] - flows.withdrawn[i],
            "asset {} is not conserved",
            asset
        );
    }

    let debt = ledger.pools().active.debt() + ledger.pools().default.debt();
    prop_assert_eq!(debt, flows.borrowed - flows.repaid, "debt is not conserved");

    Ok(())
}

fn check_invariants(ledger: &TroveLedger, records: &[TroveRecord]) -> Result<(), TestCaseError> {
    let dust = dec!("0.000001");

    let mut debt_sum = Decimal::ZERO;
    let mut collateral_sums = [Decimal::ZERO; 2];
    for record in records.iter().filter(|record| record.status() == TroveStatus::Active) {
        let (pending_coll, pending_debt) = ledger.pending_rewards(record).unwrap();
        prop_assert!(!pending_debt.is_negative());
        prop_assert!(pending_coll.values().all(|amount| !amount.is_negative()));

        let (collateral, debt) = ledger.entire_collateral_and_debt(record).unwrap();
        debt_sum = debt_sum + debt;
        for (asset, amount) in collateral {
            collateral_sums[asset as usize] = collateral_sums[asset as usize] + amount;
        }
    }

    for asset in ASSETS {
        let system = ledger.pools().system_collateral(asset).unwrap();
        let rewards = ledger.rewards().get(asset).unwrap();
        let accounted = collateral_sums[asset as usize] + rewards.orphaned_coll;

        prop_assert!(!ledger.pools().active.collateral(asset).is_negative());
        prop_assert!(!ledger.pools().default.collateral(asset).is_negative());
        prop_assert!(accounted <= system, "asset {} over-allocated: {} > {}", asset, accounted, system);
        prop_assert!(system - accounted <= dust, "asset {} leaks: {} vs {}", asset, accounted, system);
    }

    let orphaned_debt = ASSETS
        .iter()
        .map(|asset| ledger.rewards().get(*asset).unwrap().orphaned_debt)
        .fold(Decimal::ZERO, |total, debt| total + debt);
    let accounted = debt_sum + orphaned_debt;
    let system = ledger.pools().system_debt().unwrap();
    prop_assert!(accounted <= system, "debt over-allocated: {} > {}", accounted, system);
    prop_assert!(system - accounted <= dust, "debt leaks: {} vs {}", accounted, system);

    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_liquidations_conserve_collateral_and_debt(
        troves in prop::collection::vec(trove_strategy(), 2..12),
        crash in (40u64..100, 40u64..100),
        order in any::<u64>(),
    ) {
        let mut ledger = new_ledger();
        let mut flows = Flows::default();
        let opening = PriceSet::from_prices(vec![dec!(200), dec!(100)]);
        let mut records = open_book(&mut ledger, &troves, &opening, &mut flows);
        check_invariants(&ledger, &records)?;
        check_conservation(&ledger, &flows)?;

        let crashed = PriceSet::from_prices(vec![
            dec!(2) * Decimal::from(crash.0),
            Decimal::from(crash.1),
        ]);

        let count = records.len();
        for step in 0..count {
            let index = ((order % count as u64) as usize + step) % count;
            let before = ledger.clone();
            let l_before: Vec<(Decimal, Decimal)> = ASSETS
                .iter()
                .map(|asset| {
                    let rewards = ledger.rewards().get(*asset).unwrap();
                    (rewards.l_coll, rewards.l_debt)
                })
                .collect();

            match ledger.liquidate(records[index].clone(), &crashed) {
                Ok(liquidation) => {
                    for (asset, amount) in liquidation.incentive.iter() {
                        let i = *asset as usize;
                        flows.incentives[i] = flows.incentives[i] + *amount;
                    }
                    records[index] = liquidation.record;
                }
                Err(TroveError::NotLiquidatable { .. }) | Err(TroveError::InvalidPosition(_)) => {
                    prop_assert_eq!(&ledger, &before);
                }
                Err(error) => prop_assert!(false, "unexpected error {}", error),
            }

            for (asset, (l_coll, l_debt)) in ASSETS.iter().zip(l_before) {
                let rewards = ledger.rewards().get(*asset).unwrap();
                prop_assert!(rewards.l_coll >= l_coll);
                prop_assert!(rewards.l_debt >= l_debt);
            }

            check_invariants(&ledger, &records)?;
            check_conservation(&ledger, &flows)?;
        }

        // materializing every survivor keeps the books balanced as well
        for record in records.iter_mut().filter(|record| record.status() == TroveStatus::Active) {
            ledger.apply_pending_rewards(record).unwrap();
        }
        check_invariants(&ledger, &records)?;
        check_conservation(&ledger, &flows)?;
    }

    #[test]
    fn prop_batch_matches_sequential(
        troves in prop::collection::vec(trove_strategy(), 2..10),
        crash in (40u64..100, 40u64..100),
    ) {
        let mut ledger = new_ledger();
        let opening = PriceSet::from_prices(vec![dec!(200), dec!(100)]);
        let records = open_book(&mut ledger, &troves, &opening, &mut Flows::default());

        let crashed = PriceSet::from_prices(vec![
            dec!(2) * Decimal::from(crash.0),
            Decimal::from(crash.1),
        ]);

        let mut sequential = ledger.clone();
        let mut liquidated = vec![];
        for (id, record) in records.iter().enumerate() {
            if let Ok(liquidation) = sequential.liquidate(record.clone(), &crashed) {
                liquidated.push((id, liquidation));
            }
        }

        let mut batched = ledger.clone();
        let keyed: Vec<(usize, TroveRecord)> = records.into_iter().enumerate().collect();
        match batched.liquidate_batch(keyed, &crashed) {
            Ok(batch) => {
                prop_assert_eq!(&batch.liquidated, &liquidated);
                prop_assert_eq!(&batched, &sequential);
            }
            Err(TroveError::NothingToLiquidate) => {
                prop_assert!(liquidated.is_empty());
                prop_assert_eq!(&batched, &ledger);
            }
            Err(error) => prop_assert!(false, "unexpected error {}", error),
        }
    }

    #[test]
    fn prop_failed_adjustments_do_not_mutate(
        troves in prop::collection::vec(trove_strategy(), 1..6),
        withdrawal in 1u64..2_000,
        borrow in 0u64..200_000,
    ) {
        let mut ledger = new_ledger();
        let mut flows = Flows::default();
        let opening = PriceSet::from_prices(vec![dec!(200), dec!(100)]);
        let mut records = open_book(&mut ledger, &troves, &opening, &mut flows);
        prop_assume!(!records.is_empty());

        let before = ledger.clone();
        let result = ledger.adjust_trove(
            records[0].clone(),
            vec![(0, -Decimal::from(withdrawal))],
            Decimal::from(borrow),
            &opening,
        );

        match result {
            Ok(record) => {
                flows.withdrawn[0] = flows.withdrawn[0] + Decimal::from(withdrawal);
                flows.borrowed = flows.borrowed + Decimal::from(borrow);
                records[0] = record;
            }
            Err(_) => prop_assert_eq!(&ledger, &before),
        }
        check_invariants(&ledger, &records)?;
        check_conservation(&ledger, &flows)?;
    }
}
