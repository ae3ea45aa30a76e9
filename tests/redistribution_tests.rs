use trove_protocol::errors::*;
use trove_protocol::oracle_adapter::PriceSet;
use trove_protocol::shared_structs::*;
use trove_protocol::trove_ledger::*;

use scrypto::prelude::*;

const X: AssetIndex = 0;
const Y: AssetIndex = 1;

fn resource(seed: u8) -> ResourceAddress {
    let mut raw = [seed; NodeId::LENGTH];
    raw[0] = EntityType::GlobalFungibleResourceManager as u8;
    ResourceAddress::new_or_panic(raw)
}

fn ledger_with_assets(count: u8) -> TroveLedger {
    let mut ledger = TroveLedger::default();
    for seed in 1..=count {
        ledger.register_asset(resource(seed), 18).unwrap();
    }
    ledger
}

fn prices(prices: &[Decimal]) -> PriceSet {
    PriceSet::from_prices(prices.to_vec())
}

/// A and B each hold 100 X, C holds 10 X against 1000 debt. At a price of 105 only C is below the
/// MCR.
fn three_troves() -> Result<(TroveLedger, TroveRecord, TroveRecord, TroveRecord), TroveError> {
    let mut ledger = ledger_with_assets(1);
    let opening = prices(&[dec!(200)]);

    let a = ledger.open_trove(vec![(X, dec!(100))], dec!(1000), &opening)?;
    let b = ledger.open_trove(vec![(X, dec!(100))], dec!(1000), &opening)?;
    let c = ledger.open_trove(vec![(X, dec!(10))], dec!(1000), &opening)?;

    Ok((ledger, a, b, c))
}

#[test]
fn test_first_stake_equals_collateral() -> Result<(), TroveError> {
    let mut ledger = ledger_with_assets(1);

    let record = ledger.open_trove(vec![(X, dec!(42))], dec!(10), &prices(&[dec!(1)]))?;

    assert_eq!(record.stake(X), dec!(42));
    assert_eq!(ledger.rewards().get(X)?.total_stakes, dec!(42));
    assert_eq!(record.status(), TroveStatus::Active);

    Ok(())
}

#[test]
fn test_liquidation_scenario() -> Result<(), TroveError> {
    let (mut ledger, a, b, c) = three_troves()?;
    let low = prices(&[dec!(105)]);

    let liquidation = ledger.liquidate(c, &low)?;

    assert_eq!(liquidation.record.status(), TroveStatus::ClosedByLiquidation);
    assert_eq!(liquidation.incentive, vec![(X, dec!("0.05"))]);
    assert_eq!(liquidation.collateral_redistributed, vec![(X, dec!("9.95"))]);
    assert_eq!(liquidation.debt_redistributed, vec![(X, dec!(1000))]);
    assert!(!liquidation.recovery_mode);

    let rewards = ledger.rewards().get(X)?;
    assert_eq!(rewards.l_coll, dec!("0.04975"));
    assert_eq!(rewards.l_debt, dec!(5));
    assert_eq!(rewards.total_stakes, dec!(200));
    assert_eq!(rewards.total_stakes_snapshot, dec!(200));
    assert_eq!(rewards.total_collateral_snapshot, dec!("209.95"));

    for record in [&a, &b] {
        let (pending_coll, pending_debt) = ledger.pending_rewards(record)?;
        assert_eq!(pending_coll.get(&X).copied(), Some(dec!("4.975")));
        assert_eq!(pending_debt, dec!(500));
    }

    assert_eq!(ledger.pools().active.collateral(X), dec!(200));
    assert_eq!(ledger.pools().default.collateral(X), dec!("9.95"));
    assert_eq!(ledger.pools().active.debt(), dec!(2000));
    assert_eq!(ledger.pools().default.debt(), dec!(1000));

    Ok(())
}

#[test]
fn test_materialization_moves_default_to_active() -> Result<(), TroveError> {
    let (mut ledger, mut a, _, c) = three_troves()?;
    let low = prices(&[dec!(105)]);
    ledger.liquidate(c, &low)?;

    ledger.apply_pending_rewards(&mut a)?;

    assert_eq!(a.recorded_collateral().get(&X).copied(), Some(dec!("104.975")));
    assert_eq!(a.recorded_debt(), dec!(1500));
    assert_eq!(ledger.pools().active.collateral(X), dec!("204.975"));
    assert_eq!(ledger.pools().default.collateral(X), dec!("4.975"));
    assert_eq!(ledger.pools().default.debt(), dec!(500));

    let (pending_coll, pending_debt) = ledger.pending_rewards(&a)?;
    assert!(pending_coll.is_empty());
    assert_eq!(pending_debt, Decimal::ZERO);

    Ok(())
}

#[test]
fn test_materialization_is_idempotent() -> Result<(), TroveError> {
    let (mut ledger, mut a, _, c) = three_troves()?;
    ledger.liquidate(c, &prices(&[dec!(105)]))?;

    ledger.apply_pending_rewards(&mut a)?;
    let ledger_after_first = ledger.clone();
    let record_after_first = a.clone();

    ledger.apply_pending_rewards(&mut a)?;

    assert_eq!(ledger, ledger_after_first);
    assert_eq!(a, record_after_first);

    Ok(())
}

#[test]
fn test_stake_uses_snapshot_ratio_after_liquidation() -> Result<(), TroveError> {
    let (mut ledger, _, _, c) = three_troves()?;
    ledger.liquidate(c, &prices(&[dec!(105)]))?;

    let d = ledger.open_trove(vec![(X, dec!(100))], dec!(1000), &prices(&[dec!(105)]))?;

    let expected = dec!(100) * dec!(200) / dec!("209.95");
    assert_eq!(d.stake(X), expected);
    assert!(d.stake(X) < dec!(100));

    Ok(())
}

#[test]
fn test_survivors_accrue_in_proportion_to_stake() -> Result<(), TroveError> {
    let mut ledger = ledger_with_assets(1);
    let opening = prices(&[dec!(200)]);

    let small = ledger.open_trove(vec![(X, dec!(100))], dec!(1000), &opening)?;
    let large = ledger.open_trove(vec![(X, dec!(300))], dec!(1000), &opening)?;
    let risky = ledger.open_trove(vec![(X, dec!(7))], dec!(700), &opening)?;

    let liquidation = ledger.liquidate(risky, &prices(&[dec!(105)]))?;
    let net = liquidation.collateral_redistributed[0].1;

    let (small_coll, small_debt) = ledger.pending_rewards(&small)?;
    let (large_coll, large_debt) = ledger.pending_rewards(&large)?;

    assert_eq!(small_coll[&X], net * dec!(100) / dec!(400));
    assert_eq!(large_coll[&X], small_coll[&X] * dec!(3));
    assert_eq!(large_debt, small_debt * dec!(3));
    assert_eq!(small_debt, dec!(175));

    Ok(())
}

#[test]
fn test_not_liquidatable_changes_nothing() -> Result<(), TroveError> {
    let (mut ledger, a, _, _) = three_troves()?;
    let before = ledger.clone();

    let result = ledger.liquidate(a, &prices(&[dec!(105)]));

    assert!(matches!(result, Err(TroveError::NotLiquidatable { .. })));
    assert_eq!(ledger, before);

    Ok(())
}

#[test]
fn test_closed_trove_is_invalid_position() -> Result<(), TroveError> {
    let (mut ledger, _, _, c) = three_troves()?;
    let low = prices(&[dec!(105)]);

    let liquidation = ledger.liquidate(c, &low)?;
    let before = ledger.clone();

    assert_eq!(
        ledger.liquidate(liquidation.record.clone(), &low),
        Err(TroveError::InvalidPosition(TroveStatus::ClosedByLiquidation))
    );
    assert_eq!(
        ledger.liquidate(TroveRecord::default(), &low),
        Err(TroveError::InvalidPosition(TroveStatus::Nonexistent))
    );
    assert_eq!(ledger, before);

    Ok(())
}

#[test]
fn test_stale_price_is_refused() -> Result<(), TroveError> {
    let (mut ledger, _, _, c) = three_troves()?;
    let before = ledger.clone();

    let missing = PriceSet::from_prices(vec![Decimal::ZERO]);

    assert_eq!(ledger.liquidate(c, &missing), Err(TroveError::StalePrice(X)));
    assert_eq!(ledger, before);

    Ok(())
}

#[test]
fn test_batch_equals_sequential_liquidations() -> Result<(), TroveError> {
    let mut ledger = ledger_with_assets(2);
    let opening = prices(&[dec!(200), dec!(100)]);

    let a = ledger.open_trove(vec![(X, dec!(100)), (Y, dec!(50))], dec!(2000), &opening)?;
    let b = ledger.open_trove(vec![(X, dec!(10))], dec!(1000), &opening)?;
    let c = ledger.open_trove(vec![(X, dec!(5)), (Y, dec!(8))], dec!(1000), &opening)?;
    let d = ledger.open_trove(vec![(X, dec!(11))], dec!(1100), &opening)?;
    let _e = ledger.open_trove(vec![(Y, dec!(300))], dec!(1000), &opening)?;

    let low = prices(&[dec!(105), dec!(60)]);

    let mut sequential = ledger.clone();
    let mut sequential_results = vec![];
    for (id, record) in [(1u64, b.clone()), (2, a.clone()), (3, c.clone()), (4, d.clone())] {
        if let Ok(liquidation) = sequential.liquidate(record, &low) {
            sequential_results.push((id, liquidation));
        }
    }

    let mut batched = ledger.clone();
    let batch = batched.liquidate_batch(vec![(1u64, b), (2, a), (3, c), (4, d)], &low)?;

    assert_eq!(batched, sequential);
    assert_eq!(batch.liquidated, sequential_results);
    assert_eq!(batch.skipped.len(), 1);
    assert_eq!(batch.skipped[0].0, 2);

    Ok(())
}

#[test]
fn test_batch_skips_duplicates_and_closed() -> Result<(), TroveError> {
    let (mut ledger, _, _, c) = three_troves()?;
    let low = prices(&[dec!(105)]);

    let batch = ledger.liquidate_batch(
        vec![
            (1u64, c.clone()),
            (1u64, c),
            (2u64, TroveRecord::default()),
        ],
        &low,
    )?;

    assert_eq!(batch.liquidated.len(), 1);
    assert_eq!(
        batch.skipped,
        vec![
            (1, TroveError::InvalidPosition(TroveStatus::ClosedByLiquidation)),
            (2, TroveError::InvalidPosition(TroveStatus::Nonexistent)),
        ]
    );
    assert_eq!(ledger.rewards().get(X)?.l_coll, dec!("0.04975"));

    Ok(())
}

#[test]
fn test_batch_without_liquidations_fails() -> Result<(), TroveError> {
    let (mut ledger, a, b, _) = three_troves()?;
    let before = ledger.clone();

    let result = ledger.liquidate_batch(vec![(1u64, a), (2, b)], &prices(&[dec!(105)]));

    assert_eq!(result, Err(TroveError::NothingToLiquidate));
    assert_eq!(ledger, before);

    Ok(())
}

#[test]
fn test_batch_size_is_limited() -> Result<(), TroveError> {
    let (mut ledger, a, b, c) = three_troves()?;
    let mut parameters = ledger.parameters().clone();
    parameters.max_batch_size = 2;
    ledger.set_parameters(parameters)?;

    let result = ledger.liquidate_batch(vec![(1u64, a), (2, b), (3, c)], &prices(&[dec!(105)]));

    assert_eq!(result, Err(TroveError::InvalidAmount("batch too large")));

    Ok(())
}

#[test]
fn test_debt_is_allocated_by_collateral_value() -> Result<(), TroveError> {
    let mut ledger = ledger_with_assets(2);
    let opening = prices(&[dec!(100), dec!(50)]);

    let a = ledger.open_trove(vec![(X, dec!(100)), (Y, dec!(100))], dec!(1000), &opening)?;
    let c = ledger.open_trove(vec![(X, dec!(10)), (Y, dec!(10))], dec!(1200), &opening)?;

    let crash = prices(&[dec!(80), dec!(40)]);
    let liquidation = ledger.liquidate(c, &crash)?;

    // X is worth 800 and Y 400 at the liquidation prices
    assert_eq!(liquidation.debt_redistributed, vec![(X, dec!(800)), (Y, dec!(400))]);

    let (_, pending_debt) = ledger.pending_rewards(&a)?;
    assert_eq!(pending_debt, dec!(1200));

    Ok(())
}

#[test]
fn test_orphaned_amounts_go_to_next_staker() -> Result<(), TroveError> {
    let mut ledger = ledger_with_assets(2);
    let opening = prices(&[dec!(100), dec!(100)]);

    let a = ledger.open_trove(vec![(X, dec!(100))], dec!(1000), &opening)?;
    let c = ledger.open_trove(vec![(X, dec!(10)), (Y, dec!(10))], dec!(1300), &opening)?;

    let crash = prices(&[dec!(70), dec!(70)]);
    let liquidation = ledger.liquidate(c, &crash)?;

    let y_debt = liquidation.debt_redistributed[1].1;
    let y_coll = liquidation.collateral_redistributed[1].1;
    assert_eq!(y_debt, dec!(650));
    assert_eq!(y_coll, dec!("9.95"));

    let rewards = ledger.rewards().get(Y)?;
    assert_eq!(rewards.orphaned_coll, y_coll);
    assert_eq!(rewards.orphaned_debt, y_debt);
    assert_eq!(rewards.l_coll, Decimal::ZERO);
    assert_eq!(rewards.total_collateral_snapshot, y_coll);

    // A never held Y and receives none of it
    let (pending_coll, pending_debt) = ledger.pending_rewards(&a)?;
    assert_eq!(pending_coll.get(&Y), None);
    assert_eq!(pending_debt, dec!(650));

    let d = ledger.open_trove(vec![(Y, dec!(100))], dec!(100), &crash)?;

    let rewards = ledger.rewards().get(Y)?;
    assert_eq!(rewards.orphaned_coll, Decimal::ZERO);
    assert_eq!(rewards.orphaned_debt, Decimal::ZERO);

    // the sole staker restarts the asset's stake ratio at one
    assert_eq!(d.stake(Y), dec!("109.95"));
    assert_eq!(d.recorded_collateral()[&Y], dec!("109.95"));
    assert_eq!(rewards.total_stakes_snapshot, dec!("109.95"));
    assert_eq!(rewards.total_collateral_snapshot, dec!("109.95"));
    assert_eq!(d.recorded_debt(), dec!(750));
    assert_eq!(ledger.pools().default.collateral(Y), Decimal::ZERO);

    Ok(())
}

#[test]
fn test_absorbing_orphans_keeps_stake_ratio_shared() -> Result<(), TroveError> {
    let mut ledger = ledger_with_assets(2);
    let opening = prices(&[dec!(100), dec!(100)]);

    let a = ledger.open_trove(vec![(X, dec!(100))], dec!(1000), &opening)?;
    let c = ledger.open_trove(vec![(X, dec!(10)), (Y, dec!(10))], dec!(1300), &opening)?;

    let crash = prices(&[dec!(70), dec!(70)]);
    ledger.liquidate(c, &crash)?;

    // a dust deposit picks up the 9.95 orphaned Y
    let a = ledger.adjust_trove(a, vec![(Y, dec!("0.000001"))], Decimal::ZERO, &crash)?;
    assert_eq!(a.recorded_collateral()[&Y], dec!("9.950001"));
    assert_eq!(a.stake(Y), dec!("9.950001"));
    assert_eq!(a.recorded_debt(), dec!(2300));

    let rewards = ledger.rewards().get(Y)?;
    assert_eq!(rewards.total_stakes, dec!("9.950001"));
    assert_eq!(rewards.total_stakes_snapshot, dec!("9.950001"));
    assert_eq!(rewards.total_collateral_snapshot, dec!("9.950001"));

    let d = ledger.open_trove(vec![(Y, dec!(10))], dec!(100), &crash)?;
    assert_eq!(d.stake(Y), dec!(10));

    // equal stake per unit of collateral, so a later Y liquidation splits by holdings
    assert_eq!(
        a.stake(Y) / a.recorded_collateral()[&Y],
        d.stake(Y) / d.recorded_collateral()[&Y]
    );

    Ok(())
}

#[test]
fn test_deposit_absorbing_orphaned_debt_checks_health() -> Result<(), TroveError> {
    let mut ledger = ledger_with_assets(2);
    let opening = prices(&[dec!(100), dec!(100)]);

    let a = ledger.open_trove(vec![(X, dec!(100))], dec!(6334), &opening)?;
    let c = ledger.open_trove(vec![(X, dec!(10)), (Y, dec!(10))], dec!(1300), &opening)?;

    let crash = prices(&[dec!(70), dec!(70)]);
    ledger.liquidate(c, &crash)?;
    assert!(!ledger.is_liquidatable(&a, &crash)?);

    // 9.95 Y and 650 debt would land on A and leave it at 1.0994
    let before = ledger.clone();
    assert!(matches!(
        ledger.adjust_trove(a.clone(), vec![(Y, dec!("0.000001"))], Decimal::ZERO, &crash),
        Err(TroveError::InsufficientCollateral { .. })
    ));
    assert_eq!(ledger, before);
    assert_eq!(ledger.rewards().get(Y)?.orphaned_debt, dec!(650));

    Ok(())
}

#[test]
fn test_recovery_mode_relaxes_threshold() -> Result<(), TroveError> {
    let mut ledger = ledger_with_assets(1);
    let opening = prices(&[dec!(200)]);

    let a = ledger.open_trove(vec![(X, dec!(100))], dec!(10000), &opening)?;
    let b = ledger.open_trove(vec![(X, dec!(120))], dec!(10000), &opening)?;

    let stressed = prices(&[dec!(125)]);
    assert!(ledger.is_recovery_mode(&stressed)?);
    assert_eq!(ledger.total_collateral_ratio(&stressed)?, dec!("1.375"));

    assert!(matches!(
        ledger.clone().liquidate(b, &stressed),
        Err(TroveError::NotLiquidatable { .. })
    ));

    let liquidation = ledger.liquidate(a, &stressed)?;
    assert!(liquidation.recovery_mode);
    assert_eq!(liquidation.icr, dec!("1.25"));

    Ok(())
}

#[test]
fn test_open_requires_collateral_ratio() {
    let mut ledger = ledger_with_assets(1);
    let before = ledger.clone();

    let result = ledger.open_trove(vec![(X, dec!(10))], dec!(1000), &prices(&[dec!(105)]));

    assert!(matches!(result, Err(TroveError::InsufficientCollateral { .. })));
    assert_eq!(ledger, before);
}

#[test]
fn test_open_rejects_unknown_and_inactive_assets() -> Result<(), TroveError> {
    let mut ledger = ledger_with_assets(2);
    let opening = prices(&[dec!(100), dec!(100)]);

    assert_eq!(
        ledger.open_trove(vec![(7, dec!(10))], dec!(100), &opening),
        Err(TroveError::UnknownAsset)
    );

    ledger.set_asset_active(Y, false)?;
    assert_eq!(
        ledger.open_trove(vec![(Y, dec!(10))], dec!(100), &opening),
        Err(TroveError::InactiveAsset(Y))
    );

    Ok(())
}

#[test]
fn test_adjust_trove() -> Result<(), TroveError> {
    let (mut ledger, a, _, _) = three_troves()?;
    let price = prices(&[dec!(200)]);

    let a = ledger.adjust_trove(a, vec![(X, dec!("-50"))], dec!(500), &price)?;
    assert_eq!(a.recorded_collateral()[&X], dec!(50));
    assert_eq!(a.recorded_debt(), dec!(1500));
    assert_eq!(a.stake(X), dec!(50));
    assert_eq!(ledger.pools().active.collateral(X), dec!(160));
    assert_eq!(ledger.pools().active.debt(), dec!(3500));

    let a = ledger.adjust_trove(a, vec![], dec!("-1500"), &price)?;
    assert_eq!(a.recorded_debt(), Decimal::ZERO);

    Ok(())
}

#[test]
fn test_adjust_trove_failures_leave_state_unchanged() -> Result<(), TroveError> {
    let (mut ledger, a, _, c) = three_troves()?;
    let price = prices(&[dec!(200)]);
    let before = ledger.clone();

    assert_eq!(
        ledger.adjust_trove(a.clone(), vec![(X, dec!("-101"))], Decimal::ZERO, &price),
        Err(TroveError::InvalidAmount("withdrawal exceeds collateral"))
    );
    assert!(matches!(
        ledger.adjust_trove(c.clone(), vec![(X, dec!("-5"))], Decimal::ZERO, &price),
        Err(TroveError::InsufficientCollateral { .. })
    ));
    assert_eq!(
        ledger.adjust_trove(a.clone(), vec![], dec!("-999.5"), &price),
        Err(TroveError::InsufficientDebtRepayment {
            provided: dec!("999.5"),
            maximum: dec!(999),
        })
    );
    assert_eq!(ledger, before);

    // improving an unhealthy trove is always allowed
    let c = ledger.adjust_trove(c, vec![(X, dec!(1))], Decimal::ZERO, &prices(&[dec!(105)]))?;
    assert_eq!(c.recorded_collateral()[&X], dec!(11));

    Ok(())
}

#[test]
fn test_close_trove() -> Result<(), TroveError> {
    let (mut ledger, a, b, c) = three_troves()?;
    ledger.liquidate(c, &prices(&[dec!(105)]))?;

    let closed = ledger.close_trove(a)?;
    assert_eq!(closed.record.status(), TroveStatus::ClosedByOwner);
    assert_eq!(closed.collateral, vec![(X, dec!("104.975"))]);
    assert_eq!(closed.debt, dec!(1500));
    assert_eq!(ledger.rewards().get(X)?.total_stakes, dec!(100));

    let closed = ledger.close_trove(b)?;
    assert_eq!(closed.collateral, vec![(X, dec!("104.975"))]);

    assert_eq!(ledger.pools().active.collateral(X), Decimal::ZERO);
    assert_eq!(ledger.pools().default.collateral(X), Decimal::ZERO);
    assert_eq!(ledger.pools().system_debt()?, Decimal::ZERO);

    assert_eq!(
        ledger.close_trove(closed.record),
        Err(TroveError::InvalidPosition(TroveStatus::ClosedByOwner))
    );

    Ok(())
}

#[test]
fn test_redeem_trove() -> Result<(), TroveError> {
    let mut ledger = ledger_with_assets(1);
    let price = prices(&[dec!(100)]);

    let a = ledger.open_trove(vec![(X, dec!(100))], dec!(5000), &price)?;
    let redemption = ledger.redeem_trove(a, &price)?;

    assert_eq!(redemption.record.status(), TroveStatus::ClosedByRedemption);
    assert_eq!(redemption.debt, dec!(5000));
    assert_eq!(redemption.redeemed, vec![(X, dec!("49.75"))]);
    assert_eq!(redemption.leftovers, vec![(X, dec!("50.25"))]);
    assert_eq!(ledger.pools().active.collateral(X), Decimal::ZERO);
    assert_eq!(ledger.pools().system_debt()?, Decimal::ZERO);

    Ok(())
}

#[test]
fn test_liquidatable_trove_is_not_redeemable() -> Result<(), TroveError> {
    let (mut ledger, _, _, c) = three_troves()?;
    let before = ledger.clone();

    assert!(matches!(
        ledger.redeem_trove(c, &prices(&[dec!(105)])),
        Err(TroveError::NotRedeemable { .. })
    ));
    assert_eq!(ledger, before);

    Ok(())
}

#[test]
fn test_entire_collateral_and_debt_matches_materialization() -> Result<(), TroveError> {
    let (mut ledger, mut a, _, c) = three_troves()?;
    let low = prices(&[dec!(105)]);
    ledger.liquidate(c, &low)?;

    let (collateral, debt) = ledger.entire_collateral_and_debt(&a)?;
    let ratio = ledger.collateralization_ratio(&a, &low)?;

    ledger.apply_pending_rewards(&mut a)?;

    assert_eq!(&collateral, a.recorded_collateral());
    assert_eq!(debt, a.recorded_debt());
    assert_eq!(ratio, dec!("104.975") * dec!(105) / dec!(1500));

    Ok(())
}

#[test]
fn test_parameters_are_validated() {
    let mut ledger = ledger_with_assets(1);

    let mut parameters = LedgerParameters::default();
    parameters.ccr = dec!("1.05");
    assert!(ledger.set_parameters(parameters).is_err());

    let mut parameters = LedgerParameters::default();
    parameters.liquidation_incentive = Decimal::ONE;
    assert!(ledger.set_parameters(parameters).is_err());

    assert_eq!(ledger.parameters(), &LedgerParameters::default());
}
