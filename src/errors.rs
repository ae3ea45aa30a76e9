//! # Trove engine errors
//! Every failure the redistribution engine can report. Engine operations never leave partial state
//! behind when they return one of these.

use crate::shared_structs::{AssetIndex, TroveStatus};
use scrypto::prelude::*;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TroveError {
    /// Collateral ratio is above every threshold that applies right now.
    #[error("Trove not liquidatable: collateral ratio {icr} is above the applicable threshold {threshold}")]
    NotLiquidatable { icr: Decimal, threshold: Decimal },

    /// Target trove does not exist or is already closed.
    #[error("Invalid trove: expected an active trove, found {0:?}")]
    InvalidPosition(TroveStatus),

    /// The adjustment would leave the trove below the required collateral ratio, or withdraw more
    /// collateral than the trove holds.
    #[error("Insufficient collateral: collateral ratio {icr} below required {required}")]
    InsufficientCollateral { icr: Decimal, required: Decimal },

    /// A partial repayment would leave less than the minimum debt behind. Either the whole debt is
    /// repaid or at most `maximum`.
    #[error("Insufficient debt repayment: {provided} would leave a dust debt, repay all of it or at most {maximum}")]
    InsufficientDebtRepayment { provided: Decimal, maximum: Decimal },

    /// The oracle could not supply a usable price for the asset.
    #[error("Stale or missing price for asset {0}")]
    StalePrice(AssetIndex),

    /// Internal accounting would have gone negative or overflowed.
    #[error("Arithmetic invariant violation: {0}")]
    ArithmeticInvariantViolation(&'static str),

    #[error("Unknown collateral asset")]
    UnknownAsset,

    #[error("Collateral asset {0} is not accepting deposits")]
    InactiveAsset(AssetIndex),

    #[error("Invalid amount: {0}")]
    InvalidAmount(&'static str),

    #[error("Trove not redeemable: collateral ratio {icr}")]
    NotRedeemable { icr: Decimal },

    #[error("Nothing to liquidate")]
    NothingToLiquidate,
}

pub type TroveResult<T> = Result<T, TroveError>;

/// Shorthands for checked `Decimal` arithmetic that map overflow and underflow onto
/// `ArithmeticInvariantViolation`.
pub(crate) trait CheckedDecimal: Sized {
    fn add_or(self, other: Self, what: &'static str) -> TroveResult<Self>;
    fn sub_or(self, other: Self, what: &'static str) -> TroveResult<Self>;
    fn mul_or(self, other: Self, what: &'static str) -> TroveResult<Self>;
    fn div_or(self, other: Self, what: &'static str) -> TroveResult<Self>;
}

impl CheckedDecimal for Decimal {
    fn add_or(self, other: Self, what: &'static str) -> TroveResult<Self> {
        self.checked_add(other)
            .ok_or(TroveError::ArithmeticInvariantViolation(what))
    }

    fn sub_or(self, other: Self, what: &'static str) -> TroveResult<Self> {
        match self.checked_sub(other) {
            Some(result) if !result.is_negative() => Ok(result),
            _ => Err(TroveError::ArithmeticInvariantViolation(what)),
        }
    }

    fn mul_or(self, other: Self, what: &'static str) -> TroveResult<Self> {
        self.checked_mul(other)
            .ok_or(TroveError::ArithmeticInvariantViolation(what))
    }

    fn div_or(self, other: Self, what: &'static str) -> TroveResult<Self> {
        if other.is_zero() {
            return Err(TroveError::ArithmeticInvariantViolation(what));
        }
        self.checked_div(other)
            .ok_or(TroveError::ArithmeticInvariantViolation(what))
    }
}

/// Turns an engine error into a panic carrying its message. Blueprint methods use this at their
/// boundary so a failed operation aborts the whole transaction.
pub trait OrAbort<T> {
    fn or_abort(self) -> T;
}

impl<T> OrAbort<T> for TroveResult<T> {
    fn or_abort(self) -> T {
        match self {
            Ok(value) => value,
            Err(error) => panic!("{}", error),
        }
    }
}
