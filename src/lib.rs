//! # Trove Protocol Crate
//!
//! This crate contains the Scrypto blueprint and the redistribution engine of a multi-collateral
//! borrowing protocol. Users lock a basket of collateral assets in a trove and mint the tUSD debt
//! token against it. Under-collateralized troves are liquidated by spreading their collateral and
//! debt over every other trove, in constant time, through per-asset reward accumulators.
//!
//! ## Modules
//!
//! The crate is organized into the following modules:
//!
//! - `trove_manager`: Defines the `TroveManager` component, which holds collateral in custody, mints and
//!   burns tUSD, issues trove receipts, fetches oracle prices and keeps the troves sorted by health.
//! - `trove_ledger`: The position ledger. Opens, adjusts, closes and redeems troves on top of the engine's
//!   globals, applying pending redistribution rewards before anything else.
//! - `liquidation`: Single and batch liquidation, recovery-mode gating and snapshot updates.
//! - `rewards`: Per-asset reward accumulators, stakes and snapshots.
//! - `pools`: Active and default pool ledgers.
//! - `asset_registry`: Accepted collateral assets and their dense indices.
//! - `oracle_adapter`: Validated price sets and collateral value queries.
//! - `errors`: The engine's error type.
//! - `events`: Events emitted by the trove manager, allowing off-ledger services to track state changes.
//! - `shared_structs`: Data structures shared by the engine and the component, such as `TroveReceipt`
//!   and `TroveStatus`.
//!
//! Everything below `trove_manager` is plain Rust operating on `Decimal`, usable and testable without
//! a ledger.

pub mod asset_registry;
pub mod errors;
pub mod events;
pub mod liquidation;
pub mod oracle_adapter;
pub mod pools;
pub mod rewards;
pub mod shared_structs;
pub mod trove_ledger;
pub mod trove_manager;
