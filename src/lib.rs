//! Escrow Payouts - hold/release engine with multi-rail payouts
//!
//! Funds owed to recipients are held until released, voided or
//! auto-released, and paid out through one of several payment rails.
//!
//! # Modules
//!
//! - [`escrow`] - hold registry, release coordinator, transfer executor
//! - [`rails`] - payout rail adapters and the rail registry
//! - [`batch_file`] - fixed-width bank batch file encoder
//! - [`money`] - currency minor-unit conversion
//! - [`gateway`] - HTTP command surface
//! - [`config`] / [`logging`] - service bootstrap

pub mod batch_file;
pub mod config;
pub mod escrow;
pub mod gateway;
pub mod logging;
pub mod money;
pub mod rails;

pub use batch_file::{BatchFileEncoder, BatchOriginator, BatchPayout};
pub use escrow::{EscrowError, HoldRegistry, ReleaseCoordinator, TransferExecutor};
pub use rails::{RailAdapter, RailRegistry};
