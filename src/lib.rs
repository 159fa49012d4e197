//! Token farm: accounts stake a credit token, the operator pays out reward
//! tokens 1:1 against current stakes, and accounts unstake in full.

pub mod config;
pub mod farm;
pub mod ledger;
pub mod staking;

pub use config::FarmConfig;
pub use farm::{Farm, FarmCall, FarmError};
pub use ledger::{AccountId, Amount, BalanceLedger, TokenLedger};
pub use staking::{StakingEngine, StakingError};
