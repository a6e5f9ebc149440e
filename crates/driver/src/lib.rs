#![doc = include_str!("../README.md")]

use anyhow::Result;
use async_trait::async_trait;

/// Contains the smart contract bindings used by the driver.
mod bindings;

pub mod chain;
pub use chain::{
    AssertionChain, AssertionCreationInfo, ChainError, LayerZeroHeights, SpecChallengeManager,
    TxReceipt,
};

mod config;
pub use config::DriverConfig;

pub mod confirmation;
pub use confirmation::{ChallengeConfirmer, ConfirmationError};

mod drivers;
pub use drivers::*;

mod eth;
pub use eth::{EthAssertionChain, EthChallengeManager};

pub mod events;

mod manager;
pub use manager::Manager;

pub mod metrics;

pub mod persistence;

pub mod retry;

mod state;
pub use state::{AgentState, TrackerState};

pub mod tracker;
pub use tracker::{EdgeTracker, EdgeTrackerState, FsmSummary};

mod types;
pub use types::*;

mod utils;

pub mod watcher;
pub use watcher::{EdgeManager, Watcher};

#[cfg(test)]
mod test_utils;

/// The [Driver] trait defines the interface for all driver loops that are ran by the
/// `bold-challenger` binary.
#[async_trait]
pub trait Driver {
    /// Starts the [Driver] loop.
    async fn start_loop(self) -> Result<()>;
}
