//! Data structures, commitment math and the royal edge tree for the BOLD challenge game.

mod types;
pub use types::*;

pub mod error;

mod position;
pub use position::{bisection_point, least_significant_bit, most_significant_bit, tree_depth};

pub mod merkle;
pub mod prefix;

pub mod provider;
pub use provider::{
    HashCollectorConfig, HistoryCommitmentProvider, HistoryCommitmentRequest, L2StateProvider,
    OneStepProofData,
};

mod tree;
pub use tree::{ConfirmableEssentialEdge, RoyalChallengeTree};

mod alphabet;
pub use alphabet::AlphabetProvider;
