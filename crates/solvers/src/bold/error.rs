//! Typed errors for the pure game math. Callers that only need to propagate wrap these in
//! [anyhow::Error]; callers that need to classify use `downcast_ref`.

use super::{EdgeId, Height};
use thiserror::Error;

/// Errors produced while building Merkle history commitments.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MerkleError {
    #[error("cannot commit to an empty list of leaves")]
    NoLeaves,
    #[error("virtual size {virtual_size} is smaller than the number of leaves {leaves}")]
    VirtualTooSmall { leaves: u64, virtual_size: u64 },
    #[error("prefix index {index} must be less than virtual size {virtual_size} minus one")]
    PrefixIndexOutOfRange { index: u64, virtual_size: u64 },
}

/// Errors produced by Merkle expansion arithmetic and prefix proof verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrefixProofError {
    #[error("cannot compute the root of an empty expansion")]
    RootForEmpty,
    #[error("merkle expansion is too large")]
    ExpansionTooLarge,
    #[error("level {level} is too high")]
    LevelTooHigh { level: u64 },
    #[error("expansion size {got} does not match expected tree size {expected}")]
    TreeSize { got: u64, expected: u64 },
    #[error("cannot append an empty subtree")]
    CannotAppendEmpty,
    #[error("cannot append a subtree above the least significant bit of the expansion")]
    CannotAppendAboveLeastSignificant,
    #[error("start {start} must be less than end {end}")]
    StartNotLessThanEnd { start: u64, end: u64 },
    #[error("value cannot be zero")]
    CannotBeZero,
    #[error("computed root does not match the claimed root")]
    RootMismatch,
    #[error("proof has {len} entries but only {used} were consumed")]
    IncompleteProof { used: usize, len: usize },
    #[error("size {size} exceeds post size {post_size}")]
    SizeNotLeqPostSize { size: u64, post_size: u64 },
    #[error("proof index {index} is out of range for proof of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Errors produced by the history commitment provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("origin heights {got} exceed the maximum of {max} for {levels} challenge levels")]
    TooManyOriginHeights { got: usize, max: usize, levels: usize },
    #[error("challenge level {0} has no configured leaf height")]
    UnknownLevel(usize),
    #[error("up to height {up_to} exceeds the leaf height {leaf_height} of level {level}")]
    UpToHeightTooLarge {
        up_to: Height,
        leaf_height: Height,
        level: usize,
    },
    #[error("prefix height {0} overflows the prefix size")]
    PrefixHeightOverflow(Height),
    #[error("machine start index overflowed")]
    MachineIndexOverflow,
    #[error("one step proof data requires at least one start height")]
    MissingStartHeights,
    #[error("collector returned no hashes")]
    NoHashesCollected,
}

/// Errors produced by the royal challenge tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("edge {0} is not tracked in the royal tree")]
    NotTracked(EdgeId),
    #[error("edge {0} is not an essential edge")]
    NotEssential(EdgeId),
    #[error("ancestor {ancestor} not found in the ancestry of {child}")]
    AncestorNotFound { child: EdgeId, ancestor: EdgeId },
    #[error("children of edge {0} have not been seen yet")]
    ChildrenNotYetSeen(EdgeId),
    #[error("no royal block challenge root edge")]
    NoBlockChallengeRoot,
}
