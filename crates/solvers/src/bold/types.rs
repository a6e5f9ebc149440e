//! The types module contains the identifiers, edge snapshots and commitment types shared by
//! every component of the BOLD challenge game.

use anyhow::{anyhow, Result};
use ethers::{
    abi::{self, Token},
    types::{Bytes, H256, U256},
    utils::keccak256,
};
use serde::{Deserialize, Serialize};
use std::{fmt, ops::Deref};

/// A height within a history commitment. Heights at the block challenge level are L2 message
/// indices, heights at deeper levels are machine opcode indices.
pub type Height = u64;

/// Defines a 32 byte identifier newtype over [H256].
macro_rules! define_hash_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub H256);

        impl $name {
            /// Returns the first four bytes of the identifier as a `0x` prefixed hex string,
            /// for use in log lines.
            pub fn trunc(&self) -> String {
                trunc(&self.0)
            }
        }

        impl From<H256> for $name {
            fn from(hash: H256) -> Self {
                Self(hash)
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(H256(bytes))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }
    };
}

define_hash_id!(EdgeId, "The unique identifier of an edge.");
define_hash_id!(
    OriginId,
    "Identifies the range an edge subdivides. Level zero block edges originate from the parent \
     assertion hash, deeper level zero edges from the mutual id of the edge they claim."
);
define_hash_id!(
    MutualId,
    "Shared by all rivals: same level, origin, start height, start root and end height."
);
define_hash_id!(
    ClaimId,
    "The edge (or, at the block level, the assertion) that a level zero edge claims."
);
define_hash_id!(AssertionHash, "The hash of an assertion posted to the rollup.");

/// Truncates a hash to its first four bytes for display.
pub fn trunc(hash: &H256) -> String {
    let b = hash.as_bytes();
    format!("0x{:02x}{:02x}{:02x}{:02x}", b[0], b[1], b[2], b[3])
}

/// A challenge level. Level 0 is the block challenge level, every deeper level bisects over
/// machine opcodes at a finer granularity. The deepest level is the small step level.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ChallengeLevel(pub u8);

impl ChallengeLevel {
    /// The block challenge level.
    pub const BLOCK: Self = Self(0);

    /// Returns true if this is the block challenge level.
    pub fn is_block_level(&self) -> bool {
        self.0 == 0
    }

    /// Returns the next, finer, challenge level.
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns the level as an index into per level tables.
    pub fn as_index(&self) -> usize {
        self.0 as usize
    }
}

impl From<u8> for ChallengeLevel {
    fn from(level: u8) -> Self {
        Self(level)
    }
}

impl fmt::Display for ChallengeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_block_level() {
            write!(f, "block_challenge_edge")
        } else {
            write!(f, "challenge_level_{}_edge", self.0)
        }
    }
}

/// The [EdgeStatus] enum mirrors the on-chain status of an edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EdgeStatus {
    /// The edge has not been confirmed yet.
    #[default]
    Pending = 0,
    /// The edge has been confirmed by time, one step proof or its children.
    Confirmed = 1,
}

impl TryFrom<u8> for EdgeStatus {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EdgeStatus::Pending),
            1 => Ok(EdgeStatus::Confirmed),
            _ => Err(anyhow!("Invalid edge status {}", value)),
        }
    }
}

impl fmt::Display for EdgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeStatus::Pending => write!(f, "pending"),
            EdgeStatus::Confirmed => write!(f, "confirmed"),
        }
    }
}

/// A snapshot of an edge as read from the challenge manager contract.
///
/// Dynamic attributes such as rivalry and timers are not part of the snapshot and must be read
/// from chain when they are needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub level: ChallengeLevel,
    pub origin_id: OriginId,
    pub mutual_id: MutualId,
    /// Set only on level zero edges.
    pub claim_id: Option<ClaimId>,
    pub start_height: Height,
    pub start_root: H256,
    pub end_height: Height,
    pub end_root: H256,
    pub lower_child: Option<EdgeId>,
    pub upper_child: Option<EdgeId>,
    pub created_at_block: u64,
    pub confirmed_at_block: Option<u64>,
    pub status: EdgeStatus,
    /// The parent assertion whose children are being challenged.
    pub assertion_hash: AssertionHash,
    /// `num_big_steps + 2`.
    pub total_challenge_levels: u8,
}

impl Edge {
    /// Returns the number of heights the edge spans.
    pub fn length(&self) -> u64 {
        self.end_height.saturating_sub(self.start_height)
    }

    /// Returns true if the edge has been confirmed on-chain.
    pub fn is_confirmed(&self) -> bool {
        self.status == EdgeStatus::Confirmed
    }

    /// Returns true if the edge lives on the deepest challenge level.
    pub fn is_at_deepest_level(&self) -> bool {
        self.level.0.saturating_add(1) == self.total_challenge_levels
    }

    /// Returns true if the edge spans a single step at the deepest challenge level, which makes
    /// it resolvable by a one step proof.
    pub fn is_one_step_proof_edge(&self) -> bool {
        self.is_at_deepest_level() && self.length() == 1
    }

    /// Returns both children if the edge has been bisected.
    pub fn children(&self) -> Option<(EdgeId, EdgeId)> {
        self.lower_child.zip(self.upper_child)
    }

    /// Returns the `(start_height, start_root)` pair.
    pub fn start_commitment(&self) -> (Height, H256) {
        (self.start_height, self.start_root)
    }

    /// Returns the `(end_height, end_root)` pair.
    pub fn end_commitment(&self) -> (Height, H256) {
        (self.end_height, self.end_root)
    }
}

/// Computes the id of an edge the same way the challenge manager contract does:
/// `keccak256(mutualId ‖ endRoot)`, where the mutual id is itself a hash of the shared part.
pub fn compute_edge_id(
    level: ChallengeLevel,
    origin_id: OriginId,
    start_height: Height,
    start_root: H256,
    end_height: Height,
    end_root: H256,
) -> EdgeId {
    let mutual_id = compute_mutual_id(level, origin_id, start_height, start_root, end_height);
    let mut packed = Vec::with_capacity(64);
    packed.extend_from_slice(mutual_id.0.as_bytes());
    packed.extend_from_slice(end_root.as_bytes());
    EdgeId(H256(keccak256(packed)))
}

/// Computes the mutual id shared by all rivals of an edge.
pub fn compute_mutual_id(
    level: ChallengeLevel,
    origin_id: OriginId,
    start_height: Height,
    start_root: H256,
    end_height: Height,
) -> MutualId {
    MutualId(H256(keccak256(mutual_preimage(
        level,
        origin_id,
        start_height,
        start_root,
        end_height,
    ))))
}

fn mutual_preimage(
    level: ChallengeLevel,
    origin_id: OriginId,
    start_height: Height,
    start_root: H256,
    end_height: Height,
) -> Vec<u8> {
    let mut packed = Vec::with_capacity(1 + 32 * 5);
    packed.push(level.0);
    packed.extend_from_slice(origin_id.0.as_bytes());
    packed.extend_from_slice(&u256_bytes(start_height));
    packed.extend_from_slice(start_root.as_bytes());
    packed.extend_from_slice(&u256_bytes(end_height));
    packed
}

fn u256_bytes(value: u64) -> [u8; 32] {
    let mut out = [0u8; 32];
    U256::from(value).to_big_endian(&mut out);
    out
}

/// An edge that the local validator agrees with. Only a [RoyalEdge] can be handed to an edge
/// tracker or inserted into a royal challenge tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoyalEdge(Edge);

impl RoyalEdge {
    /// Tags an edge as royal. Callers must have verified the edge's history commitments
    /// against the local state provider, or created the edge themselves.
    pub fn assume_royal(edge: Edge) -> Self {
        Self(edge)
    }

    /// Returns the inner [Edge].
    pub fn into_inner(self) -> Edge {
        self.0
    }
}

impl Deref for RoyalEdge {
    type Target = Edge;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// An edge observed on chain, tagged by whether the local validator agrees with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedEdge {
    /// An edge that has not been verified, or that disagrees with local state.
    Unverified(Edge),
    /// An edge that agrees with local state.
    VerifiedRoyal(RoyalEdge),
}

impl ObservedEdge {
    /// Returns the underlying edge snapshot regardless of the tag.
    pub fn edge(&self) -> &Edge {
        match self {
            ObservedEdge::Unverified(edge) => edge,
            ObservedEdge::VerifiedRoyal(edge) => edge,
        }
    }

    /// Returns the royal edge, if the observation was verified.
    pub fn royal(&self) -> Option<&RoyalEdge> {
        match self {
            ObservedEdge::VerifiedRoyal(edge) => Some(edge),
            ObservedEdge::Unverified(_) => None,
        }
    }
}

/// A Merkle commitment to `height + 1` virtual leaves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryCommitment {
    pub height: Height,
    pub merkle_root: H256,
    pub first_leaf: H256,
    pub last_leaf: H256,
    /// Inclusion proof of the last virtual leaf against `merkle_root`.
    pub last_leaf_proof: Vec<H256>,
}

/// The rollup global state, as committed to by assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlobalState {
    pub block_hash: H256,
    pub send_root: H256,
    pub batch: u64,
    pub pos_in_batch: u64,
}

impl GlobalState {
    /// Hashes the global state the way the rollup contracts do.
    pub fn hash(&self) -> H256 {
        let mut packed = b"Global state:".to_vec();
        packed.extend_from_slice(self.block_hash.as_bytes());
        packed.extend_from_slice(self.send_root.as_bytes());
        packed.extend_from_slice(&self.batch.to_be_bytes());
        packed.extend_from_slice(&self.pos_in_batch.to_be_bytes());
        H256(keccak256(packed))
    }

    /// Returns the `((bytes32[2],uint64[2]))` ABI token for the global state.
    pub fn to_token(&self) -> Token {
        Token::Tuple(vec![
            Token::FixedArray(vec![
                Token::FixedBytes(self.block_hash.as_bytes().to_vec()),
                Token::FixedBytes(self.send_root.as_bytes().to_vec()),
            ]),
            Token::FixedArray(vec![
                Token::Uint(U256::from(self.batch)),
                Token::Uint(U256::from(self.pos_in_batch)),
            ]),
        ])
    }
}

/// The machine status recorded in an execution state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MachineStatus {
    #[default]
    Running = 0,
    Finished = 1,
    Errored = 2,
}

impl TryFrom<u8> for MachineStatus {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MachineStatus::Running),
            1 => Ok(MachineStatus::Finished),
            2 => Ok(MachineStatus::Errored),
            _ => Err(anyhow!("Invalid machine status {}", value)),
        }
    }
}

/// A global state together with the machine status reached after executing up to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionState {
    pub global_state: GlobalState,
    pub machine_status: MachineStatus,
}

impl ExecutionState {
    /// Returns the `(((bytes32[2],uint64[2]),uint8))` ABI token for the execution state.
    pub fn to_token(&self) -> Token {
        Token::Tuple(vec![
            self.global_state.to_token(),
            Token::Uint(U256::from(self.machine_status as u8)),
        ])
    }
}

/// The fixed context all history commitments of one block challenge are computed against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssociatedAssertionMetadata {
    /// The after state of the challenged parent assertion.
    pub from_state: GlobalState,
    /// The batch count the claimed assertion must reach.
    pub batch_limit: u64,
    pub wasm_module_root: H256,
    pub claimed_assertion_hash: AssertionHash,
}

/// The data required to confirm a single step edge with a one step proof.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OneStepData {
    pub before_hash: H256,
    pub after_hash: H256,
    pub proof: Bytes,
}

impl OneStepData {
    /// ABI encodes the `(bytes32 beforeHash, bytes proof)` pair submitted on-chain.
    pub fn to_token(&self) -> Token {
        Token::Tuple(vec![
            Token::FixedBytes(self.before_hash.as_bytes().to_vec()),
            Token::Bytes(self.proof.to_vec()),
        ])
    }
}

/// ABI encodes a list of hashes as a `bytes32[]` token.
pub fn hashes_token(hashes: &[H256]) -> Token {
    Token::Array(
        hashes
            .iter()
            .map(|h| Token::FixedBytes(h.as_bytes().to_vec()))
            .collect(),
    )
}

/// ABI encodes the proof attached to a sub challenge level zero edge:
/// `(bytes32 startLeaf, bytes32 endLeaf, bytes32[] startParentProof, bytes32[] endParentProof,
/// bytes32[] endLeafProof)`.
pub fn encode_sub_challenge_proof(
    start: &HistoryCommitment,
    end: &HistoryCommitment,
    start_parent: &HistoryCommitment,
    end_parent: &HistoryCommitment,
) -> Bytes {
    abi::encode(&[
        Token::FixedBytes(start.first_leaf.as_bytes().to_vec()),
        Token::FixedBytes(end.last_leaf.as_bytes().to_vec()),
        hashes_token(&start_parent.last_leaf_proof),
        hashes_token(&end_parent.last_leaf_proof),
        hashes_token(&end.last_leaf_proof),
    ])
    .into()
}

#[cfg(test)]
mod test {
    use super::*;

    fn edge(level: u8, total: u8, start: u64, end: u64) -> Edge {
        Edge {
            id: EdgeId::default(),
            level: ChallengeLevel(level),
            origin_id: OriginId::default(),
            mutual_id: MutualId::default(),
            claim_id: None,
            start_height: start,
            start_root: H256::zero(),
            end_height: end,
            end_root: H256::zero(),
            lower_child: None,
            upper_child: None,
            created_at_block: 0,
            confirmed_at_block: None,
            status: EdgeStatus::Pending,
            assertion_hash: AssertionHash::default(),
            total_challenge_levels: total,
        }
    }

    #[test]
    fn one_step_proof_edges_live_at_the_deepest_level() {
        assert!(edge(2, 3, 4, 5).is_one_step_proof_edge());
        assert!(!edge(1, 3, 4, 5).is_one_step_proof_edge());
        assert!(!edge(2, 3, 4, 6).is_one_step_proof_edge());
    }

    #[test]
    fn challenge_level_display() {
        assert_eq!(ChallengeLevel(0).to_string(), "block_challenge_edge");
        assert_eq!(ChallengeLevel(2).to_string(), "challenge_level_2_edge");
    }

    #[test]
    fn edge_and_mutual_ids_share_a_prefix() {
        let origin = OriginId(H256::repeat_byte(1));
        let start_root = H256::repeat_byte(2);
        let a = compute_edge_id(
            ChallengeLevel(1),
            origin,
            0,
            start_root,
            16,
            H256::repeat_byte(3),
        );
        let b = compute_edge_id(
            ChallengeLevel(1),
            origin,
            0,
            start_root,
            16,
            H256::repeat_byte(4),
        );
        assert_ne!(a, b);

        let mutual = compute_mutual_id(ChallengeLevel(1), origin, 0, start_root, 16);
        let mut preimage = vec![1u8];
        preimage.extend_from_slice(origin.0.as_bytes());
        preimage.extend_from_slice(&u256_bytes(0));
        preimage.extend_from_slice(start_root.as_bytes());
        preimage.extend_from_slice(&u256_bytes(16));
        assert_eq!(mutual.0, H256(keccak256(preimage)));
    }

    #[test]
    fn edge_id_hashes_the_mutual_id_with_the_end_root() {
        let origin = OriginId(H256::repeat_byte(1));
        let start_root = H256::repeat_byte(2);
        let end_root = H256::repeat_byte(3);
        let id = compute_edge_id(ChallengeLevel::BLOCK, origin, 0, start_root, 32, end_root);
        let mutual = compute_mutual_id(ChallengeLevel::BLOCK, origin, 0, start_root, 32);

        let mut preimage = mutual.0.as_bytes().to_vec();
        preimage.extend_from_slice(end_root.as_bytes());
        assert_eq!(id.0, H256(keccak256(preimage)));

        let mut flat = vec![0u8];
        flat.extend_from_slice(origin.0.as_bytes());
        flat.extend_from_slice(&u256_bytes(0));
        flat.extend_from_slice(start_root.as_bytes());
        flat.extend_from_slice(&u256_bytes(32));
        flat.extend_from_slice(end_root.as_bytes());
        assert_ne!(id.0, H256(keccak256(flat)));
    }

    #[test]
    fn edge_status_try_from() {
        assert_eq!(EdgeStatus::try_from(1).unwrap(), EdgeStatus::Confirmed);
        assert!(EdgeStatus::try_from(2).is_err());
    }

    #[test]
    fn trunc_is_four_bytes() {
        let id = EdgeId(H256::repeat_byte(0xab));
        assert_eq!(id.trunc(), "0xabababab");
    }
}
