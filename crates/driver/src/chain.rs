//! The `chain` module defines the narrow on-chain surface the challenge agent depends on: the
//! rollup's assertion chain and the edge challenge manager. [crate::eth] implements both over
//! `ethers` bindings.

use crate::types::AssertionStatus;
use anyhow::Result;
use async_trait::async_trait;
use bold_challenger_solvers::bold::{
    AssertionHash, Edge, EdgeId, ExecutionState, Height, HistoryCommitment, OneStepProofData,
};
use ethers::{
    abi::Token,
    types::{Address, Bytes, H256, U256},
};
use std::{sync::Arc, time::Duration};

/// Typed failures of chain calls that callers match on.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// The cached inherited timer on-chain is already at least the value being written.
    #[error("CachedTimeSufficient: on-chain cached timer is already sufficient")]
    CachedTimeSufficient,
    /// An edge the caller expected to exist was not found.
    #[error("no edge found with id {0}")]
    EdgeNotFound(EdgeId),
    /// The `AssertionCreated` event of an assertion could not be located.
    #[error("no AssertionCreated event found for assertion {0}")]
    AssertionNotFound(AssertionHash),
    /// A transaction was dropped without producing a receipt.
    #[error("transaction {0:#x} produced no receipt")]
    NoReceipt(H256),
}

/// The receipt of a mined transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: H256,
    pub block_number: u64,
}

/// The layer zero edge heights of every challenge level kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerZeroHeights {
    pub block_challenge_height: Height,
    pub big_step_challenge_height: Height,
    pub small_step_challenge_height: Height,
}

impl LayerZeroHeights {
    /// Returns the leaf height of every challenge level, block level first.
    pub fn challenge_leaf_heights(&self, num_big_steps: u8) -> Vec<Height> {
        let mut heights = vec![self.block_challenge_height];
        heights.extend(std::iter::repeat(self.big_step_challenge_height).take(num_big_steps as usize));
        heights.push(self.small_step_challenge_height);
        heights
    }
}

/// Everything the agent needs to know about an assertion, read from its `AssertionCreated`
/// event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssertionCreationInfo {
    pub assertion_hash: AssertionHash,
    pub parent_assertion_hash: AssertionHash,
    pub before_state: ExecutionState,
    pub after_state: ExecutionState,
    pub after_end_history_root: H256,
    pub after_inbox_batch_acc: H256,
    pub inbox_max_count: u64,
    pub wasm_module_root: H256,
    pub required_stake: U256,
    pub challenge_manager: Address,
    pub confirm_period_blocks: u64,
    /// The parent chain block the assertion was created in.
    pub creation_parent_block: u64,
}

impl AssertionCreationInfo {
    /// Returns the `(bytes32,uint256,address,uint64,uint64)` config token this assertion
    /// imposes on its children.
    pub fn config_token(&self) -> Token {
        Token::Tuple(vec![
            Token::FixedBytes(self.wasm_module_root.as_bytes().to_vec()),
            Token::Uint(self.required_stake),
            Token::Address(self.challenge_manager),
            Token::Uint(U256::from(self.confirm_period_blocks)),
            Token::Uint(U256::from(self.inbox_max_count)),
        ])
    }

    /// Returns the `(executionState, prevAssertionHash, inboxAcc)` token the challenge manager
    /// checks an assertion's claims against.
    pub fn execution_state_data_token(&self) -> Token {
        Token::Tuple(vec![
            self.after_state.to_token(),
            Token::FixedBytes(self.parent_assertion_hash.0.as_bytes().to_vec()),
            Token::FixedBytes(self.after_inbox_batch_acc.as_bytes().to_vec()),
        ])
    }
}

/// The rollup's view of assertions.
#[async_trait]
pub trait AssertionChain: Send + Sync {
    /// Returns the edge challenge manager of the rollup.
    fn spec_challenge_manager(&self) -> Arc<dyn SpecChallengeManager>;

    async fn head_block_number(&self) -> Result<u64>;

    /// Returns the latest block considered safe from reorgs.
    async fn safe_block_number(&self) -> Result<u64>;

    async fn latest_confirmed(&self) -> Result<AssertionHash>;

    async fn read_assertion_creation_info(
        &self,
        assertion: AssertionHash,
    ) -> Result<AssertionCreationInfo>;

    async fn assertion_status(&self, assertion: AssertionHash) -> Result<AssertionStatus>;

    /// Returns the parent chain block an assertion was created in.
    async fn assertion_creation_parent_block(&self, assertion: AssertionHash) -> Result<u64>;

    /// Returns true once a child of `challenge_parent` has been confirmed, ending the
    /// challenge on its children.
    async fn is_challenge_complete(&self, challenge_parent: AssertionHash) -> Result<bool>;

    async fn challenge_grace_period_blocks(&self) -> Result<u64>;

    /// Confirms `assertion` as the winner of the challenge decided by `winning_edge`.
    ///
    /// # Returns
    /// * `None` if the assertion was already confirmed, or is the genesis assertion.
    async fn confirm_assertion_by_challenge_winner(
        &self,
        assertion: AssertionHash,
        winning_edge: EdgeId,
    ) -> Result<Option<TxReceipt>>;

    /// Returns the receipt of a transaction, or `None` if it is not mined.
    async fn transaction_receipt(&self, tx_hash: H256) -> Result<Option<TxReceipt>>;

    /// Polls for the receipt of a transaction every `poll` until it is mined.
    async fn wait_mined(&self, tx_hash: H256, poll: Duration) -> Result<TxReceipt> {
        loop {
            if let Some(receipt) = self.transaction_receipt(tx_hash).await? {
                return Ok(receipt);
            }
            tokio::time::sleep(poll).await;
        }
    }
}

/// The edge challenge manager contract.
#[async_trait]
pub trait SpecChallengeManager: Send + Sync {
    /// Returns the number of blocks an essential edge must accumulate to be confirmed.
    fn challenge_period_blocks(&self) -> u64;

    fn layer_zero_heights(&self) -> LayerZeroHeights;

    fn num_big_steps(&self) -> u8;

    /// Returns the number of challenge levels: the block level, every big step level and the
    /// small step level.
    fn total_challenge_levels(&self) -> u8 {
        self.num_big_steps() + 2
    }

    async fn get_edge(&self, id: EdgeId) -> Result<Option<Edge>>;

    async fn has_rival(&self, id: EdgeId) -> Result<bool>;

    /// Returns true if the edge has length one and a rival.
    async fn has_length_one_rival(&self, id: EdgeId) -> Result<bool>;

    async fn time_unrivaled(&self, id: EdgeId) -> Result<u64>;

    /// Returns the cached inherited timer of an edge.
    async fn inherited_timer(&self, id: EdgeId) -> Result<u64>;

    /// Opens the block challenge on the children of `parent` by claiming `claimed`. Returns the
    /// existing edge if it was already created.
    async fn add_block_challenge_level_zero_edge(
        &self,
        claimed: &AssertionCreationInfo,
        parent: &AssertionCreationInfo,
        start: &HistoryCommitment,
        end: &HistoryCommitment,
        prefix_proof: Bytes,
    ) -> Result<Edge>;

    /// Opens a sub challenge on the length one edge `challenged`. Returns the existing edge if
    /// it was already created.
    async fn add_sub_challenge_level_zero_edge(
        &self,
        challenged: &Edge,
        start: &HistoryCommitment,
        end: &HistoryCommitment,
        start_parent: &HistoryCommitment,
        end_parent: &HistoryCommitment,
        prefix_proof: Bytes,
    ) -> Result<Edge>;

    /// Bisects `edge` at the history root `bisection_root`. Returns the existing children if
    /// the edge was already bisected.
    async fn bisect(
        &self,
        edge: &Edge,
        bisection_root: H256,
        prefix_proof: Bytes,
    ) -> Result<(Edge, Edge)>;

    /// Confirms a length one edge at the deepest level with a one step proof. `prev` is the
    /// challenged assertion, whose config the proof executes under.
    async fn confirm_edge_by_one_step_proof(
        &self,
        edge: EdgeId,
        osp: &OneStepProofData,
        prev: &AssertionCreationInfo,
    ) -> Result<TxReceipt>;

    /// Refreshes the cached inherited timer of every edge in `branch`, leaf first, capping the
    /// timer of the last edge at `desired_timer`. Fails with [ChainError::CachedTimeSufficient]
    /// when the cached timer of the last edge is already at least `desired_timer`.
    async fn multi_update_inherited_timers(
        &self,
        branch: &[EdgeId],
        desired_timer: u64,
    ) -> Result<TxReceipt>;

    /// Confirms an essential edge by its cached inherited timer. Block level edges must pass
    /// the creation info of the assertion they claim.
    async fn confirm_edge_by_time(
        &self,
        edge: EdgeId,
        claim_state: Option<&AssertionCreationInfo>,
    ) -> Result<TxReceipt>;

    async fn edge_added_events(&self, from_block: u64, to_block: u64) -> Result<Vec<EdgeId>>;

    async fn edge_confirmed_by_one_step_proof_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EdgeId>>;

    async fn edge_confirmed_by_time_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EdgeId>>;
}

/// Returns true if `err` is, or wraps, [ChainError::CachedTimeSufficient].
pub fn is_cached_time_sufficient(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<ChainError>(),
            Some(ChainError::CachedTimeSufficient)
        )
    })
}
