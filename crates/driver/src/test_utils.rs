//! An in-memory [AssertionChain] and [SpecChallengeManager] for the driver tests.
//!
//! The mock holds three assertions: a confirmed genesis assertion and two rival children, one
//! honest and one evil. Edges follow the contract's id, rivalry and bisection rules. Transactions
//! are mined instantly in the current head block.

use crate::{
    chain::{
        AssertionChain, AssertionCreationInfo, ChainError, LayerZeroHeights, SpecChallengeManager,
        TxReceipt,
    },
    config::DriverConfig,
    metrics::CountingMetrics,
    retry::RetryStrategy,
    types::AssertionStatus,
    Manager,
};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bold_challenger_solvers::bold::{
    bisection_point, compute_edge_id, compute_mutual_id, AlphabetProvider, AssertionHash,
    AssociatedAssertionMetadata, ChallengeLevel, ClaimId, Edge, EdgeId, EdgeStatus, Height,
    HistoryCommitment, HistoryCommitmentProvider, HistoryCommitmentRequest, L2StateProvider,
    OneStepProofData, OriginId,
};
use ethers::types::{Bytes, H256};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    ops::Deref,
    sync::Arc,
};
use tokio_util::sync::CancellationToken;

pub(crate) const LEAF_HEIGHT: Height = 4;
pub(crate) const CHALLENGE_PERIOD: u64 = 10;
pub(crate) const CONFIRM_PERIOD: u64 = 5;
pub(crate) const INBOX_MAX_COUNT: u64 = 100;
pub(crate) const TOTAL_LEVELS: u8 = 3;

pub(crate) fn genesis() -> AssertionHash {
    AssertionHash(H256::repeat_byte(0x01))
}

pub(crate) fn honest_assertion() -> AssertionHash {
    AssertionHash(H256::repeat_byte(0x0a))
}

pub(crate) fn evil_assertion() -> AssertionHash {
    AssertionHash(H256::repeat_byte(0x0b))
}

/// Builds a history commitment provider over an alphabet trace with three levels of height 4.
pub(crate) fn provider(trace: &[u8]) -> Arc<HistoryCommitmentProvider> {
    let alphabet = Arc::new(AlphabetProvider::new(trace.to_vec().into()));
    Arc::new(HistoryCommitmentProvider::new(
        alphabet.clone(),
        alphabet.clone(),
        alphabet.clone(),
        alphabet,
        vec![LEAF_HEIGHT; TOTAL_LEVELS as usize],
    ))
}

pub(crate) fn honest_provider() -> Arc<HistoryCommitmentProvider> {
    provider(b"abcd")
}

pub(crate) fn evil_provider() -> Arc<HistoryCommitmentProvider> {
    provider(b"abXd")
}

#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub head: u64,
    pub safe: Option<u64>,
    pub edges: HashMap<EdgeId, Edge>,
    pub inherited: HashMap<EdgeId, u64>,
    pub confirmed_by_osp: HashSet<EdgeId>,
    pub assertions: HashMap<AssertionHash, (AssertionCreationInfo, AssertionStatus)>,
    pub latest_confirmed: AssertionHash,
    pub cached_time_sufficient: bool,
    pub grace_period: u64,
    pub receipts: HashMap<H256, u64>,
    /// The name of every write, in order.
    pub calls: Vec<&'static str>,
}

impl MockState {
    fn receipt(&mut self, call: &'static str) -> TxReceipt {
        self.calls.push(call);
        let tx_hash = H256::from_low_u64_be(self.receipts.len() as u64 + 1);
        self.receipts.insert(tx_hash, self.head);
        TxReceipt {
            tx_hash,
            block_number: self.head,
        }
    }

    fn has_rival(&self, edge: &Edge) -> bool {
        self.edges
            .values()
            .any(|other| other.mutual_id == edge.mutual_id && other.id != edge.id)
    }

    /// Inserts an edge unless one with the same id exists, returning the stored edge.
    fn create_edge(
        &mut self,
        level: ChallengeLevel,
        origin_id: OriginId,
        start: (Height, H256),
        end: (Height, H256),
        claim_id: Option<ClaimId>,
        assertion_hash: AssertionHash,
    ) -> Edge {
        let id = compute_edge_id(level, origin_id, start.0, start.1, end.0, end.1);
        let head = self.head;
        self.edges
            .entry(id)
            .or_insert_with(|| Edge {
                id,
                level,
                origin_id,
                mutual_id: compute_mutual_id(level, origin_id, start.0, start.1, end.0),
                claim_id,
                start_height: start.0,
                start_root: start.1,
                end_height: end.0,
                end_root: end.1,
                lower_child: None,
                upper_child: None,
                created_at_block: head,
                confirmed_at_block: None,
                status: EdgeStatus::Pending,
                assertion_hash,
                total_challenge_levels: TOTAL_LEVELS,
            })
            .clone()
    }

    fn confirm(&mut self, id: EdgeId) -> Result<()> {
        let head = self.head;
        let edge = self
            .edges
            .get_mut(&id)
            .ok_or(ChainError::EdgeNotFound(id))?;
        if edge.is_confirmed() {
            bail!("edge {} is already confirmed", id);
        }
        edge.status = EdgeStatus::Confirmed;
        edge.confirmed_at_block = Some(head);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockChallengeManager {
    pub state: Mutex<MockState>,
}

/// The in-memory chain. Dereferences to its challenge manager, which holds all state.
#[derive(Debug, Clone)]
pub(crate) struct MockChain(pub Arc<MockChallengeManager>);

impl Deref for MockChain {
    type Target = MockChallengeManager;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

fn assertion_info(
    hash: AssertionHash,
    parent: AssertionHash,
    creation_parent_block: u64,
) -> AssertionCreationInfo {
    AssertionCreationInfo {
        assertion_hash: hash,
        parent_assertion_hash: parent,
        inbox_max_count: INBOX_MAX_COUNT,
        wasm_module_root: H256::repeat_byte(0xaa),
        confirm_period_blocks: CONFIRM_PERIOD,
        creation_parent_block,
        ..Default::default()
    }
}

impl MockChain {
    pub(crate) fn new() -> Self {
        let mut state = MockState {
            head: 10,
            latest_confirmed: genesis(),
            ..Default::default()
        };
        state.assertions.insert(
            genesis(),
            (
                assertion_info(genesis(), AssertionHash::default(), 1),
                AssertionStatus::Confirmed,
            ),
        );
        for child in [honest_assertion(), evil_assertion()] {
            state.assertions.insert(
                child,
                (
                    assertion_info(child, genesis(), 2),
                    AssertionStatus::Pending,
                ),
            );
        }
        Self(Arc::new(MockChallengeManager {
            state: Mutex::new(state),
        }))
    }

    pub(crate) fn mine(&self, blocks: u64) {
        self.state.lock().head += blocks;
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.state.lock().calls.clone()
    }

    pub(crate) fn edge(&self, id: EdgeId) -> Edge {
        self.state.lock().edges[&id].clone()
    }

    /// Inserts an edge in the challenge on the children of genesis without a transaction.
    pub(crate) fn post_edge(
        &self,
        level: ChallengeLevel,
        origin_id: OriginId,
        start: (Height, H256),
        end: (Height, H256),
        claim_id: Option<ClaimId>,
    ) -> Edge {
        self.state
            .lock()
            .create_edge(level, origin_id, start, end, claim_id, genesis())
    }
}

/// Returns the metadata of the challenge on the children of genesis claiming `claimed`.
pub(crate) fn metadata(claimed: AssertionHash) -> AssociatedAssertionMetadata {
    let info = assertion_info(genesis(), AssertionHash::default(), 1);
    AssociatedAssertionMetadata {
        from_state: info.after_state.global_state,
        batch_limit: info.inbox_max_count,
        wasm_module_root: info.wasm_module_root,
        claimed_assertion_hash: claimed,
    }
}

/// Posts the block challenge level zero edge claiming `claimed`, with commitments computed by
/// `provider`.
pub(crate) async fn post_block_edge(
    chain: &MockChain,
    provider: &dyn L2StateProvider,
    claimed: AssertionHash,
) -> Edge {
    let req = HistoryCommitmentRequest {
        assertion_metadata: metadata(claimed),
        upper_challenge_origin_heights: Vec::new(),
        up_to_height: Some(LEAF_HEIGHT),
    };
    let start = provider.history_commitment(&req.up_to(0)).await.unwrap();
    let end = provider.history_commitment(&req).await.unwrap();
    let prefix_proof = provider.prefix_proof(&req, 0).await.unwrap();
    let claimed_info = chain.read_assertion_creation_info(claimed).await.unwrap();
    let parent_info = chain.read_assertion_creation_info(genesis()).await.unwrap();
    chain
        .add_block_challenge_level_zero_edge(
            &claimed_info,
            &parent_info,
            &start,
            &end,
            prefix_proof,
        )
        .await
        .unwrap()
}

/// A config that never retries and never waits long.
pub(crate) fn test_config() -> DriverConfig {
    DriverConfig::new("test-validator")
        .with_poll_interval(std::time::Duration::from_millis(10))
        .with_average_block_time(std::time::Duration::from_millis(1))
        .with_assertion_confirming_interval(std::time::Duration::from_millis(10))
        .with_new_block_poll_interval(std::time::Duration::from_millis(5))
        .with_retry(RetryStrategy::no_retry())
}

/// Builds a [Manager] over `chain` backed by the honest provider.
pub(crate) fn test_manager(
    chain: &MockChain,
    metrics: Arc<CountingMetrics>,
    cancel: CancellationToken,
) -> Arc<Manager> {
    Manager::new(
        Arc::new(chain.clone()),
        honest_provider(),
        Arc::new(test_config()),
        metrics,
        None,
        cancel,
    )
}

#[async_trait]
impl SpecChallengeManager for MockChallengeManager {
    fn challenge_period_blocks(&self) -> u64 {
        CHALLENGE_PERIOD
    }

    fn layer_zero_heights(&self) -> LayerZeroHeights {
        LayerZeroHeights {
            block_challenge_height: LEAF_HEIGHT,
            big_step_challenge_height: LEAF_HEIGHT,
            small_step_challenge_height: LEAF_HEIGHT,
        }
    }

    fn num_big_steps(&self) -> u8 {
        TOTAL_LEVELS - 2
    }

    async fn get_edge(&self, id: EdgeId) -> Result<Option<Edge>> {
        Ok(self.state.lock().edges.get(&id).cloned())
    }

    async fn has_rival(&self, id: EdgeId) -> Result<bool> {
        let state = self.state.lock();
        let edge = state.edges.get(&id).ok_or(ChainError::EdgeNotFound(id))?;
        Ok(state.has_rival(edge))
    }

    async fn has_length_one_rival(&self, id: EdgeId) -> Result<bool> {
        let state = self.state.lock();
        let edge = state.edges.get(&id).ok_or(ChainError::EdgeNotFound(id))?;
        Ok(edge.length() == 1 && state.has_rival(edge))
    }

    async fn time_unrivaled(&self, id: EdgeId) -> Result<u64> {
        let state = self.state.lock();
        let edge = state.edges.get(&id).ok_or(ChainError::EdgeNotFound(id))?;
        let first_rival = state
            .edges
            .values()
            .filter(|other| other.mutual_id == edge.mutual_id && other.id != edge.id)
            .map(|other| other.created_at_block)
            .min();
        Ok(match first_rival {
            Some(rival) => rival.saturating_sub(edge.created_at_block),
            None => state.head.saturating_sub(edge.created_at_block),
        })
    }

    async fn inherited_timer(&self, id: EdgeId) -> Result<u64> {
        Ok(self.state.lock().inherited.get(&id).copied().unwrap_or_default())
    }

    async fn add_block_challenge_level_zero_edge(
        &self,
        claimed: &AssertionCreationInfo,
        parent: &AssertionCreationInfo,
        start: &HistoryCommitment,
        end: &HistoryCommitment,
        _prefix_proof: Bytes,
    ) -> Result<Edge> {
        let mut state = self.state.lock();
        state.receipt("add_block_challenge_level_zero_edge");
        Ok(state.create_edge(
            ChallengeLevel::BLOCK,
            OriginId(parent.assertion_hash.0),
            (start.height, start.merkle_root),
            (end.height, end.merkle_root),
            Some(ClaimId(claimed.assertion_hash.0)),
            parent.assertion_hash,
        ))
    }

    async fn add_sub_challenge_level_zero_edge(
        &self,
        challenged: &Edge,
        start: &HistoryCommitment,
        end: &HistoryCommitment,
        _start_parent: &HistoryCommitment,
        _end_parent: &HistoryCommitment,
        _prefix_proof: Bytes,
    ) -> Result<Edge> {
        let mut state = self.state.lock();
        state.receipt("add_sub_challenge_level_zero_edge");
        Ok(state.create_edge(
            challenged.level.next(),
            OriginId(challenged.mutual_id.0),
            (start.height, start.merkle_root),
            (end.height, end.merkle_root),
            Some(ClaimId(challenged.id.0)),
            challenged.assertion_hash,
        ))
    }

    async fn bisect(
        &self,
        edge: &Edge,
        bisection_root: H256,
        _prefix_proof: Bytes,
    ) -> Result<(Edge, Edge)> {
        let mut state = self.state.lock();
        let mid = bisection_point(edge.start_height, edge.end_height)?;
        state.receipt("bisect");
        let lower = state.create_edge(
            edge.level,
            edge.origin_id,
            edge.start_commitment(),
            (mid, bisection_root),
            None,
            edge.assertion_hash,
        );
        let upper = state.create_edge(
            edge.level,
            edge.origin_id,
            (mid, bisection_root),
            edge.end_commitment(),
            None,
            edge.assertion_hash,
        );
        let parent = state
            .edges
            .get_mut(&edge.id)
            .ok_or(ChainError::EdgeNotFound(edge.id))?;
        parent.lower_child = Some(lower.id);
        parent.upper_child = Some(upper.id);
        Ok((lower, upper))
    }

    async fn confirm_edge_by_one_step_proof(
        &self,
        edge: EdgeId,
        _osp: &OneStepProofData,
        _prev: &AssertionCreationInfo,
    ) -> Result<TxReceipt> {
        let mut state = self.state.lock();
        let is_osp_edge = state
            .edges
            .get(&edge)
            .is_some_and(|e| e.is_one_step_proof_edge());
        if !is_osp_edge {
            return Err(anyhow!("edge {} cannot be one step proven", edge));
        }
        state.confirm(edge)?;
        state.confirmed_by_osp.insert(edge);
        Ok(state.receipt("confirm_edge_by_one_step_proof"))
    }

    async fn multi_update_inherited_timers(
        &self,
        branch: &[EdgeId],
        desired_timer: u64,
    ) -> Result<TxReceipt> {
        let mut state = self.state.lock();
        if state.cached_time_sufficient {
            state.calls.push("multi_update_inherited_timers");
            return Err(ChainError::CachedTimeSufficient.into());
        }
        for id in branch {
            let timer = state.inherited.entry(*id).or_default();
            *timer = (*timer).max(desired_timer);
        }
        Ok(state.receipt("multi_update_inherited_timers"))
    }

    async fn confirm_edge_by_time(
        &self,
        edge: EdgeId,
        _claim_state: Option<&AssertionCreationInfo>,
    ) -> Result<TxReceipt> {
        let mut state = self.state.lock();
        let timer = state.inherited.get(&edge).copied().unwrap_or_default();
        if timer < CHALLENGE_PERIOD {
            bail!("inherited timer {} below challenge period", timer);
        }
        state.confirm(edge)?;
        Ok(state.receipt("confirm_edge_by_time"))
    }

    async fn edge_added_events(&self, from_block: u64, to_block: u64) -> Result<Vec<EdgeId>> {
        let state = self.state.lock();
        let mut edges: Vec<&Edge> = state
            .edges
            .values()
            .filter(|e| (from_block..=to_block).contains(&e.created_at_block))
            .collect();
        edges.sort_by_key(|e| (e.created_at_block, e.level, e.start_height, e.end_height));
        Ok(edges.into_iter().map(|e| e.id).collect())
    }

    async fn edge_confirmed_by_one_step_proof_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EdgeId>> {
        let state = self.state.lock();
        Ok(state
            .edges
            .values()
            .filter(|e| state.confirmed_by_osp.contains(&e.id))
            .filter(|e| e.confirmed_at_block.is_some_and(|b| (from_block..=to_block).contains(&b)))
            .map(|e| e.id)
            .collect())
    }

    async fn edge_confirmed_by_time_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EdgeId>> {
        let state = self.state.lock();
        Ok(state
            .edges
            .values()
            .filter(|e| !state.confirmed_by_osp.contains(&e.id))
            .filter(|e| e.confirmed_at_block.is_some_and(|b| (from_block..=to_block).contains(&b)))
            .map(|e| e.id)
            .collect())
    }
}

#[async_trait]
impl AssertionChain for MockChain {
    fn spec_challenge_manager(&self) -> Arc<dyn SpecChallengeManager> {
        self.0.clone()
    }

    async fn head_block_number(&self) -> Result<u64> {
        Ok(self.state.lock().head)
    }

    async fn safe_block_number(&self) -> Result<u64> {
        let state = self.state.lock();
        Ok(state.safe.unwrap_or(state.head))
    }

    async fn latest_confirmed(&self) -> Result<AssertionHash> {
        Ok(self.state.lock().latest_confirmed)
    }

    async fn read_assertion_creation_info(
        &self,
        assertion: AssertionHash,
    ) -> Result<AssertionCreationInfo> {
        self.state
            .lock()
            .assertions
            .get(&assertion)
            .map(|(info, _)| info.clone())
            .ok_or(ChainError::AssertionNotFound(assertion).into())
    }

    async fn assertion_status(&self, assertion: AssertionHash) -> Result<AssertionStatus> {
        Ok(self
            .state
            .lock()
            .assertions
            .get(&assertion)
            .map(|(_, status)| *status)
            .unwrap_or_default())
    }

    async fn assertion_creation_parent_block(&self, assertion: AssertionHash) -> Result<u64> {
        Ok(self
            .read_assertion_creation_info(assertion)
            .await?
            .creation_parent_block)
    }

    async fn is_challenge_complete(&self, challenge_parent: AssertionHash) -> Result<bool> {
        let state = self.state.lock();
        let confirmed = state
            .assertions
            .get(&challenge_parent)
            .is_some_and(|(_, status)| *status == AssertionStatus::Confirmed);
        Ok(confirmed && state.latest_confirmed != challenge_parent)
    }

    async fn challenge_grace_period_blocks(&self) -> Result<u64> {
        Ok(self.state.lock().grace_period)
    }

    async fn confirm_assertion_by_challenge_winner(
        &self,
        assertion: AssertionHash,
        _winning_edge: EdgeId,
    ) -> Result<Option<TxReceipt>> {
        let mut state = self.state.lock();
        let (info, status) = state
            .assertions
            .get_mut(&assertion)
            .ok_or(ChainError::AssertionNotFound(assertion))?;
        if *status == AssertionStatus::Confirmed || info.parent_assertion_hash.0.is_zero() {
            return Ok(None);
        }
        *status = AssertionStatus::Confirmed;
        state.latest_confirmed = assertion;
        Ok(Some(state.receipt("confirm_assertion_by_challenge_winner")))
    }

    async fn transaction_receipt(&self, tx_hash: H256) -> Result<Option<TxReceipt>> {
        Ok(self
            .state
            .lock()
            .receipts
            .get(&tx_hash)
            .map(|block| TxReceipt {
                tx_hash,
                block_number: *block,
            }))
    }
}
