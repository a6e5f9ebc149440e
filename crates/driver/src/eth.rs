//! The `eth` module implements [AssertionChain] and [SpecChallengeManager] over the `ethers`
//! bindings of the rollup and edge challenge manager contracts.

use crate::{
    bindings::{EdgeChallengeManager, RollupUserLogic},
    chain::{
        AssertionChain, AssertionCreationInfo, ChainError, LayerZeroHeights, SpecChallengeManager,
        TxReceipt,
    },
    types::AssertionStatus,
    utils::{non_zero, u256_to_u64},
};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bold_challenger_solvers::bold::{
    compute_edge_id, compute_mutual_id, encode_sub_challenge_proof, hashes_token, AssertionHash,
    ChallengeLevel, Edge, EdgeId, EdgeStatus, ExecutionState, GlobalState, HistoryCommitment,
    MachineStatus, OneStepProofData, OriginId,
};
use ethers::{
    abi::{self, Detokenize, Event, EventParam, ParamType, RawLog, Token},
    contract::{ContractCall, ContractError},
    providers::Middleware,
    types::{Address, BlockNumber, Bytes, Filter, Log, TransactionReceipt, H256, U256, U64},
};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

/// The raw `ChallengeEdge` struct returned by `getEdge`.
type RawEdge = (
    [u8; 32],
    [u8; 32],
    U256,
    [u8; 32],
    U256,
    [u8; 32],
    [u8; 32],
    [u8; 32],
    Address,
    u64,
    u64,
    u8,
    u8,
    bool,
    u64,
);

/// The [EthChallengeManager] talks to an `EdgeChallengeManager` deployment. The contract's
/// constants are read once on construction.
#[derive(Debug)]
pub struct EthChallengeManager<M> {
    contract: EdgeChallengeManager<M>,
    challenge_period_blocks: u64,
    layer_zero_heights: LayerZeroHeights,
    num_big_steps: u8,
}

impl<M: Middleware + 'static> EthChallengeManager<M> {
    /// Creates a new [EthChallengeManager] for the contract at `address`.
    pub async fn try_new(address: Address, client: Arc<M>) -> Result<Self> {
        let contract = EdgeChallengeManager::new(address, client);
        let challenge_period_blocks = contract.challenge_period_blocks().call().await?;
        let num_big_steps = contract.num_bigstep_level().call().await?;
        let layer_zero_heights = LayerZeroHeights {
            block_challenge_height: u256_to_u64(
                contract.layerzero_blockedge_height().call().await?,
                "block edge height",
            )?,
            big_step_challenge_height: u256_to_u64(
                contract.layerzero_bigstepedge_height().call().await?,
                "big step edge height",
            )?,
            small_step_challenge_height: u256_to_u64(
                contract.layerzero_smallstepedge_height().call().await?,
                "small step edge height",
            )?,
        };
        tracing::info!(target: "eth-chain", "Loaded challenge manager {:?}: period {} blocks, {} big step levels, {:?}", address, challenge_period_blocks, num_big_steps, layer_zero_heights);
        Ok(Self {
            contract,
            challenge_period_blocks,
            layer_zero_heights,
            num_big_steps,
        })
    }

    async fn raw_edge(&self, id: EdgeId) -> Result<RawEdge> {
        Ok(self.contract.get_edge(id.0.to_fixed_bytes()).call().await?)
    }

    async fn created_edge(&self, id: EdgeId) -> Result<Edge> {
        self.get_edge(id)
            .await?
            .ok_or(ChainError::EdgeNotFound(id).into())
    }
}

/// Builds an [Edge] from the raw `getEdge` struct.
fn edge_from_raw(
    id: EdgeId,
    raw: &RawEdge,
    assertion_hash: AssertionHash,
    total_challenge_levels: u8,
) -> Result<Edge> {
    let level = ChallengeLevel(raw.12);
    let origin_id = OriginId(H256(raw.0));
    let start_root = H256(raw.1);
    let start_height = u256_to_u64(raw.2, "edge start height")?;
    let end_height = u256_to_u64(raw.4, "edge end height")?;
    Ok(Edge {
        id,
        level,
        origin_id,
        mutual_id: compute_mutual_id(level, origin_id, start_height, start_root, end_height),
        claim_id: non_zero(raw.7),
        start_height,
        start_root,
        end_height,
        end_root: H256(raw.3),
        lower_child: non_zero(raw.5),
        upper_child: non_zero(raw.6),
        created_at_block: raw.9,
        confirmed_at_block: (raw.10 != 0).then_some(raw.10),
        status: EdgeStatus::try_from(raw.11)?,
        assertion_hash,
        total_challenge_levels,
    })
}

/// Returns the `CreateEdgeArgs` tuple of `createLayerZeroEdge`.
fn create_edge_args(
    level: ChallengeLevel,
    end: &HistoryCommitment,
    claim: H256,
    prefix_proof: Bytes,
    proof: Bytes,
) -> Token {
    Token::Tuple(vec![
        Token::Uint(U256::from(level.0)),
        Token::FixedBytes(end.merkle_root.as_bytes().to_vec()),
        Token::Uint(U256::from(end.height)),
        Token::FixedBytes(claim.as_bytes().to_vec()),
        Token::Bytes(prefix_proof.to_vec()),
        Token::Bytes(proof.to_vec()),
    ])
}

fn bytes32(hash: H256) -> Token {
    Token::FixedBytes(hash.as_bytes().to_vec())
}

/// Returns true if a revert is the challenge manager's `CachedTimeSufficient` error, either by
/// its selector in the revert data or by name in the error message.
fn is_cached_time_sufficient_revert(revert_data: Option<&[u8]>, message: &str) -> bool {
    let selector = ethers::utils::id("CachedTimeSufficient(uint256,uint256)");
    revert_data.is_some_and(|data| data.starts_with(&selector))
        || message.contains("CachedTimeSufficient")
}

fn classify_revert<M: Middleware + 'static>(err: ContractError<M>) -> anyhow::Error {
    let revert = err.as_revert().map(|data| data.to_vec());
    if is_cached_time_sufficient_revert(revert.as_deref(), &err.to_string()) {
        return ChainError::CachedTimeSufficient.into();
    }
    err.into()
}

fn to_receipt(receipt: &TransactionReceipt) -> Option<TxReceipt> {
    receipt.block_number.map(|block| TxReceipt {
        tx_hash: receipt.transaction_hash,
        block_number: block.as_u64(),
    })
}

/// Sends a contract call and waits for it to be mined.
async fn send_call<M, D>(call: ContractCall<M, D>, what: &str) -> Result<TxReceipt>
where
    M: Middleware + 'static,
    D: Detokenize,
{
    let pending = call.send().await.map_err(classify_revert)?;
    let tx_hash = *pending;
    tracing::debug!(target: "eth-chain", "Sent {} in tx {:#x}", what, tx_hash);
    let receipt = pending.await?.ok_or(ChainError::NoReceipt(tx_hash))?;
    if receipt.status == Some(U64::zero()) {
        bail!("{} reverted in tx {:#x}", what, tx_hash);
    }
    to_receipt(&receipt).ok_or(ChainError::NoReceipt(tx_hash).into())
}

#[async_trait]
impl<M: Middleware + 'static> SpecChallengeManager for EthChallengeManager<M> {
    fn challenge_period_blocks(&self) -> u64 {
        self.challenge_period_blocks
    }

    fn layer_zero_heights(&self) -> LayerZeroHeights {
        self.layer_zero_heights
    }

    fn num_big_steps(&self) -> u8 {
        self.num_big_steps
    }

    async fn get_edge(&self, id: EdgeId) -> Result<Option<Edge>> {
        let raw_id = id.0.to_fixed_bytes();
        if !self.contract.edge_exists(raw_id).call().await? {
            return Ok(None);
        }
        let raw = self.raw_edge(id).await?;
        let assertion_hash = AssertionHash(H256(
            self.contract.get_prev_assertion_hash(raw_id).call().await?,
        ));
        edge_from_raw(id, &raw, assertion_hash, self.total_challenge_levels()).map(Some)
    }

    async fn has_rival(&self, id: EdgeId) -> Result<bool> {
        Ok(self.contract.has_rival(id.0.to_fixed_bytes()).call().await?)
    }

    async fn has_length_one_rival(&self, id: EdgeId) -> Result<bool> {
        Ok(self
            .contract
            .has_length_one_rival(id.0.to_fixed_bytes())
            .call()
            .await?)
    }

    async fn time_unrivaled(&self, id: EdgeId) -> Result<u64> {
        let timer = self
            .contract
            .time_unrivaled(id.0.to_fixed_bytes())
            .call()
            .await?;
        u256_to_u64(timer, "time unrivaled")
    }

    async fn inherited_timer(&self, id: EdgeId) -> Result<u64> {
        Ok(self.raw_edge(id).await?.14)
    }

    async fn add_block_challenge_level_zero_edge(
        &self,
        claimed: &AssertionCreationInfo,
        parent: &AssertionCreationInfo,
        start: &HistoryCommitment,
        end: &HistoryCommitment,
        prefix_proof: Bytes,
    ) -> Result<Edge> {
        let id = compute_edge_id(
            ChallengeLevel::BLOCK,
            OriginId(parent.assertion_hash.0),
            start.height,
            start.merkle_root,
            end.height,
            end.merkle_root,
        );
        if let Some(existing) = self.get_edge(id).await? {
            return Ok(existing);
        }
        let expected = self.layer_zero_heights.block_challenge_height;
        if end.height != expected {
            bail!(
                "end commitment has height {} but block edges end at {}",
                end.height,
                expected
            );
        }
        let proof: Bytes = abi::encode(&[
            hashes_token(&end.last_leaf_proof),
            parent.execution_state_data_token(),
            claimed.execution_state_data_token(),
        ])
        .into();
        let args = create_edge_args(
            ChallengeLevel::BLOCK,
            end,
            claimed.assertion_hash.0,
            prefix_proof,
            proof,
        );
        let call = self
            .contract
            .method::<_, H256>("createLayerZeroEdge", (args,))?;
        send_call(call, "createLayerZeroEdge").await?;
        self.created_edge(id).await
    }

    async fn add_sub_challenge_level_zero_edge(
        &self,
        challenged: &Edge,
        start: &HistoryCommitment,
        end: &HistoryCommitment,
        start_parent: &HistoryCommitment,
        end_parent: &HistoryCommitment,
        prefix_proof: Bytes,
    ) -> Result<Edge> {
        let level = challenged.level.next();
        let id = compute_edge_id(
            level,
            OriginId(challenged.mutual_id.0),
            start.height,
            start.merkle_root,
            end.height,
            end.merkle_root,
        );
        if let Some(existing) = self.get_edge(id).await? {
            return Ok(existing);
        }
        let proof = encode_sub_challenge_proof(start, end, start_parent, end_parent);
        let args = create_edge_args(level, end, challenged.id.0, prefix_proof, proof);
        let call = self
            .contract
            .method::<_, H256>("createLayerZeroEdge", (args,))?;
        send_call(call, "createLayerZeroEdge").await?;
        self.created_edge(id).await
    }

    async fn bisect(
        &self,
        edge: &Edge,
        bisection_root: H256,
        prefix_proof: Bytes,
    ) -> Result<(Edge, Edge)> {
        let current = self.created_edge(edge.id).await?;
        if current.children().is_none() {
            let call = self.contract.bisect_edge(
                edge.id.0.to_fixed_bytes(),
                bisection_root.to_fixed_bytes(),
                prefix_proof,
            );
            send_call(call, "bisectEdge").await?;
        }
        let bisected = self.created_edge(edge.id).await?;
        let (lower, upper) = bisected
            .children()
            .ok_or(anyhow!("edge {} has no children after bisection", edge.id))?;
        Ok((
            self.created_edge(lower).await?,
            self.created_edge(upper).await?,
        ))
    }

    async fn confirm_edge_by_one_step_proof(
        &self,
        edge: EdgeId,
        osp: &OneStepProofData,
        prev: &AssertionCreationInfo,
    ) -> Result<TxReceipt> {
        let call = self.contract.method::<_, ()>(
            "confirmEdgeByOneStepProof",
            (
                bytes32(edge.0),
                osp.data.to_token(),
                prev.config_token(),
                hashes_token(&osp.before_inclusion_proof),
                hashes_token(&osp.after_inclusion_proof),
            ),
        )?;
        send_call(call, "confirmEdgeByOneStepProof").await
    }

    async fn multi_update_inherited_timers(
        &self,
        branch: &[EdgeId],
        desired_timer: u64,
    ) -> Result<TxReceipt> {
        let ids = branch.iter().map(|id| id.0.to_fixed_bytes()).collect();
        let call = self
            .contract
            .multi_update_time_cache_by_children(ids, U256::from(desired_timer));
        send_call(call, "multiUpdateTimeCacheByChildren").await
    }

    async fn confirm_edge_by_time(
        &self,
        edge: EdgeId,
        claim_state: Option<&AssertionCreationInfo>,
    ) -> Result<TxReceipt> {
        let claim_state_data = match claim_state {
            Some(info) => info.execution_state_data_token(),
            None => AssertionCreationInfo::default().execution_state_data_token(),
        };
        let call = self
            .contract
            .method::<_, ()>("confirmEdgeByTime", (bytes32(edge.0), claim_state_data))?;
        send_call(call, "confirmEdgeByTime").await
    }

    async fn edge_added_events(&self, from_block: u64, to_block: u64) -> Result<Vec<EdgeId>> {
        let events = self
            .contract
            .edge_added_filter()
            .from_block(from_block)
            .to_block(to_block)
            .query()
            .await?;
        Ok(events.into_iter().map(|e| EdgeId(H256(e.edge_id))).collect())
    }

    async fn edge_confirmed_by_one_step_proof_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EdgeId>> {
        let events = self
            .contract
            .edge_confirmed_by_one_step_proof_filter()
            .from_block(from_block)
            .to_block(to_block)
            .query()
            .await?;
        Ok(events.into_iter().map(|e| EdgeId(H256(e.edge_id))).collect())
    }

    async fn edge_confirmed_by_time_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EdgeId>> {
        let events = self
            .contract
            .edge_confirmed_by_time_filter()
            .from_block(from_block)
            .to_block(to_block)
            .query()
            .await?;
        Ok(events.into_iter().map(|e| EdgeId(H256(e.edge_id))).collect())
    }
}

/// The [EthAssertionChain] talks to a `RollupUserLogic` deployment and its challenge manager.
#[derive(Debug)]
pub struct EthAssertionChain<M> {
    rollup: RollupUserLogic<M>,
    client: Arc<M>,
    challenge_manager: Arc<EthChallengeManager<M>>,
    /// Creation info never changes once an assertion exists.
    creation_info: Mutex<HashMap<AssertionHash, AssertionCreationInfo>>,
    completed_challenges: Mutex<HashSet<AssertionHash>>,
}

impl<M: Middleware + 'static> EthAssertionChain<M> {
    /// Creates a new [EthAssertionChain] for the rollup at `rollup`, loading its challenge
    /// manager.
    pub async fn try_new(rollup: Address, client: Arc<M>) -> Result<Self> {
        let rollup = RollupUserLogic::new(rollup, Arc::clone(&client));
        let manager_address = rollup.challenge_manager().call().await?;
        let challenge_manager =
            EthChallengeManager::try_new(manager_address, Arc::clone(&client)).await?;
        Ok(Self {
            rollup,
            client,
            challenge_manager: Arc::new(challenge_manager),
            creation_info: Mutex::new(HashMap::new()),
            completed_challenges: Mutex::new(HashSet::new()),
        })
    }

    /// Returns `(createdAtBlock, status)` of an assertion.
    async fn assertion_node(&self, assertion: AssertionHash) -> Result<(u64, AssertionStatus)> {
        let node = self
            .rollup
            .get_assertion(assertion.0.to_fixed_bytes())
            .call()
            .await?;
        Ok((node.2, AssertionStatus::try_from(node.4)?))
    }
}

#[async_trait]
impl<M: Middleware + 'static> AssertionChain for EthAssertionChain<M> {
    fn spec_challenge_manager(&self) -> Arc<dyn SpecChallengeManager> {
        self.challenge_manager.clone()
    }

    async fn head_block_number(&self) -> Result<u64> {
        Ok(self.client.get_block_number().await?.as_u64())
    }

    async fn safe_block_number(&self) -> Result<u64> {
        let safe = self
            .client
            .get_block(BlockNumber::Safe)
            .await?
            .and_then(|block| block.number);
        match safe {
            Some(number) => Ok(number.as_u64()),
            None => self.head_block_number().await,
        }
    }

    async fn latest_confirmed(&self) -> Result<AssertionHash> {
        Ok(AssertionHash(H256(
            self.rollup.latest_confirmed().call().await?,
        )))
    }

    async fn read_assertion_creation_info(
        &self,
        assertion: AssertionHash,
    ) -> Result<AssertionCreationInfo> {
        if let Some(info) = self.creation_info.lock().get(&assertion) {
            return Ok(info.clone());
        }
        let block = self.assertion_creation_parent_block(assertion).await?;
        let filter = Filter::new()
            .address(self.rollup.address())
            .topic0(assertion_created_event().signature())
            .topic1(assertion.0)
            .from_block(block)
            .to_block(block);
        let logs = self.client.get_logs(&filter).await?;
        let log = logs
            .first()
            .ok_or(ChainError::AssertionNotFound(assertion))?;
        let info = decode_assertion_created(log)?;
        self.creation_info.lock().insert(assertion, info.clone());
        Ok(info)
    }

    async fn assertion_status(&self, assertion: AssertionHash) -> Result<AssertionStatus> {
        Ok(self.assertion_node(assertion).await?.1)
    }

    async fn assertion_creation_parent_block(&self, assertion: AssertionHash) -> Result<u64> {
        let (created_at, status) = self.assertion_node(assertion).await?;
        if status == AssertionStatus::NoAssertion {
            return Err(ChainError::AssertionNotFound(assertion).into());
        }
        Ok(created_at)
    }

    async fn is_challenge_complete(&self, challenge_parent: AssertionHash) -> Result<bool> {
        if self.completed_challenges.lock().contains(&challenge_parent) {
            return Ok(true);
        }
        if self.assertion_status(challenge_parent).await? != AssertionStatus::Confirmed {
            return Ok(false);
        }
        let complete = self.latest_confirmed().await? != challenge_parent;
        if complete {
            self.completed_challenges.lock().insert(challenge_parent);
        }
        Ok(complete)
    }

    async fn challenge_grace_period_blocks(&self) -> Result<u64> {
        Ok(self.rollup.challenge_grace_period_blocks().call().await?)
    }

    async fn confirm_assertion_by_challenge_winner(
        &self,
        assertion: AssertionHash,
        winning_edge: EdgeId,
    ) -> Result<Option<TxReceipt>> {
        if self.assertion_status(assertion).await? == AssertionStatus::Confirmed {
            return Ok(None);
        }
        let info = self.read_assertion_creation_info(assertion).await?;
        if info.parent_assertion_hash.0.is_zero() {
            return Ok(None);
        }
        let parent = self
            .read_assertion_creation_info(info.parent_assertion_hash)
            .await?;
        let latest_confirmed = self.latest_confirmed().await?;
        if info.parent_assertion_hash != latest_confirmed {
            bail!(
                "parent {} of assertion {} is not the latest confirmed assertion {}",
                info.parent_assertion_hash,
                assertion,
                latest_confirmed
            );
        }
        let confirm_state = Token::Tuple(vec![
            info.after_state.global_state.to_token(),
            Token::Uint(U256::from(info.after_state.machine_status as u8)),
            bytes32(info.after_end_history_root),
        ]);
        let call = self.rollup.method::<_, ()>(
            "confirmAssertion",
            (
                bytes32(assertion.0),
                bytes32(info.parent_assertion_hash.0),
                confirm_state,
                bytes32(winning_edge.0),
                parent.config_token(),
                bytes32(info.after_inbox_batch_acc),
            ),
        )?;
        send_call(call, "confirmAssertion").await.map(Some)
    }

    async fn transaction_receipt(&self, tx_hash: H256) -> Result<Option<TxReceipt>> {
        let receipt = self.client.get_transaction_receipt(tx_hash).await?;
        Ok(receipt.as_ref().and_then(to_receipt))
    }
}

/// Returns the ABI of the rollup's `AssertionCreated` event.
fn assertion_created_event() -> Event {
    let global_state = ParamType::Tuple(vec![
        ParamType::FixedArray(Box::new(ParamType::FixedBytes(32)), 2),
        ParamType::FixedArray(Box::new(ParamType::Uint(64)), 2),
    ]);
    let assertion_state = ParamType::Tuple(vec![
        global_state,
        ParamType::Uint(8),
        ParamType::FixedBytes(32),
    ]);
    let config = ParamType::Tuple(vec![
        ParamType::FixedBytes(32),
        ParamType::Uint(256),
        ParamType::Address,
        ParamType::Uint(64),
        ParamType::Uint(64),
    ]);
    let before_state_data = ParamType::Tuple(vec![
        ParamType::FixedBytes(32),
        ParamType::FixedBytes(32),
        config,
    ]);
    let inputs = ParamType::Tuple(vec![
        before_state_data,
        assertion_state.clone(),
        assertion_state,
    ]);
    let param = |name: &str, kind: ParamType, indexed: bool| EventParam {
        name: name.to_string(),
        kind,
        indexed,
    };
    Event {
        name: "AssertionCreated".to_string(),
        inputs: vec![
            param("assertionHash", ParamType::FixedBytes(32), true),
            param("parentAssertionHash", ParamType::FixedBytes(32), true),
            param("assertion", inputs, false),
            param("afterInboxBatchAcc", ParamType::FixedBytes(32), false),
            param("inboxMaxCount", ParamType::Uint(256), false),
            param("wasmModuleRoot", ParamType::FixedBytes(32), false),
            param("requiredStake", ParamType::Uint(256), false),
            param("challengeManager", ParamType::Address, false),
            param("confirmPeriodBlocks", ParamType::Uint(64), false),
        ],
        anonymous: false,
    }
}

fn token_h256(token: Token) -> Result<H256> {
    match token.into_fixed_bytes() {
        Some(bytes) if bytes.len() == 32 => Ok(H256::from_slice(&bytes)),
        _ => Err(anyhow!("expected a bytes32 token")),
    }
}

fn token_u64(token: Token) -> Result<u64> {
    let value = token.into_uint().ok_or(anyhow!("expected a uint token"))?;
    u256_to_u64(value, "uint token")
}

fn token_parts<const N: usize>(token: Token) -> Result<[Token; N]> {
    let parts = match token {
        Token::Tuple(parts) | Token::FixedArray(parts) => parts,
        _ => bail!("expected a tuple or fixed array token"),
    };
    let len = parts.len();
    <[Token; N]>::try_from(parts).map_err(|_| anyhow!("expected {} components, got {}", N, len))
}

fn token_global_state(token: Token) -> Result<GlobalState> {
    let [bytes_vals, u64_vals] = token_parts::<2>(token)?;
    let [block_hash, send_root] = token_parts::<2>(bytes_vals)?;
    let [batch, pos_in_batch] = token_parts::<2>(u64_vals)?;
    Ok(GlobalState {
        block_hash: token_h256(block_hash)?,
        send_root: token_h256(send_root)?,
        batch: token_u64(batch)?,
        pos_in_batch: token_u64(pos_in_batch)?,
    })
}

/// Decodes an `AssertionState` token into the execution state and its end history root.
fn token_assertion_state(token: Token) -> Result<(ExecutionState, H256)> {
    let [global_state, status, end_history_root] = token_parts::<3>(token)?;
    let status = u8::try_from(token_u64(status)?)?;
    Ok((
        ExecutionState {
            global_state: token_global_state(global_state)?,
            machine_status: MachineStatus::try_from(status)?,
        },
        token_h256(end_history_root)?,
    ))
}

/// Decodes an `AssertionCreated` log.
fn decode_assertion_created(log: &Log) -> Result<AssertionCreationInfo> {
    let parsed = assertion_created_event().parse_log(RawLog {
        topics: log.topics.clone(),
        data: log.data.to_vec(),
    })?;
    let values: Vec<Token> = parsed.params.into_iter().map(|p| p.value).collect();
    let [assertion_hash, parent_assertion_hash, inputs, after_inbox_batch_acc, inbox_max_count, wasm_module_root, required_stake, challenge_manager, confirm_period_blocks] =
        <[Token; 9]>::try_from(values).map_err(|_| anyhow!("malformed AssertionCreated log"))?;
    let [_before_state_data, before_state, after_state] = token_parts::<3>(inputs)?;
    let (before_state, _) = token_assertion_state(before_state)?;
    let (after_state, after_end_history_root) = token_assertion_state(after_state)?;
    Ok(AssertionCreationInfo {
        assertion_hash: AssertionHash(token_h256(assertion_hash)?),
        parent_assertion_hash: AssertionHash(token_h256(parent_assertion_hash)?),
        before_state,
        after_state,
        after_end_history_root,
        after_inbox_batch_acc: token_h256(after_inbox_batch_acc)?,
        inbox_max_count: token_u64(inbox_max_count)?,
        wasm_module_root: token_h256(wasm_module_root)?,
        required_stake: required_stake
            .into_uint()
            .ok_or(anyhow!("expected a uint required stake"))?,
        challenge_manager: challenge_manager
            .into_address()
            .ok_or(anyhow!("expected an address challenge manager"))?,
        confirm_period_blocks: token_u64(confirm_period_blocks)?,
        creation_parent_block: log
            .block_number
            .map(|n| n.as_u64())
            .ok_or(anyhow!("AssertionCreated log is missing its block number"))?,
    })
}
