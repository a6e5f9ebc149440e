//! The provider module turns ranges of L2 message states and machine hashes into history
//! commitments and prefix proofs, and maps challenge level coordinates onto absolute machine
//! opcode indices.

use super::{
    error::ProviderError,
    merkle,
    prefix::{self, VerifyPrefixProofConfig},
    AssociatedAssertionMetadata, ChallengeLevel, ExecutionState, GlobalState, Height,
    HistoryCommitment, OneStepData,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::types::{Bytes, H256};
use std::{fmt, sync::Arc};

/// Collects the L2 message state hashes committed to at the block challenge level.
#[async_trait]
pub trait L2MessageStateCollector: Send + Sync {
    /// Returns the state hashes for heights `0..=to_height` starting at `from_state`, stopping
    /// early once `batch_limit` is reached.
    async fn l2_message_states_up_to(
        &self,
        from_state: GlobalState,
        batch_limit: u64,
        to_height: Option<Height>,
    ) -> Result<Vec<H256>>;
}

/// Collects machine hashes from the execution engine.
#[async_trait]
pub trait MachineHashCollector: Send + Sync {
    /// Returns `cfg.num_desired_hashes` machine hashes, starting at opcode
    /// `cfg.machine_start_index` and advancing `cfg.step_size` opcodes at a time.
    async fn collect_machine_hashes(&self, cfg: &HashCollectorConfig) -> Result<Vec<H256>>;
}

/// Produces one step proofs from the execution engine.
#[async_trait]
pub trait ProofCollector: Send + Sync {
    /// Returns the raw one step proof for the opcode at `machine_index` within the block at
    /// `block_challenge_height`.
    async fn collect_proof(
        &self,
        metadata: &AssociatedAssertionMetadata,
        block_challenge_height: Height,
        machine_index: u64,
    ) -> Result<Bytes>;
}

/// Produces the execution state reached after a previous assertion.
#[async_trait]
pub trait ExecutionProvider: Send + Sync {
    async fn execution_state_after_previous_state(
        &self,
        max_inbox_count: u64,
        previous_global_state: Option<&GlobalState>,
    ) -> Result<ExecutionState>;
}

/// The bridge between the challenge game and local L2 state.
#[async_trait]
pub trait L2StateProvider: Send + Sync {
    /// Computes the history commitment described by `req`.
    async fn history_commitment(&self, req: &HistoryCommitmentRequest)
        -> Result<HistoryCommitment>;

    /// Computes an ABI encoded proof that the commitment at `prefix_height` is a prefix of the
    /// commitment described by `req`.
    async fn prefix_proof(
        &self,
        req: &HistoryCommitmentRequest,
        prefix_height: Height,
    ) -> Result<Bytes>;

    /// Computes everything needed to confirm the single step edge starting at `up_to`.
    async fn one_step_proof_data(
        &self,
        metadata: &AssociatedAssertionMetadata,
        start_heights: &[Height],
        up_to: Height,
    ) -> Result<OneStepProofData>;

    /// Returns true if the local history at `claimed.0` has root `claimed.1`.
    async fn agrees_with_history_commitment(
        &self,
        level: ChallengeLevel,
        req: &HistoryCommitmentRequest,
        claimed: (Height, H256),
    ) -> Result<bool>;

    async fn execution_state_after_previous_state(
        &self,
        max_inbox_count: u64,
        previous_global_state: Option<&GlobalState>,
    ) -> Result<ExecutionState>;
}

/// Describes which history commitment to compute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryCommitmentRequest {
    pub assertion_metadata: AssociatedAssertionMetadata,
    /// The start heights of every shallower challenge the requested level is nested in. Empty
    /// for the block challenge level.
    pub upper_challenge_origin_heights: Vec<Height>,
    /// Commit to `up_to_height + 1` leaves. `None` commits to the full leaf height of the level.
    pub up_to_height: Option<Height>,
}

impl HistoryCommitmentRequest {
    /// Returns the challenge level the request is for.
    pub fn level(&self) -> usize {
        self.upper_challenge_origin_heights.len()
    }

    /// Returns a copy of the request committing up to `height`.
    pub fn up_to(&self, height: Height) -> Self {
        Self {
            up_to_height: Some(height),
            ..self.clone()
        }
    }
}

/// The inputs of a machine hash collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashCollectorConfig {
    pub assertion_metadata: AssociatedAssertionMetadata,
    pub block_challenge_height: Height,
    pub step_heights: Vec<Height>,
    pub num_desired_hashes: u64,
    pub machine_start_index: u64,
    pub step_size: u64,
}

impl fmt::Display for HashCollectorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let steps: Vec<String> = self.step_heights.iter().map(|h| h.to_string()).collect();
        write!(
            f,
            "{:#x}/{}/{}/{}/{}/{}/{}/{}",
            self.assertion_metadata.wasm_module_root,
            self.assertion_metadata.from_state.batch,
            self.assertion_metadata.from_state.pos_in_batch,
            self.block_challenge_height,
            steps.join("/"),
            self.num_desired_hashes,
            self.machine_start_index,
            self.step_size
        )
    }
}

/// The result of [L2StateProvider::one_step_proof_data].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OneStepProofData {
    pub data: OneStepData,
    /// Inclusion proof of the before hash in the start commitment.
    pub before_inclusion_proof: Vec<H256>,
    /// Inclusion proof of the after hash in the end commitment.
    pub after_inclusion_proof: Vec<H256>,
}

/// The [HistoryCommitmentProvider] is the [L2StateProvider] backed by an execution engine's
/// collectors.
pub struct HistoryCommitmentProvider {
    l2_collector: Arc<dyn L2MessageStateCollector>,
    machine_collector: Arc<dyn MachineHashCollector>,
    proof_collector: Arc<dyn ProofCollector>,
    execution: Arc<dyn ExecutionProvider>,
    /// The leaf height of every challenge level, block level first.
    challenge_leaf_heights: Vec<Height>,
}

impl HistoryCommitmentProvider {
    /// Creates a new [HistoryCommitmentProvider].
    pub fn new(
        l2_collector: Arc<dyn L2MessageStateCollector>,
        machine_collector: Arc<dyn MachineHashCollector>,
        proof_collector: Arc<dyn ProofCollector>,
        execution: Arc<dyn ExecutionProvider>,
        challenge_leaf_heights: Vec<Height>,
    ) -> Self {
        Self {
            l2_collector,
            machine_collector,
            proof_collector,
            execution,
            challenge_leaf_heights,
        }
    }

    /// Returns the configured leaf heights.
    pub fn challenge_leaf_heights(&self) -> &[Height] {
        &self.challenge_leaf_heights
    }

    fn leaf_height(&self, level: usize) -> Result<Height, ProviderError> {
        self.challenge_leaf_heights
            .get(level)
            .copied()
            .ok_or(ProviderError::UnknownLevel(level))
    }

    fn validate_origin_heights(&self, heights: &[Height]) -> Result<(), ProviderError> {
        let levels = self.challenge_leaf_heights.len();
        let max = levels.saturating_sub(1);
        if heights.len() > max {
            return Err(ProviderError::TooManyOriginHeights {
                got: heights.len(),
                max,
                levels,
            });
        }
        Ok(())
    }

    /// Computes the number of virtual leaves a request commits to.
    fn virtual_from(&self, req: &HistoryCommitmentRequest) -> Result<u64, ProviderError> {
        self.compute_required_number_of_hashes(req.level(), req.up_to_height)
    }

    /// Computes the number of hashes needed to commit up to `up_to` at `level`: `up_to + 1`,
    /// or the level's leaf height plus one when `up_to` is absent.
    pub fn compute_required_number_of_hashes(
        &self,
        level: usize,
        up_to: Option<Height>,
    ) -> Result<u64, ProviderError> {
        let leaf_height = self.leaf_height(level)?;
        let end = up_to.unwrap_or(leaf_height);
        if end > leaf_height {
            return Err(ProviderError::UpToHeightTooLarge {
                up_to: end,
                leaf_height,
                level,
            });
        }
        Ok(end + 1)
    }

    /// Computes the number of machine opcodes one step at `level` spans: the product of the leaf
    /// heights of every deeper level.
    pub fn compute_step_size(&self, level: usize) -> Result<u64, ProviderError> {
        let levels = self.challenge_leaf_heights.len();
        if level >= levels {
            return Err(ProviderError::UnknownLevel(level));
        }
        self.challenge_leaf_heights[level + 1..]
            .iter()
            .try_fold(1u64, |acc, h| acc.checked_mul(*h))
            .ok_or(ProviderError::MachineIndexOverflow)
    }

    /// Maps challenge level coordinates onto an absolute machine opcode index.
    ///
    /// The first entry of `heights` is the block challenge height and does not contribute. Every
    /// following entry, and finally `from`, is a digit in a mixed radix number whose radix at
    /// each position is the product of the leaf heights of all deeper levels.
    ///
    /// ### Takes
    /// - `heights`: The origin heights, block challenge height first.
    /// - `from`: The height within the level below the last origin height.
    ///
    /// ### Returns
    /// - `Result<u64>`: The opcode index, or [ProviderError::MachineIndexOverflow].
    pub fn compute_machine_start_index(
        &self,
        heights: &[Height],
        from: Height,
    ) -> Result<u64, ProviderError> {
        if heights.is_empty() {
            return Ok(0);
        }
        let digits = heights[1..].iter().copied().chain(std::iter::once(from));
        let mut index = 0u64;
        for (position, digit) in digits.enumerate() {
            // Digit `position` counts steps at level `position + 1`.
            let step = self.compute_step_size(position + 1)?;
            index = digit
                .checked_mul(step)
                .and_then(|d| index.checked_add(d))
                .ok_or(ProviderError::MachineIndexOverflow)?;
        }
        Ok(index)
    }

    /// Collects the leaves described by a request.
    async fn hashes(&self, req: &HistoryCommitmentRequest) -> Result<Vec<H256>> {
        self.validate_origin_heights(&req.upper_challenge_origin_heights)?;
        let level = req.level();
        let num_hashes = self.compute_required_number_of_hashes(level, req.up_to_height)?;

        let mut hashes = if level == 0 {
            self.l2_collector
                .l2_message_states_up_to(
                    req.assertion_metadata.from_state,
                    req.assertion_metadata.batch_limit,
                    req.up_to_height,
                )
                .await?
        } else {
            let heights = &req.upper_challenge_origin_heights;
            let cfg = HashCollectorConfig {
                assertion_metadata: req.assertion_metadata.clone(),
                block_challenge_height: heights[0],
                step_heights: heights[1..].to_vec(),
                num_desired_hashes: num_hashes,
                machine_start_index: self.compute_machine_start_index(heights, 0)?,
                step_size: self.compute_step_size(level)?,
            };
            tracing::trace!(target: "history-provider", "Collecting machine hashes for {}", cfg);
            self.machine_collector.collect_machine_hashes(&cfg).await?
        };

        if hashes.is_empty() {
            return Err(ProviderError::NoHashesCollected.into());
        }
        hashes.truncate(num_hashes as usize);
        Ok(hashes)
    }
}

#[async_trait]
impl L2StateProvider for HistoryCommitmentProvider {
    async fn history_commitment(
        &self,
        req: &HistoryCommitmentRequest,
    ) -> Result<HistoryCommitment> {
        let leaves = self.hashes(req).await?;
        let virtual_size = self.virtual_from(req)?;
        Ok(merkle::new_commitment(&leaves, virtual_size)?)
    }

    async fn prefix_proof(
        &self,
        req: &HistoryCommitmentRequest,
        prefix_height: Height,
    ) -> Result<Bytes> {
        let leaves = self.hashes(req).await?;
        let virtual_size = self.virtual_from(req)?;
        let prefix_size = prefix_height
            .checked_add(1)
            .ok_or(ProviderError::PrefixHeightOverflow(prefix_height))?;

        let prefix_leaves = &leaves[..leaves.len().min(prefix_size as usize)];
        let pre_root = merkle::compute_root(prefix_leaves, prefix_size)?;
        let post_root = merkle::compute_root(&leaves, virtual_size)?;
        let (expansion, proof) = merkle::generate_prefix_proof(prefix_height, &leaves, virtual_size)?;

        // Never hand out a proof the contract would reject.
        prefix::verify_prefix_proof(&VerifyPrefixProofConfig {
            pre_root,
            pre_size: prefix_size,
            post_root,
            post_size: virtual_size,
            pre_expansion: expansion.clone(),
            prefix_proof: proof.clone(),
        })
        .map_err(|e| anyhow!("generated prefix proof failed verification: {}", e))?;

        Ok(prefix::encode_prefix_proof(&expansion, &proof))
    }

    async fn one_step_proof_data(
        &self,
        metadata: &AssociatedAssertionMetadata,
        start_heights: &[Height],
        up_to: Height,
    ) -> Result<OneStepProofData> {
        if start_heights.is_empty() {
            return Err(ProviderError::MissingStartHeights.into());
        }
        let req = HistoryCommitmentRequest {
            assertion_metadata: metadata.clone(),
            upper_challenge_origin_heights: start_heights.to_vec(),
            up_to_height: None,
        };
        let end = self.history_commitment(&req.up_to(up_to + 1)).await?;
        let start = self.history_commitment(&req.up_to(up_to)).await?;

        let machine_index = self.compute_machine_start_index(start_heights, up_to)?;
        let proof = self
            .proof_collector
            .collect_proof(metadata, start_heights[0], machine_index)
            .await?;

        Ok(OneStepProofData {
            data: OneStepData {
                before_hash: start.last_leaf,
                after_hash: end.last_leaf,
                proof,
            },
            before_inclusion_proof: start.last_leaf_proof,
            after_inclusion_proof: end.last_leaf_proof,
        })
    }

    async fn agrees_with_history_commitment(
        &self,
        level: ChallengeLevel,
        req: &HistoryCommitmentRequest,
        claimed: (Height, H256),
    ) -> Result<bool> {
        if req.level() != level.as_index() {
            return Err(anyhow!(
                "request for level {} does not match {}",
                req.level(),
                level
            ));
        }
        let local = self.history_commitment(&req.up_to(claimed.0)).await?;
        Ok(local.height == claimed.0 && local.merkle_root == claimed.1)
    }

    async fn execution_state_after_previous_state(
        &self,
        max_inbox_count: u64,
        previous_global_state: Option<&GlobalState>,
    ) -> Result<ExecutionState> {
        self.execution
            .execution_state_after_previous_state(max_inbox_count, previous_global_state)
            .await
    }
}
