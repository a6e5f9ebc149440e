//! The `tracker` module contains the [EdgeTracker], the state machine that plays the challenge
//! game for a single royal edge.
//!
//! Each tracker runs in its own task and takes at most one transition per new parent chain
//! block. Every transition starts from a fresh read of the edge.

use crate::{
    chain::ChainError,
    metrics::Counter,
    watcher::EdgeManager,
    Manager,
};
use anyhow::Result;
use bold_challenger_solvers::bold::{
    bisection_point, error::TreeError, AssociatedAssertionMetadata, HistoryCommitmentRequest,
    RoyalEdge,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::{fmt, sync::Arc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The states of an [EdgeTracker].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeTrackerState {
    #[default]
    Started,
    AtOneStepProof,
    AddingSubchallengeLeaf,
    Bisecting,
    /// The tracker has done all it can and only retries confirmation.
    AwaitingChallengeCompletion,
}

impl fmt::Display for EdgeTrackerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeTrackerState::Started => write!(f, "started"),
            EdgeTrackerState::AtOneStepProof => write!(f, "at_one_step_proof"),
            EdgeTrackerState::AddingSubchallengeLeaf => write!(f, "adding_subchallenge_leaf"),
            EdgeTrackerState::Bisecting => write!(f, "bisecting"),
            EdgeTrackerState::AwaitingChallengeCompletion => {
                write!(f, "awaiting_challenge_completion")
            }
        }
    }
}

/// A snapshot of a tracker's progress, shared with the manager for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FsmSummary {
    pub current_state: EdgeTrackerState,
    pub last_error: Option<String>,
}

/// The [EdgeTracker] struct drives one royal edge.
pub struct EdgeTracker {
    edge: RoyalEdge,
    metadata: AssociatedAssertionMetadata,
    state: EdgeTrackerState,
    summary: Arc<Mutex<FsmSummary>>,
    manager: Arc<Manager>,
}

impl EdgeTracker {
    /// Creates a new [EdgeTracker] in the [EdgeTrackerState::Started] state.
    pub async fn new(edge: RoyalEdge, manager: Arc<Manager>) -> Result<Self> {
        let metadata = manager.watcher().assertion_metadata(&edge).await?;
        Ok(Self {
            edge,
            metadata,
            state: EdgeTrackerState::Started,
            summary: Arc::new(Mutex::new(FsmSummary::default())),
            manager,
        })
    }

    pub fn state(&self) -> EdgeTrackerState {
        self.state
    }

    pub fn edge(&self) -> &RoyalEdge {
        &self.edge
    }

    pub fn fsm_summary(&self) -> FsmSummary {
        self.summary.lock().clone()
    }

    /// Spawns the tracker's task, which acts once per new block until the edge no longer
    /// needs tracking or `cancel` fires.
    ///
    /// # Returns
    /// * `None` if the manager already tracks the edge.
    pub fn spawn(self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if !self
            .manager
            .mark_tracked_edge(self.edge.id, Arc::clone(&self.summary))
        {
            tracing::debug!(target: "edge-tracker", id = %self.edge.id.trunc(), "Edge already tracked");
            return None;
        }
        self.manager.metrics().increment(Counter::TrackerSpawned);
        let mut blocks = self.manager.subscribe_new_blocks();
        Some(tokio::spawn(async move {
            let mut tracker = self;
            let id = tracker.edge.id;
            tracing::info!(target: "edge-tracker", id = %id.trunc(), level = %tracker.edge.level, start = tracker.edge.start_height, end = tracker.edge.end_height, validator = %tracker.manager.config().validator_name, "Tracking edge");
            while let Some(block) = blocks.next(&cancel).await {
                match tracker.should_despawn().await {
                    Ok(true) => {
                        tracker.manager.metrics().increment(Counter::TrackerDespawned);
                        tracing::info!(target: "edge-tracker", id = %id.trunc(), block, "Edge no longer needs tracking");
                        break;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(target: "edge-tracker", id = %id.trunc(), "Could not check whether to despawn: {:#}", e)
                    }
                }
                tracker.act(&cancel).await;
            }
            tracker.manager.remove_tracked_edge(&id);
        }))
    }

    /// Takes one transition.
    ///
    /// # Returns
    /// * The new state. Any failure sends the tracker back to [EdgeTrackerState::Started].
    pub async fn act(&mut self, cancel: &CancellationToken) -> EdgeTrackerState {
        let from = self.state;
        match self.step(cancel).await {
            Ok(next) => self.transition(next, None),
            Err(e) => {
                tracing::error!(target: "edge-tracker", id = %self.edge.id.trunc(), state = %from, validator = %self.manager.config().validator_name, "Edge tracker act failed: {:#}", e);
                self.transition(EdgeTrackerState::Started, Some(format!("{:#}", e)));
            }
        }
        if from != self.state {
            tracing::debug!(target: "edge-tracker", id = %self.edge.id.trunc(), level = %self.edge.level, from = %from, to = %self.state, "Transitioned");
        }
        self.state
    }

    fn transition(&mut self, next: EdgeTrackerState, error: Option<String>) {
        self.state = next;
        let mut summary = self.summary.lock();
        summary.current_state = next;
        if error.is_some() {
            summary.last_error = error;
        }
    }

    async fn step(&mut self, cancel: &CancellationToken) -> Result<EdgeTrackerState> {
        self.refresh().await?;
        match self.state {
            EdgeTrackerState::Started => self.on_started(cancel).await,
            EdgeTrackerState::AtOneStepProof => {
                if !self.essential_ancestor_confirmable().await? {
                    self.submit_one_step_proof().await?;
                }
                Ok(EdgeTrackerState::AwaitingChallengeCompletion)
            }
            EdgeTrackerState::AddingSubchallengeLeaf => {
                if !self.essential_ancestor_confirmable().await? {
                    self.open_subchallenge().await?;
                }
                Ok(EdgeTrackerState::AwaitingChallengeCompletion)
            }
            EdgeTrackerState::Bisecting => {
                if !self.essential_ancestor_confirmable().await? {
                    self.bisect().await?;
                }
                Ok(EdgeTrackerState::AwaitingChallengeCompletion)
            }
            EdgeTrackerState::AwaitingChallengeCompletion => {
                self.try_to_confirm(cancel).await?;
                Ok(EdgeTrackerState::AwaitingChallengeCompletion)
            }
        }
    }

    async fn on_started(&self, cancel: &CancellationToken) -> Result<EdgeTrackerState> {
        let challenge_manager = self.manager.challenge_manager();
        let has_rival = challenge_manager.has_rival(self.edge.id).await?;
        if has_rival && self.edge.is_one_step_proof_edge() {
            return Ok(EdgeTrackerState::AtOneStepProof);
        }
        let confirmed = match self.try_to_confirm(cancel).await {
            Ok(confirmed) => confirmed,
            Err(e) => {
                tracing::warn!(target: "edge-tracker", id = %self.edge.id.trunc(), "Could not confirm edge: {:#}", e);
                self.summary.lock().last_error = Some(format!("{:#}", e));
                false
            }
        };
        if confirmed {
            return Ok(EdgeTrackerState::AwaitingChallengeCompletion);
        }
        if !has_rival {
            return Ok(EdgeTrackerState::Started);
        }
        if challenge_manager.has_length_one_rival(self.edge.id).await? {
            return Ok(EdgeTrackerState::AddingSubchallengeLeaf);
        }
        Ok(EdgeTrackerState::Bisecting)
    }

    /// Re-reads the edge from chain and refreshes its snapshot in the royal tree.
    async fn refresh(&mut self) -> Result<()> {
        let id = self.edge.id;
        let edge = self
            .manager
            .challenge_manager()
            .get_edge(id)
            .await?
            .ok_or(ChainError::EdgeNotFound(id))?;
        self.manager.watcher().update_royal_edge(edge.clone());
        self.edge = RoyalEdge::assume_royal(edge);
        Ok(())
    }

    async fn essential_ancestor_confirmable(&self) -> Result<bool> {
        let head = self.manager.chain().head_block_number().await?;
        let period = self.manager.challenge_manager().challenge_period_blocks();
        self.manager
            .watcher()
            .is_essential_ancestor_confirmable(&self.edge, period, head)
    }

    /// Confirms the edge by time if it is essential and the royal tree beneath it has
    /// accumulated a challenge period.
    ///
    /// # Returns
    /// * True if the edge is confirmed.
    async fn try_to_confirm(&self, cancel: &CancellationToken) -> Result<bool> {
        if self.edge.claim_id.is_none() {
            return Ok(false);
        }
        if self.edge.is_confirmed() {
            return Ok(true);
        }
        let head = self.manager.chain().head_block_number().await?;
        let period = self.manager.challenge_manager().challenge_period_blocks();
        let confirmable = match self.manager.watcher().is_confirmable_essential_edge(
            &self.edge.assertion_hash,
            &self.edge.id,
            period,
            head,
        ) {
            Ok(confirmable) => confirmable,
            Err(e)
                if matches!(
                    e.downcast_ref::<TreeError>(),
                    Some(TreeError::ChildrenNotYetSeen(_))
                ) =>
            {
                return Ok(false)
            }
            Err(e) => return Err(e),
        };
        if !confirmable.confirmable {
            tracing::trace!(target: "edge-tracker", id = %self.edge.id.trunc(), min_path_weight = confirmable.min_path_weight, period, "Essential edge not yet confirmable");
            return Ok(false);
        }
        self.manager
            .confirmer()
            .begin_confirmation_job(
                self.edge.assertion_hash,
                confirmable.min_path_weight,
                &self.edge,
                self.metadata.claimed_assertion_hash,
                period,
                cancel,
            )
            .await?;
        Ok(true)
    }

    /// Returns true once the tracker has nothing left to do: essential and one step proof
    /// edges once they are confirmed, every other edge once its closest essential ancestor is.
    pub async fn should_despawn(&self) -> Result<bool> {
        let challenge_manager = self.manager.challenge_manager();
        let watched = if self.edge.claim_id.is_some() || self.edge.is_one_step_proof_edge() {
            self.edge.id
        } else {
            self.manager
                .watcher()
                .closest_essential_ancestor(&self.edge)?
        };
        Ok(challenge_manager
            .get_edge(watched)
            .await?
            .is_some_and(|e| e.is_confirmed()))
    }

    fn request(&self, upper_challenge_origin_heights: Vec<u64>) -> HistoryCommitmentRequest {
        HistoryCommitmentRequest {
            assertion_metadata: self.metadata.clone(),
            upper_challenge_origin_heights,
            up_to_height: None,
        }
    }

    async fn bisect(&self) -> Result<()> {
        let watcher = self.manager.watcher();
        let provider = self.manager.provider();
        let edge = &self.edge;
        let req = self.request(watcher.origin_heights(edge)?);
        let mid = bisection_point(edge.start_height, edge.end_height)?;
        let commitment = provider.history_commitment(&req.up_to(mid)).await?;
        let proof = provider
            .prefix_proof(&req.up_to(edge.end_height), mid)
            .await?;
        let (lower, upper) = self
            .manager
            .challenge_manager()
            .bisect(edge, commitment.merkle_root, proof)
            .await?;
        self.manager.metrics().increment(Counter::Bisected);
        tracing::info!(target: "edge-tracker", id = %edge.id.trunc(), level = %edge.level, start = edge.start_height, mid, end = edge.end_height, bisection_root = ?commitment.merkle_root, validator = %self.manager.config().validator_name, "Bisected edge");

        for child in [lower, upper] {
            let child = RoyalEdge::assume_royal(child);
            watcher.add_verified_honest_edge(child.clone()).await?;
            self.manager.track_edge(child).await?;
        }
        Ok(())
    }

    /// Opens the sub challenge on this length one edge by posting a level zero edge at the next
    /// level, committing to the machine history between the edge's start and end.
    async fn open_subchallenge(&self) -> Result<()> {
        let watcher = self.manager.watcher();
        let provider = self.manager.provider();
        let edge = &self.edge;
        let parent_heights = watcher.origin_heights(edge)?;
        let mut heights = parent_heights.clone();
        heights.push(edge.start_height);

        let req = self.request(heights);
        let end = provider.history_commitment(&req).await?;
        let prefix_proof = provider.prefix_proof(&req.up_to(end.height), 0).await?;
        let start = provider.history_commitment(&req.up_to(0)).await?;

        let parent_req = self.request(parent_heights);
        let end_parent = provider
            .history_commitment(&parent_req.up_to(edge.end_height))
            .await?;
        let start_parent = provider
            .history_commitment(&parent_req.up_to(edge.start_height))
            .await?;

        let created = self
            .manager
            .challenge_manager()
            .add_sub_challenge_level_zero_edge(
                edge,
                &start,
                &end,
                &start_parent,
                &end_parent,
                prefix_proof,
            )
            .await?;
        self.manager.metrics().increment(Counter::LayerZeroLeaves);
        tracing::info!(target: "edge-tracker", id = %created.id.trunc(), level = %created.level, claim = %edge.id.trunc(), start_root = ?start.merkle_root, end_root = ?end.merkle_root, validator = %self.manager.config().validator_name, "Opened sub challenge");

        let created = RoyalEdge::assume_royal(created);
        watcher.add_verified_honest_edge(created.clone()).await?;
        self.manager.track_edge(created).await
    }

    async fn submit_one_step_proof(&self) -> Result<()> {
        let edge = &self.edge;
        let heights = self.manager.watcher().origin_heights(edge)?;
        let osp = self
            .manager
            .provider()
            .one_step_proof_data(&self.metadata, &heights, edge.start_height)
            .await?;
        let prev = self
            .manager
            .chain()
            .read_assertion_creation_info(edge.assertion_hash)
            .await?;
        let receipt = self
            .manager
            .challenge_manager()
            .confirm_edge_by_one_step_proof(edge.id, &osp, &prev)
            .await?;
        tracing::info!(target: "edge-tracker", id = %edge.id.trunc(), heights = ?heights, step = edge.start_height, tx = ?receipt.tx_hash, validator = %self.manager.config().validator_name, "Confirmed edge by one step proof");
        Ok(())
    }
}
