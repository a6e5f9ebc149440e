//! The `manager` module contains the [Manager], which owns the watcher, the challenge confirmer,
//! the new block event bus and the registry of running edge trackers.

use crate::{
    chain::{AssertionChain, SpecChallengeManager},
    config::DriverConfig,
    confirmation::ChallengeConfirmer,
    events::{EventBus, Subscription},
    metrics::{Counter, MetricsSink},
    persistence::PersistenceSink,
    tracker::{EdgeTracker, FsmSummary},
    utils::sleep_or_cancel,
    watcher::{EdgeManager, Watcher},
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bold_challenger_solvers::bold::{
    AssertionHash, EdgeId, HistoryCommitmentRequest, L2StateProvider, RoyalEdge,
};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::{hash_map::Entry, HashMap},
    sync::{Arc, Weak},
};
use tokio_util::sync::CancellationToken;

/// The number of new block notifications a tracker buffers.
const NEW_BLOCK_BUFFER: usize = 16;

/// The [Manager] struct ties the challenge agent's components together.
pub struct Manager {
    this: Weak<Manager>,
    chain: Arc<dyn AssertionChain>,
    challenge_manager: Arc<dyn SpecChallengeManager>,
    provider: Arc<dyn L2StateProvider>,
    watcher: Arc<Watcher>,
    confirmer: ChallengeConfirmer,
    tracked_edges: RwLock<HashMap<EdgeId, Arc<Mutex<FsmSummary>>>>,
    new_blocks: EventBus<u64>,
    config: Arc<DriverConfig>,
    metrics: Arc<dyn MetricsSink>,
    cancel: CancellationToken,
}

impl Manager {
    /// Creates a new [Manager].
    ///
    /// # Arguments
    /// * `chain` - The rollup and its edge challenge manager.
    /// * `provider` - Computes history commitments from local L2 state.
    /// * `persistence` - Optional sink for observed edges.
    /// * `cancel` - Parent of every tracker's cancellation token.
    pub fn new(
        chain: Arc<dyn AssertionChain>,
        provider: Arc<dyn L2StateProvider>,
        config: Arc<DriverConfig>,
        metrics: Arc<dyn MetricsSink>,
        persistence: Option<Arc<dyn PersistenceSink>>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Manager>| {
            let edge_manager: Weak<dyn EdgeManager> = this.clone();
            let watcher = Arc::new(Watcher::new(
                Arc::clone(&chain),
                Arc::clone(&provider),
                edge_manager,
                Arc::clone(&config),
                Arc::clone(&metrics),
                persistence,
            ));
            let confirmer = ChallengeConfirmer::new(
                Arc::clone(&watcher),
                Arc::clone(&chain),
                Arc::clone(&config),
                Arc::clone(&metrics),
            );
            Self {
                this: this.clone(),
                challenge_manager: chain.spec_challenge_manager(),
                chain,
                provider,
                watcher,
                confirmer,
                tracked_edges: RwLock::new(HashMap::new()),
                new_blocks: EventBus::new(NEW_BLOCK_BUFFER, config.event_bus_send_timeout),
                config,
                metrics,
                cancel,
            }
        })
    }

    pub fn chain(&self) -> &Arc<dyn AssertionChain> {
        &self.chain
    }

    pub fn challenge_manager(&self) -> &Arc<dyn SpecChallengeManager> {
        &self.challenge_manager
    }

    pub fn provider(&self) -> &Arc<dyn L2StateProvider> {
        &self.provider
    }

    pub fn watcher(&self) -> &Arc<Watcher> {
        &self.watcher
    }

    pub fn confirmer(&self) -> &ChallengeConfirmer {
        &self.confirmer
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_tracking_edge(&self, id: &EdgeId) -> bool {
        self.tracked_edges.read().contains_key(id)
    }

    /// Registers a tracker for `id`.
    ///
    /// # Returns
    /// * False if a tracker for `id` is already registered.
    pub fn mark_tracked_edge(&self, id: EdgeId, summary: Arc<Mutex<FsmSummary>>) -> bool {
        match self.tracked_edges.write().entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(summary);
                true
            }
        }
    }

    pub fn remove_tracked_edge(&self, id: &EdgeId) {
        self.tracked_edges.write().remove(id);
    }

    /// Returns the FSM summary of every running tracker.
    pub fn tracker_summaries(&self) -> Vec<(EdgeId, FsmSummary)> {
        self.tracked_edges
            .read()
            .iter()
            .map(|(id, summary)| (*id, summary.lock().clone()))
            .collect()
    }

    pub fn subscribe_new_blocks(&self) -> Subscription<u64> {
        self.new_blocks.subscribe()
    }

    /// Opens the block challenge on the siblings of `claimed`, an assertion this validator
    /// agrees with, and starts tracking the posted level zero edge.
    ///
    /// # Returns
    /// * The posted edge, or the existing one if it was posted before.
    pub async fn challenge_assertion(&self, claimed: AssertionHash) -> Result<RoyalEdge> {
        let claimed_info = self.chain.read_assertion_creation_info(claimed).await?;
        let parent = claimed_info.parent_assertion_hash;
        let parent_info = self.chain.read_assertion_creation_info(parent).await?;
        let metadata = self.watcher.metadata_for(parent, claimed).await?;
        let req = HistoryCommitmentRequest {
            assertion_metadata: metadata,
            upper_challenge_origin_heights: Vec::new(),
            up_to_height: None,
        };

        let block_height = self.challenge_manager.layer_zero_heights().block_challenge_height;
        let start = self.provider.history_commitment(&req.up_to(0)).await?;
        let end = self
            .provider
            .history_commitment(&req.up_to(block_height))
            .await?;
        let prefix_proof = self
            .provider
            .prefix_proof(&req.up_to(end.height), 0)
            .await?;

        let edge = self
            .challenge_manager
            .add_block_challenge_level_zero_edge(
                &claimed_info,
                &parent_info,
                &start,
                &end,
                prefix_proof,
            )
            .await?;
        self.metrics.increment(Counter::LayerZeroLeaves);
        tracing::info!(target: "bold-challenger-driver", id = %edge.id.trunc(), claimed = %claimed.trunc(), parent = %parent.trunc(), batch_limit = parent_info.inbox_max_count, end_root = ?end.merkle_root, validator = %self.config.validator_name, "Posted block challenge level zero edge");

        let royal = RoyalEdge::assume_royal(edge);
        self.watcher.add_verified_honest_edge(royal.clone()).await?;
        self.track_edge(royal.clone()).await?;
        Ok(royal)
    }

    /// Broadcasts every new head block to the edge trackers until `cancel` fires.
    pub async fn notify_new_blocks(&self, cancel: &CancellationToken) -> Result<()> {
        let mut last_block = None;
        loop {
            match self.chain.head_block_number().await {
                Ok(head) if last_block.map_or(true, |last| head > last) => {
                    last_block = Some(head);
                    let delivered = self.new_blocks.broadcast(head).await;
                    tracing::trace!(target: "bold-challenger-driver", head, delivered, "Notified trackers of new block");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(target: "bold-challenger-driver", "Could not read head block: {:#}", e)
                }
            }
            if !sleep_or_cancel(self.config.new_block_poll_interval, cancel).await {
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl EdgeManager for Manager {
    async fn track_edge(&self, edge: RoyalEdge) -> Result<()> {
        if self.is_tracking_edge(&edge.id) {
            return Ok(());
        }
        let this = self
            .this
            .upgrade()
            .ok_or(anyhow!("manager dropped while tracking edge {}", edge.id))?;
        let tracker = EdgeTracker::new(edge, this).await?;
        tracker.spawn(self.cancel.child_token());
        Ok(())
    }
}
