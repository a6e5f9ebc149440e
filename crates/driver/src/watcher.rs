//! The `watcher` module contains the [Watcher], which scans the edge challenge manager's events,
//! classifies every observed edge against local state and keeps one royal challenge tree per
//! challenged assertion.

use crate::{
    chain::{AssertionChain, ChainError, SpecChallengeManager},
    config::DriverConfig,
    metrics::{Counter, MetricsSink},
    persistence::{EdgeRecord, PersistenceSink},
    retry::retry_until_succeeds,
    utils::sleep_or_cancel,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bold_challenger_solvers::bold::{
    error::TreeError, AssertionHash, AssociatedAssertionMetadata, ChallengeLevel, ClaimId,
    ConfirmableEssentialEdge, Edge, EdgeId, Height, HistoryCommitmentRequest, L2StateProvider,
    ObservedEdge, RoyalChallengeTree, RoyalEdge,
};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Evil level zero edges seen at one level of one challenge before the watcher raises an alarm.
const HIGH_EVIL_EDGE_THRESHOLD: usize = 5;

/// Failures of watcher lookups.
#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("no challenge is tracked on the children of assertion {0}")]
    ChallengeNotTracked(AssertionHash),
    #[error("the royal block challenge edge of assertion {0} has no claim")]
    MissingBlockClaim(AssertionHash),
}

/// The local state of one challenge, keyed by the assertion whose children are challenged.
#[derive(Debug)]
pub struct TrackedChallenge {
    tree: RwLock<RoyalChallengeTree>,
    /// Confirmed level zero edges, keyed by the claim they carry.
    confirmed_level_zero_edges: RwLock<HashMap<ClaimId, EdgeId>>,
    evil_level_zero_counts: Mutex<HashMap<ChallengeLevel, usize>>,
}

impl TrackedChallenge {
    fn new(challenged: AssertionHash, total_challenge_levels: u8) -> Self {
        Self {
            tree: RwLock::new(RoyalChallengeTree::new(challenged, total_challenge_levels)),
            confirmed_level_zero_edges: RwLock::new(HashMap::new()),
            evil_level_zero_counts: Mutex::new(HashMap::new()),
        }
    }
}

/// Receives every edge the watcher verified as royal, so an edge tracker can be spawned for it.
#[async_trait]
pub trait EdgeManager: Send + Sync {
    async fn track_edge(&self, edge: RoyalEdge) -> Result<()>;
}

/// The [Watcher] struct owns every tracked challenge.
pub struct Watcher {
    chain: Arc<dyn AssertionChain>,
    challenge_manager: Arc<dyn SpecChallengeManager>,
    provider: Arc<dyn L2StateProvider>,
    edge_manager: Weak<dyn EdgeManager>,
    challenges: RwLock<HashMap<AssertionHash, Arc<TrackedChallenge>>>,
    config: Arc<DriverConfig>,
    metrics: Arc<dyn MetricsSink>,
    persistence: Option<Arc<dyn PersistenceSink>>,
    initial_sync_completed: AtomicBool,
}

impl Watcher {
    /// Creates a new [Watcher].
    ///
    /// # Arguments
    /// * `edge_manager` - Spawns trackers for royal edges. Held weakly, since the manager owns
    ///   the watcher.
    /// * `persistence` - Optional sink every observed edge is written to.
    pub fn new(
        chain: Arc<dyn AssertionChain>,
        provider: Arc<dyn L2StateProvider>,
        edge_manager: Weak<dyn EdgeManager>,
        config: Arc<DriverConfig>,
        metrics: Arc<dyn MetricsSink>,
        persistence: Option<Arc<dyn PersistenceSink>>,
    ) -> Self {
        Self {
            challenge_manager: chain.spec_challenge_manager(),
            chain,
            provider,
            edge_manager,
            challenges: RwLock::new(HashMap::new()),
            config,
            metrics,
            persistence,
            initial_sync_completed: AtomicBool::new(false),
        }
    }

    /// Returns true once the initial scan from the latest confirmed assertion caught up with
    /// the chain head.
    pub fn is_synced(&self) -> bool {
        self.initial_sync_completed.load(Ordering::Acquire)
    }

    fn challenge(&self, challenged: &AssertionHash) -> Result<Arc<TrackedChallenge>> {
        self.challenges
            .read()
            .get(challenged)
            .cloned()
            .ok_or(WatcherError::ChallengeNotTracked(*challenged).into())
    }

    fn challenge_or_insert(&self, challenged: AssertionHash) -> Arc<TrackedChallenge> {
        if let Some(challenge) = self.challenges.read().get(&challenged) {
            return Arc::clone(challenge);
        }
        let total_levels = self.challenge_manager.total_challenge_levels();
        Arc::clone(
            self.challenges
                .write()
                .entry(challenged)
                .or_insert_with(|| Arc::new(TrackedChallenge::new(challenged, total_levels))),
        )
    }

    /// Runs `f` against the tree of the challenge on the children of `challenged`.
    fn with_tree<T, F>(&self, challenged: &AssertionHash, f: F) -> Result<T>
    where
        F: FnOnce(&RoyalChallengeTree) -> Result<T, TreeError>,
    {
        let challenge = self.challenge(challenged)?;
        let tree = challenge.tree.read();
        Ok(f(&tree)?)
    }

    /// Records an observed edge and classifies it.
    ///
    /// Level zero edges are royal if both their start and end commitments agree with the local
    /// state provider. Level zero edges of a sub challenge are only considered if the edge they
    /// claim is royal. Every other edge is royal only if it was registered as royal before,
    /// which happens when a tracker bisects a royal edge.
    ///
    /// # Returns
    /// * The edge tagged by the classification.
    pub async fn add_edge(&self, edge: Edge) -> Result<ObservedEdge> {
        if !self.config.tracks_challenge_parent(&edge.assertion_hash) {
            return Ok(ObservedEdge::Unverified(edge));
        }
        let challenge = self.challenge_or_insert(edge.assertion_hash);
        let already_royal = {
            let mut tree = challenge.tree.write();
            if !tree.has_observed(&edge) {
                tree.record_edge_creation(&edge);
                self.metrics.increment(Counter::EdgeAdded);
            }
            let royal = tree.is_royal(&edge.id);
            if royal {
                tree.update_royal_edge(edge.clone());
            }
            royal
        };
        if already_royal {
            return Ok(ObservedEdge::VerifiedRoyal(RoyalEdge::assume_royal(edge)));
        }
        let Some(claim_id) = edge.claim_id else {
            self.persist_edge(&edge, false).await;
            return Ok(ObservedEdge::Unverified(edge));
        };

        let claimed_assertion = if edge.level.is_block_level() {
            AssertionHash(claim_id.0)
        } else {
            let claim_is_royal = challenge.tree.read().is_royal(&EdgeId(claim_id.0));
            if !claim_is_royal {
                tracing::debug!(target: "chain-watcher", id = %edge.id.trunc(), level = %edge.level, "Ignoring level zero edge claiming a non royal edge");
                self.persist_edge(&edge, false).await;
                return Ok(ObservedEdge::Unverified(edge));
            }
            self.block_root_claim(&edge.assertion_hash)?
        };
        let origin_heights = challenge.tree.read().origin_heights(&edge)?;
        let metadata = self
            .metadata_for(edge.assertion_hash, claimed_assertion)
            .await?;
        let req = HistoryCommitmentRequest {
            assertion_metadata: metadata,
            upper_challenge_origin_heights: origin_heights,
            up_to_height: None,
        };
        let agrees_start = self
            .provider
            .agrees_with_history_commitment(edge.level, &req, edge.start_commitment())
            .await?;
        let agrees_end = self
            .provider
            .agrees_with_history_commitment(edge.level, &req, edge.end_commitment())
            .await?;

        if !(agrees_start && agrees_end) {
            let evil_count = {
                let mut counts = challenge.evil_level_zero_counts.lock();
                let count = counts.entry(edge.level).or_default();
                *count += 1;
                *count
            };
            if evil_count >= HIGH_EVIL_EDGE_THRESHOLD {
                self.metrics.increment(Counter::HighEvilEdges);
                tracing::warn!(target: "chain-watcher", level = %edge.level, challenged = %edge.assertion_hash.trunc(), count = evil_count, "High number of evil level zero edges observed");
            }
            tracing::info!(target: "chain-watcher", id = %edge.id.trunc(), level = %edge.level, claim = %claim_id.trunc(), validator = %self.config.validator_name, "Observed evil level zero edge");
            self.persist_edge(&edge, false).await;
            return Ok(ObservedEdge::Unverified(edge));
        }

        let royal = RoyalEdge::assume_royal(edge);
        let added = challenge.tree.write().add_royal_edge(royal.clone());
        if added {
            tracing::info!(target: "chain-watcher", id = %royal.id.trunc(), level = %royal.level, claim = %claim_id.trunc(), validator = %self.config.validator_name, "Observed royal level zero edge");
            self.persist_edge(&royal, true).await;
            match self.edge_manager.upgrade() {
                Some(manager) => manager.track_edge(royal.clone()).await?,
                None => {
                    tracing::warn!(target: "chain-watcher", id = %royal.id.trunc(), "Edge manager dropped, not tracking royal edge")
                }
            }
        }
        Ok(ObservedEdge::VerifiedRoyal(royal))
    }

    /// Registers an edge this validator created or bisected itself.
    pub async fn add_verified_honest_edge(&self, edge: RoyalEdge) -> Result<()> {
        let challenge = self.challenge_or_insert(edge.assertion_hash);
        let added = challenge.tree.write().add_royal_edge(edge.clone());
        if added {
            tracing::debug!(target: "chain-watcher", id = %edge.id.trunc(), level = %edge.level, start = edge.start_height, end = edge.end_height, "Added verified honest edge");
            self.persist_edge(&edge, true).await;
        }
        Ok(())
    }

    /// Refreshes the snapshot of a royal edge.
    pub fn update_royal_edge(&self, edge: Edge) {
        if let Ok(challenge) = self.challenge(&edge.assertion_hash) {
            challenge.tree.write().update_royal_edge(edge);
        }
    }

    /// Returns the assertion claimed by the royal block challenge edge of a challenge.
    fn block_root_claim(&self, challenged: &AssertionHash) -> Result<AssertionHash> {
        let claim = self.with_tree(challenged, |tree| {
            Ok(tree.royal_block_challenge_root_edge()?.claim_id)
        })?;
        claim
            .map(|c| AssertionHash(c.0))
            .ok_or(WatcherError::MissingBlockClaim(*challenged).into())
    }

    /// Returns the metadata of the assertion a royal edge ultimately argues for.
    pub async fn assertion_metadata(&self, edge: &Edge) -> Result<AssociatedAssertionMetadata> {
        let claimed = match edge.claim_id {
            Some(claim) if edge.level.is_block_level() => AssertionHash(claim.0),
            _ => self.block_root_claim(&edge.assertion_hash)?,
        };
        self.metadata_for(edge.assertion_hash, claimed).await
    }

    /// Builds the metadata of `claimed`, a child of `parent`. Execution starts from the
    /// parent's after state and is bounded by the parent's inbox max count.
    pub async fn metadata_for(
        &self,
        parent: AssertionHash,
        claimed: AssertionHash,
    ) -> Result<AssociatedAssertionMetadata> {
        let parent_info = self.chain.read_assertion_creation_info(parent).await?;
        Ok(AssociatedAssertionMetadata {
            from_state: parent_info.after_state.global_state,
            batch_limit: parent_info.inbox_max_count,
            wasm_module_root: parent_info.wasm_module_root,
            claimed_assertion_hash: claimed,
        })
    }

    pub fn origin_heights(&self, edge: &Edge) -> Result<Vec<Height>> {
        self.with_tree(&edge.assertion_hash, |tree| tree.origin_heights(edge))
    }

    pub fn is_royal(&self, edge: &Edge) -> bool {
        self.challenge(&edge.assertion_hash)
            .is_ok_and(|challenge| challenge.tree.read().is_royal(&edge.id))
    }

    /// Returns a snapshot of every royal edge across all challenges.
    pub fn royal_edges(&self) -> Vec<Edge> {
        let challenges: Vec<_> = self.challenges.read().values().cloned().collect();
        challenges
            .iter()
            .flat_map(|challenge| {
                challenge
                    .tree
                    .read()
                    .royal_edges()
                    .map(|e| (**e).clone())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn lower_most_royal_edges(&self, challenged: &AssertionHash) -> Result<Vec<RoyalEdge>> {
        self.with_tree(challenged, |tree| Ok(tree.lower_most_royal_edges()))
    }

    pub fn compute_ancestors(&self, challenged: &AssertionHash, id: &EdgeId) -> Result<Vec<Edge>> {
        self.with_tree(challenged, |tree| tree.compute_ancestors(id))
    }

    pub fn block_challenge_root_edge(&self, challenged: &AssertionHash) -> Result<RoyalEdge> {
        self.with_tree(challenged, |tree| {
            tree.royal_block_challenge_root_edge().cloned()
        })
    }

    pub fn closest_essential_ancestor(&self, edge: &Edge) -> Result<EdgeId> {
        self.with_tree(&edge.assertion_hash, |tree| {
            tree.closest_essential_ancestor(edge)
        })
    }

    /// Returns true if the path from `edge` up to its closest essential ancestor already weighs
    /// at least `threshold` blocks at `block`.
    pub fn is_essential_ancestor_confirmable(
        &self,
        edge: &Edge,
        threshold: u64,
        block: u64,
    ) -> Result<bool> {
        self.with_tree(&edge.assertion_hash, |tree| {
            let essential = tree.closest_essential_ancestor(edge)?;
            Ok(tree.compute_path_weight(&edge.id, &essential, block)? >= threshold)
        })
    }

    pub fn is_confirmable_essential_edge(
        &self,
        challenged: &AssertionHash,
        essential: &EdgeId,
        threshold: u64,
        block: u64,
    ) -> Result<ConfirmableEssentialEdge> {
        self.with_tree(challenged, |tree| {
            tree.is_confirmable_essential_edge(essential, threshold, block)
        })
    }

    /// Returns the confirmed level zero edge carrying `claim`, if one was observed.
    pub fn confirmed_edge_with_claim_exists(
        &self,
        challenged: &AssertionHash,
        claim: &ClaimId,
    ) -> Option<EdgeId> {
        self.challenge(challenged)
            .ok()
            .and_then(|challenge| challenge.confirmed_level_zero_edges.read().get(claim).copied())
    }

    /// Scans every challenge event since the creation of the latest confirmed assertion, then
    /// polls for new events every `poll_interval` until `cancel` fires.
    pub async fn start(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let result = self.watch(&cancel).await;
        if cancel.is_cancelled() {
            tracing::info!(target: "chain-watcher", "Chain watcher cancelled");
            return Ok(());
        }
        result
    }

    async fn watch(&self, cancel: &CancellationToken) -> Result<()> {
        let retry = &self.config.retry;
        let chain = &self.chain;
        let latest_confirmed = retry_until_succeeds(retry, cancel, "read latest confirmed", || async move {
            chain.latest_confirmed().await
        })
        .await?;
        let mut from_block = retry_until_succeeds(retry, cancel, "read assertion creation block", || async move {
            chain.assertion_creation_parent_block(latest_confirmed).await
        })
        .await?;
        let head = self.head_block_number(cancel).await?;

        tracing::info!(target: "chain-watcher", from = from_block, to = head, latest_confirmed = %latest_confirmed.trunc(), "Scanning for challenge events");
        self.scan_range(from_block, head, cancel).await?;
        from_block = head + 1;
        self.initial_sync_completed.store(true, Ordering::Release);
        tracing::info!(target: "chain-watcher", head, "Initial sync completed");

        while sleep_or_cancel(self.config.poll_interval, cancel).await {
            let head = self.head_block_number(cancel).await?;
            if head < from_block {
                continue;
            }
            self.scan_range(from_block, head, cancel).await?;
            from_block = head + 1;
        }
        Ok(())
    }

    async fn head_block_number(&self, cancel: &CancellationToken) -> Result<u64> {
        let chain = &self.chain;
        retry_until_succeeds(&self.config.retry, cancel, "read head block", || async move {
            chain.head_block_number().await
        })
        .await
    }

    async fn get_edge(&self, id: EdgeId, cancel: &CancellationToken) -> Result<Edge> {
        let manager = &self.challenge_manager;
        retry_until_succeeds(&self.config.retry, cancel, "read edge", || async move {
            manager
                .get_edge(id)
                .await?
                .ok_or(ChainError::EdgeNotFound(id).into())
        })
        .await
    }

    /// Processes every challenge event in `[from_block, to_block]`, in chunks of at most
    /// `max_get_log_blocks` blocks.
    pub async fn scan_range(
        &self,
        from_block: u64,
        to_block: u64,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let retry = &self.config.retry;
        let manager = &self.challenge_manager;
        let chunk = self.config.max_get_log_blocks.max(1);
        let mut start = from_block;
        while start <= to_block {
            let end = to_block.min(start.saturating_add(chunk - 1));
            tracing::trace!(target: "chain-watcher", start, end, "Filtering challenge events");

            let added = retry_until_succeeds(retry, cancel, "filter EdgeAdded", || async move {
                manager.edge_added_events(start, end).await
            })
            .await?;
            for id in added {
                let edge = self.get_edge(id, cancel).await?;
                if let Err(e) = self.add_edge(edge).await {
                    tracing::error!(target: "chain-watcher", id = %id.trunc(), "Could not process added edge: {:#}", e);
                }
            }

            let by_osp = retry_until_succeeds(retry, cancel, "filter EdgeConfirmedByOneStepProof", || async move {
                manager.edge_confirmed_by_one_step_proof_events(start, end).await
            })
            .await?;
            for id in by_osp {
                self.metrics.increment(Counter::EdgeConfirmedByOsp);
                self.process_confirmation_logged(id, cancel).await;
            }

            let by_time = retry_until_succeeds(retry, cancel, "filter EdgeConfirmedByTime", || async move {
                manager.edge_confirmed_by_time_events(start, end).await
            })
            .await?;
            for id in by_time {
                self.metrics.increment(Counter::EdgeConfirmedByTime);
                self.process_confirmation_logged(id, cancel).await;
            }

            match end.checked_add(1) {
                Some(next) => start = next,
                None => break,
            }
        }
        Ok(())
    }

    async fn process_confirmation_logged(&self, id: EdgeId, cancel: &CancellationToken) {
        if let Err(e) = self.process_edge_confirmation(id, cancel).await {
            tracing::error!(target: "chain-watcher", id = %id.trunc(), "Could not process edge confirmation: {:#}", e);
        }
    }

    /// Records the confirmation of a level zero edge. A confirmed block challenge edge wins the
    /// challenge for the assertion it claims, so a background task confirms that assertion once
    /// the rollup allows it.
    ///
    /// # Returns
    /// * The handle of the assertion confirmation task, if one was spawned.
    pub async fn process_edge_confirmation(
        &self,
        id: EdgeId,
        cancel: &CancellationToken,
    ) -> Result<Option<JoinHandle<()>>> {
        let edge = self.get_edge(id, cancel).await?;
        let Some(claim_id) = edge.claim_id else {
            return Ok(None);
        };
        if !self.config.tracks_challenge_parent(&edge.assertion_hash) {
            return Ok(None);
        }
        let chain = &self.chain;
        let challenged = edge.assertion_hash;
        let complete = retry_until_succeeds(&self.config.retry, cancel, "check challenge completion", || async move {
            chain.is_challenge_complete(challenged).await
        })
        .await?;
        if complete {
            tracing::debug!(target: "chain-watcher", id = %id.trunc(), challenged = %challenged.trunc(), "Challenge already complete, ignoring confirmation");
            return Ok(None);
        }

        let Ok(challenge) = self.challenge(&challenged) else {
            tracing::debug!(target: "chain-watcher", id = %id.trunc(), challenged = %challenged.trunc(), "Confirmed edge belongs to an untracked challenge, ignoring");
            return Ok(None);
        };
        let is_royal = {
            let mut tree = challenge.tree.write();
            tree.update_royal_edge(edge.clone());
            tree.is_royal(&edge.id)
        };
        challenge
            .confirmed_level_zero_edges
            .write()
            .insert(claim_id, edge.id);
        tracing::info!(target: "chain-watcher", id = %id.trunc(), level = %edge.level, claim = %claim_id.trunc(), royal = is_royal, "Level zero edge confirmed");
        if let Some(sink) = &self.persistence {
            if let Err(e) = sink.update_edges(vec![EdgeRecord::from_edge(&edge, is_royal)]).await {
                tracing::warn!(target: "chain-watcher", "Could not persist edge confirmation: {:#}", e);
            }
        }

        if !edge.level.is_block_level() {
            return Ok(None);
        }
        let claimed = AssertionHash(claim_id.0);
        let confirmable_block = self
            .challenged_assertion_confirmable_block(&edge, claimed)
            .await?;
        Ok(Some(self.spawn_assertion_confirmation(
            claimed,
            edge.id,
            confirmable_block,
            cancel.clone(),
        )))
    }

    /// Returns the first block the rollup accepts `claimed` as the winner of the challenge
    /// decided by the confirmed block challenge edge `edge`: after both the assertion's confirm
    /// period and the challenge grace period elapsed.
    pub async fn challenged_assertion_confirmable_block(
        &self,
        edge: &Edge,
        claimed: AssertionHash,
    ) -> Result<u64> {
        let confirmed_at = edge
            .confirmed_at_block
            .ok_or(anyhow!("edge {} is not confirmed", edge.id))?;
        let claimed_info = self.chain.read_assertion_creation_info(claimed).await?;
        let parent_info = self
            .chain
            .read_assertion_creation_info(claimed_info.parent_assertion_hash)
            .await?;
        let grace_period = self.chain.challenge_grace_period_blocks().await?;
        Ok(claimed_info
            .creation_parent_block
            .saturating_add(parent_info.confirm_period_blocks)
            .max(confirmed_at.saturating_add(grace_period)))
    }

    fn spawn_assertion_confirmation(
        &self,
        claimed: AssertionHash,
        winning_edge: EdgeId,
        confirmable_block: u64,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let chain = Arc::clone(&self.chain);
        let metrics = Arc::clone(&self.metrics);
        let interval = self.config.assertion_confirming_interval;
        tokio::spawn(async move {
            loop {
                match chain.head_block_number().await {
                    Ok(head) if head >= confirmable_block => {
                        match chain
                            .confirm_assertion_by_challenge_winner(claimed, winning_edge)
                            .await
                        {
                            Ok(Some(receipt)) => {
                                metrics.increment(Counter::AssertionConfirmed);
                                tracing::info!(target: "chain-watcher", assertion = %claimed.trunc(), tx = ?receipt.tx_hash, block = receipt.block_number, "Confirmed assertion by challenge winner");
                                return;
                            }
                            Ok(None) => {
                                tracing::info!(target: "chain-watcher", assertion = %claimed.trunc(), "Assertion already confirmed");
                                return;
                            }
                            Err(e) => {
                                metrics.increment(Counter::AssertionConfirmationErrors);
                                tracing::error!(target: "chain-watcher", assertion = %claimed.trunc(), "Could not confirm assertion: {:#}", e);
                            }
                        }
                    }
                    Ok(head) => {
                        tracing::debug!(target: "chain-watcher", assertion = %claimed.trunc(), head, confirmable_block, "Waiting to confirm assertion");
                    }
                    Err(e) => {
                        tracing::warn!(target: "chain-watcher", "Could not read head block: {:#}", e);
                    }
                }
                if !sleep_or_cancel(interval, &cancel).await {
                    return;
                }
            }
        })
    }

    async fn persist_edge(&self, edge: &Edge, is_royal: bool) {
        let Some(sink) = &self.persistence else {
            return;
        };
        if let Err(e) = sink.insert_edge(EdgeRecord::from_edge(edge, is_royal)).await {
            tracing::warn!(target: "chain-watcher", id = %edge.id.trunc(), "Could not persist edge: {:#}", e);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        metrics::CountingMetrics,
        test_utils::{
            evil_assertion, evil_provider, genesis, honest_assertion, honest_provider,
            post_block_edge, test_config, MockChain,
        },
        types::AssertionStatus,
    };
    use bold_challenger_solvers::bold::OriginId;
    use ethers::types::H256;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingEdgeManager {
        tracked: Mutex<Vec<EdgeId>>,
    }

    #[async_trait]
    impl EdgeManager for RecordingEdgeManager {
        async fn track_edge(&self, edge: RoyalEdge) -> Result<()> {
            self.tracked.lock().push(edge.id);
            Ok(())
        }
    }

    fn watcher(
        chain: &MockChain,
        edge_manager: &Arc<RecordingEdgeManager>,
        metrics: &Arc<CountingMetrics>,
    ) -> Arc<Watcher> {
        let edge_manager: Weak<dyn EdgeManager> = Arc::downgrade(edge_manager) as Weak<dyn EdgeManager>;
        Arc::new(Watcher::new(
            Arc::new(chain.clone()),
            honest_provider(),
            edge_manager,
            Arc::new(test_config()),
            metrics.clone(),
            None,
        ))
    }

    #[tokio::test]
    async fn level_zero_edges_are_classified_by_local_agreement() {
        let chain = MockChain::new();
        let honest = post_block_edge(&chain, honest_provider().as_ref(), honest_assertion()).await;
        let evil = post_block_edge(&chain, evil_provider().as_ref(), evil_assertion()).await;
        assert_eq!(honest.mutual_id, evil.mutual_id);

        let edge_manager = Arc::new(RecordingEdgeManager::default());
        let metrics = Arc::new(CountingMetrics::default());
        let watcher = watcher(&chain, &edge_manager, &metrics);

        let observed = watcher.add_edge(honest.clone()).await.unwrap();
        assert_eq!(observed.royal().map(|e| e.id), Some(honest.id));
        let observed = watcher.add_edge(evil.clone()).await.unwrap();
        assert!(observed.royal().is_none());

        // Observing the royal edge again neither re-tracks nor recounts it.
        watcher.add_edge(honest.clone()).await.unwrap();
        assert_eq!(*edge_manager.tracked.lock(), vec![honest.id]);
        assert_eq!(metrics.count(Counter::EdgeAdded), 2);
        assert!(watcher.is_royal(&honest));
        assert!(!watcher.is_royal(&evil));
        assert_eq!(watcher.royal_edges(), vec![honest.clone()]);
        assert_eq!(
            watcher.block_challenge_root_edge(&genesis()).unwrap().id,
            honest.id
        );
    }

    #[tokio::test]
    async fn sub_challenge_edges_need_a_royal_claim() {
        let chain = MockChain::new();
        let evil = post_block_edge(&chain, evil_provider().as_ref(), evil_assertion()).await;
        let edge_manager = Arc::new(RecordingEdgeManager::default());
        let metrics = Arc::new(CountingMetrics::default());
        let watcher = watcher(&chain, &edge_manager, &metrics);
        watcher.add_edge(evil.clone()).await.unwrap();

        let mut sub = evil.clone();
        sub.id = EdgeId(H256::repeat_byte(0x77));
        sub.level = ChallengeLevel(1);
        sub.origin_id = OriginId(evil.mutual_id.0);
        sub.claim_id = Some(ClaimId(evil.id.0));
        let observed = watcher.add_edge(sub).await.unwrap();
        assert!(observed.royal().is_none());
        assert!(edge_manager.tracked.lock().is_empty());
    }

    #[tokio::test]
    async fn initial_sync_picks_up_existing_edges() {
        let chain = MockChain::new();
        let honest = post_block_edge(&chain, honest_provider().as_ref(), honest_assertion()).await;
        // The evil edge lands in the block after the current head.
        chain.mine(1);
        let evil = post_block_edge(&chain, evil_provider().as_ref(), evil_assertion()).await;
        chain.state.lock().head -= 1;

        let edge_manager = Arc::new(RecordingEdgeManager::default());
        let metrics = Arc::new(CountingMetrics::default());
        let watcher = watcher(&chain, &edge_manager, &metrics);
        assert!(!watcher.is_synced());

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&watcher).start(cancel.clone()));
        tokio::time::timeout(Duration::from_secs(5), async {
            while !watcher.is_synced() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(*edge_manager.tracked.lock(), vec![honest.id]);
        assert_eq!(metrics.count(Counter::EdgeAdded), 1);

        // Edges created after the initial scan are found by polling.
        chain.mine(1);
        tokio::time::timeout(Duration::from_secs(5), async {
            while metrics.count(Counter::EdgeAdded) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(!watcher.is_royal(&evil));

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn confirmed_block_edges_confirm_their_assertion() {
        let chain = MockChain::new();
        let honest = post_block_edge(&chain, honest_provider().as_ref(), honest_assertion()).await;
        let edge_manager = Arc::new(RecordingEdgeManager::default());
        let metrics = Arc::new(CountingMetrics::default());
        let watcher = watcher(&chain, &edge_manager, &metrics);
        watcher.add_edge(honest.clone()).await.unwrap();

        chain.state.lock().inherited.insert(honest.id, 10);
        chain.confirm_edge_by_time(honest.id, None).await.unwrap();
        let confirmed = chain.edge(honest.id);
        assert_eq!(
            watcher
                .challenged_assertion_confirmable_block(&confirmed, honest_assertion())
                .await
                .unwrap(),
            10
        );
        chain.state.lock().grace_period = 3;
        assert_eq!(
            watcher
                .challenged_assertion_confirmable_block(&confirmed, honest_assertion())
                .await
                .unwrap(),
            13
        );
        chain.state.lock().grace_period = 0;

        let cancel = CancellationToken::new();
        let handle = watcher
            .process_edge_confirmation(honest.id, &cancel)
            .await
            .unwrap()
            .unwrap();
        handle.await.unwrap();
        assert_eq!(
            watcher.confirmed_edge_with_claim_exists(&genesis(), &ClaimId(honest_assertion().0)),
            Some(honest.id)
        );
        assert_eq!(metrics.count(Counter::AssertionConfirmed), 1);
        assert_eq!(
            chain.assertion_status(honest_assertion()).await.unwrap(),
            AssertionStatus::Confirmed
        );

        // The challenge is over, later confirmations are ignored.
        assert!(watcher
            .process_edge_confirmation(honest.id, &cancel)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn confirmations_in_untracked_challenges_are_ignored() {
        let chain = MockChain::new();
        let honest = post_block_edge(&chain, honest_provider().as_ref(), honest_assertion()).await;
        let edge_manager = Arc::new(RecordingEdgeManager::default());
        let metrics = Arc::new(CountingMetrics::default());
        let watcher = watcher(&chain, &edge_manager, &metrics);

        // The edge is confirmed on chain without the watcher ever observing it.
        chain.state.lock().inherited.insert(honest.id, 10);
        chain.confirm_edge_by_time(honest.id, None).await.unwrap();

        let cancel = CancellationToken::new();
        assert!(watcher
            .process_edge_confirmation(honest.id, &cancel)
            .await
            .unwrap()
            .is_none());
        assert!(watcher.lower_most_royal_edges(&genesis()).is_err());
        assert_eq!(
            watcher.confirmed_edge_with_claim_exists(&genesis(), &ClaimId(honest_assertion().0)),
            None
        );
        assert_eq!(metrics.count(Counter::AssertionConfirmed), 0);
    }
}
