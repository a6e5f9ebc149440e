//! The `confirmation` module contains the [ChallengeConfirmer], which confirms an essential
//! edge by time once the local royal tree says every path beneath it is heavy enough.
//!
//! The challenge manager only knows an edge's inherited timer once it has been pushed up from
//! the leaves. The confirmer walks every royal branch, leaf to block challenge root, and
//! refreshes the cached timers along it before confirming.

use crate::{
    chain::{is_cached_time_sufficient, AssertionChain, SpecChallengeManager, TxReceipt},
    config::DriverConfig,
    metrics::{Counter, MetricsSink},
    retry::{retry_until_succeeds, RetryError},
    utils::sleep_or_cancel,
    watcher::Watcher,
};
use anyhow::Result;
use bold_challenger_solvers::bold::{AssertionHash, EdgeId, RoyalEdge};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Failures of a confirmation job.
#[derive(Debug, thiserror::Error)]
pub enum ConfirmationError {
    /// The local tree said the edge was confirmable, but the timer the contract accumulated
    /// after every branch update landed disagrees.
    #[error("on-chain timer {timer} of edge {edge} is below the challenge period {threshold} after the confirmation job")]
    OnchainTimerBelowThreshold {
        edge: EdgeId,
        timer: u64,
        threshold: u64,
    },
}

/// The [ChallengeConfirmer] struct pushes inherited timers on-chain and confirms essential
/// edges by time.
pub struct ChallengeConfirmer {
    watcher: Arc<Watcher>,
    chain: Arc<dyn AssertionChain>,
    challenge_manager: Arc<dyn SpecChallengeManager>,
    config: Arc<DriverConfig>,
    metrics: Arc<dyn MetricsSink>,
}

impl ChallengeConfirmer {
    pub fn new(
        watcher: Arc<Watcher>,
        chain: Arc<dyn AssertionChain>,
        config: Arc<DriverConfig>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            watcher,
            challenge_manager: chain.spec_challenge_manager(),
            chain,
            config,
            metrics,
        }
    }

    /// Confirms the essential edge `root` by time.
    ///
    /// Must only be called once the local royal tree computed a timer of at least
    /// `challenge_period` for `root`. Every chain call is retried until it succeeds or the
    /// job is cancelled.
    ///
    /// # Arguments
    /// * `challenged` - The assertion whose children are challenged.
    /// * `computed_timer` - The locally computed timer written to the end of every branch.
    /// * `root` - The essential edge to confirm.
    /// * `claimed` - The assertion the royal block challenge edge claims.
    /// * `challenge_period` - The timer the contract requires for confirmation.
    ///
    /// # Returns
    /// * [ConfirmationError::OnchainTimerBelowThreshold] if the contract's timer never reached
    ///   the challenge period.
    pub async fn begin_confirmation_job(
        &self,
        challenged: AssertionHash,
        computed_timer: u64,
        root: &RoyalEdge,
        claimed: AssertionHash,
        challenge_period: u64,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let retry = &self.config.retry;
        let watcher = &self.watcher;
        let manager = &self.challenge_manager;
        let validator = self.config.validator_name.as_str();
        tracing::info!(target: "challenge-confirmer", validator, challenged = %challenged.trunc(), essential = %root.id.trunc(), level = %root.level, computed_timer, "Starting challenge confirmation job");

        let leaves = retry_until_succeeds(retry, cancel, "fetch lower most royal edges", || async move {
            watcher.lower_most_royal_edges(&challenged)
        })
        .await?;
        let mut branches = Vec::with_capacity(leaves.len());
        for leaf in &leaves {
            let leaf_id = leaf.id;
            let ancestors = retry_until_succeeds(retry, cancel, "compute ancestors", || async move {
                watcher.compute_ancestors(&challenged, &leaf_id)
            })
            .await?;
            let mut branch = vec![leaf_id];
            branch.extend(ancestors.iter().map(|e| e.id));
            branches.push(branch);
        }
        tracing::info!(target: "challenge-confirmer", validator, branches = branches.len(), "Computed royal branches to update");

        let root_id = root.id;
        let mut last_tx: Option<TxReceipt> = None;
        for (i, branch) in branches.iter().enumerate() {
            let tx = retry_until_succeeds(retry, cancel, "update inherited timers", || async move {
                match manager
                    .multi_update_inherited_timers(branch, computed_timer)
                    .await
                {
                    Ok(receipt) => Ok(Some(receipt)),
                    Err(e) if is_cached_time_sufficient(&e) => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await?;
            match tx {
                Some(receipt) => last_tx = Some(receipt),
                None => {
                    tracing::info!(target: "challenge-confirmer", validator, branch = i, "Cached timer of branch already sufficient")
                }
            }

            let root_timer = retry_until_succeeds(retry, cancel, "read inherited timer", || async move {
                manager.inherited_timer(root_id).await
            })
            .await?;
            if root_timer >= challenge_period {
                tracing::info!(target: "challenge-confirmer", validator, branch = i, root_timer, "Essential edge timer reached the challenge period early");
                return self.confirm_by_time(root, claimed, cancel).await;
            }
        }

        if let Some(receipt) = last_tx {
            self.wait_until_safe(receipt, cancel).await?;
        }

        let onchain_timer = retry_until_succeeds(retry, cancel, "read inherited timer", || async move {
            manager.inherited_timer(root_id).await
        })
        .await?;
        if onchain_timer < challenge_period {
            self.metrics.increment(Counter::OnchainTimerDiffered);
            tracing::error!(target: "challenge-confirmer", validator, essential = %root.id.trunc(), onchain_timer, challenge_period, "On-chain timer below the challenge period after the confirmation job");
            return Err(ConfirmationError::OnchainTimerBelowThreshold {
                edge: root.id,
                timer: onchain_timer,
                threshold: challenge_period,
            }
            .into());
        }
        self.confirm_by_time(root, claimed, cancel).await
    }

    async fn confirm_by_time(
        &self,
        root: &RoyalEdge,
        claimed: AssertionHash,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let retry = &self.config.retry;
        let chain = &self.chain;
        let manager = &self.challenge_manager;
        let claim_state = if root.level.is_block_level() {
            Some(
                retry_until_succeeds(retry, cancel, "read claimed assertion", || async move {
                    chain.read_assertion_creation_info(claimed).await
                })
                .await?,
            )
        } else {
            None
        };
        let root_id = root.id;
        let claim_state = claim_state.as_ref();
        let receipt = retry_until_succeeds(retry, cancel, "confirm edge by time", || async move {
            manager.confirm_edge_by_time(root_id, claim_state).await
        })
        .await?;
        tracing::info!(target: "challenge-confirmer", validator = %self.config.validator_name, essential = %root.id.trunc(), tx = ?receipt.tx_hash, "Essential edge confirmed by time");
        Ok(())
    }

    /// Waits until `receipt`'s block is safe, following the transaction if a reorg moves it.
    async fn wait_until_safe(&self, receipt: TxReceipt, cancel: &CancellationToken) -> Result<()> {
        let retry = &self.config.retry;
        let chain = &self.chain;
        let poll = self.config.average_block_time;
        let mut receipt = receipt;
        loop {
            let safe = retry_until_succeeds(retry, cancel, "read safe block", || async move {
                chain.safe_block_number().await
            })
            .await?;
            if safe >= receipt.block_number {
                let tx_hash = receipt.tx_hash;
                let mined = tokio::select! {
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled(String::from("wait for transaction")).into()),
                    mined = chain.wait_mined(tx_hash, poll) => mined?,
                };
                if mined.block_number == receipt.block_number {
                    return Ok(());
                }
                tracing::warn!(target: "challenge-confirmer", tx = ?tx_hash, from = receipt.block_number, to = mined.block_number, "Transaction moved blocks, waiting again");
                receipt = mined;
                continue;
            }
            let blocks_left = u32::try_from(receipt.block_number - safe).unwrap_or(u32::MAX);
            tracing::debug!(target: "challenge-confirmer", safe, target_block = receipt.block_number, "Waiting for transaction to be safe");
            if !sleep_or_cancel(poll.saturating_mul(blocks_left), cancel).await {
                return Err(RetryError::Cancelled(String::from("wait for safe block")).into());
            }
        }
    }
}
