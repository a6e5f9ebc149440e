//! The state module holds the [AgentState] struct, a serializable snapshot of everything the
//! drivers share, reported periodically in the logs.

use crate::{tracker::FsmSummary, Manager};
use bold_challenger_solvers::bold::{Edge, EdgeId};
use serde::Serialize;
use std::collections::BTreeMap;

/// The state of one running edge tracker.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerState {
    pub edge_id: EdgeId,
    #[serde(flatten)]
    pub summary: FsmSummary,
}

/// The [AgentState] struct holds a snapshot of the challenge agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentState {
    pub validator_name: String,
    /// True once the chain watcher caught up with the chain head.
    pub synced: bool,
    pub trackers: Vec<TrackerState>,
    pub royal_edges: Vec<Edge>,
    /// Every counter, by name.
    pub counters: BTreeMap<String, u64>,
}

impl AgentState {
    /// Collects the current state of `manager`.
    pub fn collect(manager: &Manager) -> Self {
        let mut trackers: Vec<TrackerState> = manager
            .tracker_summaries()
            .into_iter()
            .map(|(edge_id, summary)| TrackerState { edge_id, summary })
            .collect();
        trackers.sort_by_key(|t| t.edge_id.0);
        Self {
            validator_name: manager.config().validator_name.clone(),
            synced: manager.watcher().is_synced(),
            trackers,
            royal_edges: manager.watcher().royal_edges(),
            counters: manager
                .metrics()
                .snapshot()
                .into_iter()
                .map(|(counter, count)| (counter.to_string(), count))
                .collect(),
        }
    }
}
