//! The `metrics` module contains the [MetricsSink] injected into the watcher, edge trackers and
//! challenge confirmer, and the [ChallengerMetrics] it reports to.

use metrics_derive::Metrics;
use parking_lot::Mutex;
use std::{collections::HashMap, fmt};

/// The counters the challenge agent increments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Counter {
    TrackerSpawned,
    TrackerDespawned,
    Bisected,
    /// Level zero edges posted by this validator, at any level.
    LayerZeroLeaves,
    EdgeAdded,
    EdgeConfirmedByOsp,
    EdgeConfirmedByTime,
    /// Five or more evil level zero edges seen at one level of one challenge.
    HighEvilEdges,
    AssertionConfirmed,
    AssertionConfirmationErrors,
    /// The on-chain inherited timer was below the threshold after the branch updates landed.
    OnchainTimerDiffered,
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Counter::TrackerSpawned => "tracker_spawned",
            Counter::TrackerDespawned => "tracker_despawned",
            Counter::Bisected => "bisected",
            Counter::LayerZeroLeaves => "layer_zero_leaves",
            Counter::EdgeAdded => "edge_added",
            Counter::EdgeConfirmedByOsp => "edge_confirmed_by_osp",
            Counter::EdgeConfirmedByTime => "edge_confirmed_by_time",
            Counter::HighEvilEdges => "high_evil_edges",
            Counter::AssertionConfirmed => "assertion_confirmed",
            Counter::AssertionConfirmationErrors => "assertion_confirmation_errors",
            Counter::OnchainTimerDiffered => "onchain_timer_differed",
        };
        write!(f, "{}", name)
    }
}

/// Metrics for the `bold_challenger` agent, reported to the installed `metrics` recorder.
#[derive(Metrics, Clone)]
#[metrics(scope = "bold_challenger")]
pub struct ChallengerMetrics {
    /// Number of edge trackers spawned.
    #[metric(describe = "Number of edge trackers spawned")]
    pub tracker_spawned: metrics::Counter,

    /// Number of edge trackers that finished.
    #[metric(describe = "Number of edge trackers that finished")]
    pub tracker_despawned: metrics::Counter,

    /// Number of bisections submitted.
    #[metric(describe = "Number of bisections submitted")]
    pub bisected: metrics::Counter,

    /// Number of level zero edges posted.
    #[metric(describe = "Number of level zero edges posted, at any level")]
    pub layer_zero_leaves: metrics::Counter,

    /// Number of edges observed on chain.
    #[metric(describe = "Number of edges observed on chain")]
    pub edge_added: metrics::Counter,

    #[metric(describe = "Number of edges confirmed by one step proof")]
    pub edge_confirmed_by_osp: metrics::Counter,

    #[metric(describe = "Number of edges confirmed by time")]
    pub edge_confirmed_by_time: metrics::Counter,

    /// Number of times a challenge level crossed the evil level zero edge threshold.
    #[metric(describe = "Number of evil level zero edge alarms")]
    pub high_evil_edges: metrics::Counter,

    #[metric(describe = "Number of assertions confirmed by challenge winner")]
    pub assertion_confirmed: metrics::Counter,

    #[metric(describe = "Number of failed assertion confirmations")]
    pub assertion_confirmation_errors: metrics::Counter,

    /// Number of confirmation jobs whose on-chain timer stayed below the challenge period.
    #[metric(describe = "Number of confirmation jobs whose on-chain timer was too low")]
    pub onchain_timer_differed: metrics::Counter,
}

impl ChallengerMetrics {
    fn counter(&self, counter: Counter) -> &metrics::Counter {
        match counter {
            Counter::TrackerSpawned => &self.tracker_spawned,
            Counter::TrackerDespawned => &self.tracker_despawned,
            Counter::Bisected => &self.bisected,
            Counter::LayerZeroLeaves => &self.layer_zero_leaves,
            Counter::EdgeAdded => &self.edge_added,
            Counter::EdgeConfirmedByOsp => &self.edge_confirmed_by_osp,
            Counter::EdgeConfirmedByTime => &self.edge_confirmed_by_time,
            Counter::HighEvilEdges => &self.high_evil_edges,
            Counter::AssertionConfirmed => &self.assertion_confirmed,
            Counter::AssertionConfirmationErrors => &self.assertion_confirmation_errors,
            Counter::OnchainTimerDiffered => &self.onchain_timer_differed,
        }
    }
}

// `Debug` for `ChallengerMetrics` is generated by `#[derive(Metrics)]`.

/// A sink for counter increments.
pub trait MetricsSink: Send + Sync + fmt::Debug {
    fn increment(&self, counter: Counter);

    /// Returns every non-zero counter the sink keeps locally, if it keeps any.
    fn snapshot(&self) -> Vec<(Counter, u64)> {
        Vec::new()
    }
}

/// Discards every increment.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _counter: Counter) {}
}

impl MetricsSink for ChallengerMetrics {
    fn increment(&self, counter: Counter) {
        self.counter(counter).increment(1);
    }
}

/// Reports to [ChallengerMetrics] and keeps an in-process tally for the state report.
#[derive(Debug, Default)]
pub struct CountingMetrics {
    metrics: ChallengerMetrics,
    tally: Mutex<HashMap<Counter, u64>>,
}

impl CountingMetrics {
    /// Returns the number of times `counter` was incremented.
    pub fn count(&self, counter: Counter) -> u64 {
        self.tally.lock().get(&counter).copied().unwrap_or_default()
    }
}

impl MetricsSink for CountingMetrics {
    fn increment(&self, counter: Counter) {
        self.metrics.increment(counter);
        *self.tally.lock().entry(counter).or_default() += 1;
    }

    fn snapshot(&self) -> Vec<(Counter, u64)> {
        let mut counts: Vec<_> = self.tally.lock().iter().map(|(c, n)| (*c, *n)).collect();
        counts.sort();
        counts
    }
}
