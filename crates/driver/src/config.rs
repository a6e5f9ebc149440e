//! The `config` module contains the [DriverConfig].

use crate::retry::RetryStrategy;
use bold_challenger_solvers::bold::AssertionHash;
use std::time::Duration;

/// The [DriverConfig] struct contains the tunables shared by the watcher, the edge trackers and
/// the challenge confirmer.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// The name of this validator, attached to every log line.
    pub validator_name: String,
    /// How often the watcher polls for new challenge events.
    pub poll_interval: Duration,
    /// How often a won challenge retries confirming its assertion.
    pub assertion_confirming_interval: Duration,
    /// The expected time between parent chain blocks, used to sleep until a block is safe.
    pub average_block_time: Duration,
    /// The widest block range requested in a single log query.
    pub max_get_log_blocks: u64,
    /// How often the block notifier checks for a new head block.
    pub new_block_poll_interval: Duration,
    /// How long a new block notification waits on a single slow tracker.
    pub event_bus_send_timeout: Duration,
    /// If non-empty, only challenges on the children of these assertions are tracked.
    pub track_challenge_parent_assertion_hashes: Vec<AssertionHash>,
    /// Assertions this validator agrees with and opens block challenges for on startup.
    pub challenge_assertion_hashes: Vec<AssertionHash>,
    /// How often the agent state is reported in the logs.
    pub state_report_interval: Duration,
    /// The retry strategy for chain reads the protocol needs to eventually succeed.
    pub retry: RetryStrategy,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            validator_name: String::from("bold-challenger"),
            poll_interval: Duration::from_millis(500),
            assertion_confirming_interval: Duration::from_secs(60),
            average_block_time: Duration::from_secs(12),
            max_get_log_blocks: 1000,
            new_block_poll_interval: Duration::from_secs(1),
            event_bus_send_timeout: Duration::from_millis(100),
            track_challenge_parent_assertion_hashes: Vec::new(),
            challenge_assertion_hashes: Vec::new(),
            state_report_interval: Duration::from_secs(30),
            retry: RetryStrategy::default(),
        }
    }
}

impl DriverConfig {
    /// Creates a new [DriverConfig] with default tunables for the validator `validator_name`.
    pub fn new(validator_name: impl Into<String>) -> Self {
        Self {
            validator_name: validator_name.into(),
            ..Default::default()
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_assertion_confirming_interval(mut self, interval: Duration) -> Self {
        self.assertion_confirming_interval = interval;
        self
    }

    pub fn with_average_block_time(mut self, block_time: Duration) -> Self {
        self.average_block_time = block_time;
        self
    }

    /// Sets the widest log query range. Zero is raised to one.
    pub fn with_max_get_log_blocks(mut self, blocks: u64) -> Self {
        self.max_get_log_blocks = blocks.max(1);
        self
    }

    pub fn with_new_block_poll_interval(mut self, interval: Duration) -> Self {
        self.new_block_poll_interval = interval;
        self
    }

    pub fn with_event_bus_send_timeout(mut self, timeout: Duration) -> Self {
        self.event_bus_send_timeout = timeout;
        self
    }

    pub fn with_track_challenge_parent_assertion_hashes(
        mut self,
        hashes: Vec<AssertionHash>,
    ) -> Self {
        self.track_challenge_parent_assertion_hashes = hashes;
        self
    }

    pub fn with_challenge_assertion_hashes(mut self, hashes: Vec<AssertionHash>) -> Self {
        self.challenge_assertion_hashes = hashes;
        self
    }

    pub fn with_state_report_interval(mut self, interval: Duration) -> Self {
        self.state_report_interval = interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryStrategy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns true if challenges on the children of `parent` should be tracked.
    pub fn tracks_challenge_parent(&self, parent: &AssertionHash) -> bool {
        self.track_challenge_parent_assertion_hashes.is_empty()
            || self.track_challenge_parent_assertion_hashes.contains(parent)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ethers::types::H256;

    #[test]
    fn builders_override_defaults() {
        let config = DriverConfig::new("alice")
            .with_poll_interval(Duration::from_millis(10))
            .with_max_get_log_blocks(0);
        assert_eq!(config.validator_name, "alice");
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.max_get_log_blocks, 1);
        assert_eq!(config.average_block_time, Duration::from_secs(12));
    }

    #[test]
    fn an_empty_allow_list_tracks_every_parent() {
        let parent = AssertionHash(H256::repeat_byte(1));
        let config = DriverConfig::default();
        assert!(config.tracks_challenge_parent(&parent));

        let config = config
            .with_track_challenge_parent_assertion_hashes(vec![AssertionHash(H256::repeat_byte(2))]);
        assert!(!config.tracks_challenge_parent(&parent));
        assert!(config.tracks_challenge_parent(&AssertionHash(H256::repeat_byte(2))));
    }
}
