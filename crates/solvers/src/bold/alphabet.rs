//! The alphabet module contains a deterministic implementation of the execution engine
//! collectors, where every L2 message appends one byte of an alphabet trace to the state.
//! Two providers built from traces that differ at some index disagree on every history from
//! the message at that index onward, which is all a challenge needs to play out end to end.

use super::{
    provider::{
        ExecutionProvider, HashCollectorConfig, L2MessageStateCollector, MachineHashCollector,
        ProofCollector,
    },
    AssociatedAssertionMetadata, ExecutionState, GlobalState, Height, MachineStatus,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::{
    abi::{self, Token},
    types::{Bytes, H256, U256},
    utils::keccak256,
};
use std::sync::Arc;

/// A struct containing the alphabet trace that all collected hashes are derived from.
#[derive(Debug, Clone)]
pub struct AlphabetProvider {
    /// Our full execution trace. Message `n` (1-indexed) executes `trace[n - 1]`.
    pub trace: Arc<[u8]>,
}

impl AlphabetProvider {
    /// Creates a new [AlphabetProvider] over `trace`.
    pub fn new(trace: Arc<[u8]>) -> Self {
        Self { trace }
    }

    /// Returns the byte executed by message `height`, or zero for the starting state.
    fn byte_at(&self, height: Height) -> u8 {
        if height == 0 || self.trace.is_empty() {
            return 0;
        }
        let index = (height.min(self.trace.len() as u64) - 1) as usize;
        self.trace[index]
    }

    /// Returns the state hash after `height` messages.
    pub fn message_state(&self, height: Height) -> H256 {
        H256(keccak256(abi::encode(&[
            Token::Uint(U256::from(height)),
            Token::Uint(U256::from(self.byte_at(height))),
        ])))
    }

    /// Returns the machine hash at `opcode` while executing the message after `block`.
    pub fn machine_hash(&self, block: Height, opcode: u64) -> H256 {
        if opcode == 0 {
            return self.message_state(block);
        }
        H256(keccak256(abi::encode(&[
            Token::Uint(U256::from(block)),
            Token::Uint(U256::from(opcode)),
            Token::Uint(U256::from(self.byte_at(block + 1))),
        ])))
    }
}

#[async_trait]
impl L2MessageStateCollector for AlphabetProvider {
    async fn l2_message_states_up_to(
        &self,
        from_state: GlobalState,
        batch_limit: u64,
        to_height: Option<Height>,
    ) -> Result<Vec<H256>> {
        let available = batch_limit.saturating_sub(from_state.batch);
        let mut last = (self.trace.len() as u64).min(available);
        if let Some(to) = to_height {
            last = last.min(to);
        }
        Ok((0..=last).map(|h| self.message_state(h)).collect())
    }
}

#[async_trait]
impl MachineHashCollector for AlphabetProvider {
    async fn collect_machine_hashes(&self, cfg: &HashCollectorConfig) -> Result<Vec<H256>> {
        (0..cfg.num_desired_hashes)
            .map(|i| {
                let opcode = i
                    .checked_mul(cfg.step_size)
                    .and_then(|offset| offset.checked_add(cfg.machine_start_index))
                    .ok_or(anyhow!("machine index overflow collecting {}", cfg))?;
                Ok(self.machine_hash(cfg.block_challenge_height, opcode))
            })
            .collect()
    }
}

#[async_trait]
impl ProofCollector for AlphabetProvider {
    async fn collect_proof(
        &self,
        _metadata: &AssociatedAssertionMetadata,
        block_challenge_height: Height,
        machine_index: u64,
    ) -> Result<Bytes> {
        Ok(abi::encode(&[
            Token::Uint(U256::from(block_challenge_height)),
            Token::Uint(U256::from(machine_index)),
            Token::Uint(U256::from(self.byte_at(block_challenge_height + 1))),
        ])
        .into())
    }
}

#[async_trait]
impl ExecutionProvider for AlphabetProvider {
    async fn execution_state_after_previous_state(
        &self,
        max_inbox_count: u64,
        previous_global_state: Option<&GlobalState>,
    ) -> Result<ExecutionState> {
        let start = previous_global_state.copied().unwrap_or_default();
        let available = max_inbox_count.saturating_sub(start.batch);
        let height = (self.trace.len() as u64).min(available);
        Ok(ExecutionState {
            global_state: GlobalState {
                block_hash: self.message_state(height),
                send_root: H256::zero(),
                batch: start.batch + height,
                pos_in_batch: 0,
            },
            machine_status: MachineStatus::Finished,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn message_states_stop_at_the_batch_limit() {
        let p = AlphabetProvider::new(b"abcdef".to_vec().into());
        let from = GlobalState {
            batch: 2,
            ..Default::default()
        };
        let states = p.l2_message_states_up_to(from, 5, None).await.unwrap();
        assert_eq!(states.len(), 4);
        let states = p.l2_message_states_up_to(from, 5, Some(1)).await.unwrap();
        assert_eq!(states.len(), 2);
    }

    #[test]
    fn machine_hashes_start_from_the_agreed_block_state() {
        let honest = AlphabetProvider::new(b"abc".to_vec().into());
        let evil = AlphabetProvider::new(b"abX".to_vec().into());
        assert_eq!(honest.machine_hash(2, 0), evil.machine_hash(2, 0));
        assert_ne!(honest.machine_hash(2, 1), evil.machine_hash(2, 1));
        assert_eq!(honest.machine_hash(1, 1), evil.machine_hash(1, 1));
    }
}
