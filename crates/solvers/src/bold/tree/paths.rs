//! Local timers and path weights over the royal tree.
//!
//! An edge's local timer is the number of blocks it spent unrivaled, derived from the creation
//! blocks of every edge sharing its mutual id. A path weight is the sum of local timers along
//! an ancestor chain, and is what the challenge manager contract accumulates as an edge's
//! inherited timer.

use super::RoyalChallengeTree;
use crate::bold::{error::TreeError, ClaimId, Edge, EdgeId};

/// The result of [RoyalChallengeTree::is_confirmable_essential_edge].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfirmableEssentialEdge {
    /// True if every path below the essential edge weighs at least the threshold.
    pub confirmable: bool,
    /// Every path from a royal leaf up to the essential edge, leaf first.
    pub essential_paths: Vec<Vec<EdgeId>>,
    /// The weight of the lightest path.
    pub min_path_weight: u64,
}

impl RoyalChallengeTree {
    /// Returns true if no rival of `edge` had been created by `block`.
    pub fn is_unrivaled_at_block(&self, edge: &Edge, block: u64) -> bool {
        match self.earliest_rival_creation(edge) {
            Some(rival_created) => rival_created > block,
            None => true,
        }
    }

    fn earliest_rival_creation(&self, edge: &Edge) -> Option<u64> {
        self.creation_blocks.get(&edge.mutual_id).and_then(|edges| {
            edges
                .iter()
                .filter(|(id, _)| **id != edge.id)
                .map(|(_, created)| *created)
                .min()
        })
    }

    /// Returns the number of blocks `edge` had spent unrivaled as of `block`.
    ///
    /// An edge rivaled by an earlier edge has a timer of zero. Otherwise the timer runs from the
    /// edge's creation until the first rival was created, or until `block`.
    pub fn local_timer(&self, edge: &Edge, block: u64) -> u64 {
        if block < edge.created_at_block {
            return 0;
        }
        if self.is_unrivaled_at_block(edge, block) {
            return block - edge.created_at_block;
        }
        self.earliest_rival_creation(edge)
            .map(|rival| rival.saturating_sub(edge.created_at_block))
            .unwrap_or_default()
    }

    /// Sums the local timers of `child` and each of its ancestors up to and including
    /// `ancestor`.
    pub fn compute_path_weight(
        &self,
        child: &EdgeId,
        ancestor: &EdgeId,
        block: u64,
    ) -> Result<u64, TreeError> {
        let child_edge = self.get_or_err(child)?;
        self.get_or_err(ancestor)?;
        let mut weight = self.local_timer(child_edge, block);
        if child == ancestor {
            return Ok(weight);
        }
        for edge in self.compute_ancestors(child)? {
            weight = weight.saturating_add(self.local_timer(&edge, block));
            if edge.id == *ancestor {
                return Ok(weight);
            }
        }
        Err(TreeError::AncestorNotFound {
            child: *child,
            ancestor: *ancestor,
        })
    }

    /// Determines whether an essential edge has accumulated `threshold` blocks along every royal
    /// path beneath it.
    ///
    /// Paths descend through royal children and, from length one edges, into the royal level
    /// zero edge that claims them. Each path's weight saturates instead of overflowing. The
    /// lightest path decides.
    pub fn is_confirmable_essential_edge(
        &self,
        essential: &EdgeId,
        threshold: u64,
        block: u64,
    ) -> Result<ConfirmableEssentialEdge, TreeError> {
        let edge = self.get_or_err(essential)?;
        if edge.claim_id.is_none() {
            return Err(TreeError::NotEssential(*essential));
        }

        let mut paths = Vec::new();
        let mut weights = Vec::new();
        let mut stack = vec![(edge, vec![edge.id], self.local_timer(edge, block))];
        while let Some((current, path, weight)) = stack.pop() {
            if let Some((lower, upper)) = self.royal_children(current)? {
                for child in [lower, upper] {
                    let mut child_path = path.clone();
                    child_path.push(child.id);
                    let child_weight = weight.saturating_add(self.local_timer(child, block));
                    stack.push((child, child_path, child_weight));
                }
                continue;
            }
            if current.length() == 1 && !current.is_one_step_proof_edge() {
                if let Some(claiming) = self.claiming_edge(&ClaimId(current.id.0)) {
                    let mut claiming_path = path.clone();
                    claiming_path.push(claiming.id);
                    let claiming_weight =
                        weight.saturating_add(self.local_timer(claiming, block));
                    stack.push((claiming, claiming_path, claiming_weight));
                    continue;
                }
            }
            let mut leaf_first = path;
            leaf_first.reverse();
            paths.push(leaf_first);
            weights.push(weight);
        }

        let min_path_weight = weights.iter().copied().min().unwrap_or_default();
        Ok(ConfirmableEssentialEdge {
            confirmable: min_path_weight >= threshold,
            essential_paths: paths,
            min_path_weight,
        })
    }
}

#[cfg(test)]
mod test {
    use super::super::test_utils::*;
    use super::*;
    use crate::bold::{AssertionHash, OriginId, RoyalEdge};
    use ethers::types::H256;

    fn root_claim() -> Option<ClaimId> {
        Some(ClaimId(H256::repeat_byte(2)))
    }

    #[test]
    fn local_timers_stop_when_rivaled() {
        let origin = OriginId(H256::repeat_byte(1));
        let honest = edge(0, origin, 0, 16, 0, root_claim(), 10);
        let evil = edge(0, origin, 0, 16, 7, root_claim(), 15);
        assert_eq!(honest.mutual_id, evil.mutual_id);

        let mut tree = RoyalChallengeTree::new(AssertionHash::default(), TOTAL_LEVELS);
        tree.add_royal_edge(RoyalEdge::assume_royal(honest.clone()));
        assert_eq!(tree.local_timer(&honest, 5), 0);
        assert_eq!(tree.local_timer(&honest, 12), 2);

        tree.record_edge_creation(&evil);
        assert!(tree.is_unrivaled_at_block(&honest, 14));
        assert!(!tree.is_unrivaled_at_block(&honest, 15));
        assert_eq!(tree.local_timer(&honest, 14), 4);
        assert_eq!(tree.local_timer(&honest, 100), 5);
        // The later edge was rivaled from birth.
        assert_eq!(tree.local_timer(&evil, 100), 0);
    }

    #[test]
    fn path_weight_sums_up_to_the_ancestor() {
        let origin = OriginId(H256::repeat_byte(1));
        let mut root = edge(0, origin, 0, 16, 0, root_claim(), 10);
        let (lower, upper) = bisect(&mut root, 20);
        let mut tree = RoyalChallengeTree::new(AssertionHash::default(), TOTAL_LEVELS);
        for e in [&root, &lower, &upper] {
            tree.add_royal_edge(RoyalEdge::assume_royal(e.clone()));
        }
        // Root rivaled at block 12, lower child rivaled at block 25.
        tree.record_edge_creation(&edge(0, origin, 0, 16, 7, root_claim(), 12));
        tree.record_edge_creation(&edge(0, origin, 0, 8, 7, None, 25));

        assert_eq!(tree.compute_path_weight(&lower.id, &lower.id, 30).unwrap(), 5);
        assert_eq!(tree.compute_path_weight(&lower.id, &root.id, 30).unwrap(), 5 + 2);
        assert_eq!(tree.compute_path_weight(&upper.id, &root.id, 30).unwrap(), 10 + 2);
        assert_eq!(
            tree.compute_path_weight(&root.id, &lower.id, 30),
            Err(TreeError::AncestorNotFound {
                child: root.id,
                ancestor: lower.id
            })
        );
        assert_eq!(
            tree.compute_path_weight(&EdgeId::default(), &root.id, 30),
            Err(TreeError::NotTracked(EdgeId::default()))
        );
    }

    #[test]
    fn confirmability_takes_the_lightest_path() {
        let origin = OriginId(H256::repeat_byte(1));
        let mut root = edge(0, origin, 0, 16, 0, root_claim(), 10);
        let (lower, upper) = bisect(&mut root, 20);
        let mut tree = RoyalChallengeTree::new(AssertionHash::default(), TOTAL_LEVELS);
        for e in [&root, &lower, &upper] {
            tree.add_royal_edge(RoyalEdge::assume_royal(e.clone()));
        }
        tree.record_edge_creation(&edge(0, origin, 0, 16, 7, root_claim(), 12));
        tree.record_edge_creation(&edge(0, origin, 0, 8, 7, None, 25));

        let result = tree.is_confirmable_essential_edge(&root.id, 7, 30).unwrap();
        assert!(result.confirmable);
        assert_eq!(result.min_path_weight, 7);
        assert_eq!(result.essential_paths.len(), 2);
        assert!(result
            .essential_paths
            .iter()
            .all(|p| *p.last().unwrap() == root.id));

        let result = tree.is_confirmable_essential_edge(&root.id, 8, 30).unwrap();
        assert!(!result.confirmable);

        assert_eq!(
            tree.is_confirmable_essential_edge(&lower.id, 0, 30),
            Err(TreeError::NotEssential(lower.id))
        );
    }

    #[test]
    fn confirmability_waits_for_both_children() {
        let origin = OriginId(H256::repeat_byte(1));
        let mut root = edge(0, origin, 0, 16, 0, root_claim(), 10);
        let (lower, _) = bisect(&mut root, 20);
        let mut tree = RoyalChallengeTree::new(AssertionHash::default(), TOTAL_LEVELS);
        tree.add_royal_edge(RoyalEdge::assume_royal(root.clone()));
        tree.add_royal_edge(RoyalEdge::assume_royal(lower));
        assert_eq!(
            tree.is_confirmable_essential_edge(&root.id, 0, 30),
            Err(TreeError::ChildrenNotYetSeen(root.id))
        );
    }

    #[test]
    fn confirmability_descends_into_claiming_edges() {
        let (all, osp) = full_royal_chain(10);
        let mut tree = RoyalChallengeTree::new(AssertionHash::default(), TOTAL_LEVELS);
        for e in &all {
            tree.add_royal_edge(RoyalEdge::assume_royal(e.clone()));
        }
        let root = tree.royal_block_challenge_root_edge().unwrap().id;
        let result = tree.is_confirmable_essential_edge(&root, 0, 20).unwrap();
        // [2, 4] and [1, 2] at every level, plus the one step proof edge.
        assert_eq!(result.essential_paths.len(), 7);
        let deepest = result
            .essential_paths
            .iter()
            .find(|p| p[0] == osp.id)
            .unwrap();
        // Three edges per level down to [0, 1].
        assert_eq!(deepest.len(), 9);
        // Every edge is unrivaled for 10 blocks, so the shortest path of two edges decides.
        assert_eq!(result.min_path_weight, 20);
    }
}
