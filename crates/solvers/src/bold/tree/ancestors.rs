//! Ancestor walks over the royal tree, crossing challenge levels through claim links.

use super::{RangeKey, RoyalChallengeTree};
use crate::bold::{bisection_point, error::TreeError, Edge, EdgeId, Height, RoyalEdge};

impl RoyalChallengeTree {
    /// Returns the ancestors of a royal edge, closest first, ending with the royal block
    /// challenge level zero edge.
    ///
    /// Within a level, the walk descends from the level zero edge to `id` by bisection point.
    /// When it reaches a level zero edge above the block level, it jumps to the edge that level
    /// zero edge claims and continues in the parent level.
    pub fn compute_ancestors(&self, id: &EdgeId) -> Result<Vec<Edge>, TreeError> {
        let mut current = self.get_or_err(id)?;
        let mut ancestors = Vec::new();
        loop {
            let root = self
                .level_zero_edge(current.level, current.origin_id)
                .ok_or(TreeError::NotTracked(current.id))?;
            let mut within_level = self.path_from_root(root, current)?;
            within_level.reverse();
            ancestors.extend(within_level.into_iter().map(|e| e.clone().into_inner()));

            if root.level.is_block_level() {
                return Ok(ancestors);
            }
            let Some(claim) = root.claim_id else {
                return Ok(ancestors);
            };
            let claimed = self.get_or_err(&EdgeId(claim.0))?;
            ancestors.push(claimed.clone().into_inner());
            current = claimed;
        }
    }

    /// Returns the edges on the path from `root` down to, but excluding, `target`.
    fn path_from_root<'a>(
        &'a self,
        root: &'a RoyalEdge,
        target: &RoyalEdge,
    ) -> Result<Vec<&'a RoyalEdge>, TreeError> {
        let mut path = Vec::new();
        let mut cursor = root;
        while cursor.id != target.id {
            path.push(cursor);
            let mid = bisection_point(cursor.start_height, cursor.end_height)
                .map_err(|_| TreeError::NotTracked(target.id))?;
            let (start, end): (Height, Height) = if target.end_height <= mid {
                (cursor.start_height, mid)
            } else if target.start_height >= mid {
                (mid, cursor.end_height)
            } else {
                return Err(TreeError::NotTracked(target.id));
            };
            cursor = self
                .by_range
                .get(&RangeKey {
                    start,
                    end,
                    ..RangeKey::of(cursor)
                })
                .and_then(|id| self.royal.get(id))
                .ok_or(TreeError::NotTracked(target.id))?;
        }
        Ok(path)
    }

    /// Returns the start heights of the claimed edges of every challenge `edge` is nested in,
    /// block challenge height first. Empty at the block level.
    ///
    /// A level zero edge is resolved through the edge it claims, which need not be tracked as
    /// claimed yet. Any other edge is resolved through the royal level zero edge of its level.
    pub fn origin_heights(&self, edge: &Edge) -> Result<Vec<Height>, TreeError> {
        if edge.level.is_block_level() {
            return Ok(Vec::new());
        }
        let claim = match edge.claim_id {
            Some(claim) => claim,
            None => self
                .level_zero_edge(edge.level, edge.origin_id)
                .and_then(|root| root.claim_id)
                .ok_or(TreeError::NotTracked(edge.id))?,
        };
        let claimed = self.get_or_err(&EdgeId(claim.0))?;
        let mut heights = self.origin_heights(claimed)?;
        heights.push(claimed.start_height);
        Ok(heights)
    }

    /// Returns the closest ancestor of `edge` that can be confirmed on its own: the edge itself
    /// if it is a level zero edge, otherwise the level zero edge of its challenge.
    pub fn closest_essential_ancestor(&self, edge: &Edge) -> Result<EdgeId, TreeError> {
        if edge.claim_id.is_some() {
            return Ok(edge.id);
        }
        self.level_zero_edge(edge.level, edge.origin_id)
            .map(|root| root.id)
            .ok_or(TreeError::NotTracked(edge.id))
    }
}

#[cfg(test)]
mod test {
    use super::super::test_utils::*;
    use super::*;
    use crate::bold::{AssertionHash, ChallengeLevel};

    fn chain_tree() -> (RoyalChallengeTree, Vec<Edge>, Edge) {
        let (all, osp) = full_royal_chain(1);
        let mut tree = RoyalChallengeTree::new(AssertionHash::default(), TOTAL_LEVELS);
        for e in &all {
            tree.add_royal_edge(RoyalEdge::assume_royal(e.clone()));
        }
        (tree, all, osp)
    }

    #[test]
    fn ancestors_of_the_deepest_leaf_end_at_the_block_root() {
        let (tree, _, osp) = chain_tree();
        let ancestors = tree.compute_ancestors(&osp.id).unwrap();
        let root = tree.royal_block_challenge_root_edge().unwrap();
        assert_eq!(ancestors.last().unwrap().id, root.id);

        // Each level contributes [0, 1]'s parents [0, 2] and [0, 4]; the two claim links add the
        // claimed [0, 1] edges of the shallower levels.
        assert_eq!(ancestors.len(), 2 + 1 + 2 + 1 + 2);
        let claim_links = ancestors
            .windows(2)
            .filter(|w| w[0].level != w[1].level)
            .count();
        assert_eq!(claim_links, TOTAL_LEVELS as usize - 1);

        // Ancestors are ordered closest first: levels never increase along the walk.
        assert!(ancestors.windows(2).all(|w| w[0].level >= w[1].level));
        assert_eq!(ancestors[0].level, ChallengeLevel(2));
        assert_eq!((ancestors[0].start_height, ancestors[0].end_height), (0, 2));
    }

    #[test]
    fn ancestors_of_a_root_are_empty_at_the_block_level() {
        let (tree, _, _) = chain_tree();
        let root = tree.royal_block_challenge_root_edge().unwrap().id;
        assert!(tree.compute_ancestors(&root).unwrap().is_empty());
    }

    #[test]
    fn closest_essential_ancestor_is_the_level_zero_edge() {
        let (tree, all, osp) = chain_tree();
        let essential = tree.closest_essential_ancestor(&osp).unwrap();
        let level_root = all
            .iter()
            .find(|e| e.level == osp.level && e.claim_id.is_some())
            .unwrap();
        assert_eq!(essential, level_root.id);
        assert_eq!(
            tree.closest_essential_ancestor(level_root).unwrap(),
            level_root.id
        );
    }

    #[test]
    fn origin_heights_follow_claims_to_the_block_level() {
        let (tree, all, osp) = chain_tree();
        // Each level opens its sub challenge on [0, 1], so every origin height is zero.
        assert_eq!(tree.origin_heights(&osp).unwrap(), vec![0, 0]);
        let block_root = tree.royal_block_challenge_root_edge().unwrap();
        assert!(tree.origin_heights(block_root).unwrap().is_empty());
        let level_one_root = all
            .iter()
            .find(|e| e.level == ChallengeLevel(1) && e.claim_id.is_some())
            .unwrap();
        assert_eq!(tree.origin_heights(level_one_root).unwrap(), vec![0]);
    }

    #[test]
    fn untracked_edges_are_errors() {
        let (tree, _, _) = chain_tree();
        let missing = EdgeId::default();
        assert_eq!(
            tree.compute_ancestors(&missing),
            Err(TreeError::NotTracked(missing))
        );
    }
}
