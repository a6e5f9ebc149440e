//! The royal challenge tree holds, for one challenged assertion, every edge the local validator
//! agrees with, plus the creation time of every edge observed in the challenge. All queries are
//! answered from local data only.

use super::{
    bisection_point, AssertionHash, ChallengeLevel, ClaimId, Edge, EdgeId, Height, MutualId,
    OriginId, RoyalEdge,
};
use crate::bold::error::TreeError;
use std::collections::HashMap;

mod ancestors;
mod paths;
pub use paths::ConfirmableEssentialEdge;

/// Locates an edge within its challenge by level, origin and height range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RangeKey {
    level: ChallengeLevel,
    origin: OriginId,
    start: Height,
    end: Height,
}

impl RangeKey {
    fn of(edge: &Edge) -> Self {
        Self {
            level: edge.level,
            origin: edge.origin_id,
            start: edge.start_height,
            end: edge.end_height,
        }
    }
}

/// The [RoyalChallengeTree] struct tracks royal edges of a single challenge.
#[derive(Debug, Clone)]
pub struct RoyalChallengeTree {
    challenged_assertion: AssertionHash,
    total_challenge_levels: u8,
    royal: HashMap<EdgeId, RoyalEdge>,
    by_range: HashMap<RangeKey, EdgeId>,
    /// The royal level zero edge of every challenge, keyed by level and origin.
    level_zero: HashMap<(ChallengeLevel, OriginId), EdgeId>,
    /// Royal level zero edges keyed by the edge they claim.
    claimed_by: HashMap<ClaimId, EdgeId>,
    /// Creation block of every observed edge, royal or not, grouped by mutual id.
    creation_blocks: HashMap<MutualId, HashMap<EdgeId, u64>>,
}

impl RoyalChallengeTree {
    /// Creates an empty tree for the challenge on the children of `challenged_assertion`.
    pub fn new(challenged_assertion: AssertionHash, total_challenge_levels: u8) -> Self {
        Self {
            challenged_assertion,
            total_challenge_levels,
            royal: HashMap::new(),
            by_range: HashMap::new(),
            level_zero: HashMap::new(),
            claimed_by: HashMap::new(),
            creation_blocks: HashMap::new(),
        }
    }

    /// Returns the challenged assertion hash.
    pub fn challenged_assertion(&self) -> AssertionHash {
        self.challenged_assertion
    }

    /// Returns the total number of challenge levels.
    pub fn total_challenge_levels(&self) -> u8 {
        self.total_challenge_levels
    }

    /// Records the creation block of an observed edge. Rivalry, and with it every local timer,
    /// is derived from these records.
    pub fn record_edge_creation(&mut self, edge: &Edge) {
        self.creation_blocks
            .entry(edge.mutual_id)
            .or_default()
            .entry(edge.id)
            .or_insert(edge.created_at_block);
    }

    /// Returns true if the creation of `edge` was already recorded.
    pub fn has_observed(&self, edge: &Edge) -> bool {
        self.creation_blocks
            .get(&edge.mutual_id)
            .is_some_and(|edges| edges.contains_key(&edge.id))
    }

    /// Adds a royal edge to the tree. Adding an edge twice is a no-op.
    ///
    /// ### Returns
    /// - `bool`: True if the edge was not tracked before.
    pub fn add_royal_edge(&mut self, edge: RoyalEdge) -> bool {
        if self.royal.contains_key(&edge.id) {
            return false;
        }
        self.record_edge_creation(&edge);
        self.by_range.insert(RangeKey::of(&edge), edge.id);
        if let Some(claim_id) = edge.claim_id {
            self.level_zero
                .insert((edge.level, edge.origin_id), edge.id);
            self.claimed_by.insert(claim_id, edge.id);
        }
        self.royal.insert(edge.id, edge);
        true
    }

    /// Refreshes the snapshot of an already tracked royal edge, e.g. after it was confirmed.
    pub fn update_royal_edge(&mut self, edge: Edge) {
        if let Some(existing) = self.royal.get_mut(&edge.id) {
            *existing = RoyalEdge::assume_royal(edge);
        }
    }

    /// Returns true if `id` is a royal edge of this challenge.
    pub fn is_royal(&self, id: &EdgeId) -> bool {
        self.royal.contains_key(id)
    }

    /// Returns the royal edge with id `id`.
    pub fn get(&self, id: &EdgeId) -> Option<&RoyalEdge> {
        self.royal.get(id)
    }

    /// Returns the royal edge with id `id`, or [TreeError::NotTracked].
    pub(crate) fn get_or_err(&self, id: &EdgeId) -> Result<&RoyalEdge, TreeError> {
        self.royal.get(id).ok_or(TreeError::NotTracked(*id))
    }

    /// Returns an iterator over every royal edge.
    pub fn royal_edges(&self) -> impl Iterator<Item = &RoyalEdge> {
        self.royal.values()
    }

    /// Returns the number of royal edges.
    pub fn len(&self) -> usize {
        self.royal.len()
    }

    /// Returns true if no royal edge is tracked.
    pub fn is_empty(&self) -> bool {
        self.royal.is_empty()
    }

    /// Returns the royal level zero edge of the challenge at `level` with origin `origin`.
    pub fn level_zero_edge(&self, level: ChallengeLevel, origin: OriginId) -> Option<&RoyalEdge> {
        self.level_zero
            .get(&(level, origin))
            .and_then(|id| self.royal.get(id))
    }

    /// Returns the royal level zero edge claiming `claim`, if any.
    pub fn claiming_edge(&self, claim: &ClaimId) -> Option<&RoyalEdge> {
        self.claimed_by.get(claim).and_then(|id| self.royal.get(id))
    }

    /// Returns the royal block challenge level zero edge.
    pub fn royal_block_challenge_root_edge(&self) -> Result<&RoyalEdge, TreeError> {
        self.level_zero
            .iter()
            .find(|((level, _), _)| level.is_block_level())
            .and_then(|(_, id)| self.royal.get(id))
            .ok_or(TreeError::NoBlockChallengeRoot)
    }

    /// Returns the royal children of `edge`, as determined by its bisection point.
    ///
    /// ### Returns
    /// - `Ok(None)`: The edge has not been bisected as far as the tree knows.
    /// - `Ok(Some(..))`: Both children are royal and tracked.
    /// - `Err(ChildrenNotYetSeen)`: The edge was bisected but a child is missing locally.
    pub fn royal_children(
        &self,
        edge: &Edge,
    ) -> Result<Option<(&RoyalEdge, &RoyalEdge)>, TreeError> {
        if edge.length() < 2 {
            return Ok(None);
        }
        let Ok(mid) = bisection_point(edge.start_height, edge.end_height) else {
            return Ok(None);
        };
        let key = RangeKey::of(edge);
        let lower = self
            .by_range
            .get(&RangeKey { end: mid, ..key })
            .and_then(|id| self.royal.get(id));
        let upper = self
            .by_range
            .get(&RangeKey { start: mid, ..key })
            .and_then(|id| self.royal.get(id));
        match (lower, upper) {
            (Some(lower), Some(upper)) => Ok(Some((lower, upper))),
            (None, None) if edge.children().is_none() => Ok(None),
            _ => Err(TreeError::ChildrenNotYetSeen(edge.id)),
        }
    }

    /// Returns every royal edge with no royal children and no royal edge claiming it.
    pub fn lower_most_royal_edges(&self) -> Vec<RoyalEdge> {
        self.royal
            .values()
            .filter(|edge| {
                let has_children = !matches!(self.royal_children(edge), Ok(None));
                let claimed = self.claimed_by.contains_key(&ClaimId(edge.id.0));
                !has_children && !claimed
            })
            .cloned()
            .collect()
    }
}


#[cfg(test)]
mod test {
    use super::{test_utils::*, *};
    use ethers::types::H256;

    #[test]
    fn adding_royal_edges_is_idempotent() {
        let origin = OriginId(H256::repeat_byte(1));
        let root = edge(0, origin, 0, 16, 0, Some(ClaimId(H256::repeat_byte(2))), 1);
        let mut tree = RoyalChallengeTree::new(AssertionHash::default(), TOTAL_LEVELS);
        assert!(tree.add_royal_edge(RoyalEdge::assume_royal(root.clone())));
        assert!(!tree.add_royal_edge(RoyalEdge::assume_royal(root.clone())));
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.royal_block_challenge_root_edge().unwrap().id, root.id);
        assert!(tree.is_royal(&root.id));
    }

    #[test]
    fn children_are_found_by_bisection_point() {
        let origin = OriginId(H256::repeat_byte(1));
        let mut root = edge(0, origin, 0, 16, 0, Some(ClaimId(H256::repeat_byte(2))), 1);
        let (lower, upper) = bisect(&mut root, 2);
        let mut tree = RoyalChallengeTree::new(AssertionHash::default(), TOTAL_LEVELS);
        tree.add_royal_edge(RoyalEdge::assume_royal(root.clone()));
        assert_eq!(
            tree.royal_children(&root),
            Err(TreeError::ChildrenNotYetSeen(root.id))
        );

        tree.add_royal_edge(RoyalEdge::assume_royal(lower.clone()));
        assert_eq!(
            tree.royal_children(&root),
            Err(TreeError::ChildrenNotYetSeen(root.id))
        );

        tree.add_royal_edge(RoyalEdge::assume_royal(upper.clone()));
        let (l, u) = tree.royal_children(&root).unwrap().unwrap();
        assert_eq!((l.id, u.id), (lower.id, upper.id));

        let mut leaves: Vec<EdgeId> = tree.lower_most_royal_edges().iter().map(|e| e.id).collect();
        leaves.sort();
        let mut expected = vec![lower.id, upper.id];
        expected.sort();
        assert_eq!(leaves, expected);
    }

    #[test]
    fn lower_most_edges_follow_claims_across_levels() {
        let (all, osp) = full_royal_chain(1);
        let mut tree = RoyalChallengeTree::new(AssertionHash::default(), TOTAL_LEVELS);
        for e in all {
            tree.add_royal_edge(RoyalEdge::assume_royal(e));
        }
        let leaves = tree.lower_most_royal_edges();
        assert!(leaves.iter().any(|e| e.id == osp.id));
        // Each level leaves [2, 4] and [1, 2] unbisected. The [0, 1] edges of shallower levels
        // are claimed by the next level.
        assert_eq!(leaves.len(), 7);
        assert!(leaves
            .iter()
            .all(|e| e.start_height != 0 || e.is_at_deepest_level()));
    }
}
