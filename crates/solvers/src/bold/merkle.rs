//! Merkle history commitments over virtually padded leaf sequences.
//!
//! Leaves are hashed before they enter the tree. A tree of `virtual_size` leaves built from a
//! shorter sequence repeats the last real leaf up to `virtual_size`, and any position at or past
//! `virtual_size` is the zero hash. Subtrees made up entirely of padding are computed from a
//! table of filler hashes instead of being rebuilt leaf by leaf, which keeps commitments to
//! `2^26` virtual leaves cheap.

use super::{
    error::MerkleError,
    position::tree_depth,
    prefix::{self, maximum_append_between, MerkleExpansion},
    HistoryCommitment,
};
use ethers::{types::H256, utils::keccak256};

/// Hashes two sibling nodes into their parent.
pub fn hash_pair(left: &H256, right: &H256) -> H256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left.as_bytes());
    buf[32..].copy_from_slice(right.as_bytes());
    H256(keccak256(buf))
}

/// Hashes a raw leaf into its tree representation.
pub fn hash_leaf(leaf: &H256) -> H256 {
    H256(keccak256(leaf.as_bytes()))
}

/// A Merkle tree over hashed leaves with virtual padding.
pub(crate) struct VirtualTree {
    leaves: Vec<H256>,
    virtual_size: u64,
    /// `fillers[k]` is the root of a complete subtree of `2^k` padding leaves.
    fillers: Vec<H256>,
}

impl VirtualTree {
    pub(crate) fn new(raw_leaves: &[H256], virtual_size: u64) -> Result<Self, MerkleError> {
        let Some(last) = raw_leaves.last() else {
            return Err(MerkleError::NoLeaves);
        };
        if virtual_size < raw_leaves.len() as u64 {
            return Err(MerkleError::VirtualTooSmall {
                leaves: raw_leaves.len() as u64,
                virtual_size,
            });
        }

        let depth = tree_depth(virtual_size);
        let mut fillers = Vec::with_capacity(depth as usize + 1);
        fillers.push(hash_leaf(last));
        for k in 0..depth as usize {
            fillers.push(hash_pair(&fillers[k], &fillers[k]));
        }

        Ok(Self {
            leaves: raw_leaves.iter().map(hash_leaf).collect(),
            virtual_size,
            fillers,
        })
    }

    pub(crate) fn depth(&self) -> u64 {
        tree_depth(self.virtual_size)
    }

    /// Returns the node at `level` whose leftmost leaf is `start`.
    pub(crate) fn node(&self, level: u64, start: u64) -> H256 {
        if start >= self.virtual_size {
            return H256::zero();
        }
        let real = self.leaves.len() as u64;
        if level == 0 {
            return if start < real {
                self.leaves[start as usize]
            } else {
                self.fillers[0]
            };
        }
        let width = 1u128 << level;
        if start >= real && start as u128 + width <= self.virtual_size as u128 {
            if let Some(filler) = self.fillers.get(level as usize) {
                return *filler;
            }
        }
        let half = 1u64 << (level - 1);
        let left = self.node(level - 1, start);
        let right = match start.checked_add(half) {
            Some(right_start) => self.node(level - 1, right_start),
            None => H256::zero(),
        };
        hash_pair(&left, &right)
    }

    pub(crate) fn root(&self) -> H256 {
        self.node(self.depth(), 0)
    }

    /// Returns the sibling path of the leaf at `index`, ordered from the leaves upward.
    pub(crate) fn inclusion_proof(&self, index: u64) -> Vec<H256> {
        (0..self.depth())
            .map(|k| self.node(k, ((index >> k) ^ 1) << k))
            .collect()
    }

    /// Returns the Merkle expansion of the first `size` virtual leaves.
    pub(crate) fn expansion(&self, size: u64) -> MerkleExpansion {
        let mut expansion = Vec::new();
        let mut offset = 0;
        for level in (0..64).rev() {
            if size & (1 << level) == 0 {
                continue;
            }
            if expansion.is_empty() {
                expansion = vec![H256::zero(); level as usize + 1];
            }
            expansion[level as usize] = self.node(level, offset);
            offset += 1 << level;
        }
        expansion
    }
}

/// Computes the Merkle root of `leaves` padded to `virtual_size`.
pub fn compute_root(leaves: &[H256], virtual_size: u64) -> Result<H256, MerkleError> {
    Ok(VirtualTree::new(leaves, virtual_size)?.root())
}

/// Builds a [HistoryCommitment] to `leaves` padded to `virtual_size` leaves.
///
/// ### Takes
/// - `leaves`: The raw, unhashed, state hashes.
/// - `virtual_size`: The number of leaves committed to. Must be at least `leaves.len()`.
///
/// ### Returns
/// - `Result<HistoryCommitment>`: A commitment with height `virtual_size - 1` and an inclusion
///   proof for its last virtual leaf.
pub fn new_commitment(
    leaves: &[H256],
    virtual_size: u64,
) -> Result<HistoryCommitment, MerkleError> {
    let tree = VirtualTree::new(leaves, virtual_size)?;
    let (Some(first), Some(last)) = (leaves.first(), leaves.last()) else {
        return Err(MerkleError::NoLeaves);
    };
    Ok(HistoryCommitment {
        height: virtual_size - 1,
        merkle_root: tree.root(),
        first_leaf: *first,
        last_leaf: *last,
        last_leaf_proof: tree.inclusion_proof(virtual_size - 1),
    })
}

/// Generates the Merkle expansion of the first `prefix_index + 1` leaves together with the
/// subtree roots that extend it to all `virtual_size` leaves.
///
/// ### Takes
/// - `prefix_index`: The height of the prefix commitment.
/// - `leaves`: The raw leaves of the full commitment.
/// - `virtual_size`: The virtual size of the full commitment.
///
/// ### Returns
/// - `Result<(MerkleExpansion, Vec<H256>)>`: The prefix expansion and the prefix proof.
pub fn generate_prefix_proof(
    prefix_index: u64,
    leaves: &[H256],
    virtual_size: u64,
) -> Result<(MerkleExpansion, Vec<H256>), MerkleError> {
    if prefix_index.saturating_add(1) >= virtual_size {
        return Err(MerkleError::PrefixIndexOutOfRange {
            index: prefix_index,
            virtual_size,
        });
    }
    let tree = VirtualTree::new(leaves, virtual_size)?;
    let prefix_size = prefix_index + 1;
    let expansion = tree.expansion(prefix_size);

    let mut proof = Vec::new();
    let mut size = prefix_size;
    while size < virtual_size {
        // `size < virtual_size` so the append level is always defined.
        let Ok(level) = maximum_append_between(size, virtual_size) else {
            break;
        };
        proof.push(tree.node(level, size));
        size += 1 << level;
    }
    debug_assert_eq!(prefix::tree_size(&expansion), prefix_size);
    Ok((expansion, proof))
}

/// Builds the padded tree level by level, with no filler shortcuts.
#[cfg(test)]
pub(crate) fn naive_root(raw: &[H256], virtual_size: u64) -> H256 {
    let last = *raw.last().unwrap();
    let mut layer: Vec<H256> = (0..virtual_size)
        .map(|i| hash_leaf(raw.get(i as usize).unwrap_or(&last)))
        .collect();
    while layer.len() > 1 {
        if layer.len() % 2 == 1 {
            layer.push(H256::zero());
        }
        layer = layer.chunks(2).map(|c| hash_pair(&c[0], &c[1])).collect();
    }
    layer[0]
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bold::prefix::root;

    fn leaves(n: u64) -> Vec<H256> {
        (0..n).map(|i| H256::from_low_u64_be(i + 1)).collect()
    }

    fn verify_inclusion(root: H256, leaf: H256, index: u64, proof: &[H256]) -> bool {
        let mut acc = hash_leaf(&leaf);
        for (k, sibling) in proof.iter().enumerate() {
            acc = if (index >> k) & 1 == 0 {
                hash_pair(&acc, sibling)
            } else {
                hash_pair(sibling, &acc)
            };
        }
        acc == root
    }

    #[test]
    fn single_leaf_root_is_the_hashed_leaf() {
        let l = leaves(1);
        let c = new_commitment(&l, 1).unwrap();
        assert_eq!(c.height, 0);
        assert_eq!(c.merkle_root, hash_leaf(&l[0]));
        assert!(c.last_leaf_proof.is_empty());
    }

    #[test]
    fn roots_match_naive_construction() {
        for n in 1..12 {
            for virtual_size in n..40 {
                let l = leaves(n);
                assert_eq!(
                    compute_root(&l, virtual_size).unwrap(),
                    naive_root(&l, virtual_size),
                    "n {} virtual {}",
                    n,
                    virtual_size
                );
            }
        }
    }

    #[test]
    fn last_leaf_proofs_verify() {
        for n in 1..9 {
            for virtual_size in n..33 {
                let l = leaves(n);
                let c = new_commitment(&l, virtual_size).unwrap();
                assert_eq!(c.last_leaf_proof.len() as u64, tree_depth(virtual_size));
                assert!(verify_inclusion(
                    c.merkle_root,
                    c.last_leaf,
                    virtual_size - 1,
                    &c.last_leaf_proof
                ));
            }
        }
    }

    #[test]
    fn rejects_bad_inputs() {
        assert_eq!(new_commitment(&[], 4), Err(MerkleError::NoLeaves));
        assert_eq!(
            new_commitment(&leaves(5), 4),
            Err(MerkleError::VirtualTooSmall {
                leaves: 5,
                virtual_size: 4
            })
        );
        assert!(generate_prefix_proof(3, &leaves(4), 4).is_err());
    }

    #[test]
    fn prefix_expansion_commits_to_the_prefix_root() {
        let l = leaves(6);
        for prefix_index in 0..15 {
            let (expansion, _) = generate_prefix_proof(prefix_index, &l, 16).unwrap();
            let prefix_size = prefix_index + 1;
            let prefix_leaves = &l[..l.len().min(prefix_size as usize)];
            assert_eq!(
                root(&expansion).unwrap(),
                compute_root(prefix_leaves, prefix_size).unwrap()
            );
        }
    }

    #[test]
    fn large_virtual_trees_use_fillers() {
        let l = leaves(3);
        let c = new_commitment(&l, 1 << 26).unwrap();
        assert_eq!(c.last_leaf_proof.len(), 26);
        assert!(verify_inclusion(
            c.merkle_root,
            c.last_leaf,
            (1 << 26) - 1,
            &c.last_leaf_proof
        ));
    }
}
