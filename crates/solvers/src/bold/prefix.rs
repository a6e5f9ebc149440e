//! Merkle expansions and prefix proofs.
//!
//! A Merkle expansion holds, for every level `i`, the root of a complete subtree of `2^i` leaves
//! or the zero hash. Appending complete subtrees to the expansion of a prefix, in the order
//! given by [maximum_append_between], reproduces the root of any longer tree sharing that
//! prefix. The challenge manager contract performs exactly this check when an edge is created
//! or bisected, so the arithmetic here must match it bit for bit.

use super::{
    error::PrefixProofError,
    merkle::{hash_leaf, hash_pair},
    position::{least_significant_bit, most_significant_bit},
    types::hashes_token,
};
use ethers::{
    abi::{self, ParamType, Token},
    types::{Bytes, H256},
};

/// The maximum number of levels in a Merkle expansion.
pub const MAX_LEVEL: u64 = 64;

/// A Merkle expansion, indexed by level.
pub type MerkleExpansion = Vec<H256>;

/// Computes the root committed to by a Merkle expansion.
pub fn root(me: &[H256]) -> Result<H256, PrefixProofError> {
    if me.is_empty() {
        return Err(PrefixProofError::RootForEmpty);
    }
    if me.len() as u64 >= MAX_LEVEL {
        return Err(PrefixProofError::ExpansionTooLarge);
    }

    let mut accum = H256::zero();
    for (i, val) in me.iter().enumerate() {
        if accum.is_zero() {
            if !val.is_zero() {
                accum = *val;
                if i != me.len() - 1 {
                    accum = hash_pair(&accum, &H256::zero());
                }
            }
        } else if !val.is_zero() {
            accum = hash_pair(val, &accum);
        } else {
            accum = hash_pair(&accum, &H256::zero());
        }
    }
    Ok(accum)
}

/// Returns the number of leaves committed to by a Merkle expansion.
pub fn tree_size(me: &[H256]) -> u64 {
    me.iter()
        .enumerate()
        .filter(|(_, h)| !h.is_zero())
        .fold(0u64, |acc, (i, _)| acc.saturating_add(1u64 << i))
}

/// Appends a complete subtree of `2^level` leaves with root `subtree_root` to an expansion.
///
/// ### Takes
/// - `me`: The expansion to append to.
/// - `level`: The level of the subtree. Must not be above the least significant non-zero
///   entry of `me`.
/// - `subtree_root`: The non-zero root of the subtree.
///
/// ### Returns
/// - `Result<MerkleExpansion>`: The expansion of the combined tree.
pub fn append_complete_sub_tree(
    me: &[H256],
    level: u64,
    subtree_root: H256,
) -> Result<MerkleExpansion, PrefixProofError> {
    if level >= MAX_LEVEL {
        return Err(PrefixProofError::LevelTooHigh { level });
    }
    if subtree_root.is_zero() {
        return Err(PrefixProofError::CannotAppendEmpty);
    }
    if me.len() as u64 > MAX_LEVEL {
        return Err(PrefixProofError::ExpansionTooLarge);
    }
    if me.is_empty() {
        let mut empty = vec![H256::zero(); level as usize + 1];
        empty[level as usize] = subtree_root;
        return Ok(empty);
    }
    if level >= me.len() as u64 {
        return Err(PrefixProofError::LevelTooHigh { level });
    }

    let mut next = Vec::with_capacity(me.len() + 1);
    let mut accum = subtree_root;
    for (i, val) in me.iter().enumerate() {
        if (i as u64) < level {
            if !val.is_zero() {
                return Err(PrefixProofError::CannotAppendAboveLeastSignificant);
            }
            next.push(H256::zero());
            continue;
        }
        if accum.is_zero() {
            next.push(*val);
        } else if !val.is_zero() {
            accum = hash_pair(val, &accum);
            next.push(H256::zero());
        } else {
            next.push(accum);
            accum = H256::zero();
        }
    }
    if !accum.is_zero() {
        next.push(accum);
    }
    if next.len() as u64 > MAX_LEVEL + 1 {
        return Err(PrefixProofError::ExpansionTooLarge);
    }
    Ok(next)
}

/// Appends a single raw leaf to an expansion.
pub fn append_leaf(me: &[H256], leaf: &H256) -> Result<MerkleExpansion, PrefixProofError> {
    append_complete_sub_tree(me, 0, hash_leaf(leaf))
}

/// Returns the level of the largest complete subtree that can be appended to a tree of size
/// `start` without exceeding `end` leaves, such that `end` stays reachable.
pub fn maximum_append_between(start: u64, end: u64) -> Result<u64, PrefixProofError> {
    if start >= end {
        return Err(PrefixProofError::StartNotLessThanEnd { start, end });
    }
    let msb = most_significant_bit(start ^ end)?;
    let mask = if msb >= 63 {
        u64::MAX
    } else {
        (1u64 << (msb + 1)) - 1
    };
    let y = start & mask;
    if y != 0 {
        return least_significant_bit(y);
    }
    let z = end & mask;
    if z != 0 {
        return most_significant_bit(z);
    }
    Err(PrefixProofError::CannotBeZero)
}

/// The inputs to [verify_prefix_proof].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyPrefixProofConfig {
    pub pre_root: H256,
    pub pre_size: u64,
    pub post_root: H256,
    pub post_size: u64,
    pub pre_expansion: MerkleExpansion,
    pub prefix_proof: Vec<H256>,
}

/// Verifies that the tree with root `pre_root` is a prefix of the tree with root `post_root`.
pub fn verify_prefix_proof(cfg: &VerifyPrefixProofConfig) -> Result<(), PrefixProofError> {
    if cfg.pre_size == 0 {
        return Err(PrefixProofError::CannotBeZero);
    }
    if root(&cfg.pre_expansion)? != cfg.pre_root {
        return Err(PrefixProofError::RootMismatch);
    }
    let got = tree_size(&cfg.pre_expansion);
    if got != cfg.pre_size {
        return Err(PrefixProofError::TreeSize {
            got,
            expected: cfg.pre_size,
        });
    }
    if cfg.pre_size >= cfg.post_size {
        return Err(PrefixProofError::StartNotLessThanEnd {
            start: cfg.pre_size,
            end: cfg.post_size,
        });
    }

    let mut expansion = cfg.pre_expansion.clone();
    let mut size = cfg.pre_size;
    let mut proof_index = 0;
    while size < cfg.post_size {
        let level = maximum_append_between(size, cfg.post_size)?;
        let Some(subtree_root) = cfg.prefix_proof.get(proof_index) else {
            return Err(PrefixProofError::IndexOutOfRange {
                index: proof_index,
                len: cfg.prefix_proof.len(),
            });
        };
        expansion = append_complete_sub_tree(&expansion, level, *subtree_root)?;
        size += 1 << level;
        if size > cfg.post_size {
            return Err(PrefixProofError::SizeNotLeqPostSize {
                size,
                post_size: cfg.post_size,
            });
        }
        proof_index += 1;
    }

    if root(&expansion)? != cfg.post_root {
        return Err(PrefixProofError::RootMismatch);
    }
    if proof_index != cfg.prefix_proof.len() {
        return Err(PrefixProofError::IncompleteProof {
            used: proof_index,
            len: cfg.prefix_proof.len(),
        });
    }
    Ok(())
}

/// ABI encodes a prefix proof as `(bytes32[] prefixExpansion, bytes32[] prefixProof)`.
pub fn encode_prefix_proof(expansion: &[H256], proof: &[H256]) -> Bytes {
    abi::encode(&[hashes_token(expansion), hashes_token(proof)]).into()
}

/// Decodes bytes produced by [encode_prefix_proof].
pub fn decode_prefix_proof(data: &[u8]) -> anyhow::Result<(MerkleExpansion, Vec<H256>)> {
    let list = ParamType::Array(Box::new(ParamType::FixedBytes(32)));
    let mut tokens = abi::decode(&[list.clone(), list], data)?.into_iter();
    let mut next_list = || -> anyhow::Result<Vec<H256>> {
        match tokens.next() {
            Some(Token::Array(items)) => items
                .into_iter()
                .map(|t| match t {
                    Token::FixedBytes(b) if b.len() == 32 => Ok(H256::from_slice(&b)),
                    other => Err(anyhow::anyhow!("unexpected token {:?}", other)),
                })
                .collect(),
            other => Err(anyhow::anyhow!("unexpected token {:?}", other)),
        }
    };
    let expansion = next_list()?;
    let proof = next_list()?;
    Ok((expansion, proof))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bold::merkle::{generate_prefix_proof, naive_root};
    use proptest::prelude::*;

    fn leaf(i: u64) -> H256 {
        H256::from_low_u64_be(i + 1)
    }

    #[test]
    fn maximum_append_between_static() {
        assert_eq!(maximum_append_between(1, 4).unwrap(), 0);
        assert_eq!(maximum_append_between(2, 4).unwrap(), 1);
        assert_eq!(maximum_append_between(0, 8).unwrap(), 3);
        assert_eq!(maximum_append_between(4, 7).unwrap(), 1);
        assert_eq!(maximum_append_between(6, 7).unwrap(), 0);
        assert_eq!(
            maximum_append_between(4, 4),
            Err(PrefixProofError::StartNotLessThanEnd { start: 4, end: 4 })
        );
    }

    #[test]
    fn appending_leaves_tracks_the_tree() {
        let mut me = Vec::new();
        let leaves: Vec<H256> = (0..13).map(leaf).collect();
        for (i, l) in leaves.iter().enumerate() {
            me = append_leaf(&me, l).unwrap();
            let size = i as u64 + 1;
            assert_eq!(tree_size(&me), size);
            assert_eq!(root(&me).unwrap(), naive_root(&leaves[..=i], size));
        }
    }

    #[test]
    fn append_rejects_bad_inputs() {
        assert_eq!(root(&[]), Err(PrefixProofError::RootForEmpty));
        assert_eq!(
            append_complete_sub_tree(&[], 0, H256::zero()),
            Err(PrefixProofError::CannotAppendEmpty)
        );
        let me = append_leaf(&[], &leaf(0)).unwrap();
        assert_eq!(
            append_complete_sub_tree(&me, 1, leaf(1)),
            Err(PrefixProofError::LevelTooHigh { level: 1 })
        );
        let me = vec![leaf(0), leaf(1)];
        assert_eq!(
            append_complete_sub_tree(&me, 1, leaf(2)),
            Err(PrefixProofError::CannotAppendAboveLeastSignificant)
        );
    }

    #[test]
    fn verify_rejects_tampered_proofs() {
        let leaves: Vec<H256> = (0..5).map(leaf).collect();
        let (expansion, proof) = generate_prefix_proof(2, &leaves, 16).unwrap();
        let cfg = VerifyPrefixProofConfig {
            pre_root: naive_root(&leaves[..3], 3),
            pre_size: 3,
            post_root: naive_root(&leaves, 16),
            post_size: 16,
            pre_expansion: expansion,
            prefix_proof: proof,
        };
        verify_prefix_proof(&cfg).unwrap();

        let mut bad = cfg.clone();
        bad.prefix_proof[0] = H256::repeat_byte(9);
        assert_eq!(verify_prefix_proof(&bad), Err(PrefixProofError::RootMismatch));

        let mut short = cfg.clone();
        short.prefix_proof.pop();
        assert!(matches!(
            verify_prefix_proof(&short),
            Err(PrefixProofError::IndexOutOfRange { .. })
        ));

        let mut long = cfg.clone();
        long.prefix_proof.push(H256::repeat_byte(1));
        assert!(matches!(
            verify_prefix_proof(&long),
            Err(PrefixProofError::IncompleteProof { .. })
        ));

        let mut zero = cfg;
        zero.pre_size = 0;
        assert_eq!(verify_prefix_proof(&zero), Err(PrefixProofError::CannotBeZero));
    }

    #[test]
    fn encoding_is_two_dynamic_bytes32_arrays() {
        let expansion = vec![H256::repeat_byte(1), H256::zero()];
        let proof = vec![H256::repeat_byte(2)];
        let encoded = encode_prefix_proof(&expansion, &proof);
        // Two offsets, then length-prefixed arrays.
        assert_eq!(encoded.len(), 32 * 2 + 32 * 3 + 32 * 2);
        let (e, p) = decode_prefix_proof(&encoded).unwrap();
        assert_eq!(e, expansion);
        assert_eq!(p, proof);
    }

    proptest! {
        #[test]
        fn generated_prefix_proofs_verify_against_reference_roots(
            real in 1u64..24,
            extra in 0u64..40,
            prefix_seed in any::<u64>(),
        ) {
            let virtual_size = real + extra + 1;
            let leaves: Vec<H256> = (0..real).map(leaf).collect();
            let prefix_index = prefix_seed % (virtual_size - 1);
            let prefix_size = prefix_index + 1;
            let (expansion, proof) = generate_prefix_proof(prefix_index, &leaves, virtual_size).unwrap();
            let prefix_leaves = &leaves[..(prefix_size.min(real)) as usize];
            let cfg = VerifyPrefixProofConfig {
                pre_root: naive_root(prefix_leaves, prefix_size),
                pre_size: prefix_size,
                post_root: naive_root(&leaves, virtual_size),
                post_size: virtual_size,
                pre_expansion: expansion,
                prefix_proof: proof,
            };
            prop_assert_eq!(verify_prefix_proof(&cfg), Ok(()));
        }
    }
}
