//! The position module holds the bit arithmetic shared by history commitments and prefix
//! proofs, and the bisection point selection for edges.

use super::{error::PrefixProofError, Height};
use anyhow::{anyhow, Result};

/// Returns the index of the most significant set bit of `x`.
///
/// ### Takes
/// - `x`: A non-zero value.
///
/// ### Returns
/// - `Result<u64>`: `floor(log2(x))`, or [PrefixProofError::CannotBeZero].
pub fn most_significant_bit(x: u64) -> Result<u64, PrefixProofError> {
    if x == 0 {
        return Err(PrefixProofError::CannotBeZero);
    }
    Ok(63 - x.leading_zeros() as u64)
}

/// Returns the index of the least significant set bit of `x`.
pub fn least_significant_bit(x: u64) -> Result<u64, PrefixProofError> {
    if x == 0 {
        return Err(PrefixProofError::CannotBeZero);
    }
    Ok(x.trailing_zeros() as u64)
}

/// Returns the depth of the smallest complete binary tree holding `n` leaves.
pub fn tree_depth(n: u64) -> u64 {
    if n <= 1 {
        0
    } else {
        64 - (n - 1).leading_zeros() as u64
    }
}

/// Computes the height an edge spanning `[start, end]` must be bisected at.
///
/// The point is the value between `start` and `end` with the most trailing zero bits, which is
/// the same choice the challenge manager contract enforces. Any history committed to at that
/// height is then a power of two aligned prefix of the parent's history.
///
/// ### Takes
/// - `start`: The start height of the edge.
/// - `end`: The end height of the edge.
///
/// ### Returns
/// - `Result<Height>`: A height strictly between `start` and `end`.
pub fn bisection_point(start: Height, end: Height) -> Result<Height> {
    if end <= start || end - start < 2 {
        return Err(anyhow!(
            "cannot bisect an edge of length less than 2 (start {}, end {})",
            start,
            end
        ));
    }
    if end - start == 2 {
        return Ok(start + 1);
    }
    let msb = most_significant_bit((end - 1) ^ start)?;
    let mask = (1u64 << msb) - 1;
    Ok((end - 1) & !mask)
}
