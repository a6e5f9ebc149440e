use anyhow::{anyhow, Result};
use ethers::types::{H256, U256};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Converts a [U256] read from chain into a [u64].
///
/// # Arguments
/// * `value` - The value to convert.
/// * `what` - Names the value in the error.
///
/// # Returns
/// * An error if `value` does not fit in 64 bits.
pub fn u256_to_u64(value: U256, what: &str) -> Result<u64> {
    if value > U256::from(u64::MAX) {
        return Err(anyhow!("{} {} does not fit in a u64", what, value));
    }
    Ok(value.as_u64())
}

/// Maps the zero hash, which the contracts use for "unset", to `None`.
pub fn non_zero<T: From<H256>>(bytes: [u8; 32]) -> Option<T> {
    let hash = H256(bytes);
    (!hash.is_zero()).then(|| T::from(hash))
}

/// Sleeps for `duration` unless `cancel` fires first.
///
/// # Returns
/// * `false` if the sleep was cancelled.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
