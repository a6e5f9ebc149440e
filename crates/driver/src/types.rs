use ethers::{
    middleware::SignerMiddleware,
    providers::{Provider, Ws},
    signers::LocalWallet,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The [SignerMiddlewareWS] type is the websocket provider the binary signs transactions with.
pub type SignerMiddlewareWS = SignerMiddleware<Provider<Ws>, LocalWallet>;

/// The [AssertionStatus] enum mirrors the on-chain status of an assertion in the rollup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum AssertionStatus {
    #[default]
    NoAssertion = 0,
    Pending = 1,
    Confirmed = 2,
}

impl TryFrom<u8> for AssertionStatus {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AssertionStatus::NoAssertion),
            1 => Ok(AssertionStatus::Pending),
            2 => Ok(AssertionStatus::Confirmed),
            _ => Err(anyhow::anyhow!("Invalid assertion status {}", value)),
        }
    }
}

impl fmt::Display for AssertionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssertionStatus::NoAssertion => write!(f, "no_assertion"),
            AssertionStatus::Pending => write!(f, "pending"),
            AssertionStatus::Confirmed => write!(f, "confirmed"),
        }
    }
}
