//! The `drivers` module contains implementations of the [Driver] trait.

use crate::{state::AgentState, utils::sleep_or_cancel, Driver, Manager};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Defines a new [Driver] implementation.
#[macro_export]
macro_rules! define_driver {
    ($name:ident, $inner:expr) => {
        #[doc = concat!("Variant of the [Driver] trait: [", stringify!($name), "]")]
        pub struct $name {
            /// The manager shared by all of the drivers.
            pub manager: Arc<Manager>,
            /// Stops the driver loop.
            pub cancel: CancellationToken,
        }

        #[async_trait]
        impl Driver for $name {
            async fn start_loop(self) -> Result<()> {
                #[allow(clippy::redundant_closure_call)]
                $inner(self).await
            }
        }

        impl $name {
            #[doc = concat!("Creates a new instance of the [", stringify!($name), "] driver.")]
            pub fn new(manager: Arc<Manager>, cancel: CancellationToken) -> Self {
                Self { manager, cancel }
            }
        }
    };
}

define_driver!(
    ChainWatcherDriver,
    (|self: ChainWatcherDriver| {
        async move {
            tracing::info!(target: "chain-watcher-driver", "Starting chain watcher driver...");
            Arc::clone(self.manager.watcher()).start(self.cancel).await
        }
    })
);

define_driver!(
    BlockNotifierDriver,
    (|self: BlockNotifierDriver| {
        async move {
            tracing::info!(target: "block-notifier-driver", "Starting new block notifier driver...");
            self.manager.notify_new_blocks(&self.cancel).await
        }
    })
);

define_driver!(
    ChallengeDriver,
    (|self: ChallengeDriver| {
        async move {
            let hashes = self.manager.config().challenge_assertion_hashes.clone();
            if hashes.is_empty() {
                return Ok(());
            }
            tracing::info!(target: "challenge-driver", "Waiting for the chain watcher to sync before opening {} challenge(s)...", hashes.len());
            while !self.manager.watcher().is_synced() {
                if !sleep_or_cancel(self.manager.config().poll_interval, &self.cancel).await {
                    return Ok(());
                }
            }

            for claimed in hashes {
                match self.manager.challenge_assertion(claimed).await {
                    Ok(edge) => {
                        tracing::info!(target: "challenge-driver", claimed = %claimed.trunc(), edge = %edge.id.trunc(), "Challenge opened");
                    }
                    Err(e) => {
                        // Soft failure, another validator may have opened it already.
                        tracing::error!(target: "challenge-driver", claimed = %claimed.trunc(), "Error opening challenge: {:#}", e);
                    }
                }
            }
            Ok(())
        }
    })
);

define_driver!(
    StateReportDriver,
    (|self: StateReportDriver| {
        async move {
            let interval = self.manager.config().state_report_interval;
            while sleep_or_cancel(interval, &self.cancel).await {
                let state = AgentState::collect(&self.manager);
                match serde_json::to_string(&state) {
                    Ok(json) => tracing::info!(target: "state-report", "{}", json),
                    Err(e) => {
                        tracing::warn!(target: "state-report", "Could not serialize agent state: {}", e)
                    }
                }
            }
            Ok(())
        }
    })
);
