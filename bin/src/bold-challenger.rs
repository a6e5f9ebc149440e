use anyhow::{anyhow, Result};
use bold_challenger_driver::{
    metrics::CountingMetrics,
    persistence::{PersistenceSink, PostgresSink},
    AssertionChain, BlockNotifierDriver, ChainWatcherDriver, ChallengeDriver, Driver,
    DriverConfig, EthAssertionChain, Manager, SignerMiddlewareWS, SpecChallengeManager,
    StateReportDriver,
};
use bold_challenger_solvers::bold::{AlphabetProvider, AssertionHash, HistoryCommitmentProvider};
use clap::{ArgAction, Parser};
use ethers::{
    middleware::SignerMiddleware,
    prelude::{Middleware, Provider, Signer, Ws},
    signers::LocalWallet,
    types::{Address, H256},
};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::Level;

/// Arguments for the `bold-challenger` binary.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Verbosity level (0-4)
    #[arg(long, short, help = "Verbosity level (0-4)", action = ArgAction::Count, env = "VERBOSITY")]
    v: u8,

    /// The Websocket RPC endpoint used to index and send transactions.
    #[arg(
        long,
        short,
        help = "The Websocket RPC endpoint used to index and send transactions.",
        env = "BOLD_CHALLENGER_WS"
    )]
    ws_endpoint: String,

    /// The address of the rollup contract.
    #[arg(
        long,
        short,
        help = "The address of the rollup contract.",
        env = "BOLD_CHALLENGER_ROLLUP"
    )]
    rollup: Address,

    /// The private key used to sign transactions.
    #[arg(
        long,
        help = "The private key used to sign transactions.",
        env = "BOLD_CHALLENGER_KEY"
    )]
    private_key: String,

    /// The name of this validator, used in logs.
    #[arg(
        long,
        help = "The name of this validator, used in logs.",
        env = "BOLD_CHALLENGER_NAME",
        default_value = "bold-challenger"
    )]
    validator_name: String,

    /// The execution trace the local alphabet state provider computes commitments over.
    #[arg(
        long,
        help = "The execution trace the local alphabet state provider computes commitments over.",
        env = "BOLD_CHALLENGER_TRACE"
    )]
    trace: String,

    /// Assertions this validator agrees with and opens challenges for.
    #[arg(
        long,
        help = "Assertions this validator agrees with and opens challenges for.",
        env = "BOLD_CHALLENGER_CHALLENGE",
        value_delimiter = ','
    )]
    challenge: Vec<H256>,

    /// Only track challenges on the children of these assertions. Empty tracks all.
    #[arg(
        long,
        help = "Only track challenges on the children of these assertions. Empty tracks all.",
        env = "BOLD_CHALLENGER_TRACK",
        value_delimiter = ','
    )]
    track: Vec<H256>,

    /// Seconds between chain polls.
    #[arg(
        long,
        help = "Seconds between chain polls.",
        env = "BOLD_CHALLENGER_POLL_INTERVAL",
        default_value_t = 1
    )]
    poll_interval: u64,

    /// Optional postgres connection string to persist observed edges and assertions.
    #[arg(
        long,
        help = "Optional postgres connection string to persist observed edges and assertions.",
        env = "BOLD_CHALLENGER_POSTGRES"
    )]
    postgres: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse the command arguments
    let Args {
        v,
        ws_endpoint,
        rollup,
        private_key,
        validator_name,
        trace,
        challenge,
        track,
        poll_interval,
        postgres,
    } = Args::parse();

    // Initialize the tracing subscriber
    init_tracing_subscriber(v)?;

    // Create the driver config.
    let driver_config = DriverConfig::new(validator_name)
        .with_poll_interval(Duration::from_secs(poll_interval))
        .with_challenge_assertion_hashes(challenge.into_iter().map(AssertionHash::from).collect())
        .with_track_challenge_parent_assertion_hashes(
            track.into_iter().map(AssertionHash::from).collect(),
        );
    tracing::info!(target: "bold-challenger-cli", "Driver config created successfully.");

    // Connect to the websocket endpoint and bind to the rollup.
    tracing::debug!(target: "bold-challenger-cli", "Connecting to websocket endpoint...");
    let provider = Provider::<Ws>::connect(&ws_endpoint).await?;
    let chain_id = provider.get_chainid().await?;
    let wallet: LocalWallet = private_key
        .parse::<LocalWallet>()
        .map_err(|e| anyhow!("invalid private key: {}", e))?
        .with_chain_id(chain_id.as_u64());
    let client: Arc<SignerMiddlewareWS> = Arc::new(SignerMiddleware::new(provider, wallet));
    let chain = Arc::new(EthAssertionChain::try_new(rollup, client).await?);
    tracing::info!(target: "bold-challenger-cli", "Websocket connected @ {}, bound to rollup {:?}", ws_endpoint, rollup);

    // Build the local state provider over the configured trace.
    let challenge_manager = chain.spec_challenge_manager();
    let leaf_heights = challenge_manager
        .layer_zero_heights()
        .challenge_leaf_heights(challenge_manager.num_big_steps());
    let alphabet = Arc::new(AlphabetProvider::new(trace.into_bytes().into()));
    let state_provider = Arc::new(HistoryCommitmentProvider::new(
        alphabet.clone(),
        alphabet.clone(),
        alphabet.clone(),
        alphabet,
        leaf_heights,
    ));

    let persistence: Option<Arc<dyn PersistenceSink>> = match postgres {
        Some(url) => Some(Arc::new(PostgresSink::connect(url).await?)),
        None => None,
    };

    let cancel = CancellationToken::new();
    let manager = Manager::new(
        chain,
        state_provider,
        Arc::new(driver_config),
        Arc::new(CountingMetrics::default()),
        persistence,
        cancel.clone(),
    );

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!(target: "bold-challenger-cli", "Received interrupt, shutting down...");
            }
            cancel.cancel();
        });
    }

    // Start the driver loops.
    tokio::try_join!(
        ChainWatcherDriver::new(Arc::clone(&manager), cancel.clone()).start_loop(),
        BlockNotifierDriver::new(Arc::clone(&manager), cancel.clone()).start_loop(),
        ChallengeDriver::new(Arc::clone(&manager), cancel.clone()).start_loop(),
        StateReportDriver::new(manager, cancel).start_loop(),
    )?;

    Ok(())
}

/// Initializes the tracing subscriber
///
/// # Arguments
/// * `verbosity_level` - The verbosity level (0-4)
///
/// # Returns
/// * `Result<()>` - Ok if successful, Err otherwise.
fn init_tracing_subscriber(verbosity_level: u8) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(match verbosity_level {
            0 => Level::ERROR,
            1 => Level::WARN,
            2 => Level::INFO,
            3 => Level::DEBUG,
            _ => Level::TRACE,
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber).map_err(|e| anyhow!(e))
}
