//! Ticketbuyer daemon
//!
//! Watches the full node for new blocks and buys stake tickets through the
//! wallet backend within the configured limits. Simulation mode (the default)
//! reads real balances but never broadcasts a purchase.

#![warn(unused_must_use)]

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use ticketbuyer::config::Config;
use ticketbuyer::endpoints;
use ticketbuyer::notifier::BlockNotifier;
use ticketbuyer::rpc::{ChainQuery, JsonRpcClient, NodeRpc, SimulatedWallet, WalletQuery, WalletRpc};
use ticketbuyer::shutdown;
use ticketbuyer::ticket_buyer::PurchaseController;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Operating mode (simulation or production)
    #[arg(short, long, default_value = "simulation")]
    mode: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Metrics port; overrides the config file
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Simulation,
    Production,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.log_json)?;

    info!("Starting ticketbuyer {}", env!("CARGO_PKG_VERSION"));

    info!("Loading configuration from: {}", args.config);
    let config = load_config(&args.config)?;

    let mode = match args.mode.as_str() {
        "production" => Mode::Production,
        "simulation" => Mode::Simulation,
        _ => {
            warn!("Unknown mode '{}', defaulting to simulation", args.mode);
            Mode::Simulation
        }
    };
    info!("Operating mode: {:?}", mode);

    let purchase_config = config.purchase_config()?;
    let node = JsonRpcClient::new(config.node.endpoint()).context("Failed to build node client")?;
    let wallet_client =
        JsonRpcClient::new(config.wallet.rpc.endpoint()).context("Failed to build wallet client")?;
    info!(node = node.url(), wallet = wallet_client.url(), account = %config.wallet.account, "RPC endpoints");

    let chain: Arc<dyn ChainQuery> = Arc::new(NodeRpc::new(node));
    let backend: Arc<dyn WalletQuery> = Arc::new(WalletRpc::new(
        wallet_client,
        config.wallet.account.clone(),
        purchase_config.voting_address.clone(),
    ));
    let wallet: Arc<dyn WalletQuery> = match mode {
        Mode::Simulation => Arc::new(SimulatedWallet::new(backend)),
        Mode::Production => backend,
    };

    let controller = PurchaseController::new(
        purchase_config,
        config.controller_settings(),
        chain.clone(),
        wallet,
    )
    .context("Invalid ticket buyer configuration")?;

    let (shutdown_tx, shutdown_rx) = shutdown::channel();

    if config.monitoring.enable_metrics {
        let port = args.metrics_port.unwrap_or(config.monitoring.metrics_port);
        info!("Starting metrics server on port {}", port);
        let listener = endpoints::bind(port)
            .await
            .with_context(|| format!("Failed to bind metrics port {}", port))?;
        let status = controller.subscribe();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = endpoints::endpoint_server(listener, status, shutdown).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let (block_tx, block_rx) = mpsc::channel(16);
    let notifier = BlockNotifier::new(chain, config.block_poll_interval());
    let notifier = tokio::spawn(notifier.run(block_tx, shutdown_rx.clone()));

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    let session = controller.run(block_rx, shutdown_rx).await;
    if let Err(e) = notifier.await {
        warn!("Block notifier ended abnormally: {}", e);
    }

    info!(
        tickets_purchased = session.tickets_purchased,
        amount_spent = %session.amount_spent,
        rounds = session.rounds,
        rounds_skipped = session.rounds_skipped,
        "Shut down gracefully"
    );
    Ok(())
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let env_filter = if verbose {
        "ticketbuyer=debug,info"
    } else {
        "ticketbuyer=info,warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| env_filter.into());

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

/// Load configuration from file with fallback to defaults
fn load_config(path: &str) -> Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::from_file_with_env(path)
            .with_context(|| format!("Failed to load config from {}", path))
    } else {
        warn!("Config file '{}' not found, using defaults", path);
        dotenvy::dotenv().ok();
        let mut config = Config::default();
        config.from_env()?;
        Ok(config)
    }
}
