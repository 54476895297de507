//! ROTATOR — Multi-wallet bonding-curve trading agent
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores state from disk (or creates fresh), and supervises the trading
//! loop with graceful shutdown.
//!
//! `rotator consolidate` sweeps every funded wallet into one destination;
//! `rotator cancel` supersedes pending transactions of every funded wallet.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info, warn};

use rotator::chain::alloy_client::AlloyChain;
use rotator::config;
use rotator::engine::consolidation::{ConsolidationEngine, ConsolidationSummary};
use rotator::engine::nonce::NonceGuard;
use rotator::engine::orchestrator::TradeOrchestrator;
use rotator::engine::schedule;
use rotator::storage;
use rotator::types::AgentState;
use rotator::wallet::{KeyDerivationTree, ScanReport, WalletScanner};

const BANNER: &str = r#"
 ____   ___ _____  _  _____ ___  ____
|  _ \ / _ \_   _|/ \|_   _/ _ \|  _ \
| |_) | | | || | / _ \ | || | | | |_) |
|  _ <| |_| || |/ ___ \| || |_| |  _ <
|_| \_\\___/ |_/_/   \_\_| \___/|_| \_\

  Multi-wallet bonding-curve trading agent
  v0.1.0
"#;

/// What the binary was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Trade,
    Consolidate,
    Cancel,
}

/// Parse the first CLI argument. Anything unrecognised is an error so a
/// mistyped maintenance command never starts live trading.
fn parse_command(arg: Option<&str>) -> Result<Command> {
    match arg {
        None => Ok(Command::Trade),
        Some("consolidate") => Ok(Command::Consolidate),
        Some("cancel") => Ok(Command::Cancel),
        Some(other) => bail!("unknown command `{other}` (expected `consolidate` or `cancel`)"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = config::AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging();

    let command = match parse_command(std::env::args().nth(1).as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Refusing to start");
            return Err(e);
        }
    };

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        trade_interval_secs = cfg.agent.trade_interval_secs,
        scan_accounts = cfg.wallets.scan_accounts,
        "ROTATOR starting up"
    );

    // Configuration problems are fatal before anything touches the chain
    KeyDerivationTree::new(cfg.mnemonic()?)?;
    let orchestrator_cfg = cfg.orchestrator_config()?;

    let chain = Arc::new(
        AlloyChain::connect(&cfg.rpc_url()?, cfg.contract_address()?)
            .await?
            .with_timing(
                Duration::from_secs(cfg.chain.receipt_poll_secs),
                Duration::from_secs(cfg.chain.confirmation_timeout_secs),
            ),
    );

    match command {
        Command::Consolidate => return consolidate(&cfg, chain).await,
        Command::Cancel => return cancel_pending(&cfg, chain).await,
        Command::Trade => {}
    }

    // -- Restore or create state -----------------------------------------

    let state_path = cfg.agent.state_file.clone();
    let mut state = match storage::load_state(Some(&state_path))? {
        Some(s) => {
            info!(ticks = s.tick_count, swaps = s.swaps(), cursor = %s.cursor, "Resumed from saved state");
            s
        }
        None => {
            let s = AgentState::new();
            info!(run_id = %s.run_id, "Fresh start");
            s
        }
    };

    // -- Shutdown wiring -------------------------------------------------

    let (trigger, shutdown) = schedule::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received.");
            trigger.trigger();
        }
    });

    // -- Supervisor loop -------------------------------------------------

    let restart_delay = Duration::from_secs(cfg.agent.restart_delay_secs);
    info!("Entering main loop. Press Ctrl+C to stop.");

    loop {
        let tree = KeyDerivationTree::new(cfg.mnemonic()?)?.with_cursor(state.cursor);
        let mut orchestrator = TradeOrchestrator::new(
            tree,
            chain.clone(),
            chain.clone(),
            orchestrator_cfg.clone(),
            shutdown.clone(),
        );
        if let Some(seed) = cfg.agent.rng_seed {
            orchestrator = orchestrator.with_rng(StdRng::seed_from_u64(seed));
        }

        let task = tokio::spawn(async move {
            let result = orchestrator.run(&mut state).await;
            (result, state)
        });

        let failure = match task.await {
            Ok((result, s)) => {
                state = s;
                result.err().map(|e| e.to_string())
            }
            Err(e) => {
                state = storage::load_state(Some(&state_path))?.unwrap_or_default();
                Some(format!("trading task panicked: {e}"))
            }
        };

        match failure {
            None => break,
            Some(reason) => {
                error!(reason = %reason, delay_secs = restart_delay.as_secs(), "Trading loop exited, restarting");
                if !shutdown.sleep(restart_delay).await {
                    break;
                }
            }
        }
    }

    // Save final state
    storage::save_state(&state, Some(&state_path))?;
    info!(
        ticks = state.tick_count,
        buys = state.buys,
        sells = state.sells,
        rotations = state.rotations,
        "ROTATOR shut down cleanly."
    );

    Ok(())
}

/// Scan the configured rectangle of the derivation tree.
async fn scan(cfg: &config::AppConfig, chain: &AlloyChain) -> Result<ScanReport> {
    let tree = KeyDerivationTree::new(cfg.mnemonic()?)?;
    let report = WalletScanner::new(cfg.wallets.scan_concurrency)
        .scan(
            &tree,
            chain,
            0..cfg.wallets.scan_accounts,
            0..cfg.wallets.scan_wallets_per_account,
        )
        .await?;
    Ok(report)
}

/// Sweep every funded wallet into the configured destination.
async fn consolidate(cfg: &config::AppConfig, chain: Arc<AlloyChain>) -> Result<()> {
    let report = scan(cfg, &chain).await?;

    let destination = match cfg.consolidation.destination {
        Some(addr) => addr,
        None => match report.wallets.first() {
            Some(w) => w.address,
            None => {
                warn!("No funded wallets found, nothing to consolidate");
                return Ok(());
            }
        },
    };

    let results = ConsolidationEngine::new(chain)
        .with_gas_limit(cfg.consolidation.gas_limit)
        .consolidate(&report.wallets, destination, cfg.consolidation_fees()?)
        .await;

    for r in results.iter().filter(|r| !r.success) {
        warn!(wallet = %r.from, reason = ?r.error, "Wallet not consolidated");
    }
    let summary = ConsolidationSummary::from_results(&results);
    info!(
        destination = %destination,
        succeeded = summary.succeeded,
        failed = summary.failed,
        total_eth = %summary.total_moved_eth(),
        "Consolidation finished"
    );
    Ok(())
}

/// Supersede pending transactions on every funded wallet.
async fn cancel_pending(cfg: &config::AppConfig, chain: Arc<AlloyChain>) -> Result<()> {
    let report = scan(cfg, &chain).await?;
    let guard = NonceGuard::new(chain);

    for wallet in &report.wallets {
        match guard.cancel_pending(wallet).await {
            Ok(r) if r.tx_hash.is_some() => info!(
                wallet = %wallet.address,
                remaining = r.remaining,
                tx = ?r.tx_hash,
                "Cancellation sent"
            ),
            Ok(_) => {}
            Err(e) => error!(wallet = %wallet.address, error = %e, "Cancellation failed"),
        }
    }
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("rotator=info"));

    let json_logging = std::env::var("ROTATOR_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
