//! Trade orchestrator — the long-running control loop.
//!
//! Owns the derivation tree, the wallet pool and the trade session, and
//! drives them through `Init → Trading ⇄ Rotating`:
//!
//! 1. **Init** — scan the tree, replenish the pool if it is thin, activate
//!    the richest wallet and liquidate any tokens it already holds.
//! 2. **Trading** — one tick at a time: clear stuck transactions, buy when
//!    the wallet holds no spendable tokens, then sell a random slice.
//! 3. **Rotating** — once the session's swap budget is spent or the wallet
//!    has nothing left to trade, liquidate, retire it and activate the next
//!    best one.
//!
//! Exactly one wallet trades at a time and its transactions are strictly
//! sequential.

use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{utils::format_ether, U256};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error, info, warn};

use super::accountant::{Accountant, TickReport};
use super::nonce::NonceGuard;
use super::retry::RetryPolicy;
use super::schedule::Shutdown;
use super::swap::{SwapConfig, SwapEngine};
use crate::chain::{ChainClient, CurveContract};
use crate::storage;
use crate::types::{
    AgentError, AgentState, DerivationCoord, FeeParams, SwapAmounts, SwapResult, TradeSide,
    WalletRecord,
};
use crate::wallet::{FundingPlan, KeyDerivationTree, WalletPool, WalletScanner};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Trading knobs.
#[derive(Debug, Clone)]
pub struct TradingConfig {
    /// Swaps per wallet before rotation, drawn on each activation.
    pub swap_budget: RangeInclusive<u32>,
    /// Share of spendable native balance used per buy, in percent.
    pub buy_fraction_pct: u64,
    /// Share of spendable tokens sold per tick, in percent.
    pub sell_pct: RangeInclusive<u64>,
    /// Reserve share cap for liquidations at activation and rotation.
    pub liquidation_cap_pct: u64,
    /// Native balance never spent.
    pub gas_reserve: U256,
    /// Token balance never sold.
    pub token_reserve: U256,
    /// Standard fee profile; doubled to supersede stuck transactions.
    pub base_fees: FeeParams,
    pub trade_interval: Duration,
    /// Pause after each completed trade.
    pub trade_cooldown: Duration,
    /// Pause after a successful liquidation.
    pub liquidation_cooldown: Duration,
    /// Pause after a failed step.
    pub error_cooldown: Duration,
    pub retry: RetryPolicy,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            swap_budget: 5..=10,
            buy_fraction_pct: 50,
            sell_pct: 10..=30,
            liquidation_cap_pct: 10,
            gas_reserve: U256::from(100_000_000_000_000u64),
            token_reserve: U256::from(1_000_000_000_000_000_000u64),
            base_fees: FeeParams::new(2_000_000_000, 1_000_000),
            trade_interval: Duration::from_secs(60),
            trade_cooldown: Duration::from_secs(5),
            liquidation_cooldown: Duration::from_secs(30),
            error_cooldown: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// Which part of the tree to scan and how to top the pool up.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub scan_accounts: u32,
    pub scan_wallets_per_account: u32,
    pub scan_concurrency: usize,
    /// Strict lower bound for a wallet to count as active.
    pub min_active_balance: U256,
    pub min_active_wallets: usize,
    /// Wallet that funds replenishment.
    pub source: DerivationCoord,
    pub funding: FundingPlan,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub trading: TradingConfig,
    pub pool: PoolConfig,
    pub swap: SwapConfig,
    /// Where `run` persists state after each step. `None` disables persistence.
    pub state_path: Option<String>,
}

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Trading,
    Rotating,
}

/// The active wallet and its swap budget.
#[derive(Debug, Clone)]
pub struct TradeSession {
    pub active_wallet: WalletRecord,
    /// Successful sells since activation.
    pub swap_count: u32,
    pub swap_budget: u32,
}

impl TradeSession {
    pub fn exhausted(&self) -> bool {
        self.swap_count >= self.swap_budget
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct TradeOrchestrator {
    tree: KeyDerivationTree,
    scanner: WalletScanner,
    pool: WalletPool,
    chain: Arc<dyn ChainClient>,
    swaps: SwapEngine,
    nonces: NonceGuard,
    config: OrchestratorConfig,
    rng: StdRng,
    phase: Phase,
    session: Option<TradeSession>,
    shutdown: Shutdown,
}

impl TradeOrchestrator {
    pub fn new(
        tree: KeyDerivationTree,
        chain: Arc<dyn ChainClient>,
        contract: Arc<dyn CurveContract>,
        config: OrchestratorConfig,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            tree,
            scanner: WalletScanner::new(config.pool.scan_concurrency),
            pool: WalletPool::new(config.pool.min_active_balance, config.pool.min_active_wallets),
            swaps: SwapEngine::new(chain.clone(), contract, config.swap.clone()),
            nonces: NonceGuard::new(chain.clone()),
            chain,
            config,
            rng: StdRng::from_entropy(),
            phase: Phase::Init,
            session: None,
            shutdown,
        }
    }

    /// Replace the entropy-seeded RNG.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn session(&self) -> Option<&TradeSession> {
        self.session.as_ref()
    }

    pub fn pool(&self) -> &WalletPool {
        &self.pool
    }

    pub fn cursor(&self) -> DerivationCoord {
        self.tree.cursor()
    }

    // -- lifecycle --

    /// Scan, replenish if needed, activate the best wallet and liquidate
    /// whatever tokens it already holds.
    pub async fn initialize(&mut self) -> Result<TickReport, AgentError> {
        self.phase = Phase::Init;
        self.session = None;
        info!("Initializing wallet pool");

        self.rescan().await?;
        let wallet = self
            .pool
            .select_best()
            .cloned()
            .ok_or(AgentError::NoWalletAvailable)?;
        self.activate(wallet);

        let mut report = self.report();
        report.initialized = true;
        if let Some(result) = self.liquidate().await {
            report.swaps.push(result);
        }

        self.phase = Phase::Trading;
        Ok(report)
    }

    /// One trading step. Initializes first when no wallet is active.
    pub async fn tick(&mut self) -> Result<TickReport, AgentError> {
        let session = match self.session.clone() {
            Some(s) if self.phase != Phase::Init => s,
            _ => return self.initialize().await,
        };
        let wallet = session.active_wallet.clone();
        let mut report = self.report();

        match self
            .nonces
            .clear_stuck(&wallet, self.config.trading.base_fees)
            .await
        {
            Ok(Some(_)) => report.stuck_cleared = true,
            Ok(None) => {}
            Err(e) => {
                warn!(wallet = %wallet.address, error = %e, "Could not clear stuck transactions, skipping trade");
                report.skipped = Some(e.to_string());
                return Ok(report);
            }
        }

        if session.exhausted() {
            info!(
                swaps = session.swap_count,
                budget = session.swap_budget,
                "Swap budget reached, rotating wallet"
            );
            if let Err(e) = self.rotate(&mut report).await {
                self.phase = Phase::Init;
                self.session = None;
                return Err(e);
            }
            return Ok(report);
        }

        let trading = self.config.trading.clone();
        let mut spendable_tokens = self.spendable_tokens(&wallet).await?;

        if spendable_tokens.is_zero() {
            let balance = self
                .chain
                .get_balance(wallet.address)
                .await
                .map_err(AgentError::chain)?;
            let spendable_eth = balance.saturating_sub(trading.gas_reserve);
            let amount = spendable_eth * U256::from(trading.buy_fraction_pct) / U256::from(100u64);

            // Nothing left to buy or sell with: the wallet has fallen out of
            // the active set, so hand over to the next one
            if amount.is_zero() || balance <= self.pool.min_balance() {
                info!(
                    wallet = %wallet.address,
                    balance = %format_ether(balance),
                    "Active wallet drained, rotating"
                );
                if let Err(e) = self.rotate(&mut report).await {
                    self.phase = Phase::Init;
                    self.session = None;
                    return Err(e);
                }
                return Ok(report);
            }

            match self.swaps.price_impact_bps(amount).await {
                Ok(bps) => debug!(impact_bps = bps, "Estimated price impact"),
                Err(e) => debug!(error = %e, "Price impact unavailable"),
            }

            let result = self.trade(&wallet, TradeSide::Buy, amount).await;
            let bought = result.success();
            report.swaps.push(result);
            if !bought || !self.shutdown.sleep(trading.trade_cooldown).await {
                return Ok(report);
            }
            spendable_tokens = self.spendable_tokens(&wallet).await?;
        }

        if spendable_tokens.is_zero() {
            return Ok(report);
        }

        let pct = self.rng.gen_range(trading.sell_pct.clone());
        let reserves = self.swaps.reserves().await?;
        let amount = SwapEngine::liquidation_amount(
            spendable_tokens * U256::from(pct) / U256::from(100u64),
            &reserves,
            self.swaps.config().max_sell_reserve_pct,
        );
        if amount.is_zero() {
            return Ok(report);
        }
        debug!(pct, tokens = %format_ether(amount), "Sell slice");

        let result = self.trade(&wallet, TradeSide::Sell, amount).await;
        let sold = result.success();
        report.swaps.push(result);
        if sold {
            if let Some(s) = self.session.as_mut() {
                s.swap_count += 1;
                info!(swaps = s.swap_count, budget = s.swap_budget, "Swap counted");
            }
            self.shutdown.sleep(trading.trade_cooldown).await;
        }

        Ok(report)
    }

    /// Retire the active wallet and activate the next best one.
    pub async fn rotate(&mut self, report: &mut TickReport) -> Result<(), AgentError> {
        self.phase = Phase::Rotating;

        if let Some(result) = self.liquidate().await {
            report.swaps.push(result);
        }

        let retired = self.session.take().map(|s| s.active_wallet);
        if let Some(ref old) = retired {
            self.pool.remove(&old.address);
            info!(wallet = %old.address, remaining = self.pool.len(), "Wallet retired");
        }

        let next = match self.pool.select_best().cloned() {
            Some(w) => w,
            None => {
                info!("No active wallets left, rescanning");
                self.rescan().await?;
                if let Some(ref old) = retired {
                    if self.pool.len() > 1 {
                        self.pool.remove(&old.address);
                    }
                }
                self.pool
                    .select_best()
                    .cloned()
                    .ok_or(AgentError::NoWalletAvailable)?
            }
        };

        self.activate(next);
        self.phase = Phase::Trading;
        report.rotated = true;
        report.wallet = self.session.as_ref().map(|s| s.active_wallet.address);
        report.cursor = self.tree.cursor();
        Ok(())
    }

    /// Step until shutdown, folding each report into `state`.
    ///
    /// Ordinary failures are logged and followed by the error cooldown.
    /// Only configuration-class errors end the loop with an error.
    pub async fn run(&mut self, state: &mut AgentState) -> Result<(), AgentError> {
        info!(
            interval_secs = self.config.trading.trade_interval.as_secs(),
            "Entering trading loop"
        );

        while !self.shutdown.is_triggered() {
            let step = if self.phase == Phase::Init {
                self.initialize().await
            } else {
                self.tick().await
            };

            let pause = match step {
                Ok(report) => {
                    Accountant::record(state, &report);
                    self.persist(state);
                    self.config.trading.trade_interval
                }
                Err(e @ (AgentError::Configuration(_) | AgentError::InvalidSeed(_))) => {
                    error!(error = %e, "Fatal error in trading loop");
                    return Err(e);
                }
                Err(e) => {
                    error!(error = %e, phase = ?self.phase, "Step failed");
                    state.cursor = self.tree.cursor();
                    self.persist(state);
                    self.config.trading.error_cooldown
                }
            };

            if !self.shutdown.sleep(pause).await {
                break;
            }
        }

        info!(%state, "Trading loop stopped");
        Ok(())
    }

    // -- internals --

    fn report(&self) -> TickReport {
        TickReport::new(
            self.session.as_ref().map(|s| s.active_wallet.address),
            self.tree.cursor(),
        )
    }

    fn activate(&mut self, wallet: WalletRecord) {
        let budget = self.rng.gen_range(self.config.trading.swap_budget.clone());
        info!(wallet = %wallet, budget, "Wallet activated");
        self.session = Some(TradeSession {
            active_wallet: wallet,
            swap_count: 0,
            swap_budget: budget,
        });
    }

    /// Scan the configured rectangle and top the pool up if it is thin.
    async fn rescan(&mut self) -> Result<(), AgentError> {
        let pool = self.config.pool.clone();
        let scan = self
            .scanner
            .scan(
                &self.tree,
                self.chain.as_ref(),
                0..pool.scan_accounts,
                0..pool.scan_wallets_per_account,
            )
            .await?;
        self.pool.refresh(&scan);

        if self.pool.needs_replenish() {
            info!(active = self.pool.len(), "Too few active wallets, replenishing");
            let source = self.tree.derive_coord(pool.source)?;
            match self
                .pool
                .replenish(
                    &mut self.tree,
                    self.chain.as_ref(),
                    &source,
                    &pool.funding,
                    &self.shutdown,
                )
                .await
            {
                Ok(n) => debug!(funded = n, "Replenishment done"),
                Err(e) => warn!(error = %e, "Replenishment failed"),
            }
        }
        Ok(())
    }

    async fn spendable_tokens(&self, wallet: &WalletRecord) -> Result<U256, AgentError> {
        let balance = self.swaps.token_balance(wallet).await?;
        Ok(balance.saturating_sub(self.config.trading.token_reserve))
    }

    /// Sell spendable tokens of the active wallet, capped at the
    /// liquidation share of the reserve. Errors are logged, not raised.
    async fn liquidate(&mut self) -> Option<SwapResult> {
        let wallet = self.session.as_ref()?.active_wallet.clone();

        let spendable = match self.spendable_tokens(&wallet).await {
            Ok(t) if t.is_zero() => return None,
            Ok(t) => t,
            Err(e) => {
                warn!(wallet = %wallet.address, error = %e, "Token balance unavailable, skipping liquidation");
                return None;
            }
        };
        let reserves = match self.swaps.reserves().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Reserves unavailable, skipping liquidation");
                return None;
            }
        };

        let amount = SwapEngine::liquidation_amount(
            spendable,
            &reserves,
            self.config.trading.liquidation_cap_pct,
        );
        info!(
            wallet = %wallet.address,
            held = %format_ether(spendable),
            selling = %format_ether(amount),
            reserves = %reserves,
            "Liquidating existing tokens"
        );

        let result = self.swaps.sell(&wallet, amount).await;
        let result = self.swaps.settle(&wallet, result).await;
        if result.success() {
            self.shutdown
                .sleep(self.config.trading.liquidation_cooldown)
                .await;
        } else {
            warn!(%result, "Liquidation failed, will try again later");
        }
        Some(result)
    }

    /// Run one swap under the retry policy, settling ambiguous submissions
    /// before any further attempt.
    async fn trade(&self, wallet: &WalletRecord, side: TradeSide, amount: U256) -> SwapResult {
        let last: Mutex<Option<SwapResult>> = Mutex::new(None);
        let swaps = &self.swaps;
        let last_ref = &last;

        let outcome = self
            .config
            .trading
            .retry
            .run(&self.shutdown, AgentError::is_retryable, |attempt| async move {
                debug!(attempt, %side, "Swap attempt");
                let result = match side {
                    TradeSide::Buy => swaps.buy(wallet, amount).await,
                    TradeSide::Sell => swaps.sell(wallet, amount).await,
                };
                let result = swaps.settle(wallet, result).await;
                if let Ok(mut slot) = last_ref.lock() {
                    *slot = Some(result.clone());
                }
                result.into_result()
            })
            .await;

        match outcome {
            Ok(result) => result,
            Err(e) => {
                let amounts = SwapAmounts {
                    input: amount,
                    ..Default::default()
                };
                last.into_inner()
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| SwapResult::rejected(side, amounts, e))
            }
        }
    }

    fn persist(&self, state: &AgentState) {
        if let Some(ref path) = self.config.state_path {
            if let Err(e) = storage::save_state(state, Some(path)) {
                error!(error = %e, "Failed to save state");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
