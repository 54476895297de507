//! Accountant — session statistics.
//!
//! Folds each tick's outcome into the persistent [`AgentState`]: swap
//! counts, native spent and received, rotations and stuck-transaction
//! clears.

use alloy::primitives::{utils::format_ether, Address};
use chrono::{DateTime, Utc};
use tracing::info;

use crate::types::{AgentState, DerivationCoord, SwapResult, TradeSide};

// ---------------------------------------------------------------------------
// Tick report
// ---------------------------------------------------------------------------

/// Everything that happened during one orchestrator step.
#[derive(Debug, Clone)]
pub struct TickReport {
    /// Active wallet at the end of the step.
    pub wallet: Option<Address>,
    /// The step ran initialization instead of trading.
    pub initialized: bool,
    pub rotated: bool,
    pub stuck_cleared: bool,
    /// Final outcome of every swap attempted, liquidations included.
    pub swaps: Vec<SwapResult>,
    /// Why the step did not trade, if it did not.
    pub skipped: Option<String>,
    /// Derivation cursor after the step.
    pub cursor: DerivationCoord,
    pub timestamp: DateTime<Utc>,
}

impl TickReport {
    pub fn new(wallet: Option<Address>, cursor: DerivationCoord) -> Self {
        Self {
            wallet,
            initialized: false,
            rotated: false,
            stuck_cleared: false,
            swaps: Vec::new(),
            skipped: None,
            cursor,
            timestamp: Utc::now(),
        }
    }

    pub fn confirmed(&self) -> usize {
        self.swaps.iter().filter(|s| s.success()).count()
    }

    pub fn failed(&self) -> usize {
        self.swaps.len() - self.confirmed()
    }
}

// ---------------------------------------------------------------------------
// Accountant
// ---------------------------------------------------------------------------

pub struct Accountant;

impl Accountant {
    /// Apply `report` to `state`.
    pub fn record(state: &mut AgentState, report: &TickReport) {
        state.tick_count += 1;

        for swap in &report.swaps {
            if !swap.success() {
                state.failed_swaps += 1;
                continue;
            }
            match swap.side {
                TradeSide::Buy => {
                    state.buys += 1;
                    state.eth_spent += swap.amounts.input;
                    state.tokens_bought_est += swap.amounts.expected_output;
                }
                TradeSide::Sell => {
                    state.sells += 1;
                    state.tokens_sold += swap.amounts.input;
                    state.eth_received_min += swap.amounts.min_output;
                }
            }
        }

        if report.rotated {
            state.rotations += 1;
        }
        if report.stuck_cleared {
            state.stuck_clears += 1;
        }
        if report.wallet.is_some() {
            state.last_wallet = report.wallet;
        }
        state.cursor = report.cursor;

        info!(
            tick = state.tick_count,
            confirmed = report.confirmed(),
            failed = report.failed(),
            rotated = report.rotated,
            spent = %format_ether(state.eth_spent),
            received_min = %format_ether(state.eth_received_min),
            "Tick recorded"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
