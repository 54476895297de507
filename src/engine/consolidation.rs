//! Balance consolidation.
//!
//! Sweeps the native balance of every scanned wallet into one destination,
//! leaving each sender exactly enough to pay for its own transfer.

use std::sync::Arc;

use alloy::primitives::{utils::format_ether, Address, U256};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::chain::ChainClient;
use crate::types::{wei_to_eth, FeeParams, TransferResult, TxRequest, WalletRecord};
use crate::wallet::pool::TRANSFER_GAS;

/// Aggregate view over a consolidation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsolidationSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub total_moved: U256,
}

impl ConsolidationSummary {
    pub fn from_results(results: &[TransferResult]) -> Self {
        results.iter().fold(Self::default(), |mut s, r| {
            if r.success {
                s.succeeded += 1;
                s.total_moved += r.amount;
            } else {
                s.failed += 1;
            }
            s
        })
    }

    pub fn total_moved_eth(&self) -> Decimal {
        wei_to_eth(self.total_moved)
    }
}

pub struct ConsolidationEngine {
    chain: Arc<dyn ChainClient>,
    gas_limit: u64,
}

impl ConsolidationEngine {
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self {
            chain,
            gas_limit: TRANSFER_GAS,
        }
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    /// Send everything above gas cost from each wallet to `destination`.
    ///
    /// Wallets are processed one at a time; each transfer waits for one
    /// confirmation. Failures are recorded per wallet and never abort the run.
    pub async fn consolidate(
        &self,
        wallets: &[WalletRecord],
        destination: Address,
        fees: FeeParams,
    ) -> Vec<TransferResult> {
        let gas_cost = fees.max_cost(self.gas_limit);
        let mut results = Vec::with_capacity(wallets.len());

        info!(
            wallets = wallets.len(),
            destination = %destination,
            %fees,
            "Consolidating balances"
        );

        for wallet in wallets.iter().filter(|w| w.address != destination) {
            results.push(self.sweep(wallet, destination, fees, gas_cost).await);
        }

        let summary = ConsolidationSummary::from_results(&results);
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            total_eth = %summary.total_moved_eth(),
            "Consolidation complete"
        );
        results
    }

    async fn sweep(
        &self,
        wallet: &WalletRecord,
        destination: Address,
        fees: FeeParams,
        gas_cost: U256,
    ) -> TransferResult {
        let failure = |error: String| TransferResult {
            from: wallet.address,
            amount: U256::ZERO,
            success: false,
            tx_hash: None,
            error: Some(error),
        };

        let balance = match self.chain.get_balance(wallet.address).await {
            Ok(b) => b,
            Err(e) => return failure(format!("balance query failed: {e}")),
        };

        if balance <= gas_cost {
            warn!(
                wallet = %wallet.address,
                balance = %format_ether(balance),
                gas_cost = %format_ether(gas_cost),
                "Skipping wallet"
            );
            return failure("insufficient balance to cover gas".to_string());
        }
        let amount = balance - gas_cost;

        let tx = TxRequest::transfer(wallet.address, destination, amount)
            .with_gas_limit(self.gas_limit)
            .with_fees(fees);

        let outcome = match self.chain.send_transaction(&wallet.signer, tx).await {
            Ok(hash) => self.chain.wait_for_receipt(hash, 1).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(receipt) if receipt.success => {
                info!(
                    wallet = %wallet.address,
                    amount = %format_ether(amount),
                    tx = %receipt.tx_hash,
                    "Swept wallet"
                );
                TransferResult {
                    from: wallet.address,
                    amount,
                    success: true,
                    tx_hash: Some(receipt.tx_hash),
                    error: None,
                }
            }
            Ok(receipt) => TransferResult {
                tx_hash: Some(receipt.tx_hash),
                ..failure("transfer reverted".to_string())
            },
            Err(e) => {
                warn!(wallet = %wallet.address, error = %e, "Sweep failed");
                failure(e.to_string())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
