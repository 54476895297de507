//! Derivation-tree scanner.
//!
//! Walks a rectangle of `(account, index)` coordinates, queries every
//! derived address's native balance, and reports the funded wallets along
//! with aggregate statistics. Balance queries fan out up to a fixed
//! concurrency; aggregation does not depend on completion order.

use std::ops::Range;

use alloy::primitives::{Address, U256};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chain::ChainClient;
use crate::types::{wei_to_eth, AgentError, DerivationCoord, WalletRecord};
use crate::wallet::derivation::KeyDerivationTree;

/// Default number of in-flight balance queries.
pub const DEFAULT_SCAN_CONCURRENCY: usize = 8;

// ---------------------------------------------------------------------------
// Scan results
// ---------------------------------------------------------------------------

/// One funded wallet in the balance distribution.
#[derive(Debug, Clone, Serialize)]
pub struct BalanceEntry {
    pub address: Address,
    pub balance: U256,
    pub path: String,
}

/// Aggregate statistics over one scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WalletStats {
    /// Every coordinate visited.
    pub total_wallets: usize,
    pub wallets_with_balance: usize,
    pub total_balance: U256,
    /// Balance queries that errored and were skipped.
    pub failed_queries: usize,
    /// Funded wallets, in no particular order.
    pub distribution: Vec<BalanceEntry>,
}

impl WalletStats {
    pub fn total_balance_eth(&self) -> Decimal {
        wei_to_eth(self.total_balance)
    }
}

/// Funded wallets found by a scan, ordered by derivation coordinate.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub wallets: Vec<WalletRecord>,
    pub stats: WalletStats,
}

impl ScanReport {
    /// Wallets whose balance is strictly above `min_balance`.
    pub fn active(&self, min_balance: U256) -> impl Iterator<Item = &WalletRecord> {
        self.wallets.iter().filter(move |w| w.balance > min_balance)
    }

    pub fn active_count(&self, min_balance: U256) -> usize {
        self.active(min_balance).count()
    }
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

pub struct WalletScanner {
    concurrency: usize,
}

impl Default for WalletScanner {
    fn default() -> Self {
        Self::new(DEFAULT_SCAN_CONCURRENCY)
    }
}

impl WalletScanner {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Scan every coordinate in `accounts × wallets`.
    pub async fn scan(
        &self,
        tree: &KeyDerivationTree,
        chain: &dyn ChainClient,
        accounts: Range<u32>,
        wallets: Range<u32>,
    ) -> Result<ScanReport, AgentError> {
        let coords: Vec<DerivationCoord> = accounts
            .flat_map(|a| wallets.clone().map(move |i| DerivationCoord::new(a, i)))
            .collect();

        let total = coords.len();
        let records = tree.derive_all(coords).await?;

        info!(
            wallets = records.len(),
            concurrency = self.concurrency,
            "Scanning derivation tree"
        );

        let queried: Vec<_> = stream::iter(records)
            .map(|wallet| async move {
                let balance = chain.get_balance(wallet.address).await;
                (wallet, balance)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = ScanReport::default();
        report.stats.total_wallets = total;

        for (mut wallet, balance) in queried {
            let balance = match balance {
                Ok(b) => b,
                Err(e) => {
                    warn!(
                        address = %wallet.address,
                        path = %wallet.derivation_path,
                        error = %e,
                        "Balance query failed, skipping wallet"
                    );
                    report.stats.failed_queries += 1;
                    continue;
                }
            };

            if balance.is_zero() {
                continue;
            }

            wallet.balance = balance;
            debug!(wallet = %wallet, "Funded wallet found");
            report.stats.wallets_with_balance += 1;
            report.stats.total_balance += balance;
            report.stats.distribution.push(BalanceEntry {
                address: wallet.address,
                balance,
                path: wallet.derivation_path.clone(),
            });
            report.wallets.push(wallet);
        }

        report.wallets.sort_by_key(|w| (w.account_index, w.wallet_index));

        info!(
            scanned = report.stats.total_wallets,
            funded = report.stats.wallets_with_balance,
            failed = report.stats.failed_queries,
            total_eth = %report.stats.total_balance_eth(),
            "Scan complete"
        );

        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
