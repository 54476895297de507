//! Active wallet pool and selector.
//!
//! Holds the wallets currently considered funded enough to trade from,
//! picks the richest one on demand, and tops the pool up from a source
//! wallet when it runs low.

use std::time::Duration;

use alloy::primitives::{utils::format_ether, Address, U256};
use tracing::{info, warn};

use crate::chain::ChainClient;
use crate::engine::schedule::Shutdown;
use crate::types::{AgentError, FeeParams, TxRequest, WalletRecord};
use crate::wallet::derivation::KeyDerivationTree;
use crate::wallet::scanner::ScanReport;

/// Below this many active wallets the pool should be replenished.
pub const DEFAULT_MIN_ACTIVE_WALLETS: usize = 3;

/// Gas for a plain native transfer.
pub const TRANSFER_GAS: u64 = 21_000;

/// How to fund freshly derived wallets.
#[derive(Debug, Clone)]
pub struct FundingPlan {
    /// Wallets to create per replenishment.
    pub count: usize,
    /// Native amount sent to each new wallet.
    pub amount: U256,
    /// Native balance the source always keeps.
    pub gas_reserve: U256,
    pub fees: FeeParams,
    /// Pause between consecutive transfers.
    pub delay: Duration,
}

impl FundingPlan {
    /// Total native amount the plan transfers.
    pub fn total(&self) -> U256 {
        self.amount * U256::from(self.count)
    }
}

/// Wallets eligible for trading, in first-seen order.
#[derive(Debug, Clone)]
pub struct WalletPool {
    wallets: Vec<WalletRecord>,
    min_balance: U256,
    min_active: usize,
}

impl WalletPool {
    pub fn new(min_balance: U256, min_active: usize) -> Self {
        Self {
            wallets: Vec::new(),
            min_balance,
            min_active,
        }
    }

    pub fn min_balance(&self) -> U256 {
        self.min_balance
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.wallets.iter().any(|w| &w.address == address)
    }

    pub fn get(&self, address: &Address) -> Option<&WalletRecord> {
        self.wallets.iter().find(|w| &w.address == address)
    }

    pub fn wallets(&self) -> &[WalletRecord] {
        &self.wallets
    }

    /// Add or update a wallet. An existing entry keeps its position.
    pub fn insert(&mut self, wallet: WalletRecord) {
        match self.wallets.iter_mut().find(|w| w.address == wallet.address) {
            Some(existing) => *existing = wallet,
            None => self.wallets.push(wallet),
        }
    }

    /// Drop a wallet from the active set. The key itself stays derivable.
    pub fn remove(&mut self, address: &Address) -> Option<WalletRecord> {
        let pos = self.wallets.iter().position(|w| &w.address == address)?;
        Some(self.wallets.remove(pos))
    }

    /// Replace membership with the scan's wallets above the pool minimum.
    pub fn refresh(&mut self, scan: &ScanReport) {
        self.wallets = scan.active(self.min_balance).cloned().collect();
        info!(
            active = self.wallets.len(),
            min_balance = %format_ether(self.min_balance),
            "Wallet pool refreshed"
        );
    }

    pub fn needs_replenish(&self) -> bool {
        self.wallets.len() < self.min_active
    }

    /// The wallet with the highest balance. Ties go to the first inserted.
    pub fn select_best(&self) -> Option<&WalletRecord> {
        self.wallets.iter().fold(None, |best: Option<&WalletRecord>, w| match best {
            Some(b) if b.balance >= w.balance => Some(b),
            _ => Some(w),
        })
    }

    /// Fund `plan.count` freshly derived wallets from `source` and add them.
    ///
    /// A no-op when the source cannot cover the whole plan above its gas
    /// reserve. Transfers are strictly sequential with one confirmation each;
    /// the first failure ends the run. Returns the number of wallets funded.
    pub async fn replenish(
        &mut self,
        tree: &mut KeyDerivationTree,
        chain: &dyn ChainClient,
        source: &WalletRecord,
        plan: &FundingPlan,
        shutdown: &Shutdown,
    ) -> Result<usize, AgentError> {
        let balance = chain
            .get_balance(source.address)
            .await
            .map_err(AgentError::chain)?;
        let spendable = balance.saturating_sub(plan.gas_reserve);

        if spendable < plan.total() {
            info!(
                source = %source.address,
                balance = %format_ether(balance),
                needed = %format_ether(plan.total()),
                "Source wallet has insufficient balance to fund new wallets"
            );
            return Ok(0);
        }

        info!(
            source = %source.address,
            count = plan.count,
            amount = %format_ether(plan.amount),
            "Funding new wallets"
        );

        let mut funded = 0;
        while funded < plan.count {
            let coord = tree.next_path();
            let mut wallet = tree.derive_coord(coord)?;
            if wallet.address == source.address || self.contains(&wallet.address) {
                continue;
            }

            let tx = TxRequest::transfer(source.address, wallet.address, plan.amount)
                .with_gas_limit(TRANSFER_GAS)
                .with_fees(plan.fees);

            let sent = match chain.send_transaction(&source.signer, tx).await {
                Ok(hash) => chain.wait_for_receipt(hash, 1).await,
                Err(e) => Err(e),
            };

            match sent {
                Ok(receipt) if receipt.success => {
                    info!(
                        wallet = %wallet.address,
                        path = %wallet.derivation_path,
                        tx = %receipt.tx_hash,
                        "Funded new wallet"
                    );
                }
                Ok(receipt) => {
                    warn!(wallet = %wallet.address, tx = %receipt.tx_hash, "Funding transfer reverted");
                    break;
                }
                Err(e) => {
                    warn!(wallet = %wallet.address, error = %e, "Funding transfer failed");
                    break;
                }
            }

            wallet.balance = plan.amount;
            self.insert(wallet);
            funded += 1;

            if funded < plan.count && !shutdown.sleep(plan.delay).await {
                break;
            }
        }

        info!(funded, active = self.wallets.len(), "Replenishment finished");
        Ok(funded)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
