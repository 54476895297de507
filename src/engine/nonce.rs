//! Stuck-transaction recovery.
//!
//! A wallet whose pending transaction count runs ahead of its mined count
//! has a backlog. It is cleared by superseding the oldest pending nonce with
//! a zero-value self-transfer at higher fees; nothing is ever "cancelled" in
//! the RPC sense.

use std::sync::Arc;

use alloy::primitives::{B256, U256};
use tracing::{info, warn};

use crate::chain::ChainClient;
use crate::types::{AgentError, FeeParams, NonceTag, TxRequest, WalletRecord};
use crate::wallet::pool::TRANSFER_GAS;

/// Outcome of [`NonceGuard::cancel_pending`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelReport {
    pub pending_before: u64,
    pub confirmed_before: u64,
    pub tx_hash: Option<B256>,
    /// Transactions still pending after the replacement confirmed.
    pub remaining: u64,
}

impl CancelReport {
    pub fn cleared(&self) -> bool {
        self.remaining == 0
    }
}

pub struct NonceGuard {
    chain: Arc<dyn ChainClient>,
}

impl NonceGuard {
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self { chain }
    }

    /// Pending and latest transaction counts for `wallet`.
    pub async fn counts(&self, wallet: &WalletRecord) -> Result<(u64, u64), AgentError> {
        let pending = self
            .chain
            .get_transaction_count(wallet.address, NonceTag::Pending)
            .await
            .map_err(AgentError::chain)?;
        let latest = self
            .chain
            .get_transaction_count(wallet.address, NonceTag::Latest)
            .await
            .map_err(AgentError::chain)?;
        Ok((pending, latest))
    }

    /// Supersede a pending backlog using double the given `fees`.
    ///
    /// Returns the replacement's hash, or `None` when nothing was pending.
    pub async fn clear_stuck(
        &self,
        wallet: &WalletRecord,
        fees: FeeParams,
    ) -> Result<Option<B256>, AgentError> {
        let (pending, latest) = self.counts(wallet).await?;
        if pending <= latest {
            return Ok(None);
        }

        warn!(
            wallet = %wallet.address,
            pending,
            confirmed = latest,
            "Pending transactions detected, clearing"
        );
        self.replace(wallet, latest, fees.doubled()).await.map(Some)
    }

    /// Supersede a pending backlog at live fees doubled, then re-check.
    pub async fn cancel_pending(&self, wallet: &WalletRecord) -> Result<CancelReport, AgentError> {
        let (pending, latest) = self.counts(wallet).await?;
        let mut report = CancelReport {
            pending_before: pending,
            confirmed_before: latest,
            tx_hash: None,
            remaining: 0,
        };
        if pending <= latest {
            info!(wallet = %wallet.address, "No pending transactions");
            return Ok(report);
        }

        let live = self.chain.get_fee_data().await.map_err(AgentError::chain)?;
        report.tx_hash = Some(self.replace(wallet, latest, live.doubled()).await?);

        let (pending_after, latest_after) = self.counts(wallet).await?;
        report.remaining = pending_after.saturating_sub(latest_after);
        if report.cleared() {
            info!(wallet = %wallet.address, "Pending transactions cleared");
        } else {
            warn!(
                wallet = %wallet.address,
                remaining = report.remaining,
                "Transactions still pending after cancellation"
            );
        }
        Ok(report)
    }

    async fn replace(
        &self,
        wallet: &WalletRecord,
        nonce: u64,
        fees: FeeParams,
    ) -> Result<B256, AgentError> {
        let tx = TxRequest::transfer(wallet.address, wallet.address, U256::ZERO)
            .with_nonce(nonce)
            .with_gas_limit(TRANSFER_GAS)
            .with_fees(fees);

        let hash = self
            .chain
            .send_transaction(&wallet.signer, tx)
            .await
            .map_err(|e| AgentError::TransactionFailure(format!("replacement at nonce {nonce}: {e}")))?;
        let receipt = self
            .chain
            .wait_for_receipt(hash, 1)
            .await
            .map_err(|e| AgentError::TransactionFailure(format!("replacement {hash} unconfirmed: {e}")))?;
        if !receipt.success {
            return Err(AgentError::TransactionFailure(format!(
                "replacement {hash} reverted"
            )));
        }

        info!(wallet = %wallet.address, nonce, tx = %hash, %fees, "Replacement transaction confirmed");
        Ok(hash)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
