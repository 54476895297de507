//! `alloy`-backed chain client.
//!
//! Talks JSON-RPC over HTTP. Transactions are assembled as EIP-1559
//! requests, signed locally with the wallet's signer, and submitted as raw
//! envelopes so that any active wallet can be used without rebuilding the
//! provider. Confirmation depth is tracked by polling receipts against the
//! head block.

use std::time::Duration;

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info};

use super::calldata::ICurveToken;
use super::{ChainClient, CurveContract};
use crate::types::{FeeParams, NonceTag, ReserveSnapshot, TxReceipt, TxRequest};

/// Default receipt polling interval.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default upper bound on a confirmation wait.
const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(180);

pub struct AlloyChain {
    provider: DynProvider,
    chain_id: u64,
    contract: ICurveToken::ICurveTokenInstance<DynProvider>,
    poll_interval: Duration,
    confirmation_timeout: Duration,
}

impl AlloyChain {
    /// Connect to `rpc_url` and bind the curve contract at `contract`.
    pub async fn connect(rpc_url: &str, contract: Address) -> Result<Self> {
        let provider = ProviderBuilder::new()
            .connect(rpc_url)
            .await
            .context("Failed to connect to RPC endpoint")?
            .erased();

        let chain_id = provider
            .get_chain_id()
            .await
            .context("Failed to read chain id")?;

        info!(chain_id, contract = %contract, "Connected to chain");

        Ok(Self {
            contract: ICurveToken::new(contract, provider.clone()),
            provider,
            chain_id,
            poll_interval: DEFAULT_POLL_INTERVAL,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
        })
    }

    /// Override receipt polling cadence and the confirmation wait bound.
    pub fn with_timing(mut self, poll_interval: Duration, confirmation_timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.confirmation_timeout = confirmation_timeout;
        self
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn to_request(&self, tx: &TxRequest) -> TransactionRequest {
        let mut req = TransactionRequest::default()
            .with_from(tx.from)
            .with_to(tx.to)
            .with_value(tx.value)
            .with_input(tx.data.clone())
            .with_chain_id(self.chain_id);
        if let Some(nonce) = tx.nonce {
            req = req.with_nonce(nonce);
        }
        if let Some(gas_limit) = tx.gas_limit {
            req = req.with_gas_limit(gas_limit);
        }
        if let Some(fees) = tx.fees {
            req = req
                .with_max_fee_per_gas(fees.max_fee_per_gas)
                .with_max_priority_fee_per_gas(fees.max_priority_fee_per_gas);
        }
        req
    }
}

#[async_trait]
impl ChainClient for AlloyChain {
    async fn get_balance(&self, address: Address) -> Result<U256> {
        self.provider
            .get_balance(address)
            .await
            .with_context(|| format!("eth_getBalance failed for {address}"))
    }

    async fn get_transaction_count(&self, address: Address, tag: NonceTag) -> Result<u64> {
        let count = self.provider.get_transaction_count(address);
        let count = match tag {
            NonceTag::Pending => count.pending().await,
            NonceTag::Latest => count.latest().await,
        };
        count.with_context(|| format!("eth_getTransactionCount ({tag:?}) failed for {address}"))
    }

    async fn get_fee_data(&self) -> Result<FeeParams> {
        let est = self
            .provider
            .estimate_eip1559_fees()
            .await
            .context("Fee estimation failed")?;
        Ok(FeeParams::new(est.max_fee_per_gas, est.max_priority_fee_per_gas))
    }

    async fn estimate_gas(&self, tx: &TxRequest) -> Result<u64> {
        self.provider
            .estimate_gas(self.to_request(tx))
            .await
            .context("eth_estimateGas failed")
    }

    async fn send_transaction(&self, signer: &PrivateKeySigner, tx: TxRequest) -> Result<B256> {
        if signer.address() != tx.from {
            bail!("Signer {} does not match sender {}", signer.address(), tx.from);
        }

        let mut req = self.to_request(&tx);
        if tx.nonce.is_none() {
            let nonce = self.get_transaction_count(tx.from, NonceTag::Pending).await?;
            req = req.with_nonce(nonce);
        }
        if tx.fees.is_none() {
            let fees = self.get_fee_data().await?;
            req = req
                .with_max_fee_per_gas(fees.max_fee_per_gas)
                .with_max_priority_fee_per_gas(fees.max_priority_fee_per_gas);
        }
        if tx.gas_limit.is_none() {
            let gas = self.estimate_gas(&tx).await?;
            req = req.with_gas_limit(gas);
        }

        let wallet = EthereumWallet::from(signer.clone());
        let envelope = req
            .build(&wallet)
            .await
            .map_err(|e| anyhow::anyhow!("Signing failed for {}: {e}", tx.from))?;

        let pending = self
            .provider
            .send_tx_envelope(envelope)
            .await
            .context("eth_sendRawTransaction failed")?;
        let hash = *pending.tx_hash();

        debug!(from = %tx.from, to = %tx.to, nonce = ?tx.nonce, tx = %hash, "Transaction submitted");
        Ok(hash)
    }

    async fn wait_for_receipt(&self, tx_hash: B256, confirmations: u64) -> Result<TxReceipt> {
        let deadline = Instant::now() + self.confirmation_timeout;
        let confirmations = confirmations.max(1);

        loop {
            if let Some(receipt) = self.get_receipt(tx_hash).await? {
                let head = self
                    .provider
                    .get_block_number()
                    .await
                    .context("eth_blockNumber failed")?;
                if head + 1 >= receipt.block_number + confirmations {
                    return Ok(receipt);
                }
            }
            if Instant::now() >= deadline {
                bail!(
                    "Timed out after {:?} waiting for {confirmations} confirmation(s) of {tx_hash}",
                    self.confirmation_timeout
                );
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn get_receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .with_context(|| format!("eth_getTransactionReceipt failed for {tx_hash}"))?;

        Ok(receipt.map(|r| TxReceipt {
            tx_hash: r.transaction_hash,
            block_number: r.block_number.unwrap_or_default(),
            success: r.status(),
            gas_used: r.gas_used,
        }))
    }
}

#[async_trait]
impl CurveContract for AlloyChain {
    fn address(&self) -> Address {
        *self.contract.address()
    }

    async fn get_reserves(&self) -> Result<ReserveSnapshot> {
        let r = self
            .contract
            .getReserves()
            .call()
            .await
            .context("getReserves failed")?;
        Ok(ReserveSnapshot {
            eth_reserve: r.currentEthReserve,
            token_reserve: r.currentTokenReserve,
        })
    }

    async fn get_current_price(&self) -> Result<U256> {
        self.contract
            .getCurrentPrice()
            .call()
            .await
            .context("getCurrentPrice failed")
    }

    async fn estimated_tokens_for_eth(&self, eth_amount: U256) -> Result<U256> {
        self.contract
            .getEstimatedTokensForETH(eth_amount)
            .call()
            .await
            .context("getEstimatedTokensForETH failed")
    }

    async fn estimated_eth_for_tokens(&self, token_amount: U256) -> Result<U256> {
        self.contract
            .getEstimatedETHForTokens(token_amount)
            .call()
            .await
            .context("getEstimatedETHForTokens failed")
    }

    async fn balance_of(&self, owner: Address) -> Result<U256> {
        self.contract
            .balanceOf(owner)
            .call()
            .await
            .with_context(|| format!("balanceOf failed for {owner}"))
    }

    async fn allowance(&self, owner: Address, spender: Address) -> Result<U256> {
        self.contract
            .allowance(owner, spender)
            .call()
            .await
            .context("allowance failed")
    }
}
