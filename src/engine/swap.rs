//! Swap engine.
//!
//! Wraps the curve's `buyTokens` / `sellTokens` entry points for a given
//! wallet. Every failure comes back as a [`SwapResult`] rather than an
//! error so the orchestrator can apply one retry policy to all of them.

use std::sync::Arc;

use alloy::primitives::{utils::format_ether, U256};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::chain::{calldata, ChainClient, CurveContract};
use crate::types::{
    AgentError, FeeParams, NonceTag, ReserveSnapshot, SwapAmounts, SwapResult, SwapStatus,
    TradeSide, TxRequest, WalletRecord,
};

const BPS: u64 = 10_000;

/// How much spend allowance to grant the curve before a sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalPolicy {
    /// Approve `U256::MAX` once per wallet.
    Unlimited,
    /// Approve exactly the amount being sold.
    Exact,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SwapConfig {
    /// Slippage tolerance in basis points (500 = 5%).
    pub slippage_bps: u64,
    /// Headroom added on top of the buy gas estimate, in percent.
    pub gas_buffer_pct: u64,
    /// Hard cap on a single sell as a percentage of the token reserve.
    pub max_sell_reserve_pct: u64,
    pub sell_gas_limit: u64,
    /// Fixed conservative fee profile for sells.
    pub sell_fees: FeeParams,
    pub trade_confirmations: u64,
    pub approval_confirmations: u64,
    pub approval: ApprovalPolicy,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            slippage_bps: 500,
            gas_buffer_pct: 20,
            max_sell_reserve_pct: 30,
            sell_gas_limit: 500_000,
            sell_fees: FeeParams::new(100_000_000, 100_000_000),
            trade_confirmations: 2,
            approval_confirmations: 1,
            approval: ApprovalPolicy::Unlimited,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SwapEngine {
    chain: Arc<dyn ChainClient>,
    contract: Arc<dyn CurveContract>,
    config: SwapConfig,
}

impl SwapEngine {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        contract: Arc<dyn CurveContract>,
        config: SwapConfig,
    ) -> Self {
        Self {
            chain,
            contract,
            config,
        }
    }

    pub fn config(&self) -> &SwapConfig {
        &self.config
    }

    /// `expected` reduced by the slippage tolerance.
    pub fn min_output(&self, expected: U256) -> U256 {
        let keep = BPS.saturating_sub(self.config.slippage_bps);
        expected * U256::from(keep) / U256::from(BPS)
    }

    /// Largest liquidation allowed: `min(spendable, cap_pct% of token reserve)`.
    pub fn liquidation_amount(spendable: U256, reserves: &ReserveSnapshot, cap_pct: u64) -> U256 {
        spendable.min(reserves.token_cap(cap_pct))
    }

    /// Read fresh reserves from the curve.
    pub async fn reserves(&self) -> Result<ReserveSnapshot, AgentError> {
        self.contract.get_reserves().await.map_err(AgentError::chain)
    }

    /// Token balance of `wallet` on the curve token.
    pub async fn token_balance(&self, wallet: &WalletRecord) -> Result<U256, AgentError> {
        self.contract
            .balance_of(wallet.address)
            .await
            .map_err(AgentError::chain)
    }

    /// Premium of a buy of `eth_amount` over the spot price, in basis points.
    pub async fn price_impact_bps(&self, eth_amount: U256) -> Result<u64, AgentError> {
        let spot = self
            .contract
            .get_current_price()
            .await
            .map_err(AgentError::chain)?;
        let tokens = self
            .contract
            .estimated_tokens_for_eth(eth_amount)
            .await
            .map_err(AgentError::chain)?;

        if spot.is_zero() || tokens.is_zero() {
            return Err(AgentError::InvalidAmount(format!(
                "no price for {} ETH",
                format_ether(eth_amount)
            )));
        }

        let one = U256::from(10u64).pow(U256::from(18u64));
        let effective = eth_amount * one / tokens;
        let impact = effective.saturating_sub(spot) * U256::from(BPS) / spot;
        Ok(impact.saturating_to::<u64>())
    }

    /// Buy tokens with `eth_amount` wei from `wallet`.
    pub async fn buy(&self, wallet: &WalletRecord, eth_amount: U256) -> SwapResult {
        let side = TradeSide::Buy;
        let mut amounts = SwapAmounts {
            input: eth_amount,
            ..Default::default()
        };

        if eth_amount.is_zero() {
            return SwapResult::rejected(
                side,
                amounts,
                AgentError::InvalidAmount("buy amount must be positive".into()),
            );
        }

        let fees = match self.chain.get_fee_data().await {
            Ok(f) => f,
            Err(e) => return SwapResult::rejected(side, amounts, AgentError::chain(e)),
        };

        amounts.expected_output = match self.contract.estimated_tokens_for_eth(eth_amount).await {
            Ok(t) => t,
            Err(e) => return SwapResult::rejected(side, amounts, AgentError::chain(e)),
        };
        amounts.min_output = self.min_output(amounts.expected_output);

        let tx = TxRequest::call(
            wallet.address,
            self.contract.address(),
            calldata::buy_tokens(amounts.min_output),
        )
        .with_value(eth_amount)
        .with_fees(fees);

        let gas = match self.chain.estimate_gas(&tx).await {
            Ok(g) => g,
            Err(e) => return SwapResult::rejected(side, amounts, AgentError::chain(e)),
        };
        let gas_limit = gas.saturating_mul(100 + self.config.gas_buffer_pct) / 100;

        info!(
            wallet = %wallet.address,
            eth = %format_ether(eth_amount),
            expected_tokens = %format_ether(amounts.expected_output),
            min_tokens = %format_ether(amounts.min_output),
            gas_limit,
            "Submitting buy"
        );

        self.submit(wallet, tx.with_gas_limit(gas_limit), side, amounts)
            .await
    }

    /// Sell `token_amount` base units from `wallet`.
    pub async fn sell(&self, wallet: &WalletRecord, token_amount: U256) -> SwapResult {
        let side = TradeSide::Sell;
        let mut amounts = SwapAmounts {
            input: token_amount,
            ..Default::default()
        };

        if token_amount.is_zero() {
            return SwapResult::rejected(
                side,
                amounts,
                AgentError::InvalidAmount("sell amount must be positive".into()),
            );
        }

        let reserves = match self.reserves().await {
            Ok(r) => r,
            Err(e) => return SwapResult::rejected(side, amounts, e),
        };

        let cap_pct = self.config.max_sell_reserve_pct;
        let cap = reserves.token_cap(cap_pct);
        if token_amount > cap {
            warn!(
                requested = %token_amount,
                cap = %cap,
                reserves = %reserves,
                "Sell exceeds reserve cap"
            );
            return SwapResult::rejected(
                side,
                amounts,
                AgentError::ReserveCapExceeded {
                    requested: token_amount,
                    cap,
                    cap_pct,
                },
            );
        }

        match self.ensure_allowance(wallet, token_amount).await {
            Ok(()) => {}
            // No swap hash: `settle` must not read the approval receipt as the sell's
            Err(e @ AgentError::Unconfirmed { .. }) => {
                return SwapResult::failed(side, SwapStatus::Unconfirmed, None, amounts, e);
            }
            Err(e @ AgentError::Chain(_)) => return SwapResult::rejected(side, amounts, e),
            Err(e) => return SwapResult::failed(side, SwapStatus::Reverted, None, amounts, e),
        }

        amounts.expected_output = reserves.expected_eth_for(token_amount);
        amounts.min_output = self.min_output(amounts.expected_output);

        let tx = TxRequest::call(
            wallet.address,
            self.contract.address(),
            calldata::sell_tokens(token_amount, amounts.min_output),
        )
        .with_gas_limit(self.config.sell_gas_limit)
        .with_fees(self.config.sell_fees);

        info!(
            wallet = %wallet.address,
            tokens = %format_ether(token_amount),
            expected_eth = %format_ether(amounts.expected_output),
            min_eth = %format_ether(amounts.min_output),
            "Submitting sell"
        );

        self.submit(wallet, tx, side, amounts).await
    }

    /// Resolve an `Unconfirmed` result by looking at the chain.
    ///
    /// Other statuses pass through untouched. A submission that may still
    /// land is reported as `StuckNonce` so that nobody resubmits it.
    pub async fn settle(&self, wallet: &WalletRecord, result: SwapResult) -> SwapResult {
        let tx_hash = match (result.status, result.tx_hash) {
            (SwapStatus::Unconfirmed, Some(hash)) => hash,
            _ => return result,
        };
        let (side, amounts) = (result.side, result.amounts);

        match self.chain.get_receipt(tx_hash).await {
            Ok(Some(receipt)) if receipt.success => {
                info!(tx = %tx_hash, block = receipt.block_number, "Unconfirmed swap had landed");
                return SwapResult::confirmed(side, tx_hash, amounts);
            }
            Ok(Some(receipt)) => {
                return SwapResult::failed(
                    side,
                    SwapStatus::Reverted,
                    Some(tx_hash),
                    amounts,
                    AgentError::TransactionFailure(format!(
                        "{tx_hash} reverted in block {}",
                        receipt.block_number
                    )),
                );
            }
            Ok(None) => {}
            Err(e) => {
                warn!(tx = %tx_hash, error = %e, "Receipt lookup failed, leaving swap unconfirmed");
                return result;
            }
        }

        let counts = tokio::try_join!(
            self.chain
                .get_transaction_count(wallet.address, NonceTag::Pending),
            self.chain
                .get_transaction_count(wallet.address, NonceTag::Latest),
        );
        match counts {
            Ok((pending, confirmed)) if pending > confirmed => {
                warn!(tx = %tx_hash, pending, confirmed, "Swap still pending");
                SwapResult::failed(
                    side,
                    SwapStatus::Unconfirmed,
                    Some(tx_hash),
                    amounts,
                    AgentError::StuckNonce { pending, confirmed },
                )
            }
            Ok(_) => {
                debug!(tx = %tx_hash, "Swap dropped without landing");
                SwapResult::failed(
                    side,
                    SwapStatus::Reverted,
                    Some(tx_hash),
                    amounts,
                    AgentError::TransactionFailure(format!("{tx_hash} dropped before mining")),
                )
            }
            Err(e) => {
                warn!(tx = %tx_hash, error = %e, "Nonce lookup failed, leaving swap unconfirmed");
                result
            }
        }
    }

    // -- internals --

    async fn ensure_allowance(
        &self,
        wallet: &WalletRecord,
        amount: U256,
    ) -> Result<(), AgentError> {
        let spender = self.contract.address();
        let current = self
            .contract
            .allowance(wallet.address, spender)
            .await
            .map_err(AgentError::chain)?;
        if current >= amount {
            return Ok(());
        }

        let approve = match self.config.approval {
            ApprovalPolicy::Unlimited => U256::MAX,
            ApprovalPolicy::Exact => amount,
        };
        info!(wallet = %wallet.address, policy = ?self.config.approval, "Approving curve to spend tokens");

        let tx = TxRequest::call(wallet.address, spender, calldata::approve(spender, approve));
        let hash = self
            .chain
            .send_transaction(&wallet.signer, tx)
            .await
            .map_err(|e| AgentError::TransactionFailure(format!("approval failed: {e}")))?;
        let receipt = match self
            .chain
            .wait_for_receipt(hash, self.config.approval_confirmations)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                // Never resend while the first approval may still land
                warn!(tx = %hash, error = %e, "Approval wait failed, checking receipt");
                match self.chain.get_receipt(hash).await {
                    Ok(Some(r)) => r,
                    Ok(None) | Err(_) => {
                        return Err(AgentError::Unconfirmed {
                            tx_hash: hash,
                            message: format!("approval unconfirmed: {e}"),
                        });
                    }
                }
            }
        };
        if !receipt.success {
            return Err(AgentError::TransactionFailure(format!(
                "approval {hash} reverted"
            )));
        }
        Ok(())
    }

    async fn submit(
        &self,
        wallet: &WalletRecord,
        tx: TxRequest,
        side: TradeSide,
        amounts: SwapAmounts,
    ) -> SwapResult {
        let hash = match self.chain.send_transaction(&wallet.signer, tx).await {
            Ok(h) => h,
            Err(e) => {
                warn!(wallet = %wallet.address, %side, error = %e, "Swap submission failed");
                return SwapResult::failed(
                    side,
                    SwapStatus::Reverted,
                    None,
                    amounts,
                    AgentError::TransactionFailure(e.to_string()),
                );
            }
        };

        match self
            .chain
            .wait_for_receipt(hash, self.config.trade_confirmations)
            .await
        {
            Ok(receipt) if receipt.success => {
                info!(
                    wallet = %wallet.address,
                    %side,
                    tx = %hash,
                    block = receipt.block_number,
                    gas_used = receipt.gas_used,
                    "Swap confirmed"
                );
                SwapResult::confirmed(side, hash, amounts)
            }
            Ok(receipt) => {
                warn!(wallet = %wallet.address, %side, tx = %hash, "Swap reverted");
                SwapResult::failed(
                    side,
                    SwapStatus::Reverted,
                    Some(hash),
                    amounts,
                    AgentError::TransactionFailure(format!(
                        "{hash} reverted in block {}",
                        receipt.block_number
                    )),
                )
            }
            Err(e) => {
                warn!(wallet = %wallet.address, %side, tx = %hash, error = %e, "Swap confirmation failed");
                SwapResult::failed(
                    side,
                    SwapStatus::Unconfirmed,
                    Some(hash),
                    amounts,
                    AgentError::Unconfirmed {
                        tx_hash: hash,
                        message: e.to_string(),
                    },
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
