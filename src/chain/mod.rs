//! Chain integrations.
//!
//! Defines the `ChainClient` and `CurveContract` traits and provides:
//! - `calldata` — ABI encoding for the curve's state-changing entry points
//! - `alloy_client` — the HTTP-provider implementation of both traits

pub mod alloy_client;
pub mod calldata;

use alloy::primitives::{Address, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use anyhow::Result;
use async_trait::async_trait;

use crate::types::{FeeParams, NonceTag, ReserveSnapshot, TxReceipt, TxRequest};

/// Abstraction over the node the agent talks to.
///
/// All calls are suspension points. Implementations sign locally with the
/// signer passed to `send_transaction`; the node never holds keys.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Native-currency balance of `address`.
    async fn get_balance(&self, address: Address) -> Result<U256>;

    /// Transaction count of `address` at the pending or latest block.
    async fn get_transaction_count(&self, address: Address, tag: NonceTag) -> Result<u64>;

    /// Current EIP-1559 fee suggestion.
    async fn get_fee_data(&self) -> Result<FeeParams>;

    /// Gas estimate for `tx` without submitting it.
    async fn estimate_gas(&self, tx: &TxRequest) -> Result<u64>;

    /// Sign and submit `tx`. Returns the transaction hash once the node accepts it.
    async fn send_transaction(&self, signer: &PrivateKeySigner, tx: TxRequest) -> Result<B256>;

    /// Wait until `tx_hash` is mined with at least `confirmations` blocks on top.
    async fn wait_for_receipt(&self, tx_hash: B256, confirmations: u64) -> Result<TxReceipt>;

    /// Receipt of `tx_hash` if it has been mined.
    async fn get_receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>>;
}

/// View interface of the fixed-price-curve token contract.
///
/// The contract is also the ERC-20 token, so balances and allowances are
/// read from the same address.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CurveContract: Send + Sync {
    /// Contract address (also the spender for sell approvals).
    fn address(&self) -> Address;

    async fn get_reserves(&self) -> Result<ReserveSnapshot>;

    /// Spot price of one token in wei.
    async fn get_current_price(&self) -> Result<U256>;

    async fn estimated_tokens_for_eth(&self, eth_amount: U256) -> Result<U256>;

    async fn estimated_eth_for_tokens(&self, token_amount: U256) -> Result<U256>;

    async fn balance_of(&self, owner: Address) -> Result<U256>;

    async fn allowance(&self, owner: Address, spender: Address) -> Result<U256>;
}
