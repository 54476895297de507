//! Shared types for the ROTATOR agent.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that wallet, chain, and engine
//! modules can depend on them without circular references.

use alloy::primitives::utils::{format_ether, parse_ether, parse_units};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Wallets
// ---------------------------------------------------------------------------

/// A coordinate in the derivation tree: `m/44'/60'/{account}'/0/{index}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DerivationCoord {
    pub account: u32,
    pub index: u32,
}

impl DerivationCoord {
    pub fn new(account: u32, index: u32) -> Self {
        Self { account, index }
    }

    /// The BIP-44 path string for this coordinate.
    pub fn path(&self) -> String {
        format!("m/44'/60'/{}'/0/{}", self.account, self.index)
    }
}

impl fmt::Display for DerivationCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.account, self.index)
    }
}

/// A derived wallet with its last known native balance.
///
/// Always re-derivable from the seed phrase; instances are caches.
#[derive(Debug, Clone)]
pub struct WalletRecord {
    pub address: Address,
    pub derivation_path: String,
    pub signer: PrivateKeySigner,
    pub balance: U256,
    pub account_index: u32,
    pub wallet_index: u32,
}

impl WalletRecord {
    pub fn coord(&self) -> DerivationCoord {
        DerivationCoord::new(self.account_index, self.wallet_index)
    }

    /// Balance above `reserve`, or zero.
    pub fn spendable(&self, reserve: U256) -> U256 {
        self.balance.saturating_sub(reserve)
    }
}

impl fmt::Display for WalletRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {} ETH",
            self.address,
            self.derivation_path,
            format_ether(self.balance),
        )
    }
}

// ---------------------------------------------------------------------------
// Chain-neutral transaction types
// ---------------------------------------------------------------------------

/// Which transaction count to read for an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceTag {
    Pending,
    Latest,
}

/// Two-part (base + priority) fee parameters, in wei per gas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeParams {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

impl FeeParams {
    pub fn new(max_fee_per_gas: u128, max_priority_fee_per_gas: u128) -> Self {
        Self {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        }
    }

    /// Both components doubled, used to supersede a stuck transaction.
    pub fn doubled(&self) -> Self {
        Self {
            max_fee_per_gas: self.max_fee_per_gas.saturating_mul(2),
            max_priority_fee_per_gas: self.max_priority_fee_per_gas.saturating_mul(2),
        }
    }

    /// Upper bound on the cost of `gas_limit` gas at these fees.
    pub fn max_cost(&self, gas_limit: u64) -> U256 {
        U256::from(self.max_fee_per_gas) * U256::from(gas_limit)
    }
}

impl fmt::Display for FeeParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "max_fee={} gwei priority={} gwei",
            format_gwei(self.max_fee_per_gas),
            format_gwei(self.max_priority_fee_per_gas),
        )
    }
}

/// An EIP-1559 transaction request. Unset fields are filled by the chain client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub nonce: Option<u64>,
    pub gas_limit: Option<u64>,
    pub fees: Option<FeeParams>,
}

impl TxRequest {
    /// A plain native-currency transfer.
    pub fn transfer(from: Address, to: Address, value: U256) -> Self {
        Self {
            from,
            to,
            value,
            data: Bytes::new(),
            nonce: None,
            gas_limit: None,
            fees: None,
        }
    }

    /// A contract call carrying `data`.
    pub fn call(from: Address, to: Address, data: Bytes) -> Self {
        Self {
            data,
            ..Self::transfer(from, to, U256::ZERO)
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    pub fn with_fees(mut self, fees: FeeParams) -> Self {
        self.fees = Some(fees);
        self
    }
}

/// Outcome of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub success: bool,
    pub gas_used: u64,
}

// ---------------------------------------------------------------------------
// Curve state & swap results
// ---------------------------------------------------------------------------

/// Curve reserves read immediately before a sizing decision. Never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReserveSnapshot {
    pub eth_reserve: U256,
    pub token_reserve: U256,
}

impl ReserveSnapshot {
    /// `pct` percent of the token reserve.
    pub fn token_cap(&self, pct: u64) -> U256 {
        self.token_reserve * U256::from(pct) / U256::from(100u64)
    }

    /// Expected native proceeds for `tokens` at the constant reserve ratio.
    pub fn expected_eth_for(&self, tokens: U256) -> U256 {
        if self.token_reserve.is_zero() {
            return U256::ZERO;
        }
        tokens * self.eth_reserve / self.token_reserve
    }
}

impl fmt::Display for ReserveSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ETH {} | tokens {}",
            format_ether(self.eth_reserve),
            format_ether(self.token_reserve),
        )
    }
}

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "BUY"),
            TradeSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Where a swap attempt ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapStatus {
    /// Mined successfully at the required depth.
    Confirmed,
    /// Refused before anything was submitted.
    Rejected,
    /// Mined but reverted, refused by the node, or dropped unmined.
    Reverted,
    /// Submitted, but the confirmation wait failed. May or may not have landed.
    Unconfirmed,
}

/// Amounts involved in a swap, in the smallest unit of each side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwapAmounts {
    pub input: U256,
    pub expected_output: U256,
    pub min_output: U256,
}

/// Outcome of one buy or sell attempt.
#[derive(Debug, Clone)]
pub struct SwapResult {
    pub side: TradeSide,
    pub status: SwapStatus,
    pub tx_hash: Option<B256>,
    pub amounts: SwapAmounts,
    pub error: Option<AgentError>,
}

impl SwapResult {
    pub fn confirmed(side: TradeSide, tx_hash: B256, amounts: SwapAmounts) -> Self {
        Self {
            side,
            status: SwapStatus::Confirmed,
            tx_hash: Some(tx_hash),
            amounts,
            error: None,
        }
    }

    pub fn rejected(side: TradeSide, amounts: SwapAmounts, error: AgentError) -> Self {
        Self {
            side,
            status: SwapStatus::Rejected,
            tx_hash: None,
            amounts,
            error: Some(error),
        }
    }

    pub fn failed(
        side: TradeSide,
        status: SwapStatus,
        tx_hash: Option<B256>,
        amounts: SwapAmounts,
        error: AgentError,
    ) -> Self {
        Self {
            side,
            status,
            tx_hash,
            amounts,
            error: Some(error),
        }
    }

    pub fn success(&self) -> bool {
        self.status == SwapStatus::Confirmed
    }

    /// Convert into a `Result`, for use with the retry combinator.
    pub fn into_result(self) -> Result<SwapResult, AgentError> {
        match (&self.status, &self.error) {
            (SwapStatus::Confirmed, _) => Ok(self),
            (_, Some(e)) => Err(e.clone()),
            (_, None) => Err(AgentError::TransactionFailure(format!(
                "{} ended as {:?}",
                self.side, self.status
            ))),
        }
    }
}

impl fmt::Display for SwapResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?} in={} min_out={}",
            self.side, self.status, self.amounts.input, self.amounts.min_output,
        )?;
        if let Some(hash) = self.tx_hash {
            write!(f, " tx={hash}")?;
        }
        if let Some(ref e) = self.error {
            write!(f, " error={e}")?;
        }
        Ok(())
    }
}

/// Outcome of a single native-currency sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    pub from: Address,
    pub amount: U256,
    pub success: bool,
    pub tx_hash: Option<B256>,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Agent state
// ---------------------------------------------------------------------------

/// Persistent agent statistics, saved to JSON after each tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub run_id: String,
    pub start_time: DateTime<Utc>,
    pub tick_count: u64,
    pub buys: u64,
    pub sells: u64,
    pub failed_swaps: u64,
    pub rotations: u64,
    pub stuck_clears: u64,
    /// Wei spent on buys.
    pub eth_spent: U256,
    /// Minimum wei guaranteed by confirmed sells.
    pub eth_received_min: U256,
    pub tokens_bought_est: U256,
    pub tokens_sold: U256,
    /// Next coordinate `next_path()` will hand out.
    pub cursor: DerivationCoord,
    pub last_wallet: Option<Address>,
}

impl AgentState {
    pub fn new() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            start_time: Utc::now(),
            tick_count: 0,
            buys: 0,
            sells: 0,
            failed_swaps: 0,
            rotations: 0,
            stuck_clears: 0,
            eth_spent: U256::ZERO,
            eth_received_min: U256::ZERO,
            tokens_bought_est: U256::ZERO,
            tokens_sold: U256::ZERO,
            cursor: DerivationCoord::new(0, 0),
            last_wallet: None,
        }
    }

    pub fn swaps(&self) -> u64 {
        self.buys + self.sells
    }

    /// Uptime duration since agent start.
    pub fn uptime(&self) -> chrono::Duration {
        Utc::now() - self.start_time
    }
}

impl Default for AgentState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ticks={} | buys={} sells={} failed={} | rotations={} | spent={} ETH | received>={} ETH",
            self.tick_count,
            self.buys,
            self.sells,
            self.failed_swaps,
            self.rotations,
            format_ether(self.eth_spent),
            format_ether(self.eth_received_min),
        )
    }
}

// ---------------------------------------------------------------------------
// Unit helpers
// ---------------------------------------------------------------------------

/// Convert a decimal ETH amount to wei.
pub fn eth_to_wei(amount: Decimal) -> Result<U256, AgentError> {
    parse_ether(&amount.normalize().to_string())
        .map_err(|e| AgentError::Configuration(format!("invalid ETH amount {amount}: {e}")))
}

/// Convert a decimal token amount to base units.
pub fn tokens_to_units(amount: Decimal, decimals: u8) -> Result<U256, AgentError> {
    parse_units(&amount.normalize().to_string(), decimals)
        .map(Into::into)
        .map_err(|e| AgentError::Configuration(format!("invalid token amount {amount}: {e}")))
}

/// Convert a decimal gwei amount to wei per gas.
pub fn gwei_to_wei(amount: Decimal) -> Result<u128, AgentError> {
    let wei: U256 = parse_units(&amount.normalize().to_string(), "gwei")
        .map(Into::into)
        .map_err(|e| AgentError::Configuration(format!("invalid gwei amount {amount}: {e}")))?;
    Ok(wei.saturating_to::<u128>())
}

/// Wei as a decimal ETH amount (for statistics and logs).
pub fn wei_to_eth(wei: U256) -> Decimal {
    Decimal::from_str(&format_ether(wei)).unwrap_or(Decimal::MAX)
}

fn format_gwei(wei: u128) -> String {
    let whole = wei / 1_000_000_000;
    let frac = wei % 1_000_000_000;
    if frac == 0 {
        whole.to_string()
    } else {
        format!("{whole}.{frac:09}").trim_end_matches('0').to_string()
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for ROTATOR.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid seed phrase: {0}")]
    InvalidSeed(String),

    #[error("Insufficient funds: need {needed}, spendable {spendable}")]
    InsufficientFunds { needed: U256, spendable: U256 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Sell of {requested} exceeds {cap_pct}% reserve cap of {cap}")]
    ReserveCapExceeded { requested: U256, cap: U256, cap_pct: u64 },

    #[error("Transaction failed: {0}")]
    TransactionFailure(String),

    #[error("Transaction {tx_hash} submitted but not confirmed: {message}")]
    Unconfirmed { tx_hash: B256, message: String },

    #[error("Stuck nonce: pending {pending}, confirmed {confirmed}")]
    StuckNonce { pending: u64, confirmed: u64 },

    #[error("No wallet with sufficient balance available")]
    NoWalletAvailable,

    #[error("Chain error: {0}")]
    Chain(String),
}

impl AgentError {
    /// Whether repeating the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::TransactionFailure(_) | AgentError::Chain(_)
        )
    }

    /// Wrap any chain-adapter error.
    pub fn chain(err: impl fmt::Display) -> Self {
        AgentError::Chain(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
