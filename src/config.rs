//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (seed phrase, RPC endpoint) are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`. Amounts are written in
//! ETH / gwei / whole tokens and converted to base units here.

use std::fs;
use std::time::Duration;

use alloy::primitives::Address;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Deserialize;

use crate::engine::orchestrator::{OrchestratorConfig, PoolConfig, TradingConfig};
use crate::engine::retry::RetryPolicy;
use crate::engine::swap::{ApprovalPolicy, SwapConfig};
use crate::types::{eth_to_wei, gwei_to_wei, tokens_to_units, AgentError, DerivationCoord, FeeParams};
use crate::wallet::derivation::WALLETS_PER_ACCOUNT;
use crate::wallet::FundingPlan;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub chain: ChainConfig,
    pub wallets: WalletsConfig,
    pub trading: TradingSection,
    pub swap: SwapSection,
    pub fees: FeesConfig,
    pub consolidation: ConsolidationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    pub state_file: String,
    pub trade_interval_secs: u64,
    pub error_cooldown_secs: u64,
    /// Delay before the supervisor restarts a crashed loop.
    pub restart_delay_secs: u64,
    /// Fixed RNG seed for reproducible runs.
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainConfig {
    pub rpc_url_env: String,
    pub contract_address_env: String,
    pub receipt_poll_secs: u64,
    pub confirmation_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WalletsConfig {
    pub mnemonic_env: String,
    pub scan_accounts: u32,
    pub scan_wallets_per_account: u32,
    pub scan_concurrency: usize,
    pub min_active_balance_eth: Decimal,
    pub min_active_wallets: usize,
    pub source_account: u32,
    pub source_index: u32,
    pub replenish_count: usize,
    pub funding_amount_eth: Decimal,
    pub funding_delay_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TradingSection {
    pub swap_budget_min: u32,
    pub swap_budget_max: u32,
    pub buy_fraction_pct: u64,
    pub sell_pct_min: u64,
    pub sell_pct_max: u64,
    pub liquidation_cap_pct: u64,
    pub gas_reserve_eth: Decimal,
    pub token_reserve: Decimal,
    pub token_decimals: u8,
    pub trade_cooldown_secs: u64,
    pub liquidation_cooldown_secs: u64,
    pub retry_attempts: u32,
    pub retry_delay_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SwapSection {
    pub slippage_bps: u64,
    pub gas_buffer_pct: u64,
    pub max_sell_reserve_pct: u64,
    pub sell_gas_limit: u64,
    pub sell_max_fee_gwei: Decimal,
    pub sell_priority_fee_gwei: Decimal,
    pub trade_confirmations: u64,
    pub approval: ApprovalPolicy,
}

/// Standard fee profile for funding and stuck-transaction clearing.
#[derive(Debug, Deserialize, Clone)]
pub struct FeesConfig {
    pub max_fee_gwei: Decimal,
    pub priority_fee_gwei: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConsolidationConfig {
    pub max_fee_gwei: Decimal,
    pub priority_fee_gwei: Decimal,
    pub gas_limit: u64,
    /// Sweep target. Defaults to the first funded wallet of the scan.
    #[serde(default)]
    pub destination: Option<Address>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {path}"))?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// The seed phrase, read from the environment.
    pub fn mnemonic(&self) -> Result<SecretString, AgentError> {
        Self::resolve_env(&self.wallets.mnemonic_env)
            .map(SecretString::new)
            .map_err(|e| AgentError::Configuration(e.to_string()))
    }

    pub fn rpc_url(&self) -> Result<String, AgentError> {
        Self::resolve_env(&self.chain.rpc_url_env)
            .map_err(|e| AgentError::Configuration(e.to_string()))
    }

    pub fn contract_address(&self) -> Result<Address, AgentError> {
        let raw = Self::resolve_env(&self.chain.contract_address_env)
            .map_err(|e| AgentError::Configuration(e.to_string()))?;
        raw.trim()
            .parse()
            .map_err(|e| AgentError::Configuration(format!("bad contract address {raw}: {e}")))
    }

    /// Reject inconsistent ranges and percentages.
    pub fn validate(&self) -> Result<(), AgentError> {
        let t = &self.trading;
        let s = &self.swap;
        let w = &self.wallets;

        let checks = [
            (t.swap_budget_min >= 1, "swap_budget_min must be at least 1"),
            (t.swap_budget_min <= t.swap_budget_max, "swap_budget_min exceeds swap_budget_max"),
            (t.sell_pct_min >= 1, "sell_pct_min must be at least 1"),
            (t.sell_pct_min <= t.sell_pct_max, "sell_pct_min exceeds sell_pct_max"),
            (t.sell_pct_max <= 100, "sell_pct_max above 100"),
            (t.buy_fraction_pct <= 100, "buy_fraction_pct above 100"),
            (t.liquidation_cap_pct <= s.max_sell_reserve_pct, "liquidation_cap_pct exceeds max_sell_reserve_pct"),
            (s.max_sell_reserve_pct <= 100, "max_sell_reserve_pct above 100"),
            (s.slippage_bps < 10_000, "slippage_bps must be below 10000"),
            (s.trade_confirmations >= 1, "trade_confirmations must be at least 1"),
            (t.retry_attempts >= 1, "retry_attempts must be at least 1"),
            (w.scan_accounts >= 1, "scan_accounts must be at least 1"),
            (
                (1..=WALLETS_PER_ACCOUNT).contains(&w.scan_wallets_per_account),
                "scan_wallets_per_account out of range",
            ),
            (w.scan_concurrency >= 1, "scan_concurrency must be at least 1"),
            (w.funding_amount_eth > Decimal::ZERO, "funding_amount_eth must be positive"),
        ];

        match checks.iter().find(|(ok, _)| !ok) {
            Some((_, msg)) => Err(AgentError::Configuration(msg.to_string())),
            None => Ok(()),
        }
    }

    /// Standard two-part fee profile.
    pub fn base_fees(&self) -> Result<FeeParams, AgentError> {
        Ok(FeeParams::new(
            gwei_to_wei(self.fees.max_fee_gwei)?,
            gwei_to_wei(self.fees.priority_fee_gwei)?,
        ))
    }

    pub fn consolidation_fees(&self) -> Result<FeeParams, AgentError> {
        Ok(FeeParams::new(
            gwei_to_wei(self.consolidation.max_fee_gwei)?,
            gwei_to_wei(self.consolidation.priority_fee_gwei)?,
        ))
    }

    pub fn swap_config(&self) -> Result<SwapConfig, AgentError> {
        let s = &self.swap;
        Ok(SwapConfig {
            slippage_bps: s.slippage_bps,
            gas_buffer_pct: s.gas_buffer_pct,
            max_sell_reserve_pct: s.max_sell_reserve_pct,
            sell_gas_limit: s.sell_gas_limit,
            sell_fees: FeeParams::new(
                gwei_to_wei(s.sell_max_fee_gwei)?,
                gwei_to_wei(s.sell_priority_fee_gwei)?,
            ),
            trade_confirmations: s.trade_confirmations,
            approval_confirmations: 1,
            approval: s.approval,
        })
    }

    /// Everything the orchestrator needs, in base units.
    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig, AgentError> {
        let t = &self.trading;
        let w = &self.wallets;
        let base_fees = self.base_fees()?;

        let trading = TradingConfig {
            swap_budget: t.swap_budget_min..=t.swap_budget_max,
            buy_fraction_pct: t.buy_fraction_pct,
            sell_pct: t.sell_pct_min..=t.sell_pct_max,
            liquidation_cap_pct: t.liquidation_cap_pct,
            gas_reserve: eth_to_wei(t.gas_reserve_eth)?,
            token_reserve: tokens_to_units(t.token_reserve, t.token_decimals)?,
            base_fees,
            trade_interval: Duration::from_secs(self.agent.trade_interval_secs),
            trade_cooldown: Duration::from_secs(t.trade_cooldown_secs),
            liquidation_cooldown: Duration::from_secs(t.liquidation_cooldown_secs),
            error_cooldown: Duration::from_secs(self.agent.error_cooldown_secs),
            retry: RetryPolicy::new(t.retry_attempts, Duration::from_secs(t.retry_delay_secs)),
        };

        let pool = PoolConfig {
            scan_accounts: w.scan_accounts,
            scan_wallets_per_account: w.scan_wallets_per_account,
            scan_concurrency: w.scan_concurrency,
            min_active_balance: eth_to_wei(w.min_active_balance_eth)?,
            min_active_wallets: w.min_active_wallets,
            source: DerivationCoord::new(w.source_account, w.source_index),
            funding: FundingPlan {
                count: w.replenish_count,
                amount: eth_to_wei(w.funding_amount_eth)?,
                gas_reserve: trading.gas_reserve,
                fees: base_fees,
                delay: Duration::from_secs(w.funding_delay_secs),
            },
        };

        Ok(OrchestratorConfig {
            trading,
            pool,
            swap: self.swap_config()?,
            state_path: Some(self.agent.state_file.clone()),
        })
    }
}
