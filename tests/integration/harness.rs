//! Shared fixtures: the development mnemonic, a small scan rectangle and a
//! seeded orchestrator.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use secrecy::SecretString;

use rotator::engine::orchestrator::{
    OrchestratorConfig, PoolConfig, TradeOrchestrator, TradingConfig,
};
use rotator::engine::schedule::Shutdown;
use rotator::engine::swap::SwapConfig;
use rotator::types::{DerivationCoord, WalletRecord};
use rotator::wallet::{FundingPlan, KeyDerivationTree};

use crate::mock_chain::{milli_eth, MockChain};

pub const PHRASE: &str = "test test test test test test test test test test test junk";

pub const SEED: u64 = 7;

pub fn tree() -> KeyDerivationTree {
    KeyDerivationTree::new(SecretString::new(PHRASE.to_string())).unwrap()
}

pub fn wallet(index: u32) -> WalletRecord {
    tree().derive(0, index).unwrap()
}

/// Scan account 0, indices `0..scan_wallets`.
pub fn config(scan_wallets: u32, min_active: usize) -> OrchestratorConfig {
    let trading = TradingConfig::default();
    OrchestratorConfig {
        pool: PoolConfig {
            scan_accounts: 1,
            scan_wallets_per_account: scan_wallets,
            scan_concurrency: 4,
            min_active_balance: milli_eth(1),
            min_active_wallets: min_active,
            source: DerivationCoord::new(0, 0),
            funding: FundingPlan {
                count: 2,
                amount: milli_eth(10),
                gas_reserve: trading.gas_reserve,
                fees: trading.base_fees,
                delay: Duration::from_secs(5),
            },
        },
        trading,
        swap: SwapConfig::default(),
        state_path: None,
    }
}

pub fn orchestrator(chain: &MockChain, config: OrchestratorConfig) -> TradeOrchestrator {
    orchestrator_with(chain, config, Shutdown::never())
}

pub fn orchestrator_with(
    chain: &MockChain,
    config: OrchestratorConfig,
    shutdown: Shutdown,
) -> TradeOrchestrator {
    let shared = Arc::new(chain.clone());
    TradeOrchestrator::new(tree(), shared.clone(), shared, config, shutdown)
        .with_rng(StdRng::seed_from_u64(SEED))
}
