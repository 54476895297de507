//! Swap engine against the in-memory curve.

use std::sync::Arc;

use alloy::primitives::U256;

use rotator::engine::swap::{ApprovalPolicy, SwapConfig, SwapEngine};
use rotator::types::{AgentError, SwapStatus};

use crate::harness::wallet;
use crate::mock_chain::{eth, milli_eth, tokens, word_of, MockChain, TxKind, CALL_GAS};

fn engine(chain: &MockChain, config: SwapConfig) -> SwapEngine {
    let shared = Arc::new(chain.clone());
    SwapEngine::new(shared.clone(), shared, config)
}

#[tokio::test]
async fn test_buy_moves_eth_into_tokens() {
    let chain = MockChain::new();
    let w = wallet(1);
    chain.fund(w.address, eth(1));

    let result = engine(&chain, SwapConfig::default())
        .buy(&w, milli_eth(100))
        .await;

    assert_eq!(result.status, SwapStatus::Confirmed);
    assert_eq!(result.amounts.expected_output, tokens(10_000));
    assert_eq!(result.amounts.min_output, tokens(9_500));
    assert_eq!(chain.token_balance(w.address), tokens(10_000));
    assert_eq!(chain.balance(w.address), milli_eth(900));

    let buy = &chain.sent()[0];
    assert_eq!(buy.kind, TxKind::Buy);
    assert_eq!(buy.request.value, milli_eth(100));
    assert_eq!(buy.request.gas_limit, Some(CALL_GAS * 120 / 100));
    assert_eq!(word_of(&buy.request.data, 0), tokens(9_500));
    assert_eq!(chain.reserves().eth_reserve, eth(10) + milli_eth(100));
}

#[tokio::test]
async fn test_sell_approves_once_then_reuses_allowance() {
    let chain = MockChain::new();
    let w = wallet(1);
    chain.give_tokens(w.address, tokens(1_000));
    let swaps = engine(&chain, SwapConfig::default());

    assert!(swaps.sell(&w, tokens(100)).await.success());
    assert!(swaps.sell(&w, tokens(100)).await.success());

    let approvals = chain.sent_of(TxKind::Approve);
    assert_eq!(approvals.len(), 1);
    assert_eq!(approvals[0].request.to, chain.contract());
    assert_eq!(word_of(&approvals[0].request.data, 1), U256::MAX);
    assert_eq!(chain.sent_of(TxKind::Sell).len(), 2);
    assert_eq!(chain.token_balance(w.address), tokens(800));
    assert!(chain.balance(w.address) > U256::ZERO);
}

#[tokio::test]
async fn test_exact_approval_per_sell() {
    let chain = MockChain::new();
    let w = wallet(1);
    chain.give_tokens(w.address, tokens(1_000));
    let config = SwapConfig {
        approval: ApprovalPolicy::Exact,
        ..SwapConfig::default()
    };
    let swaps = engine(&chain, config);

    assert!(swaps.sell(&w, tokens(100)).await.success());
    assert!(swaps.sell(&w, tokens(50)).await.success());

    let approvals = chain.sent_of(TxKind::Approve);
    assert_eq!(approvals.len(), 2);
    assert_eq!(word_of(&approvals[0].request.data, 1), tokens(100));
    assert_eq!(word_of(&approvals[1].request.data, 1), tokens(50));
}

#[tokio::test]
async fn test_sell_above_reserve_cap_never_submits() {
    let chain = MockChain::new();
    let w = wallet(1);
    chain.give_tokens(w.address, tokens(400_000));
    let swaps = engine(&chain, SwapConfig::default());

    let result = swaps.sell(&w, tokens(300_000) + U256::from(1u64)).await;
    assert_eq!(result.status, SwapStatus::Rejected);
    assert!(matches!(
        result.error,
        Some(AgentError::ReserveCapExceeded { cap_pct: 30, .. })
    ));
    assert!(chain.sent().is_empty());

    // The cap itself is allowed
    let result = swaps.sell(&w, tokens(300_000)).await;
    assert_eq!(result.status, SwapStatus::Confirmed);
    assert_eq!(chain.token_balance(w.address), tokens(100_000));
}

#[tokio::test]
async fn test_timed_out_buy_that_landed_settles_confirmed() {
    let chain = MockChain::new();
    let w = wallet(1);
    chain.fund(w.address, eth(1));
    let swaps = engine(&chain, SwapConfig::default());

    chain.stall_next();
    let result = swaps.buy(&w, milli_eth(100)).await;
    assert_eq!(result.status, SwapStatus::Unconfirmed);
    assert!(matches!(result.error, Some(AgentError::Unconfirmed { .. })));
    assert!(!result.error.as_ref().unwrap().is_retryable());

    let settled = swaps.settle(&w, result).await;
    assert_eq!(settled.status, SwapStatus::Confirmed);
    assert_eq!(settled.tx_hash, Some(chain.sent()[0].hash));
    assert_eq!(chain.sent_of(TxKind::Buy).len(), 1);
}

#[tokio::test]
async fn test_outage_rejects_buy_without_submitting() {
    let chain = MockChain::new();
    let w = wallet(1);
    chain.fund(w.address, eth(1));
    let swaps = engine(&chain, SwapConfig::default());

    chain.set_error("connection refused");
    let result = swaps.buy(&w, milli_eth(100)).await;
    assert_eq!(result.status, SwapStatus::Rejected);
    assert!(matches!(result.error, Some(AgentError::Chain(_))));
    assert!(chain.sent().is_empty());

    chain.clear_error();
    assert!(swaps.buy(&w, milli_eth(100)).await.success());
}

#[tokio::test]
async fn test_price_impact_flat_on_constant_ratio() {
    let chain = MockChain::new();
    let swaps = engine(&chain, SwapConfig::default());
    assert_eq!(swaps.price_impact_bps(eth(1)).await.unwrap(), 0);
}
