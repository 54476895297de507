//! Stuck-transaction clearing ahead of trading.

use std::sync::Arc;

use alloy::primitives::U256;

use rotator::engine::nonce::NonceGuard;
use rotator::engine::orchestrator::TradingConfig;
use rotator::types::FeeParams;

use crate::harness::{config, orchestrator, wallet};
use crate::mock_chain::{eth, MockChain, TxKind};

#[tokio::test(start_paused = true)]
async fn test_backlog_superseded_before_any_trade() {
    let chain = MockChain::new();
    let w0 = wallet(0);
    chain.fund(w0.address, eth(1));
    chain.set_nonces(w0.address, 5, 3);

    let mut orch = orchestrator(&chain, config(1, 1));
    orch.initialize().await.unwrap();
    let report = orch.tick().await.unwrap();
    assert!(report.stuck_cleared);

    let sent = chain.sent();
    let replacement = &sent[0];
    assert_eq!(replacement.kind, TxKind::Transfer);
    assert_eq!(replacement.signer, w0.address);
    assert_eq!(replacement.request.from, w0.address);
    assert_eq!(replacement.request.to, w0.address);
    assert_eq!(replacement.request.value, U256::ZERO);
    assert_eq!(replacement.request.nonce, Some(3));
    assert_eq!(replacement.request.gas_limit, Some(21_000));
    assert_eq!(
        replacement.request.fees,
        Some(TradingConfig::default().base_fees.doubled())
    );

    assert_eq!(chain.sent_of(TxKind::Transfer).len(), 1);
    assert_eq!(sent[1].kind, TxKind::Buy);
    // Replacement mined nonce 3; buy, approval and sell followed
    assert_eq!(chain.sent().len(), 4);
    assert_eq!(chain.nonces(w0.address), (8, 7));
}

#[tokio::test(start_paused = true)]
async fn test_clean_nonces_trade_without_replacement() {
    let chain = MockChain::new();
    let w0 = wallet(0);
    chain.fund(w0.address, eth(1));
    chain.set_nonces(w0.address, 3, 3);

    let mut orch = orchestrator(&chain, config(1, 1));
    orch.initialize().await.unwrap();
    let report = orch.tick().await.unwrap();

    assert!(!report.stuck_cleared);
    assert!(chain.sent_of(TxKind::Transfer).is_empty());
    assert_eq!(chain.sent()[0].kind, TxKind::Buy);
}

#[tokio::test(start_paused = true)]
async fn test_failed_clear_skips_the_tick() {
    let chain = MockChain::new();
    let w0 = wallet(0);
    chain.fund(w0.address, eth(1));
    chain.set_nonces(w0.address, 5, 3);

    let mut orch = orchestrator(&chain, config(1, 1));
    orch.initialize().await.unwrap();
    chain.refuse_from(w0.address);

    let report = orch.tick().await.unwrap();
    assert!(!report.stuck_cleared);
    assert!(report.skipped.is_some());
    assert!(report.swaps.is_empty());
    assert!(chain.sent().is_empty());
    assert_eq!(orch.session().unwrap().swap_count, 0);
}

#[tokio::test]
async fn test_cancel_pending_reports_what_is_left() {
    let chain = MockChain::new();
    let w0 = wallet(0);
    chain.set_nonces(w0.address, 5, 3);

    let guard = NonceGuard::new(Arc::new(chain.clone()));
    let report = guard.cancel_pending(&w0).await.unwrap();

    assert_eq!(report.pending_before, 5);
    assert_eq!(report.confirmed_before, 3);
    assert!(report.tx_hash.is_some());
    // One replacement supersedes one slot
    assert_eq!(report.remaining, 1);
    assert!(!report.cleared());

    let sent = chain.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].request.fees,
        Some(FeeParams::new(1_000_000_000, 1_000_000).doubled())
    );
}

#[tokio::test]
async fn test_cancel_pending_is_noop_when_clean() {
    let chain = MockChain::new();
    let w0 = wallet(0);
    chain.set_nonces(w0.address, 4, 4);

    let guard = NonceGuard::new(Arc::new(chain.clone()));
    let report = guard.cancel_pending(&w0).await.unwrap();

    assert!(report.cleared());
    assert!(report.tx_hash.is_none());
    assert!(chain.sent().is_empty());
}
