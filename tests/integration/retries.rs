//! Swap retries through the orchestrator: what gets resubmitted and what
//! is left alone after a failed submission or confirmation wait.

use rotator::engine::orchestrator::{TradeOrchestrator, TradingConfig};
use rotator::types::{AgentError, SwapStatus, WalletRecord};

use crate::harness::{config, orchestrator, wallet};
use crate::mock_chain::{eth, tokens, MockChain, TxKind};

/// An initialized orchestrator whose first tick bought, approved and sold,
/// so the next tick goes straight to a sell.
async fn after_first_round(chain: &MockChain) -> (TradeOrchestrator, WalletRecord) {
    let w0 = wallet(0);
    chain.fund(w0.address, eth(1));

    let mut orch = orchestrator(chain, config(1, 1));
    orch.initialize().await.unwrap();
    let report = orch.tick().await.unwrap();
    assert!(report.swaps.iter().all(|s| s.success()));
    assert_eq!(chain.sent().len(), 3);
    (orch, w0)
}

#[tokio::test(start_paused = true)]
async fn test_stalled_sell_that_landed_is_not_resubmitted() {
    let chain = MockChain::new();
    let (mut orch, _) = after_first_round(&chain).await;

    chain.stall_next();
    let report = orch.tick().await.unwrap();

    assert_eq!(report.swaps.len(), 1);
    assert_eq!(report.swaps[0].status, SwapStatus::Confirmed);
    assert_eq!(chain.sent_of(TxKind::Sell).len(), 2);
    assert_eq!(chain.submissions(), 4);
    assert_eq!(orch.session().unwrap().swap_count, 2);
}

#[tokio::test(start_paused = true)]
async fn test_pending_sell_is_left_for_the_stuck_clear() {
    let chain = MockChain::new();
    let (mut orch, w0) = after_first_round(&chain).await;

    chain.hold_next();
    let report = orch.tick().await.unwrap();

    assert_eq!(report.swaps[0].status, SwapStatus::Unconfirmed);
    assert_eq!(
        report.swaps[0].error,
        Some(AgentError::StuckNonce {
            pending: 4,
            confirmed: 3
        })
    );
    assert_eq!(chain.sent_of(TxKind::Sell).len(), 2);
    assert_eq!(chain.submissions(), 4);
    assert_eq!(orch.session().unwrap().swap_count, 1);

    // The next tick supersedes the pending sell before trading again
    let report = orch.tick().await.unwrap();
    assert!(report.stuck_cleared);
    let replacement = &chain.sent()[4];
    assert_eq!(replacement.kind, TxKind::Transfer);
    assert_eq!(replacement.request.nonce, Some(3));
    assert!(report.swaps[0].success());
    assert_eq!(chain.nonces(w0.address), (5, 5));
}

#[tokio::test(start_paused = true)]
async fn test_dropped_sell_is_retried() {
    let chain = MockChain::new();
    let (mut orch, _) = after_first_round(&chain).await;

    chain.drop_next();
    let report = orch.tick().await.unwrap();

    let sells = chain.sent_of(TxKind::Sell);
    assert_eq!(sells.len(), 3);
    assert!(!sells[1].success);
    assert!(sells[2].success);
    assert_eq!(report.swaps[0].status, SwapStatus::Confirmed);
    assert_eq!(report.swaps[0].tx_hash, Some(sells[2].hash));
    assert_eq!(orch.session().unwrap().swap_count, 2);
}

#[tokio::test(start_paused = true)]
async fn test_refused_sell_uses_every_attempt() {
    let chain = MockChain::new();
    let (mut orch, w0) = after_first_round(&chain).await;
    let tokens_before = chain.token_balance(w0.address);

    chain.refuse_from(w0.address);
    let report = orch.tick().await.unwrap();

    let attempts = TradingConfig::default().retry.max_attempts as usize;
    assert_eq!(chain.submissions(), 3 + attempts);
    assert_eq!(chain.sent().len(), 3);
    assert_eq!(report.swaps.len(), 1);
    assert_eq!(report.swaps[0].status, SwapStatus::Reverted);
    assert!(matches!(
        report.swaps[0].error,
        Some(AgentError::TransactionFailure(_))
    ));
    assert_eq!(chain.token_balance(w0.address), tokens_before);
    assert_eq!(orch.session().unwrap().swap_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_approval_that_landed_lets_the_sell_through() {
    let chain = MockChain::new();
    let w0 = wallet(0);
    chain.fund(w0.address, eth(1));

    let mut orch = orchestrator(&chain, config(1, 1));
    orch.initialize().await.unwrap();
    chain.give_tokens(w0.address, tokens(1_000));

    chain.stall_next();
    let report = orch.tick().await.unwrap();

    assert!(report.swaps[0].success());
    assert_eq!(chain.sent_of(TxKind::Approve).len(), 1);
    assert_eq!(chain.sent_of(TxKind::Sell).len(), 1);
    assert_eq!(chain.submissions(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_pending_approval_is_never_doubled() {
    let chain = MockChain::new();
    let w0 = wallet(0);
    chain.fund(w0.address, eth(1));

    let mut orch = orchestrator(&chain, config(1, 1));
    orch.initialize().await.unwrap();
    chain.give_tokens(w0.address, tokens(1_000));

    chain.hold_next();
    let report = orch.tick().await.unwrap();

    assert_eq!(report.swaps.len(), 1);
    let result = &report.swaps[0];
    assert_eq!(result.status, SwapStatus::Unconfirmed);
    assert_eq!(result.tx_hash, None);
    assert!(matches!(result.error, Some(AgentError::Unconfirmed { .. })));
    assert_eq!(chain.sent_of(TxKind::Approve).len(), 1);
    assert!(chain.sent_of(TxKind::Sell).is_empty());
    assert_eq!(chain.submissions(), 1);
    assert_eq!(chain.nonces(w0.address), (1, 0));

    // Superseded on the next tick, then approved afresh and sold
    let report = orch.tick().await.unwrap();
    assert!(report.stuck_cleared);
    assert!(report.swaps[0].success());
    assert_eq!(chain.sent_of(TxKind::Approve).len(), 2);
    assert_eq!(chain.sent_of(TxKind::Sell).len(), 1);
    assert_eq!(orch.session().unwrap().swap_count, 1);
}
