//! Wallet rotation: budget exhaustion, liquidation and reselection.

use std::time::Duration;

use alloy::primitives::U256;

use rotator::engine::orchestrator::Phase;
use rotator::engine::schedule;
use rotator::types::{AgentError, AgentState};

use crate::harness::{config, orchestrator, orchestrator_with, wallet};
use crate::mock_chain::{eth, milli_eth, tokens, MockChain, TxKind};

#[tokio::test(start_paused = true)]
async fn test_budget_reached_rotates_to_next_best_wallet() {
    let chain = MockChain::new();
    let (w0, w1, w2) = (wallet(0), wallet(1), wallet(2));
    chain.fund(w0.address, eth(1));
    chain.fund(w1.address, milli_eth(500));
    chain.fund(w2.address, milli_eth(200));

    let mut orch = orchestrator(&chain, config(3, 1));
    let init = orch.initialize().await.unwrap();
    assert!(init.initialized);
    assert_eq!(init.wallet, Some(w0.address));
    assert_eq!(orch.phase(), Phase::Trading);

    let budget = orch.session().unwrap().swap_budget;
    assert!((5..=10).contains(&budget));

    let mut rotation = None;
    for _ in 0..=budget {
        let report = orch.tick().await.unwrap();
        if report.rotated {
            rotation = Some(report);
            break;
        }
    }
    let rotation = rotation.expect("budget should trigger a rotation");

    // One buy, one sell per tick, then a final liquidation on rotation
    assert_eq!(chain.sent_of(TxKind::Buy).len(), 1);
    assert_eq!(chain.sent_of(TxKind::Sell).len(), budget as usize + 1);
    assert_eq!(chain.sent_of(TxKind::Approve).len(), 1);
    assert!(chain.sent().iter().all(|t| t.success));

    assert_eq!(rotation.wallet, Some(w1.address));
    assert!(!orch.pool().contains(&w0.address));
    assert!(orch.pool().contains(&w2.address));
    assert_eq!(chain.token_balance(w0.address), tokens(1));

    let session = orch.session().unwrap();
    assert_eq!(session.active_wallet.address, w1.address);
    assert_eq!(session.swap_count, 0);
    assert!((5..=10).contains(&session.swap_budget));
}

#[tokio::test(start_paused = true)]
async fn test_rotation_rescans_when_pool_runs_dry() {
    let chain = MockChain::new();
    let w0 = wallet(0);
    chain.fund(w0.address, eth(1));

    let mut orch = orchestrator(&chain, config(3, 1));
    orch.initialize().await.unwrap();
    assert_eq!(orch.pool().len(), 1);

    let budget = orch.session().unwrap().swap_budget;
    let mut rotated = false;
    for _ in 0..=budget {
        if orch.tick().await.unwrap().rotated {
            rotated = true;
            break;
        }
    }
    assert!(rotated);

    // The retired wallet is the only funded one left, so it comes back
    let session = orch.session().unwrap();
    assert_eq!(session.active_wallet.address, w0.address);
    assert_eq!(session.swap_count, 0);
    assert_eq!(orch.pool().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_tick_before_initialize_initializes() {
    let chain = MockChain::new();
    chain.fund(wallet(0).address, eth(1));

    let mut orch = orchestrator(&chain, config(2, 1));
    assert_eq!(orch.phase(), Phase::Init);

    let report = orch.tick().await.unwrap();
    assert!(report.initialized);
    assert!(report.swaps.is_empty());
    assert!(chain.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_held_tokens_liquidated_on_activation_within_cap() {
    let chain = MockChain::new();
    let w0 = wallet(0);
    chain.fund(w0.address, eth(1));
    chain.give_tokens(w0.address, tokens(250_000));

    let mut orch = orchestrator(&chain, config(1, 1));
    let report = orch.initialize().await.unwrap();

    assert_eq!(report.swaps.len(), 1);
    assert!(report.swaps[0].success());
    // 10% of the one-million-token reserve
    assert_eq!(report.swaps[0].amounts.input, tokens(100_000));
    assert_eq!(chain.token_balance(w0.address), tokens(150_000));
}

#[tokio::test(start_paused = true)]
async fn test_run_accumulates_rotations_until_shutdown() {
    let chain = MockChain::new();
    chain.fund(wallet(0).address, eth(1));
    chain.fund(wallet(1).address, milli_eth(500));

    let (trigger, shutdown) = schedule::channel();
    let mut orch = orchestrator_with(&chain, config(2, 1), shutdown);

    let handle = tokio::spawn(async move {
        let mut state = AgentState::new();
        let result = orch.run(&mut state).await;
        (result, state)
    });

    // An hour of one-minute steps outlasts the largest swap budget
    tokio::time::sleep(Duration::from_secs(60 * 60)).await;
    trigger.trigger();

    let (result, state) = handle.await.unwrap();
    assert!(result.is_ok());
    assert!(state.rotations >= 1);
    assert!(state.buys >= 1);
    assert!(state.sells >= 5);
    assert_eq!(state.failed_swaps, 0);
    assert!(state.last_wallet.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_drained_wallet_rotates_to_next_best() {
    let chain = MockChain::new();
    let (w0, w1) = (wallet(0), wallet(1));
    chain.fund(w0.address, eth(1));
    chain.fund(w1.address, milli_eth(500));

    let mut orch = orchestrator(&chain, config(2, 1));
    orch.initialize().await.unwrap();
    assert_eq!(orch.session().unwrap().active_wallet.address, w0.address);

    // Emptied from outside between ticks
    chain.fund(w0.address, U256::ZERO);
    let report = orch.tick().await.unwrap();

    assert!(report.rotated);
    assert!(report.skipped.is_none());
    assert_eq!(report.wallet, Some(w1.address));
    assert!(chain.sent().is_empty());
    assert!(!orch.pool().contains(&w0.address));
    assert_eq!(orch.phase(), Phase::Trading);

    let session = orch.session().unwrap();
    assert_eq!(session.active_wallet.address, w1.address);
    assert_eq!(session.swap_count, 0);

    // The next tick trades from the new wallet
    let report = orch.tick().await.unwrap();
    assert!(!report.rotated);
    assert!(report.swaps[0].success());
    assert!(chain.sent().iter().all(|t| t.signer == w1.address));
}

#[tokio::test(start_paused = true)]
async fn test_drained_last_wallet_returns_to_init() {
    let chain = MockChain::new();
    let w0 = wallet(0);
    chain.fund(w0.address, eth(1));

    let mut orch = orchestrator(&chain, config(2, 1));
    orch.initialize().await.unwrap();

    chain.fund(w0.address, U256::ZERO);
    let err = orch.tick().await.unwrap_err();

    assert_eq!(err, AgentError::NoWalletAvailable);
    assert_eq!(orch.phase(), Phase::Init);
    assert!(orch.session().is_none());
    assert!(chain.sent().is_empty());
}
