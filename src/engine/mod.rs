//! Core engine — swaps, stuck-transaction recovery and the trading loop.

pub mod accountant;
pub mod consolidation;
pub mod nonce;
pub mod orchestrator;
pub mod retry;
pub mod schedule;
pub mod swap;
