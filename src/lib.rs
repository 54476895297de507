//! ROTATOR — Multi-wallet bonding-curve trading agent
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod chain;
pub mod wallet;
pub mod engine;
pub mod storage;
