//! Integration tests.
//!
//! Drive the public API end to end against [`mock_chain::MockChain`], an
//! in-memory chain and curve.

mod harness;
mod retries;
mod rotation;
mod stuck_nonce;
mod swaps;
