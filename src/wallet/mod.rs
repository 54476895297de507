//! Wallet management.
//!
//! - `derivation` — deterministic keys from the seed phrase
//! - `scanner` — balance scans over a rectangle of the derivation tree
//! - `pool` — the active wallet set, selection and replenishment

pub mod derivation;
pub mod pool;
pub mod scanner;

pub use derivation::KeyDerivationTree;
pub use pool::{FundingPlan, WalletPool};
pub use scanner::{ScanReport, WalletScanner, WalletStats};
