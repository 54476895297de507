//! Deterministic key derivation from a BIP-39 seed phrase.
//!
//! Every wallet lives at `m/44'/60'/{account}'/0/{index}`. Deriving the same
//! coordinate always yields the same key, so wallet records are only ever a
//! cache of the seed.

use std::sync::Arc;

use alloy::primitives::U256;
use alloy::signers::local::coins_bip39::{English, Mnemonic};
use alloy::signers::local::MnemonicBuilder;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::types::{AgentError, DerivationCoord, WalletRecord};

/// Wallet indices per account before `next_path` rolls to the next account.
pub const WALLETS_PER_ACCOUNT: u32 = 20;

pub struct KeyDerivationTree {
    phrase: Arc<SecretString>,
    cursor: DerivationCoord,
}

impl KeyDerivationTree {
    /// Validate `phrase` and build a tree with the cursor at `0:0`.
    pub fn new(phrase: SecretString) -> Result<Self, AgentError> {
        Mnemonic::<English>::new_from_phrase(phrase.expose_secret().trim())
            .map_err(|e| AgentError::InvalidSeed(e.to_string()))?;
        Ok(Self {
            phrase: Arc::new(phrase),
            cursor: DerivationCoord::new(0, 0),
        })
    }

    /// Resume enumeration at `cursor`.
    pub fn with_cursor(mut self, cursor: DerivationCoord) -> Self {
        self.cursor = cursor;
        self
    }

    /// The coordinate the next `next_path` call will return.
    pub fn cursor(&self) -> DerivationCoord {
        self.cursor
    }

    /// Derive the wallet at `(account, index)`. Balance starts at zero.
    pub fn derive(&self, account: u32, index: u32) -> Result<WalletRecord, AgentError> {
        derive_at(&self.phrase, DerivationCoord::new(account, index))
    }

    /// Derive the wallet at `coord`.
    pub fn derive_coord(&self, coord: DerivationCoord) -> Result<WalletRecord, AgentError> {
        derive_at(&self.phrase, coord)
    }

    /// Derive every coordinate in `coords`, in order, on the blocking pool.
    ///
    /// Each derivation re-stretches the seed, so a full scan stays off the
    /// async workers.
    pub async fn derive_all(
        &self,
        coords: Vec<DerivationCoord>,
    ) -> Result<Vec<WalletRecord>, AgentError> {
        let phrase = Arc::clone(&self.phrase);
        tokio::task::spawn_blocking(move || {
            coords.into_iter().map(|c| derive_at(&phrase, c)).collect()
        })
        .await
        .map_err(|e| AgentError::InvalidSeed(format!("derivation task failed: {e}")))?
    }

    /// Hand out the cursor coordinate and advance it.
    ///
    /// Indices run `0..20` within an account, then the account increments.
    pub fn next_path(&mut self) -> DerivationCoord {
        if self.cursor.index >= WALLETS_PER_ACCOUNT {
            self.cursor = DerivationCoord::new(self.cursor.account + 1, 0);
        }
        let coord = self.cursor;
        self.cursor.index += 1;
        debug!(path = %coord.path(), "Issued derivation path");
        coord
    }
}

fn derive_at(phrase: &SecretString, coord: DerivationCoord) -> Result<WalletRecord, AgentError> {
    let path = coord.path();
    let signer = MnemonicBuilder::<English>::default()
        .phrase(phrase.expose_secret().trim())
        .derivation_path(&path)
        .map_err(|e| AgentError::InvalidSeed(format!("bad path {path}: {e}")))?
        .build()
        .map_err(|e| AgentError::InvalidSeed(e.to_string()))?;

    Ok(WalletRecord {
        address: signer.address(),
        derivation_path: path,
        signer,
        balance: U256::ZERO,
        account_index: coord.account,
        wallet_index: coord.index,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
