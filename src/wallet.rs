//! Oracle signing key handling

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, Zeroizing};

/// Hex-encoded private key, wiped from memory on drop
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SigningKey(String);

impl SigningKey {
    pub fn new(hex_key: impl Into<String>) -> Self {
        Self(hex_key.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("SigningKey(<empty>)")
        } else {
            f.write_str("SigningKey(<redacted>)")
        }
    }
}

impl Drop for SigningKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Signer for fee-update transactions
pub struct OracleWallet {
    signer: PrivateKeySigner,
}

impl OracleWallet {
    /// Build the signer from a hex key, with or without `0x`
    pub fn from_key(key: &SigningKey) -> Result<Self> {
        let trimmed = key.expose().trim();
        let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        if hex_part.len() != 64 {
            anyhow::bail!(
                "Invalid signing key length: expected 64 hex characters, got {}",
                hex_part.len()
            );
        }

        let bytes = Zeroizing::new(hex::decode(hex_part).context("Signing key is not valid hex")?);
        if bytes.iter().all(|&b| b == 0) {
            anyhow::bail!("Invalid signing key: all-zero key rejected");
        }

        let signer = PrivateKeySigner::from_slice(&bytes).context("Invalid secp256k1 private key")?;
        Ok(Self { signer })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn signer(&self) -> &PrivateKeySigner {
        &self.signer
    }

    pub fn into_signer(self) -> PrivateKeySigner {
        self.signer
    }
}
