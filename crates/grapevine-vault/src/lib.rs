// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Credential vault: symmetric at-rest encryption of per-user secrets.
//!
//! The process-scoped key is loaded once from the environment at startup;
//! a missing or malformed key is fatal. API credentials and phone numbers
//! are stored as opaque base64 tokens and decrypted only in memory inside
//! the session fabric.

pub mod crypto;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use grapevine_core::GrapevineError;
use sha2::{Digest, Sha256};

/// Symmetric credential vault around a process-scoped AES-256-GCM key.
pub struct Vault {
    key: [u8; 32],
}

impl Vault {
    /// Build a vault from an encoded key string (base64 or hex, 32 bytes).
    ///
    /// Failure here aborts startup: running without a working vault would
    /// silently strand every stored credential.
    pub fn from_key_string(encoded: &str) -> Result<Self, GrapevineError> {
        let bytes = decode_key(encoded)?;
        let key: [u8; 32] = bytes.try_into().map_err(|_| {
            GrapevineError::Vault("encryption key must decode to exactly 32 bytes".to_string())
        })?;
        Ok(Self { key })
    }

    /// Encrypt a plaintext secret into a self-contained base64 token
    /// (`base64(nonce || ciphertext || tag)`).
    pub fn encrypt(&self, plaintext: &str) -> Result<String, GrapevineError> {
        let (ciphertext, nonce) = crypto::seal(&self.key, plaintext.as_bytes())?;
        let mut packed = Vec::with_capacity(12 + ciphertext.len());
        packed.extend_from_slice(&nonce);
        packed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(packed))
    }

    /// Decrypt a token produced by [`Vault::encrypt`].
    pub fn decrypt(&self, token: &str) -> Result<String, GrapevineError> {
        let packed = BASE64
            .decode(token)
            .map_err(|e| GrapevineError::Vault(format!("malformed vault token: {e}")))?;
        if packed.len() < 12 + 16 {
            return Err(GrapevineError::Vault("vault token too short".to_string()));
        }
        let (nonce_bytes, ciphertext) = packed.split_at(12);
        let nonce: [u8; 12] = nonce_bytes
            .try_into()
            .map_err(|_| GrapevineError::Vault("bad nonce length".to_string()))?;
        let plaintext = crypto::open(&self.key, &nonce, ciphertext)?;
        String::from_utf8(plaintext)
            .map_err(|_| GrapevineError::Vault("decrypted secret is not UTF-8".to_string()))
    }

    /// Short stable hash of a plaintext secret, safe for log correlation.
    pub fn fingerprint(plaintext: &str) -> String {
        let digest = Sha256::digest(plaintext.as_bytes());
        hex::encode(&digest[..6])
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault").field("key", &"[redacted]").finish()
    }
}

fn decode_key(encoded: &str) -> Result<Vec<u8>, GrapevineError> {
    let trimmed = encoded.trim();
    if trimmed.len() == 64 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return hex::decode(trimmed)
            .map_err(|e| GrapevineError::Vault(format!("bad hex encryption key: {e}")));
    }
    BASE64
        .decode(trimmed)
        .map_err(|e| GrapevineError::Vault(format!("bad base64 encryption key: {e}")))
}
