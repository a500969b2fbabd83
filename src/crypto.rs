//! Shared-secret proof of possession.
//!
//! AES-256-GCM with a fresh random nonce per message. Ciphertext layout is
//! `nonce (12 bytes) || ciphertext || tag (16 bytes)`. Encrypting the same
//! plaintext twice never yields the same bytes, so an observed response
//! cannot be recognised and replayed by equality.

use aes_gcm::Aes256Gcm;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use rand::RngCore;
use rand::rngs::OsRng;

use crate::error::{Error, Result};

/// Required secret length: raw key material for AES-256.
pub const KEY_LEN: usize = 32;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const TOKEN_LEN: usize = 32;

/// Symmetric encrypt/decrypt keyed by the shared secret.
#[derive(Clone)]
pub struct Transformer {
    cipher: Aes256Gcm,
}

impl Transformer {
    /// Build a transformer from exactly [`KEY_LEN`] bytes of key material.
    pub fn new(secret: &[u8]) -> Result<Self> {
        if secret.len() != KEY_LEN {
            return Err(Error::InvalidKeySize(secret.len()));
        }
        let cipher =
            Aes256Gcm::new_from_slice(secret).map_err(|_| Error::InvalidKeySize(secret.len()))?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| Error::Other("encryption failed".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Fails with `DecryptionFailure` on truncated, corrupted, or foreign input.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::DecryptionFailure);
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::<Aes256Gcm>::from_slice(nonce), ciphertext)
            .map_err(|_| Error::DecryptionFailure)
    }
}

impl std::fmt::Debug for Transformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Transformer([REDACTED])")
    }
}

/// A fresh random secret, independent of any transformer.
pub fn generate_secret() -> [u8; KEY_LEN] {
    let mut secret = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut secret);
    secret
}

/// Printable form of a secret, for env files and CLI output.
pub fn encode_secret(secret: &[u8]) -> String {
    STANDARD.encode(secret)
}

/// Inverse of [`encode_secret`]. Anything that does not decode to exactly
/// [`KEY_LEN`] bytes is taken as raw key material and left for
/// [`Transformer::new`] to judge.
pub fn decode_secret(encoded: &str) -> Vec<u8> {
    match STANDARD.decode(encoded) {
        Ok(bytes) if bytes.len() == KEY_LEN => bytes,
        _ => encoded.as_bytes().to_vec(),
    }
}

/// Unguessable opaque token (256 bits, URL-safe base64).
pub(crate) fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_LEN];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique_and_url_safe() {
        let a = random_token();
        let b = random_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn encoded_secret_decodes_back() {
        let secret = generate_secret();
        assert_eq!(decode_secret(&encode_secret(&secret)), secret.to_vec());
    }

    #[test]
    fn raw_secret_passes_through() {
        let raw = "GoWorkGoWorkGoWorkGoWorkGoWork12";
        assert_eq!(decode_secret(raw), raw.as_bytes().to_vec());
    }
}
