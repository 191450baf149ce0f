//! # Cadence Credential Vault
//!
//! Encrypts the three exchange secrets (API key, secret key, passphrase) at
//! rest with AES-256-GCM. The symmetric key lives in a local key file that is
//! generated on first use, so a fresh deployment needs no manual key setup.
//!
//! The vault only performs the cryptography; persisting the ciphertext is the
//! database crate's job.

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, KeyInit, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::fs;
use std::path::Path;

pub mod error;

pub use error::VaultError;

use core_types::Credentials;

const NONCE_LEN: usize = 12;

/// Encrypts and decrypts opaque secret strings with a process-local key.
pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl CredentialVault {
    /// Opens the vault, creating the key file if it does not exist yet.
    pub fn open(key_path: &Path) -> Result<Self, VaultError> {
        let key_bytes = if key_path.exists() {
            let encoded = fs::read_to_string(key_path)?;
            BASE64.decode(encoded.trim())?
        } else {
            let key = Aes256Gcm::generate_key(OsRng);
            fs::write(key_path, BASE64.encode(key))?;
            key.to_vec()
        };

        if key_bytes.len() != 32 {
            return Err(VaultError::MalformedKey);
        }
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
        Ok(Self { cipher })
    }

    /// Encrypts one secret. Empty strings pass through unchanged so an unset
    /// credential field stays recognizably unset in storage.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::Ciphertext)?;

        let mut blob = nonce.to_vec();
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    /// Decrypts one stored secret; the inverse of [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, stored: &str) -> Result<String, VaultError> {
        if stored.is_empty() {
            return Ok(String::new());
        }
        let blob = BASE64.decode(stored)?;
        if blob.len() <= NONCE_LEN {
            return Err(VaultError::Ciphertext);
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| VaultError::Ciphertext)?;
        Ok(String::from_utf8(plaintext)?)
    }

    /// Decrypts a full credential set stored as three opaque strings.
    pub fn decrypt_credentials(
        &self,
        api_key: &str,
        secret_key: &str,
        passphrase: &str,
    ) -> Result<Credentials, VaultError> {
        Ok(Credentials {
            api_key: self.decrypt(api_key)?,
            secret_key: self.decrypt(secret_key)?,
            passphrase: self.decrypt(passphrase)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_and_key_reuse() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("test.key");

        let vault = CredentialVault::open(&key_path).unwrap();
        let stored = vault.encrypt("super-secret-passphrase").unwrap();
        assert_ne!(stored, "super-secret-passphrase");

        // A second vault instance loads the same key file and can decrypt.
        let reopened = CredentialVault::open(&key_path).unwrap();
        assert_eq!(
            reopened.decrypt(&stored).unwrap(),
            "super-secret-passphrase"
        );
    }

    #[test]
    fn empty_strings_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let vault = CredentialVault::open(&dir.path().join("k")).unwrap();
        assert_eq!(vault.encrypt("").unwrap(), "");
        assert_eq!(vault.decrypt("").unwrap(), "");
    }

    #[test]
    fn wrong_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let vault_a = CredentialVault::open(&dir.path().join("a.key")).unwrap();
        let vault_b = CredentialVault::open(&dir.path().join("b.key")).unwrap();

        let stored = vault_a.encrypt("api-key").unwrap();
        assert!(matches!(
            vault_b.decrypt(&stored),
            Err(VaultError::Ciphertext)
        ));
    }
}
