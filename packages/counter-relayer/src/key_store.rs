//! Identity loading: inline config secrets, the legacy single-key variable,
//! and an optionally encrypted (AES-256-GCM) key file.

use crate::config::Config;
use crate::identity::SigningIdentity;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{info, warn};

/// Legacy single-identity variable.
pub const LEGACY_KEY_VAR: &str = "RELAYER_PRIVATE_KEY";

/// Key file: encrypted (AES-256-GCM) for production, plaintext for dev.
pub struct KeyStore {
    path: PathBuf,
    encryption_key: Option<[u8; 32]>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct StoredKeys {
    keys: Vec<String>,
}

impl KeyStore {
    pub fn new_plaintext(path: PathBuf) -> Self {
        Self {
            path,
            encryption_key: None,
        }
    }

    pub fn new_encrypted(path: PathBuf, key_b64: &str) -> Result<Self, crate::Error> {
        let key_bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, key_b64)
            .map_err(|e| crate::Error::Config(format!("Invalid encryption key base64: {e}")))?;

        if key_bytes.len() != 32 {
            return Err(crate::Error::Config(format!(
                "Encryption key must be 32 bytes, got {}",
                key_bytes.len()
            )));
        }

        let mut key = [0u8; 32];
        key.copy_from_slice(&key_bytes);

        Ok(Self {
            path,
            encryption_key: Some(key),
        })
    }

    /// Hex secrets stored in the file. A missing file is an error: it was configured.
    pub fn load(&self) -> Result<Vec<String>, crate::Error> {
        let data = std::fs::read(&self.path).map_err(|e| {
            crate::Error::Config(format!(
                "Failed to read key file {}: {e}",
                self.path.display()
            ))
        })?;

        let json_bytes = if let Some(key) = &self.encryption_key {
            decrypt_aes256gcm(key, &data)?
        } else {
            data
        };

        let stored: StoredKeys = serde_json::from_slice(&json_bytes)
            .map_err(|e| crate::Error::Config(format!("Failed to parse key file: {e}")))?;

        info!(path = %self.path.display(), count = stored.keys.len(), "Key file loaded");
        Ok(stored.keys)
    }
}

/// Collect every configured identity, de-duplicated by address.
pub fn load_identities(config: &Config) -> Result<Vec<SigningIdentity>, crate::Error> {
    let mut secrets: Vec<String> = config
        .identity_keys
        .iter()
        .filter(|k| !k.trim().is_empty())
        .cloned()
        .collect();

    if let Ok(legacy) = std::env::var(LEGACY_KEY_VAR) {
        if !legacy.trim().is_empty() {
            secrets.push(legacy);
        }
    }

    if let Some(path) = &config.keys_path {
        let store = match &config.keys_encryption_key {
            Some(key) => KeyStore::new_encrypted(path.into(), key)?,
            None => KeyStore::new_plaintext(path.into()),
        };
        secrets.extend(store.load()?);
    }

    let mut seen = HashSet::new();
    let mut identities = Vec::with_capacity(secrets.len());
    for secret in &secrets {
        let identity = SigningIdentity::from_hex(secret)?;
        if seen.insert(identity.address()) {
            info!(address = ?identity.address(), "Loaded signing identity");
            identities.push(identity);
        } else {
            warn!(address = ?identity.address(), "Duplicate identity ignored");
        }
    }

    Ok(identities)
}

#[cfg(test)]
pub(crate) fn encrypt_aes256gcm(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, crate::Error> {
    use aes_gcm::aead::{Aead, KeyInit};
    use aes_gcm::{Aes256Gcm, Nonce};
    use rand::RngCore;

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| crate::Error::Config(format!("AES init failed: {e}")))?;

    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| crate::Error::Config(format!("Encryption failed: {e}")))?;

    let mut result = Vec::with_capacity(12 + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Layout: 12-byte nonce ‖ ciphertext.
fn decrypt_aes256gcm(key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>, crate::Error> {
    use aes_gcm::aead::{Aead, KeyInit};
    use aes_gcm::{Aes256Gcm, Nonce};

    if data.len() < 12 {
        return Err(crate::Error::Config(
            "Encrypted data too short (missing nonce)".into(),
        ));
    }

    let (nonce_bytes, ciphertext) = data.split_at(12);
    let nonce = Nonce::from_slice(nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| crate::Error::Config(format!("AES init failed: {e}")))?;

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| crate::Error::Config(format!("Decryption failed (wrong key?): {e}")))
}
