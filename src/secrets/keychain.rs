//! OS keychain integration for master key storage.
//!
//! Provides platform-specific keychain support:
//! - macOS: security-framework (Keychain Services)
//! - Linux: secret-service (GNOME Keyring, KWallet)
//!
//! The master key is a 32-byte random secret stored as lowercase hex under a
//! fixed service/account pair so every gateway process on the host shares the
//! same vault. Creation rejects an existing key; deletion reports whether a
//! record existed (operators rely on that signal).

use async_trait::async_trait;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::PincerError;
use crate::secrets::cipher::KEY_LENGTH;

/// Service name for keychain entries.
pub const SERVICE_NAME: &str = "pincer";

/// Account name for the master key.
pub const MASTER_KEY_ACCOUNT: &str = "master_key";

/// A master key held in a buffer that zeroes itself on drop.
pub type MasterKey = Zeroizing<[u8; KEY_LENGTH]>;

/// Generate a random 32-byte master key.
pub fn generate_master_key() -> MasterKey {
    let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
    rand::thread_rng().fill_bytes(key.as_mut());
    key
}

/// Access to the host credential store holding the master key.
#[async_trait]
pub trait Keychain: Send + Sync {
    /// Read the master key. Fails with [`PincerError::NotInitialized`] if no
    /// key is stored.
    async fn read(&self) -> Result<MasterKey, PincerError>;

    /// Store a new master key. Fails with
    /// [`PincerError::AlreadyInitialized`] if one is already present.
    async fn write(&self, key: &[u8; KEY_LENGTH]) -> Result<(), PincerError>;

    /// Delete the master key. Returns whether a record existed.
    async fn delete(&self) -> Result<bool, PincerError>;
}

/// Keychain backed by the host OS credential store.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsKeychain;

impl OsKeychain {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Keychain for OsKeychain {
    async fn read(&self) -> Result<MasterKey, PincerError> {
        match platform::read_master_key_hex().await? {
            Some(hex_str) => decode_key_hex(&hex_str),
            None => Err(PincerError::NotInitialized),
        }
    }

    async fn write(&self, key: &[u8; KEY_LENGTH]) -> Result<(), PincerError> {
        if platform::read_master_key_hex().await?.is_some() {
            return Err(PincerError::AlreadyInitialized);
        }
        let key_hex = hex::encode(key);
        platform::store_master_key_hex(&key_hex).await
    }

    async fn delete(&self) -> Result<bool, PincerError> {
        platform::delete_master_key().await
    }
}

/// In-memory keychain for tests; never touches the host credential store.
#[derive(Debug, Default)]
pub struct MemoryKeychain {
    entry: std::sync::Mutex<Option<[u8; KEY_LENGTH]>>,
}

impl MemoryKeychain {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Keychain for MemoryKeychain {
    async fn read(&self) -> Result<MasterKey, PincerError> {
        let entry = self
            .entry
            .lock()
            .map_err(|_| PincerError::KeychainIo("keychain lock poisoned".to_string()))?;
        entry
            .map(Zeroizing::new)
            .ok_or(PincerError::NotInitialized)
    }

    async fn write(&self, key: &[u8; KEY_LENGTH]) -> Result<(), PincerError> {
        let mut entry = self
            .entry
            .lock()
            .map_err(|_| PincerError::KeychainIo("keychain lock poisoned".to_string()))?;
        if entry.is_some() {
            return Err(PincerError::AlreadyInitialized);
        }
        *entry = Some(*key);
        Ok(())
    }

    async fn delete(&self) -> Result<bool, PincerError> {
        let mut entry = self
            .entry
            .lock()
            .map_err(|_| PincerError::KeychainIo("keychain lock poisoned".to_string()))?;
        Ok(entry.take().is_some())
    }
}

fn decode_key_hex(hex_str: &str) -> Result<MasterKey, PincerError> {
    let bytes = hex::decode(hex_str.trim())
        .map_err(|_| PincerError::KeychainIo("invalid hex in stored master key".to_string()))?;
    if bytes.len() != KEY_LENGTH {
        return Err(PincerError::KeychainIo(format!(
            "master key must be {} bytes, got {}",
            KEY_LENGTH,
            bytes.len()
        )));
    }
    let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
    key.copy_from_slice(&bytes);
    Ok(key)
}

// ============================================================================
// macOS implementation using security-framework
// ============================================================================

#[cfg(target_os = "macos")]
mod platform {
    use security_framework::passwords::{
        delete_generic_password, get_generic_password, set_generic_password,
    };

    use super::*;

    pub async fn read_master_key_hex() -> Result<Option<String>, PincerError> {
        match get_generic_password(SERVICE_NAME, MASTER_KEY_ACCOUNT) {
            Ok(password) => {
                let hex_str = String::from_utf8(password).map_err(|_| {
                    PincerError::KeychainIo("invalid UTF-8 in keychain entry".to_string())
                })?;
                Ok(Some(hex_str))
            }
            // errSecItemNotFound
            Err(e) if e.code() == -25300 => Ok(None),
            Err(e) => Err(PincerError::KeychainIo(format!(
                "failed to read keychain: {e}"
            ))),
        }
    }

    pub async fn store_master_key_hex(key_hex: &str) -> Result<(), PincerError> {
        set_generic_password(SERVICE_NAME, MASTER_KEY_ACCOUNT, key_hex.as_bytes()).map_err(|e| {
            PincerError::KeychainIo(format!("failed to store in keychain: {e}"))
        })
    }

    pub async fn delete_master_key() -> Result<bool, PincerError> {
        match get_generic_password(SERVICE_NAME, MASTER_KEY_ACCOUNT) {
            Ok(_) => {
                delete_generic_password(SERVICE_NAME, MASTER_KEY_ACCOUNT).map_err(|e| {
                    PincerError::KeychainIo(format!("failed to delete from keychain: {e}"))
                })?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }
}

// ============================================================================
// Linux implementation using secret-service
// ============================================================================

#[cfg(target_os = "linux")]
mod platform {
    use secret_service::{EncryptionType, SecretService};

    use super::*;

    fn attributes() -> std::collections::HashMap<&'static str, &'static str> {
        [("service", SERVICE_NAME), ("account", MASTER_KEY_ACCOUNT)]
            .into_iter()
            .collect()
    }

    pub async fn read_master_key_hex() -> Result<Option<String>, PincerError> {
        let ss = SecretService::connect(EncryptionType::Dh).await.map_err(|e| {
            PincerError::KeychainIo(format!("failed to connect to secret service: {e}"))
        })?;

        let items = ss
            .search_items(attributes())
            .await
            .map_err(|e| PincerError::KeychainIo(format!("failed to search: {e}")))?;

        let item = match items.unlocked.first().or(items.locked.first()) {
            Some(item) => item,
            None => return Ok(None),
        };

        if item.is_locked().await.unwrap_or(true) {
            item.unlock()
                .await
                .map_err(|e| PincerError::KeychainIo(format!("failed to unlock: {e}")))?;
        }

        let secret = item
            .get_secret()
            .await
            .map_err(|e| PincerError::KeychainIo(format!("failed to get secret: {e}")))?;

        let hex_str = String::from_utf8(secret)
            .map_err(|_| PincerError::KeychainIo("invalid UTF-8 in secret".to_string()))?;
        Ok(Some(hex_str))
    }

    pub async fn store_master_key_hex(key_hex: &str) -> Result<(), PincerError> {
        let ss = SecretService::connect(EncryptionType::Dh).await.map_err(|e| {
            PincerError::KeychainIo(format!("failed to connect to secret service: {e}"))
        })?;

        let collection = ss
            .get_default_collection()
            .await
            .map_err(|e| PincerError::KeychainIo(format!("failed to get collection: {e}")))?;

        if collection.is_locked().await.unwrap_or(true) {
            collection
                .unlock()
                .await
                .map_err(|e| PincerError::KeychainIo(format!("failed to unlock collection: {e}")))?;
        }

        collection
            .create_item(
                &format!("{SERVICE_NAME} master key"),
                attributes(),
                key_hex.as_bytes(),
                false,
                "text/plain",
            )
            .await
            .map_err(|e| PincerError::KeychainIo(format!("failed to create secret: {e}")))?;

        Ok(())
    }

    pub async fn delete_master_key() -> Result<bool, PincerError> {
        let ss = SecretService::connect(EncryptionType::Dh).await.map_err(|e| {
            PincerError::KeychainIo(format!("failed to connect to secret service: {e}"))
        })?;

        let items = ss
            .search_items(attributes())
            .await
            .map_err(|e| PincerError::KeychainIo(format!("failed to search: {e}")))?;

        let mut existed = false;
        for item in items.unlocked.iter().chain(items.locked.iter()) {
            item.delete()
                .await
                .map_err(|e| PincerError::KeychainIo(format!("failed to delete: {e}")))?;
            existed = true;
        }

        Ok(existed)
    }
}

// ============================================================================
// Fallback for unsupported platforms
// ============================================================================

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
mod platform {
    use super::*;

    pub async fn read_master_key_hex() -> Result<Option<String>, PincerError> {
        Err(PincerError::KeychainIo(
            "keychain not supported on this platform".to_string(),
        ))
    }

    pub async fn store_master_key_hex(_key_hex: &str) -> Result<(), PincerError> {
        Err(PincerError::KeychainIo(
            "keychain not supported on this platform".to_string(),
        ))
    }

    pub async fn delete_master_key() -> Result<bool, PincerError> {
        Err(PincerError::KeychainIo(
            "keychain not supported on this platform".to_string(),
        ))
    }
}
