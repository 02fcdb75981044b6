//! Authenticated encryption for vault records.
//!
//! AES-256-GCM with a fresh random 96-bit nonce per encryption. The output
//! keeps ciphertext, nonce, and authentication tag as separate fields so the
//! store can persist them in distinct columns; any mismatch among the three
//! (or a wrong key) fails decryption with an authentication error.
//!
//! The cipher holds no key state. Callers pass the master key per operation;
//! caching and zeroing the key is the store's responsibility.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;

use crate::error::PincerError;

/// Key length in bytes (256 bits).
pub const KEY_LENGTH: usize = 32;

/// Nonce length in bytes (96 bits, the AES-GCM standard).
pub const NONCE_LENGTH: usize = 12;

/// Authentication tag length in bytes.
pub const TAG_LENGTH: usize = 16;

/// An encrypted secret: the triple a vault record persists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSecret {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LENGTH],
    pub tag: [u8; TAG_LENGTH],
}

/// Encrypt a plaintext under the master key.
pub fn encrypt(key: &[u8; KEY_LENGTH], plaintext: &[u8]) -> Result<SealedSecret, PincerError> {
    let mut nonce_bytes = [0u8; NONCE_LENGTH];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| PincerError::Storage(format!("failed to create cipher: {e}")))?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    // aes-gcm appends the 16-byte tag to the ciphertext; split it off so the
    // record schema keeps the triple.
    let mut combined = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| PincerError::Storage(format!("encryption failed: {e}")))?;

    if combined.len() < TAG_LENGTH {
        return Err(PincerError::Storage(
            "encryption produced a short output".to_string(),
        ));
    }
    let tag_bytes = combined.split_off(combined.len() - TAG_LENGTH);
    let mut tag = [0u8; TAG_LENGTH];
    tag.copy_from_slice(&tag_bytes);

    Ok(SealedSecret {
        ciphertext: combined,
        nonce: nonce_bytes,
        tag,
    })
}

/// Decrypt a sealed secret under the master key.
///
/// Any tampering with ciphertext, nonce, or tag — or a wrong key — yields
/// [`PincerError::AuthFailure`].
pub fn decrypt(key: &[u8; KEY_LENGTH], sealed: &SealedSecret) -> Result<Vec<u8>, PincerError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| PincerError::Storage(format!("failed to create cipher: {e}")))?;
    let nonce = Nonce::from_slice(&sealed.nonce);

    let mut combined = Vec::with_capacity(sealed.ciphertext.len() + TAG_LENGTH);
    combined.extend_from_slice(&sealed.ciphertext);
    combined.extend_from_slice(&sealed.tag);

    cipher
        .decrypt(nonce, combined.as_slice())
        .map_err(|_| PincerError::AuthFailure)
}
