//! The encrypted vault: master key, record cipher, and persistent store.
//!
//! # Security model
//!
//! ```text
//! OS credential store ──► 32-byte master key (hex, zeroized in-process cache)
//!                              │
//!                              ▼
//! set_secret ──► AES-256-GCM encrypt ──► secrets table (ciphertext, nonce, tag)
//! get_secret ◄── AES-256-GCM decrypt ◄── (fails loudly on tamper or key swap)
//! ```
//!
//! Agents never touch this module directly; they hold opaque proxy tokens
//! (`pxr_…`) that the gateway resolves against the `proxy_tokens` table. The
//! real API keys only exist in plaintext between injection and scrub.

pub mod cipher;
pub mod keychain;
pub mod store;

pub use cipher::SealedSecret;
pub use keychain::{generate_master_key, Keychain, MasterKey, MemoryKeychain, OsKeychain};
pub use store::{
    generate_proxy_token, is_valid_proxy_token, AgentGrant, AgentRecord, VaultStore,
    DEFAULT_LABEL, TOKEN_PREFIX,
};
