//! Error types for the gateway.
//!
//! One crate-wide taxonomy: vault and keychain failures, request
//! authentication failures, and pipeline failures all flow through
//! [`PincerError`] so the orchestrator can audit and surface them uniformly.
//!
//! None of the `Display` output ever contains secret material — messages name
//! tools, labels and agents, never key bytes or plaintext.

use thiserror::Error;

/// Errors surfaced by the gateway core.
#[derive(Debug, Error)]
pub enum PincerError {
    /// The master key is absent from the OS credential store.
    #[error("vault is not initialized; run `pincer init` first")]
    NotInitialized,

    /// `init` was attempted while a master key already exists.
    #[error("vault is already initialized; run `pincer reset` to remove the master key")]
    AlreadyInitialized,

    /// The host credential store failed. The platform error is carried
    /// verbatim.
    #[error("keychain error: {0}")]
    KeychainIo(String),

    /// AEAD tag mismatch or wrong key during decryption. Also raised when a
    /// stored record was tampered with or the master key was replaced.
    #[error("decryption failed: invalid key or corrupted record")]
    AuthFailure,

    /// No secret record exists for the requested (tool, label) pair.
    #[error("no secret stored for tool '{tool}' with label '{label}'")]
    SecretMissing { tool: String, label: String },

    /// The request carried no proxy token in any of the three sources.
    #[error(
        "missing proxy token: expected `_meta.pincer_token`, \
         `arguments.__pincer_auth__`, or the PINCER_PROXY_TOKEN environment variable"
    )]
    MissingToken,

    /// The extracted token does not match `pxr_` + 21 URL-safe characters.
    #[error("malformed proxy token: expected `pxr_` followed by at least 21 URL-safe characters")]
    BadTokenFormat,

    /// The token is well-formed but resolves to no registered agent.
    #[error("unknown proxy token: no agent is registered for this token")]
    UnknownToken,

    /// The agent exists but has no mapping for the requested tool.
    #[error("agent '{agent}' is not authorized to call tool '{tool}'")]
    Forbidden { agent: String, tool: String },

    /// No caller is registered for the requested tool.
    #[error("unknown tool: '{0}'")]
    UnknownTool(String),

    /// Request arguments did not match the tool's schema.
    #[error("invalid arguments: {}", .0.join("; "))]
    ValidationFailure(Vec<String>),

    /// The outbound API responded with a non-success status.
    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    /// Every retry attempt failed; carries the final attempt's error text.
    #[error("call failed after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: String },

    /// Uniqueness violation registering an agent or token.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A revoke/remove target did not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Vault database failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Ambient I/O failure (audit log file, vault file removal).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PincerError {
    /// Short summary suitable for an audit entry: the error kind and its
    /// message, never a backtrace and never secret material.
    pub fn audit_summary(&self) -> String {
        self.to_string()
    }
}

impl From<rusqlite::Error> for PincerError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(inner, ref msg)
                if inner.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                PincerError::Conflict(
                    msg.clone()
                        .unwrap_or_else(|| "uniqueness violation".to_string()),
                )
            }
            other => PincerError::Storage(other.to_string()),
        }
    }
}
