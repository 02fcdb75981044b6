//! Just-in-time credential injection and scrubbing.
//!
//! `inject` decrypts the real API key for one call and attaches it to an
//! [`EnrichedRequest`]; `scrub` overwrites the key with a fixed non-secret
//! pattern and releases it. Between the two, the plaintext exists nowhere
//! else in the process.
//!
//! [`CredentialGuard`] makes the pairing structural: the orchestrator holds
//! the enriched request only through a guard whose `Drop` scrubs, so every
//! exit path — success, error, early return, cancellation — releases the
//! secret.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use secrecy::ExposeSecret;
use serde::Serialize;
use zeroize::Zeroize;

use crate::error::PincerError;
use crate::protocol::ToolCallParams;
use crate::secrets::VaultStore;

/// Pattern a scrubbed key is overwritten with.
const SCRUB_PATTERN: &str = "****************";

/// Map an externally visible tool name to the vault secret name it draws
/// from. The indirection decouples the tool surface from vault identifiers;
/// unknown tools map to themselves.
pub fn secret_name_for(tool_name: &str) -> &str {
    match tool_name {
        "gemini_generate" => "gemini_api_key",
        "slack_send_message" => "slack_bot_token",
        "gpg_sign" => "gpg_passphrase",
        other => other,
    }
}

/// Credentials attached to an enriched request for the duration of one call.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub api_key: String,
    pub agent_id: String,
}

/// A tool call plus its decrypted credentials. Ephemeral: owned by the
/// orchestrator for one outbound call, then scrubbed.
#[derive(Debug)]
pub struct EnrichedRequest {
    id: u64,
    pub params: ToolCallParams,
    pub credentials: Credentials,
}

impl EnrichedRequest {
    pub fn id(&self) -> u64 {
        self.id
    }

    #[cfg(test)]
    pub(crate) fn for_tests(params: ToolCallParams, agent_id: &str, api_key: &str) -> Self {
        Self {
            id: 0,
            params,
            credentials: Credentials {
                api_key: api_key.to_string(),
                agent_id: agent_id.to_string(),
            },
        }
    }
}

/// Injects and scrubs credentials, tracking outstanding secret-bearing
/// requests by id. The tracking set is an aid to reasoning about in-flight
/// secrets, not a correctness mechanism.
pub struct Injector {
    store: Arc<VaultStore>,
    next_id: AtomicU64,
    active: Mutex<HashSet<u64>>,
}

impl Injector {
    pub fn new(store: Arc<VaultStore>) -> Self {
        Self {
            store,
            next_id: AtomicU64::new(1),
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Decrypt the secret for (agent, tool) and attach it to the request.
    pub async fn inject(
        &self,
        params: ToolCallParams,
        agent_id: &str,
        tool_name: &str,
    ) -> Result<EnrichedRequest, PincerError> {
        let secret_name = secret_name_for(tool_name);
        let label = self.store.get_mapping_label(agent_id, tool_name)?;
        let secret = self.store.get_secret(secret_name, &label).await?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut active) = self.active.lock() {
            active.insert(id);
        }

        tracing::debug!(agent = agent_id, tool = tool_name, label = %label, "credentials injected");
        Ok(EnrichedRequest {
            id,
            params,
            credentials: Credentials {
                api_key: secret.expose_secret().to_string(),
                agent_id: agent_id.to_string(),
            },
        })
    }

    /// Overwrite the injected key and release the request from tracking.
    /// Idempotent; safe to call on an already-scrubbed request.
    pub fn scrub(&self, enriched: &mut EnrichedRequest) {
        enriched.credentials.api_key.zeroize();
        enriched.credentials.api_key = SCRUB_PATTERN.to_string();

        if let Ok(mut active) = self.active.lock() {
            active.remove(&enriched.id);
        }
        tracing::trace!(request = enriched.id, "credentials scrubbed");
    }

    /// How many injected requests have not been scrubbed yet.
    pub fn outstanding(&self) -> usize {
        self.active.lock().map(|a| a.len()).unwrap_or(0)
    }

    /// Close the underlying store handle (zeroing the cached master key).
    pub async fn close(&self) {
        self.store.close().await;
    }
}

/// Scoped ownership of an enriched request: scrubs on drop, whatever the
/// exit path.
pub struct CredentialGuard {
    enriched: Option<EnrichedRequest>,
    injector: Arc<Injector>,
}

impl CredentialGuard {
    pub fn new(enriched: EnrichedRequest, injector: Arc<Injector>) -> Self {
        Self {
            enriched: Some(enriched),
            injector,
        }
    }

    /// The guarded request.
    pub fn request(&self) -> &EnrichedRequest {
        self.enriched
            .as_ref()
            .expect("credential guard accessed after drop")
    }
}

impl Drop for CredentialGuard {
    fn drop(&mut self) {
        if let Some(mut enriched) = self.enriched.take() {
            self.injector.scrub(&mut enriched);
        }
    }
}
