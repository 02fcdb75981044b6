//! Local GPG signing adapter.
//!
//! Shells out to the host `gpg` binary; the injected credential is the key
//! passphrase. Signing is purely local, so the retry budget is one attempt.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::callers::{CallerError, ToolCaller};
use crate::gateway::injector::EnrichedRequest;
use crate::protocol::ToolResponse;

/// Signs payloads with the local GPG keyring.
pub struct GpgCaller {
    binary: String,
}

impl GpgCaller {
    pub fn new() -> Self {
        Self {
            binary: "gpg".to_string(),
        }
    }

    /// Override the gpg binary path (for testing).
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }
}

impl Default for GpgCaller {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolCaller for GpgCaller {
    fn name(&self) -> &str {
        "gpg_sign"
    }

    // Local signing never benefits from backoff.
    fn max_retries(&self) -> u32 {
        1
    }

    async fn execute(&self, request: &EnrichedRequest) -> Result<ToolResponse, CallerError> {
        let payload = request
            .params
            .arguments
            .as_ref()
            .and_then(|a| a.get("payload"))
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let mut child = tokio::process::Command::new(&self.binary)
            .args([
                "--batch",
                "--yes",
                "--pinentry-mode",
                "loopback",
                "--passphrase",
                &request.credentials.api_key,
                "--armor",
                "--detach-sign",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CallerError::Execution(format!("failed to spawn gpg: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(payload.as_bytes())
                .await
                .map_err(|e| CallerError::Execution(format!("failed to write payload: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CallerError::Execution(format!("gpg did not finish: {e}")))?;

        if !output.status.success() {
            // stderr only; it never contains the passphrase.
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CallerError::Execution(format!(
                "gpg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(ToolResponse::text(
            String::from_utf8_lossy(&output.stdout).to_string(),
        ))
    }
}
