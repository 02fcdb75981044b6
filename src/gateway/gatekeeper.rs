//! Request authentication: proxy-token extraction and resolution.
//!
//! A tool call may carry its token in three places, checked in priority
//! order: `_meta.pincer_token`, `arguments.__pincer_auth__`, then the
//! `PINCER_PROXY_TOKEN` environment variable. When the arguments source is
//! used, the field is stripped before the arguments reach any downstream
//! component — otherwise a passthrough caller would leak the token to an
//! external API.
//!
//! Every call re-reads the vault; there is no identity cache to go stale.

use std::sync::Arc;

use crate::error::PincerError;
use crate::protocol::ToolCallParams;
use crate::secrets::{is_valid_proxy_token, VaultStore};

/// Metadata field carrying the proxy token.
pub const META_TOKEN_FIELD: &str = "pincer_token";

/// Arguments field carrying the proxy token.
pub const ARGS_TOKEN_FIELD: &str = "__pincer_auth__";

/// Environment variable carrying the fallback proxy token.
pub const TOKEN_ENV_VAR: &str = "PINCER_PROXY_TOKEN";

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub proxy_token: String,
}

/// Authenticates tool calls against the vault.
pub struct Gatekeeper {
    store: Arc<VaultStore>,
}

impl Gatekeeper {
    pub fn new(store: Arc<VaultStore>) -> Self {
        Self { store }
    }

    /// Extract the proxy token, check its format, resolve it to an agent,
    /// and check that the agent may call `params.name`.
    ///
    /// Mutates `params`: a token found in the arguments map is removed.
    pub fn authenticate(&self, params: &mut ToolCallParams) -> Result<AgentIdentity, PincerError> {
        let token = extract_token(params).ok_or(PincerError::MissingToken)?;

        if !is_valid_proxy_token(&token) {
            return Err(PincerError::BadTokenFormat);
        }

        let agent_id = self
            .store
            .get_agent_by_token(&token)?
            .ok_or(PincerError::UnknownToken)?;

        if !self.store.is_authorized(&agent_id, &params.name)? {
            return Err(PincerError::Forbidden {
                agent: agent_id,
                tool: params.name.clone(),
            });
        }

        tracing::debug!(agent = %agent_id, tool = %params.name, "request authenticated");
        Ok(AgentIdentity {
            agent_id,
            proxy_token: token,
        })
    }
}

/// Walk the three token sources in priority order. The arguments field is
/// removed when it is the source actually read; a `_meta` token leaves the
/// arguments untouched because they are never consulted.
fn extract_token(params: &mut ToolCallParams) -> Option<String> {
    if let Some(meta) = &params.meta {
        if let Some(token) = meta.get(META_TOKEN_FIELD).and_then(|v| v.as_str()) {
            return Some(token.to_string());
        }
    }

    if let Some(arguments) = &mut params.arguments {
        if let Some(value) = arguments.remove(ARGS_TOKEN_FIELD) {
            if let Some(token) = value.as_str() {
                return Some(token.to_string());
            }
        }
    }

    std::env::var(TOKEN_ENV_VAR)
        .ok()
        .filter(|t| !t.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::secrets::{generate_master_key, Keychain, MemoryKeychain, VaultStore};

    async fn gatekeeper_with_agent() -> (Gatekeeper, String) {
        let keychain = Arc::new(MemoryKeychain::new());
        keychain.write(&generate_master_key()).await.unwrap();
        let store = Arc::new(VaultStore::open_in_memory(keychain).unwrap());
        let token = store.add_agent("bot", None).unwrap();
        store.set_mapping("bot", "gemini_generate", "default").unwrap();
        (Gatekeeper::new(store), token)
    }

    fn params_with_meta_token(token: &str) -> ToolCallParams {
        let mut meta = serde_json::Map::new();
        meta.insert(
            META_TOKEN_FIELD.to_string(),
            serde_json::Value::String(token.to_string()),
        );
        ToolCallParams::new("gemini_generate").with_meta(meta)
    }

    #[tokio::test]
    async fn test_authenticate_happy_path() {
        let (gatekeeper, token) = gatekeeper_with_agent().await;
        let mut params = params_with_meta_token(&token);

        let identity = gatekeeper.authenticate(&mut params).unwrap();
        assert_eq!(identity.agent_id, "bot");
        assert_eq!(identity.proxy_token, token);
    }

    #[tokio::test]
    async fn test_missing_token() {
        let (gatekeeper, _) = gatekeeper_with_agent().await;
        let mut params = ToolCallParams::new("gemini_generate");

        let err = gatekeeper.authenticate(&mut params).unwrap_err();
        assert!(matches!(err, PincerError::MissingToken));
    }

    #[tokio::test]
    async fn test_bad_token_format() {
        let (gatekeeper, _) = gatekeeper_with_agent().await;
        let mut params = params_with_meta_token("pxr_tooshort");

        let err = gatekeeper.authenticate(&mut params).unwrap_err();
        assert!(matches!(err, PincerError::BadTokenFormat));
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let (gatekeeper, _) = gatekeeper_with_agent().await;
        let mut params = params_with_meta_token(&format!("pxr_{}", "q".repeat(21)));

        let err = gatekeeper.authenticate(&mut params).unwrap_err();
        assert!(matches!(err, PincerError::UnknownToken));
    }

    #[tokio::test]
    async fn test_forbidden_tool() {
        let (gatekeeper, token) = gatekeeper_with_agent().await;
        let mut meta = serde_json::Map::new();
        meta.insert(
            META_TOKEN_FIELD.to_string(),
            serde_json::Value::String(token),
        );
        let mut params = ToolCallParams::new("slack_send_message").with_meta(meta);

        let err = gatekeeper.authenticate(&mut params).unwrap_err();
        match err {
            PincerError::Forbidden { agent, tool } => {
                assert_eq!(agent, "bot");
                assert_eq!(tool, "slack_send_message");
            }
            other => panic!("expected Forbidden, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_arguments_source_is_stripped() {
        let (gatekeeper, token) = gatekeeper_with_agent().await;

        let mut arguments = serde_json::Map::new();
        arguments.insert(
            ARGS_TOKEN_FIELD.to_string(),
            serde_json::Value::String(token),
        );
        arguments.insert(
            "prompt".to_string(),
            serde_json::Value::String("hi".to_string()),
        );
        let mut params = ToolCallParams::new("gemini_generate").with_arguments(arguments);

        let identity = gatekeeper.authenticate(&mut params).unwrap();
        assert_eq!(identity.agent_id, "bot");

        let remaining = params.arguments.unwrap();
        assert!(!remaining.contains_key(ARGS_TOKEN_FIELD));
        assert!(remaining.contains_key("prompt"));
    }

    #[tokio::test]
    async fn test_meta_wins_over_arguments() {
        let (gatekeeper, token) = gatekeeper_with_agent().await;

        let mut meta = serde_json::Map::new();
        meta.insert(
            META_TOKEN_FIELD.to_string(),
            serde_json::Value::String(token.clone()),
        );
        let mut arguments = serde_json::Map::new();
        arguments.insert(
            ARGS_TOKEN_FIELD.to_string(),
            serde_json::Value::String("pxr_nottherealtokenatall0".to_string()),
        );
        let mut params = ToolCallParams::new("gemini_generate")
            .with_meta(meta)
            .with_arguments(arguments);

        let identity = gatekeeper.authenticate(&mut params).unwrap();
        assert_eq!(identity.proxy_token, token);
        // The arguments copy was never consulted and stays in place.
        assert!(params
            .arguments
            .unwrap()
            .contains_key(ARGS_TOKEN_FIELD));
    }
}
