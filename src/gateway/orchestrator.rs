//! The per-call pipeline.
//!
//! Order is load-bearing: authenticate → validate → resolve caller → inject →
//! execute → scrub → audit → return. The scrub sits between execution and
//! audit on every path, enforced by the credential guard's scope, and every
//! outcome — including failures before authentication resolved an agent —
//! produces exactly one audit entry.

use std::sync::Arc;
use std::time::Instant;

use crate::audit::{AuditEvent, AuditLog, AuditStatus};
use crate::callers::{execute_with_retry, CallerRegistry};
use crate::error::PincerError;
use crate::gateway::gatekeeper::Gatekeeper;
use crate::gateway::injector::{CredentialGuard, Injector};
use crate::protocol::{ToolCallRequest, ToolResponse};
use crate::secrets::VaultStore;
use crate::tools::{ToolRegistry, ToolSpec};

/// Agent id recorded when a call fails before authentication.
const UNKNOWN_AGENT: &str = "unknown";

/// The gateway: one instance serves many concurrent calls.
pub struct Gateway {
    gatekeeper: Gatekeeper,
    injector: Arc<Injector>,
    tools: ToolRegistry,
    callers: CallerRegistry,
    audit: AuditLog,
}

impl Gateway {
    pub fn new(
        store: Arc<VaultStore>,
        tools: ToolRegistry,
        callers: CallerRegistry,
        audit: AuditLog,
    ) -> Self {
        Self {
            gatekeeper: Gatekeeper::new(store.clone()),
            injector: Arc::new(Injector::new(store)),
            tools,
            callers,
            audit,
        }
    }

    /// Run one tool call through the full pipeline.
    pub async fn call_tool(&self, request: ToolCallRequest) -> Result<ToolResponse, PincerError> {
        let started = Instant::now();
        let mut params = request.params;
        let tool_name = params.name.clone();

        let identity = match self.gatekeeper.authenticate(&mut params) {
            Ok(identity) => identity,
            Err(e) => {
                self.record(started, UNKNOWN_AGENT, &tool_name, Some(&e));
                return Err(e);
            }
        };
        let agent_id = identity.agent_id;

        if let Err(fields) = self
            .tools
            .validate_arguments(&tool_name, params.arguments.as_ref())
        {
            let e = PincerError::ValidationFailure(fields);
            self.record(started, &agent_id, &tool_name, Some(&e));
            return Err(e);
        }

        let Some(caller) = self.callers.get(&tool_name) else {
            let e = PincerError::UnknownTool(tool_name.clone());
            self.record(started, &agent_id, &tool_name, Some(&e));
            return Err(e);
        };

        let enriched = match self.injector.inject(params, &agent_id, &tool_name).await {
            Ok(enriched) => enriched,
            Err(e) => {
                self.record(started, &agent_id, &tool_name, Some(&e));
                return Err(e);
            }
        };

        // The guard scope ends before the audit append: scrub strictly
        // precedes logging, on success and on error alike.
        let result = {
            let guard = CredentialGuard::new(enriched, self.injector.clone());
            execute_with_retry(caller.as_ref(), guard.request()).await
        };

        self.record(started, &agent_id, &tool_name, result.as_ref().err());
        result
    }

    /// Tool discovery; requires no authentication.
    pub fn list_tools(&self) -> &[ToolSpec] {
        self.tools.list()
    }

    /// How many injected requests are still outstanding.
    pub fn outstanding_credentials(&self) -> usize {
        self.injector.outstanding()
    }

    /// Shut down: close the vault handles, zeroing the cached master key.
    pub async fn close(&self) {
        self.injector.close().await;
    }

    fn record(&self, started: Instant, agent_id: &str, tool: &str, error: Option<&PincerError>) {
        let event = AuditEvent {
            agent_id: agent_id.to_string(),
            tool: tool.to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            status: if error.is_some() {
                AuditStatus::Error
            } else {
                AuditStatus::Success
            },
            error: error.map(|e| e.audit_summary()),
        };

        if let Err(e) = self.audit.log(event) {
            tracing::error!(error = %e, "failed to append audit entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::callers::{CallerError, ToolCaller};
    use crate::gateway::gatekeeper::META_TOKEN_FIELD;
    use crate::gateway::injector::EnrichedRequest;
    use crate::protocol::ToolCallParams;
    use crate::secrets::{generate_master_key, Keychain, MemoryKeychain, VaultStore};
    use crate::tools::builtin_tools;

    /// Caller that records the credentials it saw and succeeds.
    struct RecordingCaller {
        seen_key: std::sync::Mutex<Option<String>>,
    }

    #[async_trait]
    impl ToolCaller for RecordingCaller {
        fn name(&self) -> &str {
            "gemini_generate"
        }

        async fn execute(&self, request: &EnrichedRequest) -> Result<ToolResponse, CallerError> {
            *self.seen_key.lock().unwrap() = Some(request.credentials.api_key.clone());
            Ok(ToolResponse::text("generated"))
        }
    }

    async fn gateway_with(caller: Arc<dyn ToolCaller>) -> (Gateway, String, tempfile::TempDir) {
        let keychain = Arc::new(MemoryKeychain::new());
        keychain.write(&generate_master_key()).await.unwrap();
        let store = Arc::new(VaultStore::open_in_memory(keychain).unwrap());
        store
            .set_secret("gemini_api_key", "default", "AIza_REAL")
            .await
            .unwrap();
        let token = store.add_agent("bot", None).unwrap();
        store.set_mapping("bot", "gemini_generate", "default").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::open(dir.path().join("audit.jsonl")).unwrap();
        let mut callers = CallerRegistry::new();
        callers.register(caller);

        let gateway = Gateway::new(store, ToolRegistry::new(builtin_tools()), callers, audit);
        (gateway, token, dir)
    }

    fn call_with_token(token: &str) -> ToolCallRequest {
        let mut meta = serde_json::Map::new();
        meta.insert(
            META_TOKEN_FIELD.to_string(),
            serde_json::Value::String(token.to_string()),
        );
        let mut arguments = serde_json::Map::new();
        arguments.insert(
            "prompt".to_string(),
            serde_json::Value::String("hello".to_string()),
        );
        ToolCallRequest {
            params: ToolCallParams::new("gemini_generate")
                .with_arguments(arguments)
                .with_meta(meta),
        }
    }

    #[tokio::test]
    async fn test_happy_path_audits_success_and_scrubs() {
        let caller = Arc::new(RecordingCaller {
            seen_key: std::sync::Mutex::new(None),
        });
        let (gateway, token, _dir) = gateway_with(caller.clone()).await;

        let response = gateway.call_tool(call_with_token(&token)).await.unwrap();
        assert_eq!(response.content[0].as_text(), Some("generated"));
        assert_eq!(
            caller.seen_key.lock().unwrap().as_deref(),
            Some("AIza_REAL")
        );
        assert_eq!(gateway.outstanding_credentials(), 0);

        let entries = gateway.audit.read_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].agent_id, "bot");
        assert_eq!(entries[0].tool, "gemini_generate");
        assert_eq!(entries[0].status, AuditStatus::Success);
    }

    #[tokio::test]
    async fn test_unauthenticated_call_audits_unknown_agent() {
        let caller = Arc::new(RecordingCaller {
            seen_key: std::sync::Mutex::new(None),
        });
        let (gateway, _token, _dir) = gateway_with(caller).await;

        let request = ToolCallRequest {
            params: ToolCallParams::new("gemini_generate"),
        };
        // No token anywhere (the env fallback is unset in tests).
        std::env::remove_var(crate::gateway::gatekeeper::TOKEN_ENV_VAR);
        let err = gateway.call_tool(request).await.unwrap_err();
        assert!(matches!(err, PincerError::MissingToken));

        let entries = gateway.audit.read_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].agent_id, "unknown");
        assert_eq!(entries[0].status, AuditStatus::Error);
        assert!(entries[0].error.as_deref().unwrap().contains("missing proxy token"));
    }

    #[tokio::test]
    async fn test_validation_failure_audits_before_injection() {
        let caller = Arc::new(RecordingCaller {
            seen_key: std::sync::Mutex::new(None),
        });
        let (gateway, token, _dir) = gateway_with(caller.clone()).await;

        let mut request = call_with_token(&token);
        request.params.arguments.as_mut().unwrap().remove("prompt");

        let err = gateway.call_tool(request).await.unwrap_err();
        assert!(matches!(err, PincerError::ValidationFailure(_)));
        // The caller never ran and no credential was injected.
        assert!(caller.seen_key.lock().unwrap().is_none());
        assert_eq!(gateway.outstanding_credentials(), 0);
    }

    #[tokio::test]
    async fn test_failing_caller_still_scrubs_and_audits_error() {
        struct FailingCaller;

        #[async_trait]
        impl ToolCaller for FailingCaller {
            fn name(&self) -> &str {
                "gemini_generate"
            }
            fn max_retries(&self) -> u32 {
                1
            }
            async fn execute(
                &self,
                _request: &EnrichedRequest,
            ) -> Result<ToolResponse, CallerError> {
                Err(CallerError::Upstream {
                    status: 500,
                    message: "boom".to_string(),
                })
            }
        }

        let (gateway, token, _dir) = gateway_with(Arc::new(FailingCaller)).await;
        let err = gateway.call_tool(call_with_token(&token)).await.unwrap_err();
        assert!(matches!(err, PincerError::RetryExhausted { .. }));
        assert_eq!(gateway.outstanding_credentials(), 0);

        let entries = gateway.audit.read_entries().unwrap();
        assert_eq!(entries[0].status, AuditStatus::Error);
        // The audit summary names the failure, never the key.
        let summary = entries[0].error.as_deref().unwrap();
        assert!(summary.contains("boom"));
        assert!(!summary.contains("AIza_REAL"));
    }
}
