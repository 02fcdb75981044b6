//! End-to-end gateway tests: vault setup through audit verification.
//!
//! Everything runs against an in-memory vault, a memory keychain, and a
//! scripted caller, with the audit log on a temp path. No OS keychain, no
//! network.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use pincer::audit::{AuditLog, AuditStatus};
use pincer::callers::{CallerError, CallerRegistry, ToolCaller};
use pincer::error::PincerError;
use pincer::gateway::{EnrichedRequest, Gateway};
use pincer::protocol::{ToolCallParams, ToolCallRequest, ToolResponse};
use pincer::secrets::{generate_master_key, Keychain, MemoryKeychain, VaultStore};
use pincer::tools::{builtin_tools, ToolRegistry, ToolSpec};

const META_TOKEN_FIELD: &str = "pincer_token";
const ARGS_TOKEN_FIELD: &str = "__pincer_auth__";
const TOKEN_ENV_VAR: &str = "PINCER_PROXY_TOKEN";

/// Scripted caller: fails a configured number of times, then succeeds.
/// Records every arguments map and API key it was invoked with.
struct ScriptedCaller {
    name: String,
    attempts: AtomicU32,
    failures_before_success: u32,
    error: CallerError,
    seen_arguments: Mutex<Vec<Option<serde_json::Map<String, serde_json::Value>>>>,
    seen_keys: Mutex<Vec<String>>,
}

impl ScriptedCaller {
    fn succeeding(name: &str) -> Self {
        Self::failing_then_ok(
            name,
            0,
            CallerError::Upstream {
                status: 500,
                message: "unused".to_string(),
            },
        )
    }

    fn failing_then_ok(name: &str, failures: u32, error: CallerError) -> Self {
        Self {
            name: name.to_string(),
            attempts: AtomicU32::new(0),
            failures_before_success: failures,
            error,
            seen_arguments: Mutex::new(Vec::new()),
            seen_keys: Mutex::new(Vec::new()),
        }
    }

    fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolCaller for ScriptedCaller {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, request: &EnrichedRequest) -> Result<ToolResponse, CallerError> {
        self.seen_arguments
            .lock()
            .unwrap()
            .push(request.params.arguments.clone());
        self.seen_keys
            .lock()
            .unwrap()
            .push(request.credentials.api_key.clone());

        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures_before_success {
            Err(self.error.clone())
        } else {
            Ok(ToolResponse::text("synthetic success"))
        }
    }
}

struct TestBed {
    gateway: Gateway,
    store: Arc<VaultStore>,
    token: String,
    audit_dir: tempfile::TempDir,
}

impl TestBed {
    fn audit_entries(&self) -> Vec<pincer::audit::AuditEntry> {
        AuditLog::open(self.audit_dir.path().join("audit.jsonl"))
            .unwrap()
            .read_entries()
            .unwrap()
    }
}

/// `init` + `set_secret` + `agent add` + `authorize`, then a gateway over
/// the given caller.
async fn set_up(caller: Arc<ScriptedCaller>) -> TestBed {
    let keychain = Arc::new(MemoryKeychain::new());
    keychain.write(&generate_master_key()).await.unwrap();

    let store = Arc::new(VaultStore::open_in_memory(keychain).unwrap());
    store
        .set_secret("gemini_api_key", "default", "AIza_REAL")
        .await
        .unwrap();
    let token = store.add_agent("bot", None).unwrap();
    store
        .set_mapping("bot", "gemini_generate", "default")
        .unwrap();

    let audit_dir = tempfile::tempdir().unwrap();
    let audit = AuditLog::open(audit_dir.path().join("audit.jsonl")).unwrap();

    let mut callers = CallerRegistry::new();
    callers.register(caller);

    let mut tools = builtin_tools();
    tools.push(ToolSpec {
        name: "echo".to_string(),
        description: "No-argument tool".to_string(),
        input_schema: serde_json::json!({"type": "object", "properties": {}}),
    });

    TestBed {
        gateway: Gateway::new(store.clone(), ToolRegistry::new(tools), callers, audit),
        store,
        token,
        audit_dir,
    }
}

fn meta_with_token(token: &str) -> serde_json::Map<String, serde_json::Value> {
    let mut meta = serde_json::Map::new();
    meta.insert(
        META_TOKEN_FIELD.to_string(),
        serde_json::Value::String(token.to_string()),
    );
    meta
}

fn gemini_call(token: &str) -> ToolCallRequest {
    let mut arguments = serde_json::Map::new();
    arguments.insert(
        "prompt".to_string(),
        serde_json::Value::String("hello".to_string()),
    );
    ToolCallRequest {
        params: ToolCallParams::new("gemini_generate")
            .with_arguments(arguments)
            .with_meta(meta_with_token(token)),
    }
}

#[tokio::test]
async fn happy_path_injects_key_and_audits_success() {
    let caller = Arc::new(ScriptedCaller::succeeding("gemini_generate"));
    let bed = set_up(caller.clone()).await;

    let response = bed.gateway.call_tool(gemini_call(&bed.token)).await.unwrap();
    assert_eq!(response.content[0].as_text(), Some("synthetic success"));

    // The caller received the real decrypted key.
    assert_eq!(caller.seen_keys.lock().unwrap().as_slice(), ["AIza_REAL"]);

    let entries = bed.audit_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].agent_id, "bot");
    assert_eq!(entries[0].tool, "gemini_generate");
    assert_eq!(entries[0].status, AuditStatus::Success);

    // No secret-bearing request is left outstanding.
    assert_eq!(bed.gateway.outstanding_credentials(), 0);
}

#[tokio::test]
async fn token_source_priority_and_missing_token() {
    let caller = Arc::new(ScriptedCaller::succeeding("gemini_generate"));
    let bed = set_up(caller.clone()).await;

    // All three sources present: `_meta` wins. A decoy in the arguments and
    // a decoy in the environment must not be consulted.
    std::env::set_var(TOKEN_ENV_VAR, "pxr_envdecoytokenvalue0000");
    let mut arguments = serde_json::Map::new();
    arguments.insert(
        ARGS_TOKEN_FIELD.to_string(),
        serde_json::Value::String("pxr_argsdecoytoken0000000".to_string()),
    );
    arguments.insert(
        "prompt".to_string(),
        serde_json::Value::String("hi".to_string()),
    );
    let request = ToolCallRequest {
        params: ToolCallParams::new("gemini_generate")
            .with_arguments(arguments)
            .with_meta(meta_with_token(&bed.token)),
    };
    bed.gateway.call_tool(request).await.unwrap();

    // Environment source alone: wins when nothing else carries a token.
    std::env::set_var(TOKEN_ENV_VAR, &bed.token);
    let mut arguments = serde_json::Map::new();
    arguments.insert(
        "prompt".to_string(),
        serde_json::Value::String("hi".to_string()),
    );
    let request = ToolCallRequest {
        params: ToolCallParams::new("gemini_generate").with_arguments(arguments),
    };
    bed.gateway.call_tool(request).await.unwrap();

    // No source at all: MissingToken naming the three locations, audited
    // under the unknown agent.
    std::env::remove_var(TOKEN_ENV_VAR);
    let mut arguments = serde_json::Map::new();
    arguments.insert(
        "prompt".to_string(),
        serde_json::Value::String("hi".to_string()),
    );
    let request = ToolCallRequest {
        params: ToolCallParams::new("gemini_generate").with_arguments(arguments),
    };
    let err = bed.gateway.call_tool(request).await.unwrap_err();
    assert!(matches!(err, PincerError::MissingToken));
    let message = err.to_string();
    assert!(message.contains("_meta.pincer_token"));
    assert!(message.contains("arguments.__pincer_auth__"));
    assert!(message.contains("PINCER_PROXY_TOKEN"));

    let entries = bed.audit_entries();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[2].agent_id, "unknown");
    assert_eq!(entries[2].status, AuditStatus::Error);
}

#[tokio::test]
async fn forbidden_tool_names_agent_and_tool() {
    let caller = Arc::new(ScriptedCaller::succeeding("slack_send_message"));
    let bed = set_up(caller).await;

    let mut arguments = serde_json::Map::new();
    arguments.insert("channel".to_string(), serde_json::Value::String("C1".into()));
    arguments.insert("text".to_string(), serde_json::Value::String("hi".into()));
    let request = ToolCallRequest {
        params: ToolCallParams::new("slack_send_message")
            .with_arguments(arguments)
            .with_meta(meta_with_token(&bed.token)),
    };

    let err = bed.gateway.call_tool(request).await.unwrap_err();
    let message = err.to_string();
    assert!(matches!(err, PincerError::Forbidden { .. }));
    assert!(message.contains("bot"));
    assert!(message.contains("slack_send_message"));

    let entries = bed.audit_entries();
    assert_eq!(entries[0].status, AuditStatus::Error);
}

#[tokio::test]
async fn arguments_token_is_stripped_before_the_caller() {
    let caller = Arc::new(ScriptedCaller::succeeding("gemini_generate"));
    let bed = set_up(caller.clone()).await;

    let mut arguments = serde_json::Map::new();
    arguments.insert(
        ARGS_TOKEN_FIELD.to_string(),
        serde_json::Value::String(bed.token.clone()),
    );
    arguments.insert(
        "prompt".to_string(),
        serde_json::Value::String("hello".to_string()),
    );
    let request = ToolCallRequest {
        params: ToolCallParams::new("gemini_generate").with_arguments(arguments),
    };

    bed.gateway.call_tool(request).await.unwrap();

    let seen = caller.seen_arguments.lock().unwrap();
    let forwarded = seen[0].as_ref().expect("arguments forwarded");
    assert!(!forwarded.contains_key(ARGS_TOKEN_FIELD));
    assert!(forwarded.contains_key("prompt"));
}

#[tokio::test(start_paused = true)]
async fn transient_failures_retry_with_backoff() {
    let caller = Arc::new(ScriptedCaller::failing_then_ok(
        "gemini_generate",
        2,
        CallerError::Upstream {
            status: 500,
            message: "internal error".to_string(),
        },
    ));
    let bed = set_up(caller.clone()).await;

    let started = tokio::time::Instant::now();
    let response = bed.gateway.call_tool(gemini_call(&bed.token)).await.unwrap();
    assert_eq!(response.content.len(), 1);
    assert_eq!(caller.attempts(), 3);
    // 1000 ms after the first failure, 2000 ms after the second.
    assert_eq!(started.elapsed(), Duration::from_millis(3000));
}

#[tokio::test(start_paused = true)]
async fn auth_failures_do_not_retry() {
    let caller = Arc::new(ScriptedCaller::failing_then_ok(
        "gemini_generate",
        10,
        CallerError::Upstream {
            status: 401,
            message: "401 Unauthorized".to_string(),
        },
    ));
    let bed = set_up(caller.clone()).await;

    let started = tokio::time::Instant::now();
    let err = bed.gateway.call_tool(gemini_call(&bed.token)).await.unwrap_err();
    assert!(matches!(err, PincerError::Upstream { status: 401, .. }));
    assert_eq!(caller.attempts(), 1);
    assert_eq!(started.elapsed(), Duration::ZERO);

    let entries = bed.audit_entries();
    assert_eq!(entries[0].status, AuditStatus::Error);
}

#[tokio::test]
async fn empty_arguments_and_missing_meta_are_accepted() {
    let caller = Arc::new(ScriptedCaller::succeeding("echo"));
    let bed = set_up(caller.clone()).await;

    // Authorize and provision the no-argument tool; its secret name maps to
    // itself.
    bed.store.set_mapping("bot", "echo", "default").unwrap();
    bed.store
        .set_secret("echo", "default", "echo-secret")
        .await
        .unwrap();

    // Empty arguments map.
    let request = ToolCallRequest {
        params: ToolCallParams::new("echo")
            .with_arguments(serde_json::Map::new())
            .with_meta(meta_with_token(&bed.token)),
    };
    bed.gateway.call_tool(request).await.unwrap();

    // Arguments absent entirely.
    let request = ToolCallRequest {
        params: ToolCallParams::new("echo").with_meta(meta_with_token(&bed.token)),
    };
    bed.gateway.call_tool(request).await.unwrap();

    assert_eq!(caller.attempts(), 2);
}

#[tokio::test]
async fn unknown_tool_is_rejected_after_authentication() {
    let caller = Arc::new(ScriptedCaller::succeeding("gemini_generate"));
    let bed = set_up(caller).await;

    bed.store.set_mapping("bot", "echo", "default").unwrap();
    // "echo" is in the schema registry but no caller is registered for it.
    let request = ToolCallRequest {
        params: ToolCallParams::new("echo").with_meta(meta_with_token(&bed.token)),
    };
    let err = bed.gateway.call_tool(request).await.unwrap_err();
    assert!(matches!(err, PincerError::UnknownTool(_)));
}

#[tokio::test]
async fn audit_chain_links_and_detects_tampering() {
    let caller = Arc::new(ScriptedCaller::succeeding("gemini_generate"));

    let keychain = Arc::new(MemoryKeychain::new());
    keychain.write(&generate_master_key()).await.unwrap();
    let store = Arc::new(VaultStore::open_in_memory(keychain).unwrap());
    store
        .set_secret("gemini_api_key", "default", "AIza_REAL")
        .await
        .unwrap();
    let token = store.add_agent("bot", None).unwrap();
    store
        .set_mapping("bot", "gemini_generate", "default")
        .unwrap();

    let audit_dir = tempfile::tempdir().unwrap();
    let audit_path = audit_dir.path().join("audit.jsonl");
    let audit = AuditLog::open(&audit_path).unwrap();
    let mut callers = CallerRegistry::new();
    callers.register(caller);
    let gateway = Gateway::new(store, ToolRegistry::new(builtin_tools()), callers, audit);

    gateway.call_tool(gemini_call(&token)).await.unwrap();
    gateway.call_tool(gemini_call(&token)).await.unwrap();

    let reopened = AuditLog::open(&audit_path).unwrap();
    let entries = reopened.read_entries().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].prev_hash, entries[0].chain_hash);
    assert_eq!(reopened.verify().unwrap(), None);

    // Flip one character of the first entry's agent id in place.
    let content = std::fs::read_to_string(&audit_path).unwrap();
    let mutated = content.replacen("\"agentId\":\"bot\"", "\"agentId\":\"bit\"", 1);
    assert_ne!(content, mutated);
    std::fs::write(&audit_path, mutated).unwrap();

    let tampered = AuditLog::open(&audit_path).unwrap();
    assert_eq!(tampered.verify().unwrap(), Some(0));
}
