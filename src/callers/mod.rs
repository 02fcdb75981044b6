//! Outbound callers: the uniform contract and the retry base.
//!
//! A caller turns one enriched request into one upstream call. Adapters do
//! request shaping only — credentials arrive already injected and the
//! adapters never store or log them.
//!
//! Retry policy lives in [`execute_with_retry`], not in adapters: up to
//! `max_retries` attempts with exponential backoff, except that auth errors
//! short-circuit immediately (retrying a rejected credential is useless and
//! noisy). Classification prefers the structured HTTP status; the substring
//! match over error text is a fallback policy for adapters that only surface
//! text.

mod gemini;
mod gpg;
mod slack;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use gemini::GeminiCaller;
pub use gpg::GpgCaller;
pub use slack::SlackCaller;

use crate::error::PincerError;
use crate::gateway::injector::EnrichedRequest;
use crate::protocol::ToolResponse;

/// Default number of attempts per call.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay between attempts; attempt `n` waits `base · 2^n`.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Error from one caller attempt.
#[derive(Debug, Clone, Error)]
pub enum CallerError {
    /// The upstream API responded with a non-success status.
    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    /// The request never got a response (connect, DNS, timeout).
    #[error("transport error: {0}")]
    Transport(String),

    /// A local operation (e.g. signing) failed.
    #[error("execution error: {0}")]
    Execution(String),
}

impl CallerError {
    /// Whether this is an authentication/authorization rejection. Structured
    /// status first; substring match on the text as fallback.
    pub fn is_auth_error(&self) -> bool {
        if let CallerError::Upstream { status: 401 | 403, .. } = self {
            return true;
        }
        let text = self.to_string().to_lowercase();
        ["unauthorized", "forbidden", "401", "403"]
            .iter()
            .any(|needle| text.contains(needle))
    }
}

/// One outbound adapter.
#[async_trait]
pub trait ToolCaller: Send + Sync {
    /// Tool name this caller serves.
    fn name(&self) -> &str;

    /// Attempts allowed per call.
    fn max_retries(&self) -> u32 {
        DEFAULT_MAX_RETRIES
    }

    /// Base backoff delay.
    fn retry_delay(&self) -> Duration {
        DEFAULT_RETRY_DELAY
    }

    /// Perform the upstream call once.
    async fn execute(&self, request: &EnrichedRequest) -> Result<ToolResponse, CallerError>;
}

/// Execute a caller under the retry policy.
pub async fn execute_with_retry(
    caller: &dyn ToolCaller,
    request: &EnrichedRequest,
) -> Result<ToolResponse, PincerError> {
    let max_retries = caller.max_retries().max(1);
    let base_delay = caller.retry_delay();
    let mut last_error: Option<CallerError> = None;

    for attempt in 0..max_retries {
        match caller.execute(request).await {
            Ok(response) => return Ok(response),
            Err(e) if e.is_auth_error() => {
                tracing::warn!(tool = caller.name(), error = %e, "auth error, not retrying");
                return Err(match e {
                    CallerError::Upstream { status, message } => {
                        PincerError::Upstream { status, message }
                    }
                    other => PincerError::RetryExhausted {
                        attempts: attempt + 1,
                        last: other.to_string(),
                    },
                });
            }
            Err(e) => {
                tracing::warn!(
                    tool = caller.name(),
                    attempt = attempt + 1,
                    error = %e,
                    "caller attempt failed"
                );
                last_error = Some(e);
                if attempt + 1 < max_retries {
                    tokio::time::sleep(base_delay * 2u32.pow(attempt)).await;
                }
            }
        }
    }

    Err(PincerError::RetryExhausted {
        attempts: max_retries,
        last: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string()),
    })
}

/// Callers keyed by tool name.
pub struct CallerRegistry {
    callers: HashMap<String, Arc<dyn ToolCaller>>,
}

impl CallerRegistry {
    pub fn new() -> Self {
        Self {
            callers: HashMap::new(),
        }
    }

    /// Registry over the built-in provider adapters.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(GeminiCaller::new()));
        registry.register(Arc::new(SlackCaller::new()));
        registry.register(Arc::new(GpgCaller::new()));
        registry
    }

    /// Register a caller under its own name, replacing any previous one.
    pub fn register(&mut self, caller: Arc<dyn ToolCaller>) {
        self.callers.insert(caller.name().to_string(), caller);
    }

    /// Look up the caller for a tool.
    pub fn get(&self, tool_name: &str) -> Option<Arc<dyn ToolCaller>> {
        self.callers.get(tool_name).cloned()
    }
}

impl Default for CallerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
