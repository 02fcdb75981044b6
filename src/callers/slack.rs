//! Slack chat.postMessage adapter.

use async_trait::async_trait;

use crate::callers::gemini::truncate;
use crate::callers::{CallerError, ToolCaller};
use crate::gateway::injector::EnrichedRequest;
use crate::protocol::ToolResponse;

const DEFAULT_BASE_URL: &str = "https://slack.com/api";

/// Posts messages via the Slack Web API with the injected bot token.
pub struct SlackCaller {
    client: reqwest::Client,
    base_url: String,
}

impl SlackCaller {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Override the API base URL (for testing).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl Default for SlackCaller {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolCaller for SlackCaller {
    fn name(&self) -> &str {
        "slack_send_message"
    }

    async fn execute(&self, request: &EnrichedRequest) -> Result<ToolResponse, CallerError> {
        let arguments = request.params.arguments.as_ref();
        let channel = arguments
            .and_then(|a| a.get("channel"))
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let text = arguments
            .and_then(|a| a.get("text"))
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let resp = self
            .client
            .post(format!("{}/chat.postMessage", self.base_url))
            .bearer_auth(&request.credentials.api_key)
            .json(&serde_json::json!({ "channel": channel, "text": text }))
            .send()
            .await
            .map_err(|e| CallerError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(CallerError::Upstream {
                status: status.as_u16(),
                message: truncate(&message, 300),
            });
        }

        // Slack reports API-level failures inside a 200 body.
        let payload: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CallerError::Transport(format!("invalid response body: {e}")))?;

        if !payload["ok"].as_bool().unwrap_or(false) {
            let reason = payload["error"].as_str().unwrap_or("unknown_error");
            return Err(CallerError::Upstream {
                status: status.as_u16(),
                message: format!("slack error: {reason}"),
            });
        }

        let ts = payload["ts"].as_str().unwrap_or_default();
        Ok(ToolResponse::text(format!(
            "message posted to {channel} (ts {ts})"
        )))
    }
}
