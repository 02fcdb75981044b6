//! Gemini generateContent adapter.

use async_trait::async_trait;

use crate::callers::{CallerError, ToolCaller};
use crate::gateway::injector::EnrichedRequest;
use crate::protocol::ToolResponse;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Calls the Gemini REST API. Request shaping only; the API key arrives on
/// the enriched request.
pub struct GeminiCaller {
    client: reqwest::Client,
    base_url: String,
}

impl GeminiCaller {
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

impl Default for GeminiCaller {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolCaller for GeminiCaller {
    fn name(&self) -> &str {
        "gemini_generate"
    }

    async fn execute(&self, request: &EnrichedRequest) -> Result<ToolResponse, CallerError> {
        let arguments = request.params.arguments.as_ref();
        let prompt = arguments
            .and_then(|a| a.get("prompt"))
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let model = arguments
            .and_then(|a| a.get("model"))
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_MODEL);

        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &request.credentials.api_key)
            .json(&body)
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

        let payload: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CallerError::Transport(format!("invalid response body: {e}")))?;

        let text = payload["candidates"][0]["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        Ok(ToolResponse::text(text))
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}
