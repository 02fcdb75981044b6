//! Stdio server: JSON-RPC 2.0 framing over stdin/stdout.
//!
//! The framing is deliberately thin — one JSON object per line, methods
//! `tools/list` and `tools/call` — and everything interesting happens inside
//! [`Gateway`]. Errors coming out of the pipeline become JSON-RPC errors;
//! they never carry secret material because the pipeline never puts any into
//! its error messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::PincerError;
use crate::gateway::Gateway;
use crate::protocol::ToolCallParams;

const PARSE_ERROR: i32 = -32700;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;
const INTERNAL_ERROR: i32 = -32603;

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

impl JsonRpcResponse {
    fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError { code, message }),
        }
    }
}

/// Serve the gateway over stdio until EOF or shutdown signal.
pub async fn run(gateway: Gateway) -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut reader = BufReader::new(stdin);
    let mut line = String::new();

    loop {
        line.clear();
        tokio::select! {
            read = reader.read_line(&mut line) => {
                if read? == 0 {
                    tracing::info!("stdin closed, shutting down");
                    break;
                }

                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let response = handle_message(&gateway, trimmed).await;
                let serialized = serde_json::to_string(&response)?;
                stdout.write_all(serialized.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }

    // In-flight guards have already scrubbed by the time call_tool returns;
    // closing zeroes the cached master key.
    gateway.close().await;
    Ok(())
}

async fn handle_message(gateway: &Gateway, message: &str) -> JsonRpcResponse {
    let request: JsonRpcRequest = match serde_json::from_str(message) {
        Ok(req) => req,
        Err(e) => {
            return JsonRpcResponse::error(None, PARSE_ERROR, format!("parse error: {e}"));
        }
    };
    let id = request.id.clone();

    match request.method.as_str() {
        "tools/list" => {
            let tools = gateway.list_tools();
            JsonRpcResponse::success(id, serde_json::json!({ "tools": tools }))
        }
        "tools/call" => {
            let params: ToolCallParams = match request
                .params
                .map(serde_json::from_value)
                .transpose()
            {
                Ok(Some(params)) => params,
                Ok(None) => {
                    return JsonRpcResponse::error(
                        id,
                        INVALID_PARAMS,
                        "missing params".to_string(),
                    );
                }
                Err(e) => {
                    return JsonRpcResponse::error(
                        id,
                        INVALID_PARAMS,
                        format!("invalid params: {e}"),
                    );
                }
            };

            let request = crate::protocol::ToolCallRequest { params };
            match gateway.call_tool(request).await {
                Ok(response) => match serde_json::to_value(&response) {
                    Ok(value) => JsonRpcResponse::success(id, value),
                    Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, e.to_string()),
                },
                Err(e) => JsonRpcResponse::error(id, error_code(&e), e.to_string()),
            }
        }
        other => JsonRpcResponse::error(
            id,
            METHOD_NOT_FOUND,
            format!("unknown method: {other}"),
        ),
    }
}

fn error_code(error: &PincerError) -> i32 {
    match error {
        PincerError::MissingToken
        | PincerError::BadTokenFormat
        | PincerError::UnknownToken
        | PincerError::Forbidden { .. } => -32001,
        PincerError::ValidationFailure(_) => INVALID_PARAMS,
        PincerError::UnknownTool(_) => METHOD_NOT_FOUND,
        _ => INTERNAL_ERROR,
    }
}
