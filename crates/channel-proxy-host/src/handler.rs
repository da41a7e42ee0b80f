//! JSON-RPC request handlers for the HTTP bridge.
//!
//! A bridged method is addressed as `<channel>.<command>`, for example
//! `windows.isFocused`. Positional `params` are passed to the command as-is;
//! an optional `context` is sent ahead of them in a context envelope, exactly
//! as a proxy configured with that context would.

use crate::server::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use channel_proxy::config::IpcConfig;
use channel_proxy::{ChannelError, ContextEnvelope, ServerChannel, Value};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
    /// Implicit context for the call.
    #[serde(default)]
    pub context: Option<serde_json::Value>,
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 error structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<serde_json::Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }
}

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Main JSON-RPC handler.
pub async fn handle_rpc(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    let method = request.method.as_str();
    let id = request.id.clone();

    debug!("RPC call: {}({:?})", method, request.params);

    if request.jsonrpc != IpcConfig::JSONRPC_VERSION {
        return (
            StatusCode::OK,
            Json(JsonRpcResponse::error(
                id,
                -32600,
                "Invalid Request: expected jsonrpc 2.0".to_string(),
            )),
        );
    }

    // Handle built-in methods
    if method == "health_check" {
        return (
            StatusCode::OK,
            Json(JsonRpcResponse::success(id, json!({"status": "ok"}))),
        );
    }

    if method == "list_channels" {
        let mut names: Vec<&str> = state.channels.keys().map(String::as_str).collect();
        names.sort_unstable();
        return (
            StatusCode::OK,
            Json(JsonRpcResponse::success(id, json!(names))),
        );
    }

    let result = dispatch_method(&state, method, request.params, request.context).await;

    match result {
        Ok(value) => (
            StatusCode::OK,
            Json(JsonRpcResponse::success(id, serde_json::Value::from(value))),
        ),
        Err(e) => {
            error!("RPC error for {}: {}", method, e);
            let code = e.to_rpc_error_code();
            (
                StatusCode::OK,
                Json(JsonRpcResponse::error(id, code, e.to_string())),
            )
        }
    }
}

/// Route `<channel>.<command>` to the named server channel.
async fn dispatch_method(
    state: &AppState,
    method: &str,
    params: Option<serde_json::Value>,
    context: Option<serde_json::Value>,
) -> channel_proxy::Result<Value> {
    let (channel_name, command) = split_method(method)?;
    let channel = state
        .channels
        .get(channel_name)
        .ok_or_else(|| ChannelError::MethodNotFound {
            command: method.to_string(),
        })?;

    let mut args = positional_params(params)?;
    if let Some(context) = context {
        args.insert(0, ContextEnvelope::new(Value::from(context)).to_value());
    }

    channel.call(command, args).await
}

/// Split a bridged method name into channel and command.
fn split_method(method: &str) -> channel_proxy::Result<(&str, &str)> {
    match method.split_once('.') {
        Some((channel, command)) if !channel.is_empty() && !command.is_empty() => {
            Ok((channel, command))
        }
        _ => Err(ChannelError::MethodNotFound {
            command: method.to_string(),
        }),
    }
}

fn positional_params(params: Option<serde_json::Value>) -> channel_proxy::Result<Vec<Value>> {
    match params {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(serde_json::Value::Array(items)) => Ok(items.into_iter().map(Value::from).collect()),
        Some(_) => Err(ChannelError::InvalidParams {
            message: "params must be an array".to_string(),
        }),
    }
}
