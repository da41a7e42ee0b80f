//! Shared IPC protocol types and framing.
//!
//! Defines the wire format for local IPC: 4-byte big-endian length prefix
//! followed by a UTF-8 JSON payload.
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```
//!
//! One connection carries any number of calls and subscriptions at once. A
//! `call` request is answered by exactly one response frame with the same id.
//! A `listen` request is answered by one acknowledgement response; after it,
//! [`IpcEvent`] frames tagged with the listen request's id flow until the
//! client sends `unlisten` with that id, the server marks the last one
//! `done`, or either side closes the connection.
//! `unlisten` gets no response.
//!
//! A response with no id and an error is about the connection itself, for
//! example a server refusing it for being at capacity.

use crate::config::IpcConfig;
use crate::value::Value;
use crate::{ChannelError, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// What a request asks the server channel to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    #[default]
    Call,
    Listen,
    Unlisten,
}

/// JSON-RPC 2.0 request for IPC. `method` is the command or event name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub kind: RequestKind,
}

impl IpcRequest {
    /// Create a new JSON-RPC 2.0 call request.
    pub fn call(method: impl Into<String>, params: Vec<Value>, id: u64) -> Self {
        Self {
            jsonrpc: IpcConfig::JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: Some(serde_json::Value::Number(id.into())),
            kind: RequestKind::Call,
        }
    }

    /// Create a subscription request for `event`.
    pub fn listen(event: impl Into<String>, id: u64) -> Self {
        Self {
            jsonrpc: IpcConfig::JSONRPC_VERSION.to_string(),
            method: event.into(),
            params: Vec::new(),
            id: Some(serde_json::Value::Number(id.into())),
            kind: RequestKind::Listen,
        }
    }

    /// End the subscription opened by the listen request `subscription_id`.
    pub fn unlisten(event: impl Into<String>, subscription_id: u64) -> Self {
        Self {
            jsonrpc: IpcConfig::JSONRPC_VERSION.to_string(),
            method: event.into(),
            params: Vec::new(),
            id: Some(serde_json::Value::Number(subscription_id.into())),
            kind: RequestKind::Unlisten,
        }
    }
}

/// JSON-RPC 2.0 response for IPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<IpcError>,
    pub id: Option<serde_json::Value>,
}

impl IpcResponse {
    /// Create a success response.
    pub fn success(id: Option<serde_json::Value>, result: Value) -> Self {
        Self {
            jsonrpc: IpcConfig::JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Create an error response.
    pub fn error(id: Option<serde_json::Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: IpcConfig::JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(IpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }

    /// Create an error response from a channel error.
    pub fn from_error(id: Option<serde_json::Value>, err: &ChannelError) -> Self {
        Self::error(id, err.to_rpc_error_code(), err.to_string())
    }

    /// The result, or the peer's error as [`ChannelError::Remote`].
    ///
    /// A `null` result deserializes as absent, so absence means `Value::Null`.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(err) => Err(ChannelError::Remote {
                code: err.code,
                message: err.message,
            }),
            None => Ok(self.result.unwrap_or_default()),
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// One event pushed for a subscription. `id` is the listen request's id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcEvent {
    pub jsonrpc: String,
    pub event: String,
    pub id: serde_json::Value,
    #[serde(default)]
    pub data: Value,
    /// Set on the last frame of a subscription whose source ended.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub done: bool,
}

impl IpcEvent {
    pub fn new(event: impl Into<String>, id: serde_json::Value, data: Value) -> Self {
        Self {
            jsonrpc: IpcConfig::JSONRPC_VERSION.to_string(),
            event: event.into(),
            id,
            data,
            done: false,
        }
    }

    /// The frame closing subscription `id`.
    pub fn done(event: impl Into<String>, id: serde_json::Value) -> Self {
        Self {
            done: true,
            ..Self::new(event, id, Value::Null)
        }
    }
}

/// Any frame a server sends to a client.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Event(IpcEvent),
    Response(IpcResponse),
}

/// Read a length-prefixed frame from an async reader.
///
/// Frame format: `[4-byte BE u32 length][payload bytes]`
///
/// Returns `None` on clean EOF (peer closed connection).
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > IpcConfig::MAX_MESSAGE_SIZE {
        return Err(ChannelError::Validation {
            field: "ipc_frame".to_string(),
            message: format!(
                "IPC message size {} exceeds maximum {}",
                len,
                IpcConfig::MAX_MESSAGE_SIZE
            ),
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame to an async writer.
///
/// Frame format: `[4-byte BE u32 length][payload bytes]`
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
