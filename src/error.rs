use std::time::Duration;

use crate::protocol::{JsonRpcError, RpcId};

/// Terminal failure of a single correlated call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CallError {
    /// No handshake has been received on the event stream yet.
    #[error("session not ready: no handshake received on the event stream")]
    SessionNotReady,
    /// The outbound request could not be delivered.
    #[error("transport error: {0}")]
    Transport(String),
    /// The server answered with a JSON-RPC error object.
    #[error("remote error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },
    #[error("call {id} timed out after {after:?}")]
    Timeout { id: RpcId, after: Duration },
    #[error("call cancelled")]
    Cancelled,
    /// The event stream ended before a reply arrived.
    #[error("event stream closed")]
    StreamClosed,
    /// The reply arrived but its `result` did not have the expected shape.
    #[error("invalid result: {0}")]
    InvalidResult(String),
}

impl CallError {
    /// Code and message of a remote error, if this is one.
    pub fn remote(&self) -> Option<(i64, &str)> {
        match self {
            Self::Remote { code, message, .. } => Some((*code, message.as_str())),
            _ => None,
        }
    }
}

impl From<JsonRpcError> for CallError {
    fn from(err: JsonRpcError) -> Self {
        Self::Remote {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

/// Failure while setting up or driving an [`McpClient`](crate::client::McpClient).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("event stream returned status {0}")]
    StreamStatus(reqwest::StatusCode),
    #[error("no session handshake within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("event stream closed before handshake")]
    StreamClosed,
    #[error(transparent)]
    Call(#[from] CallError),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid arguments for tool {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },
}
