use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::StatusCode;
use tokio::io::AsyncBufRead;
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::error::{CallError, ClientError};
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};

/// Inbound half of a session: a byte stream of SSE lines.
pub type EventSource = Box<dyn AsyncBufRead + Unpin + Send>;

/// How the server acknowledged an outbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Accepted; any reply will arrive on the event stream.
    Accepted,
    /// The server answered in the POST response body instead.
    Inline(JsonRpcResponse),
}

/// Outbound path for framed requests, tagged with the session id.
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn send(&self, session_id: &str, message: &JsonRpcRequest)
        -> Result<Delivery, CallError>;
}

/// MCP SSE transport over HTTP: `GET /sse` for events, `POST /messages/` for requests.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Open the long-lived event stream. No timeout applies to it.
    pub async fn open_stream(&self) -> Result<EventSource, ClientError> {
        let resp = self
            .http
            .get(format!("{}/sse", self.base_url))
            .header("accept", "text/event-stream")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::StreamStatus(status));
        }
        debug!(%status, "event stream opened");

        let body = Box::pin(resp.bytes_stream().map_err(io::Error::other));
        Ok(Box::new(StreamReader::new(body)))
    }
}

#[async_trait]
impl Outbound for HttpTransport {
    async fn send(
        &self,
        session_id: &str,
        message: &JsonRpcRequest,
    ) -> Result<Delivery, CallError> {
        let resp = self
            .http
            .post(format!("{}/messages/", self.base_url))
            .query(&[("session_id", session_id)])
            .header("content-type", "application/json")
            .timeout(self.request_timeout)
            .json(message)
            .send()
            .await
            .map_err(|e| CallError::Transport(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::ACCEPTED {
            return Ok(Delivery::Accepted);
        }
        if !status.is_success() {
            return Err(rejected(status, resp.text().await));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| CallError::Transport(e.to_string()))?;
        if body.trim().is_empty() {
            return Ok(Delivery::Accepted);
        }

        match serde_json::from_str::<JsonRpcResponse>(&body) {
            Ok(reply) => Ok(Delivery::Inline(reply)),
            Err(e) => {
                debug!(error = %e, "post body is not a json-rpc response; awaiting stream reply");
                Ok(Delivery::Accepted)
            }
        }
    }
}

/// Transport error for a non-success POST status, keeping body read failures.
fn rejected<E: std::fmt::Display>(status: StatusCode, body: Result<String, E>) -> CallError {
    CallError::Transport(match body {
        Ok(body) => format!("status {status}: {}", body.trim()),
        Err(e) => format!("status {status} (body unreadable: {e})"),
    })
}
