use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::CallError;
use crate::pending::{CallOutcome, PendingRegistry, Registration};
use crate::protocol::{JsonRpcRequest, ListToolsResult, RpcId, ToolDescriptor};
use crate::reader::StreamReader;
use crate::session::Session;
use crate::transport::{Delivery, Outbound};

/// Method used by [`CallCorrelator::discover_methods`].
pub const LIST_TOOLS_METHOD: &str = "tools/list";

/// Turns "invoke a remote method" into a correlated exchange over the
/// shared event stream.
///
/// Cloning is cheap; clones share the same session and pending registry.
#[derive(Clone)]
pub struct CallCorrelator {
    session: Arc<Session>,
    pending: Arc<PendingRegistry>,
    outbound: Arc<dyn Outbound>,
    default_timeout: Duration,
}

enum Wake {
    Slot(Result<CallOutcome, oneshot::error::RecvError>),
    Deadline,
    Cancelled,
}

impl CallCorrelator {
    /// Create a correlator with a fresh session in the `Connecting` state.
    pub fn new(outbound: Arc<dyn Outbound>, default_timeout: Duration) -> Self {
        Self {
            session: Arc::new(Session::new()),
            pending: Arc::new(PendingRegistry::new()),
            outbound,
            default_timeout,
        }
    }

    /// Reader bound to this correlator's session. Only one may be started.
    pub fn stream_reader(&self) -> StreamReader {
        StreamReader::new(Arc::clone(&self.session), Arc::clone(&self.pending))
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn pending(&self) -> &Arc<PendingRegistry> {
        &self.pending
    }

    /// Call `method` and wait up to `timeout` for its correlated reply.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, CallError> {
        self.call_inner(method, params, timeout, None).await
    }

    /// Like [`call`](Self::call), failing with `Cancelled` once `cancel` fires.
    pub async fn call_cancellable(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value, CallError> {
        self.call_inner(method, params, timeout, Some(cancel)).await
    }

    /// Send a notification. No id is assigned and no reply is awaited.
    pub async fn notify(&self, method: &str, params: Value) -> Result<(), CallError> {
        let session_id = self.session.ready_id()?;
        let message = JsonRpcRequest::notification(method, params);
        self.outbound.send(&session_id, &message).await?;
        Ok(())
    }

    /// List the server's tools through an ordinary `tools/list` call.
    pub async fn discover_methods(&self) -> Result<Vec<ToolDescriptor>, CallError> {
        let result = self
            .call(LIST_TOOLS_METHOD, serde_json::json!({}), self.default_timeout)
            .await?;
        let list: ListToolsResult = serde_json::from_value(result)
            .map_err(|e| CallError::InvalidResult(format!("{LIST_TOOLS_METHOD}: {e}")))?;
        Ok(list.tools)
    }

    async fn call_inner(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<Value, CallError> {
        let session_id = self.session.ready_id()?;
        let Registration {
            id,
            deadline,
            mut slot,
        } = self.pending.register(method, timeout)?;
        let _guard = RemoveOnDrop {
            pending: Arc::clone(&self.pending),
            id: id.clone(),
        };

        let request = JsonRpcRequest::call(id.clone(), method, params);
        match self.outbound.send(&session_id, &request).await {
            Ok(Delivery::Accepted) => {}
            // A POST response only ever answers its own request.
            Ok(Delivery::Inline(reply)) if reply.id == id => {
                self.pending
                    .resolve(&id, reply.into_outcome().map_err(CallError::from));
            }
            Ok(Delivery::Inline(reply)) => {
                warn!(
                    %id,
                    reply_id = %reply.id,
                    method,
                    "discarding inline reply for a different id; awaiting stream reply"
                );
            }
            Err(err) => {
                warn!(%id, method, error = %err, "failed to send request");
                self.pending.resolve(&id, Err(err));
            }
        }

        let cancelled = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        let wake = tokio::select! {
            biased;
            res = &mut slot => Wake::Slot(res),
            _ = tokio::time::sleep_until(deadline) => Wake::Deadline,
            _ = cancelled => Wake::Cancelled,
        };

        match wake {
            Wake::Slot(res) => res.unwrap_or(Err(CallError::StreamClosed)),
            Wake::Deadline => {
                let err = CallError::Timeout {
                    id: id.clone(),
                    after: timeout,
                };
                self.abandon(&id, method, slot, err).await
            }
            Wake::Cancelled => self.abandon(&id, method, slot, CallError::Cancelled).await,
        }
    }

    /// Give up on `id` with `err`, unless a reply already claimed it.
    async fn abandon(
        &self,
        id: &RpcId,
        method: &str,
        slot: oneshot::Receiver<CallOutcome>,
        err: CallError,
    ) -> Result<Value, CallError> {
        if self.pending.remove(id) {
            debug!(%id, method, error = %err, "pending call abandoned");
            return Err(err);
        }
        // Lost the race: the reader removed the entry and is handing over its outcome.
        slot.await.unwrap_or(Err(CallError::StreamClosed))
    }
}

struct RemoveOnDrop {
    pending: Arc<PendingRegistry>,
    id: RpcId,
}

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        if self.pending.remove(&self.id) {
            debug!(id = %self.id, "call dropped before completion; pending entry removed");
        }
    }
}
