use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::io::AsyncBufRead;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::correlator::CallCorrelator;
use crate::error::{CallError, ClientError};
use crate::protocol::{InitializeParams, ToolCallParams, ToolDescriptor, ToolResult};
use crate::transport::{HttpTransport, Outbound};

/// MCP client session: one event stream, any number of concurrent calls.
pub struct McpClient {
    correlator: CallCorrelator,
    reader: JoinHandle<()>,
    config: ClientConfig,
    tools: Mutex<Vec<ToolDescriptor>>,
}

impl McpClient {
    /// Open the event stream at `config.base_url` and wait for the handshake.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let transport = HttpTransport::new(config.base_url.clone(), config.call_timeout)?;
        info!(base_url = transport.base_url(), "connecting to event stream");
        let source = transport.open_stream().await?;
        Self::with_transport(Arc::new(transport), source, config).await
    }

    /// Build a client over an already-open event source and outbound path.
    pub async fn with_transport<R>(
        outbound: Arc<dyn Outbound>,
        source: R,
        config: ClientConfig,
    ) -> Result<Self, ClientError>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let correlator = CallCorrelator::new(outbound, config.call_timeout);
        let reader = correlator.stream_reader().start(source);

        match correlator.session().wait_ready(config.handshake_timeout).await {
            Ok(session_id) => info!(%session_id, "event stream ready"),
            Err(CallError::SessionNotReady) => {
                reader.abort();
                return Err(ClientError::HandshakeTimeout(config.handshake_timeout));
            }
            Err(_) => return Err(ClientError::StreamClosed),
        }

        Ok(Self {
            correlator,
            reader,
            config,
            tools: Mutex::new(Vec::new()),
        })
    }

    pub fn correlator(&self) -> &CallCorrelator {
        &self.correlator
    }

    pub fn session_id(&self) -> Option<String> {
        self.correlator.session().session_id()
    }

    /// MCP `initialize` followed by the `notifications/initialized` notification.
    pub async fn initialize(&self) -> Result<Value, ClientError> {
        let params = InitializeParams::new(&self.config.client_name, env!("CARGO_PKG_VERSION"));
        let result = self
            .correlator
            .call("initialize", serde_json::to_value(params)?, self.config.call_timeout)
            .await?;
        self.correlator
            .notify("notifications/initialized", serde_json::json!({}))
            .await?;
        debug!(server = %result, "session initialized");
        Ok(result)
    }

    /// Fetch the tool catalog and remember it for argument checks.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ClientError> {
        let tools = self.correlator.discover_methods().await?;
        *self.tools.lock().unwrap_or_else(PoisonError::into_inner) = tools.clone();
        Ok(tools)
    }

    /// Invoke a tool through `tools/call`.
    ///
    /// If the tool is known from a previous [`list_tools`](Self::list_tools),
    /// `arguments` are checked against its input schema before sending.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult, ClientError> {
        self.check_arguments(name, &arguments)?;

        let params = ToolCallParams {
            name: name.to_string(),
            arguments,
        };
        let result = self
            .correlator
            .call("tools/call", serde_json::to_value(params)?, self.config.call_timeout)
            .await?;

        serde_json::from_value(result)
            .map_err(|e| CallError::InvalidResult(format!("tools/call: {e}")).into())
    }

    fn check_arguments(&self, name: &str, arguments: &Value) -> Result<(), ClientError> {
        let tools = self.tools.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tool) = tools.iter().find(|t| t.name == name) else {
            return Ok(());
        };
        tool.check_arguments(arguments)
            .map_err(|e| ClientError::InvalidArguments {
                tool: name.to_string(),
                reason: e.to_string(),
            })
    }

    /// Stop the reader; pending calls fail with `StreamClosed`.
    pub async fn shutdown(mut self) {
        self.reader.abort();
        let _ = (&mut self.reader).await;
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
