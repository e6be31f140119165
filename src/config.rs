use std::time::Duration;

/// Default MCP server base URL.
const DEFAULT_SERVER_URL: &str = "http://localhost:3000";

/// Default deadline for a single correlated call (20 seconds).
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 20;

/// Default wait for the session handshake after opening the stream (10 seconds).
const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

const DEFAULT_CLIENT_NAME: &str = "mcp-sse-client";

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub call_timeout: Duration,
    pub handshake_timeout: Duration,
    pub client_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SERVER_URL.to_string(),
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            client_name: DEFAULT_CLIENT_NAME.to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment.
    ///
    /// - `MCP_SERVER_URL` (optional, default `http://localhost:3000`)
    /// - `MCP_CALL_TIMEOUT_SECS` (optional, default 20) — max seconds per call
    /// - `MCP_HANDSHAKE_TIMEOUT_SECS` (optional, default 10) — max seconds to wait for a session id
    /// - `MCP_CLIENT_NAME` (optional) — name announced in `initialize`
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();

        let base_url = std::env::var("MCP_SERVER_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.base_url);
        if base_url.is_empty() {
            return Err("MCP_SERVER_URL must not be empty".to_string());
        }

        let call_timeout = secs_from_env("MCP_CALL_TIMEOUT_SECS", defaults.call_timeout)?;
        let handshake_timeout =
            secs_from_env("MCP_HANDSHAKE_TIMEOUT_SECS", defaults.handshake_timeout)?;

        let client_name = std::env::var("MCP_CLIENT_NAME").unwrap_or(defaults.client_name);

        Ok(Self {
            base_url,
            call_timeout,
            handshake_timeout,
            client_name,
        })
    }
}

fn secs_from_env(key: &str, default: Duration) -> Result<Duration, String> {
    match std::env::var(key) {
        Ok(val) => match val.parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
            _ => Err(format!("{key} must be a positive integer")),
        },
        Err(_) => Ok(default),
    }
}
