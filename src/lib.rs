//! MCP client over the SSE transport.
//!
//! One long-lived event stream carries the session handshake and every
//! JSON-RPC 2.0 reply; requests go out over HTTP POST. The
//! [`reader::StreamReader`] owns the stream and the
//! [`correlator::CallCorrelator`] matches each reply to its caller by id,
//! with per-call deadlines and cancellation.

pub mod client;
pub mod config;
pub mod correlator;
pub mod error;
pub mod pending;
pub mod protocol;
pub mod reader;
pub mod session;
pub mod transport;

pub mod schema;

/// MCP protocol revision announced in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";
