pub mod event;
pub mod request;
pub mod response;

pub use event::{InboundEvent, SseDecoder, SseEvent};
pub use request::{ClientInfo, InitializeParams, JsonRpcRequest, RpcId, ToolCallParams};
pub use response::{
    JsonRpcError, JsonRpcResponse, ListToolsResult, ToolDescriptor, ToolResult, ToolResultContent,
};
