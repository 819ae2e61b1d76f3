//! External MCP tool providers exposed to the OpenRouter tool calling API

mod connection;
mod manager;
mod protocol;
mod registry;

pub use connection::{StdioConnector, StdioToolConnection, ToolConnection, ToolConnector};
pub use manager::ToolConnectionManager;
pub use protocol::{CallToolResult, ToolDescriptor};
pub use registry::{ToolProviderRegistry, ToolProviderSpec};
