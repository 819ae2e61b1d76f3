//! Owns every live tool provider connection and routes tool calls by name.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, info, warn};

use crate::error::{BotError, Result};
use crate::openrouter::Tool;

use super::connection::{ToolConnection, ToolConnector};
use super::registry::ToolProviderSpec;

pub struct ToolConnectionManager {
    connections: Vec<Arc<dyn ToolConnection>>,
    /// Tool name -> index into `connections`.
    routes: HashMap<String, usize>,
    closed: AtomicBool,
}

impl ToolConnectionManager {
    /// Connects every spec in order. The first failure aborts the whole
    /// connect phase after closing the connections already opened.
    pub async fn connect(specs: &[ToolProviderSpec], connector: &dyn ToolConnector) -> Result<Self> {
        info!("Connecting to {} tool providers", specs.len());
        let mut connections: Vec<Arc<dyn ToolConnection>> = Vec::with_capacity(specs.len());

        for spec in specs {
            match connector.connect(spec).await {
                Ok(connection) => connections.push(connection),
                Err(e) => {
                    error!("Tool provider '{}' failed to connect: {e}", spec.name);
                    close_all(&connections).await;
                    return Err(e);
                }
            }
        }

        let manager = Self::from_connections(connections);
        info!(
            "Connected to {} tool providers exposing {} tools",
            manager.connections.len(),
            manager.routes.len()
        );
        Ok(manager)
    }

    /// Builds the routing table; the first provider to advertise a tool name owns it.
    pub fn from_connections(connections: Vec<Arc<dyn ToolConnection>>) -> Self {
        let mut routes = HashMap::new();
        for (index, connection) in connections.iter().enumerate() {
            for tool in connection.tools() {
                if let Some(&owner) = routes.get(&tool.name) {
                    let owner: &Arc<dyn ToolConnection> = &connections[owner];
                    warn!(
                        "Tool '{}' from '{}' shadowed by '{}'",
                        tool.name,
                        connection.provider(),
                        owner.provider()
                    );
                    continue;
                }
                routes.insert(tool.name.clone(), index);
            }
        }

        Self {
            connections,
            routes,
            closed: AtomicBool::new(false),
        }
    }

    pub fn provider_count(&self) -> usize {
        self.connections.len()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Function definitions for every routable tool, sorted by name.
    pub fn definitions(&self) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self
            .connections
            .iter()
            .enumerate()
            .flat_map(|(index, connection)| {
                connection
                    .tools()
                    .iter()
                    .filter(move |tool| self.routes.get(&tool.name) == Some(&index))
            })
            .map(|tool| {
                Tool::function(
                    tool.name.clone(),
                    tool.description.clone().unwrap_or_default(),
                    tool.input_schema.clone(),
                )
            })
            .collect();
        tools.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        tools
    }

    /// Invokes `tool_name` on the provider exposing it and returns its text output.
    pub async fn invoke(&self, tool_name: &str, arguments: serde_json::Value) -> Result<String> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BotError::ToolUnavailable(tool_name.to_string()));
        }
        let connection = self
            .routes
            .get(tool_name)
            .map(|&index| &self.connections[index])
            .ok_or_else(|| BotError::ToolUnavailable(tool_name.to_string()))?;

        debug!(
            "Routing tool '{tool_name}' to provider '{}'",
            connection.provider()
        );
        let result = connection.call_tool(tool_name, arguments).await?;

        if result.is_error {
            return Err(BotError::ToolInvocation {
                tool: tool_name.to_string(),
                message: result.text(),
            });
        }
        Ok(result.text())
    }

    /// Closes every connection. Failures are logged and do not stop the rest.
    pub async fn cleanup(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Tool connections already cleaned up");
            return;
        }
        info!("Closing {} tool provider connections", self.connections.len());
        close_all(&self.connections).await;
    }
}

async fn close_all(connections: &[Arc<dyn ToolConnection>]) {
    for connection in connections {
        if let Err(e) = connection.close().await {
            warn!(
                "Failed to close tool provider '{}': {e}",
                connection.provider()
            );
        }
    }
}
