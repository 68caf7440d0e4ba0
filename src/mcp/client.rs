use rmcp::model::{CallToolRequestParam, CallToolResult, ListToolsResult};
use rmcp::transport::{StreamableHttpClientTransport, TokioChildProcess};
use tokio::process::Command;
use tokio::time::{Duration, timeout};
use tracing::{debug, info, warn};

use crate::config::McpServerConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const LIST_TIMEOUT: Duration = Duration::from_secs(10);
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("unsupported transport type: {0}")]
    UnsupportedTransport(String),
    #[error("invalid command for stdio transport: {0:?}")]
    InvalidCommand(String),
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("failed to connect to {server}: {reason}")]
    Connect { server: String, reason: String },
    #[error("{0}")]
    Service(String),
}

/// A live connection to one MCP server.
pub struct McpClient {
    client: rmcp::service::RunningService<rmcp::RoleClient, ()>,
    config: McpServerConfig,
}

impl McpClient {
    /// Connect using the server's configured transport. For `stdio` the
    /// address is the command line to spawn; for `http` it is the URL.
    pub async fn from_config(config: &McpServerConfig) -> Result<Self, McpError> {
        let connect_err = |reason: String| McpError::Connect {
            server: config.name.clone(),
            reason,
        };

        let client = match config.transport.as_str() {
            "stdio" => {
                let mut parts = config.address.split_whitespace();
                let program = parts
                    .next()
                    .ok_or_else(|| McpError::InvalidCommand(config.address.clone()))?;
                let mut cmd = Command::new(program);
                cmd.args(parts);
                let transport = TokioChildProcess::new(cmd)
                    .map_err(|e| connect_err(format!("spawn {program}: {e}")))?;
                timeout(CONNECT_TIMEOUT, rmcp::service::serve_client((), transport))
                    .await
                    .map_err(|_| McpError::Timeout("MCP connection"))?
                    .map_err(|e| {
                        warn!(server = %config.name, error = %e, "MCP handshake failed");
                        connect_err(e.to_string())
                    })?
            }
            "http" => {
                let transport = StreamableHttpClientTransport::from_uri(config.address.clone());
                timeout(CONNECT_TIMEOUT, rmcp::service::serve_client((), transport))
                    .await
                    .map_err(|_| McpError::Timeout("MCP connection"))?
                    .map_err(|e| {
                        warn!(server = %config.name, error = %e, "MCP handshake failed");
                        connect_err(e.to_string())
                    })?
            }
            other => return Err(McpError::UnsupportedTransport(other.to_string())),
        };

        info!(server = %config.name, transport = %config.transport, "MCP server connected");
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Server-provided instructions, used as the catalog description.
    pub fn instructions(&self) -> Option<String> {
        self.client
            .peer_info()
            .and_then(|info| info.instructions.clone())
    }

    pub async fn list_tools(&self) -> Result<ListToolsResult, McpError> {
        timeout(LIST_TIMEOUT, self.client.list_tools(Default::default()))
            .await
            .map_err(|_| McpError::Timeout("list tools"))?
            .map_err(|e| McpError::Service(format!("list tools: {e}")))
    }

    pub async fn call_tool(&self, params: CallToolRequestParam) -> Result<CallToolResult, McpError> {
        info!(server = %self.config.name, tool_name = %params.name, "calling MCP tool");
        debug!(tool_params = ?params.arguments, "tool parameters");
        let result = timeout(CALL_TIMEOUT, self.client.call_tool(params))
            .await
            .map_err(|_| McpError::Timeout("tool call"))?
            .map_err(|e| McpError::Service(format!("call tool: {e}")))?;
        debug!(tool_result = ?result, "tool result");
        Ok(result)
    }

    pub fn config(&self) -> &McpServerConfig {
        &self.config
    }
}
