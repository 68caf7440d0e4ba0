use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use rmcp::model::CallToolRequestParam;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::client::McpClient;
use crate::agentic::ToolCallDirective;
use crate::agentic::dispatch::ToolRegistry;
use crate::agentic::prompt::ToolInfo;
use crate::config::McpServerConfig;

/// Directive keys that address the call rather than carry arguments.
const ROUTING_KEYS: [&str; 4] = ["agentType", "service_name", "tool_name", "args"];

pub struct McpRegistry {
    servers: Vec<McpServerConfig>,
    clients: Mutex<HashMap<String, Arc<McpClient>>>,
}

impl McpRegistry {
    pub fn new(servers: Vec<McpServerConfig>) -> Self {
        let servers = servers.into_iter().filter(|s| s.enabled).collect();
        Self {
            servers,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn service_names(&self) -> Vec<String> {
        self.servers.iter().map(|s| s.name.clone()).collect()
    }

    /// Catalog entries for every enabled server, described by the server's
    /// own instructions when it is already connected.
    pub async fn catalog(&self) -> Vec<ToolInfo> {
        let clients = self.clients.lock().await;
        self.servers
            .iter()
            .map(|s| {
                let description = clients
                    .get(&s.name)
                    .and_then(|c| c.instructions())
                    .unwrap_or_else(|| format!("{} service", s.name));
                ToolInfo::new(s.name.clone(), description)
            })
            .collect()
    }

    /// The connected client for `service`, connecting on first use.
    async fn client(&self, service: &str) -> Result<Arc<McpClient>> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(service) {
            return Ok(client.clone());
        }
        let config = self
            .servers
            .iter()
            .find(|s| s.name == service)
            .ok_or_else(|| anyhow!("unknown MCP service: {service}"))?;
        debug!(service, "connecting MCP server on first use");
        let client = Arc::new(
            McpClient::from_config(config)
                .await
                .with_context(|| format!("connect MCP service {service}"))?,
        );
        clients.insert(service.to_string(), client.clone());
        Ok(client)
    }
}

/// `args` when the directive has an object there, else every non-routing
/// field of the directive.
pub fn call_arguments(directive: &ToolCallDirective) -> Option<Map<String, Value>> {
    if let Some(Value::Object(args)) = directive.0.get("args") {
        return Some(args.clone());
    }
    let rest: Map<String, Value> = directive
        .0
        .iter()
        .filter(|(k, _)| !ROUTING_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    (!rest.is_empty()).then_some(rest)
}

#[async_trait]
impl ToolRegistry for McpRegistry {
    async fn call(&self, service_name: &str, directive: &ToolCallDirective) -> Result<String> {
        if service_name.is_empty() {
            bail!("mcp directive has no service_name");
        }
        let tool = directive
            .get_str("tool_name")
            .ok_or_else(|| anyhow!("mcp directive has no tool_name"))?;
        let client = self.client(service_name).await?;

        let params = CallToolRequestParam {
            name: tool.to_string().into(),
            arguments: call_arguments(directive),
        };
        let result = client.call_tool(params).await.map_err(|e| {
            warn!(service = %service_name, tool, error = %e, "MCP tool call failed");
            anyhow!("{service_name}.{tool} failed: {e}")
        })?;

        let encoded = serde_json::to_string(&result)?;
        if result.is_error == Some(true) {
            bail!("{service_name}.{tool} returned an error: {encoded}");
        }
        Ok(encoded)
    }
}
