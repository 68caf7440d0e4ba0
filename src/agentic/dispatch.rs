mod gateway;
mod mcp;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use super::directive::{
    Directive, DirectiveError, GatewayMessage, GatewayToolCall, McpCall, ToolCallDirective,
    ToolResult,
};
use crate::auth::AuthContext;
use crate::config::DispatchConfig;

pub use gateway::GatewayClient;

/// Generic MCP-style tool registry. Returns the JSON-encoded tool output.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    async fn call(&self, service_name: &str, directive: &ToolCallDirective)
    -> anyhow::Result<String>;
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("gateway unavailable at {0}")]
    Unavailable(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("gateway error: {0}")]
    Gateway(String),
    #[error("call failed: {0:#}")]
    Registry(#[from] anyhow::Error),
    #[error("the {0} service requires logging in to a Naga account first")]
    AuthRequired(String),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid response: {0}")]
    Decode(#[from] serde_json::Error),
}

pub struct ToolDispatcher {
    registry: Arc<dyn ToolRegistry>,
    gateway: Arc<GatewayClient>,
    auth: Arc<dyn AuthContext>,
    cfg: DispatchConfig,
}

impl ToolDispatcher {
    pub fn new(
        registry: Arc<dyn ToolRegistry>,
        gateway: Arc<GatewayClient>,
        auth: Arc<dyn AuthContext>,
        cfg: DispatchConfig,
    ) -> Self {
        Self {
            registry,
            gateway,
            auth,
            cfg,
        }
    }

    pub fn gateway(&self) -> &GatewayClient {
        &self.gateway
    }

    /// Run every directive concurrently. Unknown `agentType`s (and stray
    /// `live2d` directives) are skipped; every other directive yields exactly
    /// one result, panics included.
    pub async fn execute_all(
        &self,
        directives: Vec<ToolCallDirective>,
        session_id: &str,
    ) -> Vec<ToolResult> {
        let mut tasks = Vec::with_capacity(directives.len());
        for directive in directives {
            let job = match directive.decode() {
                Ok(Directive::Mcp(call)) => Job::Mcp(call),
                Ok(Directive::Openclaw(msg)) => Job::Message(msg),
                Ok(Directive::OpenclawTool(call)) => Job::Tool(call),
                Ok(Directive::Live2d(_)) => {
                    warn!("live2d directive reached the dispatcher, skipping");
                    continue;
                }
                Err(DirectiveError::UnknownAgentType(agent_type)) => {
                    warn!(agent_type = %agent_type, "unknown agentType, skipping directive");
                    continue;
                }
                Err(e) => Job::Malformed(e),
            };
            tasks.push(AssertUnwindSafe(self.execute_one(directive, job, session_id)).catch_unwind());
        }
        if tasks.is_empty() {
            return Vec::new();
        }

        debug!(count = tasks.len(), "dispatching directives");
        join_all(tasks)
            .await
            .into_iter()
            .map(|outcome| match outcome {
                Ok(result) => result,
                Err(panic) => {
                    let msg = panic_message(&*panic);
                    error!(panic = %msg, "directive execution panicked");
                    ToolResult::error(
                        ToolCallDirective::default(),
                        "unknown",
                        "unknown",
                        format!("execution failed: {msg}"),
                    )
                }
            })
            .collect()
    }

    async fn execute_one(
        &self,
        directive: ToolCallDirective,
        job: Job,
        session_id: &str,
    ) -> ToolResult {
        match job {
            Job::Mcp(call) => self.execute_mcp(directive, call).await,
            Job::Message(msg) => {
                let res = if msg.message.is_empty() {
                    Err(DispatchError::MissingField("message"))
                } else {
                    self.gateway.send_message(&msg, session_id).await
                };
                envelope(directive, "openclaw", msg.task_type, res)
            }
            Job::Tool(call) => {
                let res = if call.tool_name.is_empty() {
                    Err(DispatchError::MissingField("tool_name"))
                } else {
                    self.gateway.invoke_tool(&call).await
                };
                envelope(directive, "openclaw", call.tool_name, res)
            }
            Job::Malformed(e) => {
                let service = directive
                    .get_str("service_name")
                    .unwrap_or(directive.agent_type())
                    .to_string();
                let tool = directive.get_str("tool_name").unwrap_or_default().to_string();
                warn!(service = %service, err = %e, "malformed directive");
                ToolResult::error(directive, service, tool, e.to_string())
            }
        }
    }
}

enum Job {
    Mcp(McpCall),
    Message(GatewayMessage),
    Tool(GatewayToolCall),
    Malformed(DirectiveError),
}

/// Fold a backend outcome into the uniform result envelope.
fn envelope(
    directive: ToolCallDirective,
    service: impl Into<String>,
    tool: impl Into<String>,
    res: Result<String, DispatchError>,
) -> ToolResult {
    let service = service.into();
    let tool = tool.into();
    match res {
        Ok(text) => {
            info!(service = %service, tool = %tool, "tool call succeeded");
            ToolResult::success(directive, service, tool, text)
        }
        Err(e) => {
            error!(service = %service, tool = %tool, err = %e, "tool call failed");
            ToolResult::error(directive, service, tool, e.to_string())
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

/// Render a round's results as the text of the synthetic user message that
/// feeds them back to the model.
pub fn format_tool_results(results: &[ToolResult]) -> String {
    let total = results.len();
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let label = if r.tool_name.is_empty() {
                r.service_name.clone()
            } else {
                format!("{}: {}", r.service_name, r.tool_name)
            };
            format!("[Result {}/{} - {} ({})]\n{}", i + 1, total, label, r.status, r.result)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
