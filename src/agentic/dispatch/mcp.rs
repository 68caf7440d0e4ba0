use tracing::{debug, warn};

use super::{DispatchError, ToolDispatcher, envelope};
use crate::agentic::directive::{McpCall, ToolCallDirective, ToolResult};

impl ToolDispatcher {
    /// Well-known tools may omit `service_name`; fill in the default service
    /// for them before routing.
    pub(crate) fn infer_service(&self, call: &McpCall) -> Option<String> {
        if !call.service_name.is_empty() {
            return Some(call.service_name.clone());
        }
        if self
            .cfg
            .default_service_tools
            .iter()
            .any(|t| t == &call.tool_name)
        {
            return Some(self.cfg.default_service.clone());
        }
        None
    }

    pub(super) async fn execute_mcp(
        &self,
        mut directive: ToolCallDirective,
        call: McpCall,
    ) -> ToolResult {
        let service = match self.infer_service(&call) {
            Some(service) => {
                if call.service_name.is_empty() {
                    debug!(tool = %call.tool_name, service = %service, "inferred default service");
                    directive.set("service_name", service.clone());
                }
                service
            }
            None => String::new(),
        };

        if self.cfg.auth_gated_services.contains(&service) && !self.auth.is_authenticated() {
            warn!(service = %service, "gated service called without login");
            return envelope(
                directive,
                service.clone(),
                call.tool_name,
                Err(DispatchError::AuthRequired(service)),
            );
        }

        let res = self
            .registry
            .call(&service, &directive)
            .await
            .map_err(DispatchError::from);
        envelope(directive, service, call.tool_name, res)
    }
}
