//! The agentic tool loop: directive parsing, concurrent dispatch, history
//! compression and the round orchestrator.

pub mod agent_loop;
pub mod compressor;
pub mod directive;
pub mod dispatch;
pub mod events;
pub mod intent_router;
pub mod live2d;
pub mod parser;
pub mod prompt;

#[cfg(test)]
pub(crate) mod test_utils;

pub use agent_loop::AgenticLoop;
pub use compressor::{CompressionOutcome, ContextCompressor, TiktokenCounter, TokenCounter};
pub use directive::{Directive, ToolCallDirective, ToolResult, ToolStatus};
pub use dispatch::{DispatchError, GatewayClient, ToolDispatcher, ToolRegistry, format_tool_results};
pub use events::{ControlEvent, LoopEvent};
pub use intent_router::{IntentRouter, RouteResult};
pub use parser::parse_tool_calls;
pub use prompt::{ToolCatalog, ToolInfo, build_system_prompt};
