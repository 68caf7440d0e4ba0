//! Cheap pre-turn classification of which tools a message needs, so the
//! main prompt only carries the relevant guides. Any failure yields `None`
//! and the caller injects every guide.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::prompt::ToolCatalog;
use crate::auth::AuthContext;
use crate::llm::{ChatMessage, CompletionModel, CompletionRequest, Role};

pub const BUILTIN_TOOLS: [&str; 3] = ["openclaw", "openclaw_tool", "live2d"];

const CONTEXT_MESSAGES: usize = 4;
const CONTEXT_CHARS: usize = 200;
const ROUTER_MAX_TOKENS: u32 = 50;
const ROUTER_TIMEOUT: Duration = Duration::from_secs(15);

const FEW_SHOT: [(&str, &str); 5] = [
    ("look up today's gold price for me", "openclaw"),
    ("hi there", "none"),
    ("how do I beat this level", "openclaw\ngame_guide"),
    ("what's on my screen right now", "screen_vision"),
    ("search the latest news and write a summary", "openclaw"),
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteResult {
    pub needed_builtins: Vec<String>,
    pub needed_mcp: Vec<String>,
    pub needed_skills: Vec<String>,
}

impl RouteResult {
    pub fn needs_tools(&self) -> bool {
        !(self.needed_builtins.is_empty()
            && self.needed_mcp.is_empty()
            && self.needed_skills.is_empty())
    }

    fn names(&self) -> Vec<&str> {
        self.needed_builtins
            .iter()
            .chain(&self.needed_mcp)
            .chain(&self.needed_skills)
            .map(String::as_str)
            .collect()
    }
}

pub struct IntentRouter {
    model: Arc<dyn CompletionModel>,
    auth: Arc<dyn AuthContext>,
    model_name: String,
    catalog: RwLock<ToolCatalog>,
    rendered: Mutex<Option<String>>,
}

impl IntentRouter {
    pub fn new(
        model: Arc<dyn CompletionModel>,
        auth: Arc<dyn AuthContext>,
        model_name: impl Into<String>,
        catalog: ToolCatalog,
    ) -> Self {
        Self {
            model,
            auth,
            model_name: model_name.into(),
            catalog: RwLock::new(catalog),
            rendered: Mutex::new(None),
        }
    }

    pub fn catalog(&self) -> ToolCatalog {
        self.catalog
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Swap the known services and skills; drops the rendered tool list.
    pub fn set_catalog(&self, catalog: ToolCatalog) {
        *self.catalog.write().unwrap_or_else(|p| p.into_inner()) = catalog;
        self.invalidate_cache();
    }

    pub fn invalidate_cache(&self) {
        *self.rendered.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }

    /// The tool list embedded in the router prompt, rendered once.
    pub fn tool_list(&self) -> String {
        let mut cached = self.rendered.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(list) = cached.as_ref() {
            return list.clone();
        }
        let catalog = self.catalog();
        let mut lines = vec![
            "## Built-in".to_string(),
            "- openclaw: web search, browsing, code execution, files, scheduled tasks (anything that needs the internet)".to_string(),
            "- live2d: avatar expressions and gestures".to_string(),
            String::new(),
            "## MCP services".to_string(),
        ];
        if catalog.mcp.is_empty() {
            lines.push("- (no MCP services loaded)".to_string());
        }
        for t in &catalog.mcp {
            let short = t.description.split(['.', '\n']).next().unwrap_or_default().trim();
            let short = if short.is_empty() { t.name.as_str() } else { short };
            lines.push(format!("- {}: {}", t.name, short));
        }
        lines.push(String::new());
        lines.push("## Skills".to_string());
        for t in &catalog.skills {
            lines.push(format!("- {}: {}", t.name, t.description));
        }
        let list = lines.join("\n");
        *cached = Some(list.clone());
        list
    }

    /// System prompt, few-shot pairs, then the last few non-system
    /// messages; always ends with a user message.
    pub fn build_messages(&self, history: &[ChatMessage], user_msg: &str) -> Vec<ChatMessage> {
        let system = format!(
            "Decide which tools the user's latest message needs. Output only tool names, one per \
             line. When no tool is needed output only none.\n\n{}",
            self.tool_list()
        );
        let mut out = vec![ChatMessage::system(system)];
        for (user, assistant) in FEW_SHOT {
            out.push(ChatMessage::user(user));
            out.push(ChatMessage::assistant(assistant));
        }

        let non_system: Vec<&ChatMessage> =
            history.iter().filter(|m| m.role != Role::System).collect();
        let start = non_system.len().saturating_sub(CONTEXT_MESSAGES);
        let recent = &non_system[start..];
        for m in recent {
            out.push(ChatMessage::new(m.role, clip(&m.text())));
        }
        // A trailing user turn is either this prompt already appended or a
        // stale one left by a turn that never answered; the prompt wins.
        if recent.last().is_some_and(|m| m.role == Role::User) {
            out.pop();
        }
        out.push(ChatMessage::user(clip(user_msg)));
        out
    }

    /// Map raw router output onto known tool names.
    pub fn parse_output(&self, output: &str) -> RouteResult {
        let mut result = RouteResult::default();
        let catalog = self.catalog();

        for line in output.lines() {
            let line = line.trim().to_lowercase();
            let mut name = line.trim_start_matches(['-', '•', '*']).trim();
            if let Some((_, tail)) = name.rsplit_once('→') {
                name = tail.trim();
            }
            if name.is_empty() || name == "none" {
                continue;
            }
            if BUILTIN_TOOLS.contains(&name) {
                result.needed_builtins.push(name.to_string());
            } else if let Some(t) = catalog.mcp.iter().find(|t| t.name.to_lowercase() == name) {
                result.needed_mcp.push(t.name.clone());
            } else if let Some(t) = catalog.skills.iter().find(|t| t.name.to_lowercase() == name) {
                result.needed_skills.push(t.name.clone());
            } else {
                debug!(name, "ignoring unknown tool name from router");
            }
        }
        result
    }

    pub async fn classify(&self, history: &[ChatMessage], user_msg: &str) -> Option<RouteResult> {
        let request = CompletionRequest {
            credentials: self.auth.aux_credentials(&self.model_name),
            messages: self.build_messages(history, user_msg),
            temperature: 0.0,
            max_tokens: Some(ROUTER_MAX_TOKENS),
            timeout: Some(ROUTER_TIMEOUT),
        };
        match self.model.complete(request).await {
            Ok(output) => {
                let result = self.parse_output(&output);
                let names = result.names();
                let tools = if names.is_empty() {
                    "none".to_string()
                } else {
                    names.join(", ")
                };
                let user: String = user_msg.chars().take(50).collect();
                info!(user = %user, tools = %tools, "intent routed");
                Some(result)
            }
            Err(e) => {
                warn!(err = %format!("{e:#}"), "intent routing failed, injecting every tool");
                None
            }
        }
    }
}

fn clip(text: &str) -> String {
    if text.chars().count() > CONTEXT_CHARS {
        let head: String = text.chars().take(CONTEXT_CHARS).collect();
        format!("{head}…")
    } else {
        text.to_string()
    }
}
