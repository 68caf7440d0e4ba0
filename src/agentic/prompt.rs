use super::intent_router::RouteResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

impl ToolInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Tools the model can reach besides the built-in gateway and avatar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCatalog {
    pub mcp: Vec<ToolInfo>,
    pub skills: Vec<ToolInfo>,
}

const PROTOCOL: &str = r#"## Calling tools

When you need a tool, write a fenced block tagged `tool` containing one JSON object per call:

```tool
{"agentType": "mcp", "service_name": "<service>", "tool_name": "<tool>", ...arguments}
```

Several objects may share one block; they run concurrently. Every object needs an `agentType`.
Write any explanation before the block. After the block, stop and wait: the results come back
in the next message, and you can call more tools or answer."#;

const OPENCLAW_GUIDE: &str = r#"### openclaw
Remote agent for web search, browsing, code execution, files and scheduled tasks.
```tool
{"agentType": "openclaw", "message": "<what the agent should do>"}
```
Add `"task_type": "cron", "schedule": "<cron expression>"` for recurring tasks, or
`"task_type": "reminder", "at": "<delay such as 20m>"` for one-off reminders."#;

const OPENCLAW_TOOL_GUIDE: &str = r#"### openclaw_tool
Invoke one of the remote agent's tools directly.
```tool
{"agentType": "openclaw_tool", "tool_name": "<tool>", "args": {...}}
```"#;

const LIVE2D_GUIDE: &str = r#"### live2d
Avatar expressions and gestures. Fire and forget, no result comes back.
```tool
{"agentType": "live2d", "action": "<wave|nod|smile|...>"}
```"#;

/// Append the directive protocol and tool guides to `base`.
///
/// With no route every guide is included. A route that needs no tools
/// leaves `base` untouched.
pub fn build_system_prompt(
    base: &str,
    route: Option<&RouteResult>,
    catalog: &ToolCatalog,
) -> String {
    if route.is_some_and(|r| !r.needs_tools()) {
        return base.to_string();
    }
    let wants_builtin = |name: &str| route.is_none_or(|r| r.needed_builtins.iter().any(|b| b == name));
    let wants_mcp = |name: &str| route.is_none_or(|r| r.needed_mcp.iter().any(|m| m == name));
    let wants_skill = |name: &str| route.is_none_or(|r| r.needed_skills.iter().any(|s| s == name));

    let mut sections = vec![base.trim_end().to_string(), PROTOCOL.to_string()];
    for (name, guide) in [
        ("openclaw", OPENCLAW_GUIDE),
        ("openclaw_tool", OPENCLAW_TOOL_GUIDE),
        ("live2d", LIVE2D_GUIDE),
    ] {
        if wants_builtin(name) {
            sections.push(guide.to_string());
        }
    }

    let services: Vec<String> = catalog
        .mcp
        .iter()
        .filter(|t| wants_mcp(&t.name))
        .map(|t| format!("- {}: {}", t.name, t.description))
        .collect();
    if !services.is_empty() {
        sections.push(format!(
            "### mcp services\n{}\n```tool\n{{\"agentType\": \"mcp\", \"service_name\": \"<service>\", \"tool_name\": \"<tool>\", \"args\": {{...}}}}\n```",
            services.join("\n")
        ));
    }

    let skills: Vec<String> = catalog
        .skills
        .iter()
        .filter(|t| wants_skill(&t.name))
        .map(|t| format!("- {}: {}", t.name, t.description))
        .collect();
    if !skills.is_empty() {
        sections.push(format!("### skills\n{}", skills.join("\n")));
    }

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ToolCatalog {
        ToolCatalog {
            mcp: vec![
                ToolInfo::new("game_guide", "Strategy guides"),
                ToolInfo::new("weather", "Forecasts"),
            ],
            skills: vec![ToolInfo::new("web-search", "Search the web")],
        }
    }

    #[test]
    fn no_route_includes_everything() {
        let p = build_system_prompt("You are Naga.", None, &catalog());
        assert!(p.starts_with("You are Naga.\n\n## Calling tools"));
        for needle in ["### openclaw\n", "### openclaw_tool", "### live2d", "game_guide", "weather", "web-search"] {
            assert!(p.contains(needle), "missing {needle}");
        }
    }

    #[test]
    fn no_tools_needed_keeps_base_prompt() {
        let route = RouteResult::default();
        assert_eq!(
            build_system_prompt("You are Naga.", Some(&route), &catalog()),
            "You are Naga."
        );
    }

    #[test]
    fn only_routed_guides_are_included() {
        let route = RouteResult {
            needed_builtins: vec!["openclaw".into()],
            needed_mcp: vec!["weather".into()],
            needed_skills: vec![],
        };
        let p = build_system_prompt("base", Some(&route), &catalog());
        assert!(p.contains("### openclaw\n"));
        assert!(!p.contains("### live2d"));
        assert!(!p.contains("### openclaw_tool"));
        assert!(p.contains("- weather: Forecasts"));
        assert!(!p.contains("game_guide"));
        assert!(!p.contains("### skills"));
    }
}
