use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A raw directive object lifted out of model text. Always carries a
/// non-empty string `agentType`; every other field is backend specific.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolCallDirective(pub Map<String, Value>);

impl ToolCallDirective {
    pub fn agent_type(&self) -> &str {
        self.get_str("agentType").unwrap_or_default()
    }

    /// String field, `None` when absent, not a string, or empty.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn is_live2d(&self) -> bool {
        self.agent_type() == "live2d"
    }

    /// Decode into the typed form for its backend. Unknown `agentType`
    /// values are reported separately so callers can skip them.
    pub fn decode(&self) -> Result<Directive, DirectiveError> {
        let agent_type = self.agent_type();
        if !KNOWN_AGENT_TYPES.contains(&agent_type) {
            return Err(DirectiveError::UnknownAgentType(agent_type.to_string()));
        }
        serde_json::from_value(Value::Object(self.0.clone())).map_err(|source| {
            DirectiveError::Malformed {
                agent_type: agent_type.to_string(),
                source,
            }
        })
    }

    /// Compact description for UI display, `message` cut to `max_message`
    /// characters.
    pub fn describe(&self, max_message: usize) -> Value {
        let mut desc = Map::new();
        desc.insert("agentType".into(), self.agent_type().into());
        for key in ["service_name", "tool_name"] {
            if let Some(v) = self.get_str(key) {
                desc.insert(key.into(), v.into());
            }
        }
        if let Some(m) = self.get_str("message") {
            desc.insert(
                "message".into(),
                m.chars().take(max_message).collect::<String>().into(),
            );
        }
        Value::Object(desc)
    }
}

impl From<Map<String, Value>> for ToolCallDirective {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

pub const KNOWN_AGENT_TYPES: [&str; 4] = ["mcp", "openclaw", "openclaw_tool", "live2d"];

#[derive(Debug, thiserror::Error)]
pub enum DirectiveError {
    #[error("unknown agentType: {0:?}")]
    UnknownAgentType(String),
    #[error("malformed {agent_type} directive: {source}")]
    Malformed {
        agent_type: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Typed directive, one variant per backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "agentType", rename_all = "snake_case")]
pub enum Directive {
    Mcp(McpCall),
    Openclaw(GatewayMessage),
    OpenclawTool(GatewayToolCall),
    Live2d(Live2dAction),
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct McpCall {
    #[serde(default, deserialize_with = "null_as_default")]
    pub service_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tool_name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct GatewayMessage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(default = "default_task_type", deserialize_with = "task_type_or_default")]
    pub task_type: String,
    #[serde(default)]
    pub session_key: Option<String>,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub at: Option<String>,
}

fn default_task_type() -> String {
    "message".to_string()
}

fn task_type_or_default<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?
        .filter(|t| !t.is_empty())
        .unwrap_or_else(default_task_type))
}

/// Models often write `null` for a field they mean to leave out.
fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

impl GatewayMessage {
    /// Message text as sent to the gateway, prefixed for scheduled tasks.
    pub fn outgoing_text(&self) -> String {
        match (self.task_type.as_str(), &self.schedule, &self.at) {
            ("cron", Some(schedule), _) if !schedule.is_empty() => {
                format!("[cron task: {schedule}] {}", self.message)
            }
            ("reminder", _, Some(at)) if !at.is_empty() => {
                format!("[reminder in {at}] {}", self.message)
            }
            _ => self.message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct GatewayToolCall {
    #[serde(default, deserialize_with = "null_as_default")]
    pub tool_name: String,
    #[serde(default = "empty_object", deserialize_with = "args_or_empty")]
    pub args: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn args_or_empty<'de, D: Deserializer<'de>>(d: D) -> Result<Value, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Null => empty_object(),
        other => other,
    })
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct Live2dAction {
    #[serde(default, deserialize_with = "null_as_default")]
    pub action: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
}

impl std::fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolStatus::Success => f.write_str("success"),
            ToolStatus::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call: ToolCallDirective,
    pub result: String,
    pub status: ToolStatus,
    pub service_name: String,
    pub tool_name: String,
}

impl ToolResult {
    pub fn success(
        tool_call: ToolCallDirective,
        service_name: impl Into<String>,
        tool_name: impl Into<String>,
        result: impl Into<String>,
    ) -> Self {
        Self {
            tool_call,
            result: result.into(),
            status: ToolStatus::Success,
            service_name: service_name.into(),
            tool_name: tool_name.into(),
        }
    }

    pub fn error(
        tool_call: ToolCallDirective,
        service_name: impl Into<String>,
        tool_name: impl Into<String>,
        result: impl Into<String>,
    ) -> Self {
        Self {
            status: ToolStatus::Error,
            ..Self::success(tool_call, service_name, tool_name, result)
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == ToolStatus::Error
    }

    /// UI preview: `{service_name, tool_name, status, result}` with the
    /// result cut to `max_chars` characters plus `...`.
    pub fn preview(&self, max_chars: usize) -> Value {
        let result = if self.result.chars().count() > max_chars {
            let head: String = self.result.chars().take(max_chars).collect();
            format!("{head}...")
        } else {
            self.result.clone()
        };
        serde_json::json!({
            "service_name": self.service_name,
            "tool_name": self.tool_name,
            "status": self.status,
            "result": result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn directive(v: Value) -> ToolCallDirective {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn decodes_each_backend_variant() {
        let d = directive(json!({"agentType": "mcp", "service_name": "weather", "tool_name": "today"}));
        assert_eq!(
            d.decode().unwrap(),
            Directive::Mcp(McpCall {
                service_name: "weather".into(),
                tool_name: "today".into()
            })
        );

        let d = directive(json!({"agentType": "openclaw", "message": "hi"}));
        match d.decode().unwrap() {
            Directive::Openclaw(m) => {
                assert_eq!(m.message, "hi");
                assert_eq!(m.task_type, "message");
            }
            other => panic!("unexpected {other:?}"),
        }

        let d = directive(json!({"agentType": "openclaw_tool", "tool_name": "web_search"}));
        match d.decode().unwrap() {
            Directive::OpenclawTool(t) => assert_eq!(t.args, json!({})),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn null_fields_decode_as_absent() {
        let d = directive(json!({"agentType": "mcp", "service_name": null, "tool_name": "ask_guide"}));
        assert_eq!(
            d.decode().unwrap(),
            Directive::Mcp(McpCall {
                service_name: String::new(),
                tool_name: "ask_guide".into()
            })
        );

        let d = directive(json!({"agentType": "openclaw", "message": "hi", "task_type": null}));
        match d.decode().unwrap() {
            Directive::Openclaw(m) => assert_eq!(m.task_type, "message"),
            other => panic!("unexpected {other:?}"),
        }

        let d = directive(json!({"agentType": "openclaw_tool", "tool_name": "web_search", "args": null}));
        match d.decode().unwrap() {
            Directive::OpenclawTool(t) => assert_eq!(t.args, json!({})),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_agent_type_is_distinguished_from_malformed() {
        let d = directive(json!({"agentType": "teleport"}));
        assert!(matches!(d.decode(), Err(DirectiveError::UnknownAgentType(t)) if t == "teleport"));

        let d = directive(json!({"agentType": "openclaw", "message": 42}));
        assert!(matches!(d.decode(), Err(DirectiveError::Malformed { .. })));
    }

    #[test]
    fn scheduled_messages_are_prefixed() {
        let cron = GatewayMessage {
            message: "water plants".into(),
            task_type: "cron".into(),
            schedule: Some("0 9 * * *".into()),
            ..Default::default()
        };
        assert_eq!(cron.outgoing_text(), "[cron task: 0 9 * * *] water plants");

        let reminder = GatewayMessage {
            message: "stretch".into(),
            task_type: "reminder".into(),
            at: Some("20m".into()),
            ..Default::default()
        };
        assert_eq!(reminder.outgoing_text(), "[reminder in 20m] stretch");

        let cron_without_schedule = GatewayMessage {
            message: "x".into(),
            task_type: "cron".into(),
            ..Default::default()
        };
        assert_eq!(cron_without_schedule.outgoing_text(), "x");
    }

    #[test]
    fn describe_truncates_message() {
        let d = directive(json!({"agentType": "openclaw", "message": "abcdef", "args": {}}));
        assert_eq!(
            d.describe(3),
            json!({"agentType": "openclaw", "message": "abc"})
        );
    }

    #[test]
    fn preview_truncates_long_results() {
        let r = ToolResult::success(ToolCallDirective::default(), "svc", "t", "x".repeat(10));
        assert_eq!(r.preview(4)["result"], "xxxx...");
        assert_eq!(r.preview(10)["result"], "x".repeat(10));
        assert_eq!(r.preview(4)["status"], "success");
    }
}
