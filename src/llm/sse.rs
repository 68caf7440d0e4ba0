//! `data: <payload>\n\n` framing shared by the model layer and the agentic
//! loop. Payloads are JSON objects carrying a `type` discriminant, optionally
//! base64 wrapped so that newlines inside the text never break the framing.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    #[default]
    Content,
    Reasoning,
    AuthExpired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(rename = "type", default)]
    pub kind: ChunkKind,
    #[serde(default)]
    pub text: String,
}

impl StreamChunk {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            kind: ChunkKind::Content,
            text: text.into(),
        }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            kind: ChunkKind::Reasoning,
            text: text.into(),
        }
    }

    pub fn auth_expired(text: impl Into<String>) -> Self {
        Self {
            kind: ChunkKind::AuthExpired,
            text: text.into(),
        }
    }

    pub fn to_frame(&self, framing: SseFraming) -> String {
        match serde_json::to_value(self) {
            Ok(v) => frame_json(&v, framing),
            Err(_) => String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SseFraming {
    #[default]
    Base64,
    Plain,
}

pub fn frame_json(value: &serde_json::Value, framing: SseFraming) -> String {
    let json = value.to_string();
    match framing {
        SseFraming::Base64 => format!("data: {}\n\n", STANDARD.encode(json.as_bytes())),
        SseFraming::Plain => format!("data: {json}\n\n"),
    }
}

/// Decode one frame into its JSON payload. Accepts both base64 and plain
/// payloads. Returns `None` for `[DONE]`, blank frames and anything that does
/// not decode.
pub fn decode_frame(frame: &str) -> Option<serde_json::Value> {
    let payload = frame.trim().strip_prefix("data:")?.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }
    if payload.starts_with('{') {
        return serde_json::from_str(payload).ok();
    }
    let bytes = STANDARD.decode(payload).ok()?;
    let text = std::str::from_utf8(&bytes).ok()?;
    serde_json::from_str(text).ok()
}

pub fn decode_chunk(frame: &str) -> Option<StreamChunk> {
    decode_frame(frame).and_then(|v| serde_json::from_value(v).ok())
}
