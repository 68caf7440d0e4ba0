use serde::Serialize;
use serde_json::Value;

use crate::llm::sse::{ChunkKind, SseFraming, StreamChunk, decode_chunk, frame_json};

/// Loop-generated events. Model chunks are forwarded separately as
/// [`LoopEvent::Chunk`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlEvent {
    /// Replaces the streamed text of the round once directives are stripped.
    ContentClean { text: String },
    RoundStart {
        round: usize,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        summary: bool,
    },
    ToolCalls { calls: Vec<Value> },
    ToolResults { results: Vec<Value> },
    RoundEnd { round: usize, has_more: bool },
    CompressStart { text: String },
    CompressProgress { text: String },
    CompressEnd { text: String },
    CompressInfo { text: String },
}

impl ControlEvent {
    pub fn to_sse(&self, framing: SseFraming) -> String {
        match serde_json::to_value(self) {
            Ok(v) => frame_json(&v, framing),
            Err(_) => String::new(),
        }
    }
}

/// A model chunk forwarded verbatim, with its decoded form kept alongside.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChunk {
    pub raw: String,
    pub decoded: Option<StreamChunk>,
}

impl RawChunk {
    pub fn new(raw: String) -> Self {
        let decoded = decode_chunk(&raw);
        Self { raw, decoded }
    }

    pub fn kind(&self) -> Option<ChunkKind> {
        self.decoded.as_ref().map(|c| c.kind)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopEvent {
    Chunk(RawChunk),
    Control(ControlEvent),
}

impl LoopEvent {
    /// SSE text for the client. Chunks pass through exactly as received.
    pub fn to_sse(&self, framing: SseFraming) -> String {
        match self {
            LoopEvent::Chunk(c) => c.raw.clone(),
            LoopEvent::Control(e) => e.to_sse(framing),
        }
    }

    pub fn control(&self) -> Option<&ControlEvent> {
        match self {
            LoopEvent::Control(e) => Some(e),
            LoopEvent::Chunk(_) => None,
        }
    }
}

impl From<ControlEvent> for LoopEvent {
    fn from(e: ControlEvent) -> Self {
        LoopEvent::Control(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::sse::decode_frame;
    use serde_json::json;

    #[test]
    fn control_events_render_with_type_tag() {
        let ev = ControlEvent::RoundEnd {
            round: 2,
            has_more: true,
        };
        let frame = ev.to_sse(SseFraming::Base64);
        assert_eq!(
            decode_frame(&frame),
            Some(json!({"type": "round_end", "round": 2, "has_more": true}))
        );
    }

    #[test]
    fn summary_flag_only_appears_when_set() {
        let normal = ControlEvent::RoundStart {
            round: 2,
            summary: false,
        };
        assert_eq!(
            serde_json::to_value(&normal).unwrap(),
            json!({"type": "round_start", "round": 2})
        );
        let summary = ControlEvent::RoundStart {
            round: 6,
            summary: true,
        };
        assert_eq!(
            serde_json::to_value(&summary).unwrap(),
            json!({"type": "round_start", "round": 6, "summary": true})
        );
    }

    #[test]
    fn chunks_pass_through_verbatim() {
        let raw = StreamChunk::content("hi").to_frame(SseFraming::Plain);
        let ev = LoopEvent::Chunk(RawChunk::new(raw.clone()));
        assert_eq!(ev.to_sse(SseFraming::Base64), raw);
        match ev {
            LoopEvent::Chunk(c) => assert_eq!(c.kind(), Some(ChunkKind::Content)),
            _ => unreachable!(),
        }
    }
}
