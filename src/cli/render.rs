use std::io::{self, Write};

use crate::agentic::{ControlEvent, LoopEvent};
use crate::llm::{ChunkKind, SseFraming};

/// Prints events as they arrive and keeps the text of the latest round,
/// which becomes the assistant turn in the history.
pub struct EventPrinter {
    raw: bool,
    framing: SseFraming,
    answer: String,
}

impl EventPrinter {
    pub fn new(raw: bool, framing: SseFraming) -> Self {
        Self {
            raw,
            framing,
            answer: String::new(),
        }
    }

    /// Final answer of the turn: the last round's content, cleaned of
    /// directive blocks when the loop said so.
    pub fn answer(&self) -> &str {
        self.answer.trim()
    }

    pub fn print(&mut self, ev: &LoopEvent, out: &mut impl Write) -> io::Result<()> {
        self.track(ev);
        if self.raw {
            return out.write_all(ev.to_sse(self.framing).as_bytes());
        }
        match ev {
            LoopEvent::Chunk(chunk) => match &chunk.decoded {
                Some(c) if c.kind == ChunkKind::Content => write!(out, "{}", c.text)?,
                Some(c) if c.kind == ChunkKind::AuthExpired => {
                    writeln!(out, "\n[auth expired] {}", c.text)?
                }
                _ => {}
            },
            LoopEvent::Control(ctl) => match ctl {
                ControlEvent::RoundStart { round, summary } => {
                    let tag = if *summary { " (summary)" } else { "" };
                    writeln!(out, "\n--- round {round}{tag} ---")?;
                }
                ControlEvent::ToolCalls { calls } => {
                    for call in calls {
                        writeln!(out, "\n[tool] {call}")?;
                    }
                }
                ControlEvent::ToolResults { results } => {
                    for r in results {
                        let label = match r["tool_name"].as_str() {
                            Some(tool) if !tool.is_empty() => {
                                format!("{}: {}", r["service_name"].as_str().unwrap_or("?"), tool)
                            }
                            _ => r["service_name"].as_str().unwrap_or("?").to_string(),
                        };
                        writeln!(
                            out,
                            "[result {} ({})] {}",
                            label,
                            r["status"].as_str().unwrap_or("?"),
                            r["result"].as_str().unwrap_or_default()
                        )?;
                    }
                }
                ControlEvent::RoundEnd { has_more, .. } => {
                    if !has_more {
                        writeln!(out)?;
                    }
                }
                ControlEvent::ContentClean { .. } => {}
                ControlEvent::CompressStart { text }
                | ControlEvent::CompressProgress { text }
                | ControlEvent::CompressEnd { text }
                | ControlEvent::CompressInfo { text } => writeln!(out, "[context] {text}")?,
            },
        }
        out.flush()
    }

    fn track(&mut self, ev: &LoopEvent) {
        match ev {
            LoopEvent::Chunk(chunk) => {
                if let Some(c) = &chunk.decoded
                    && c.kind == ChunkKind::Content
                {
                    self.answer.push_str(&c.text);
                }
            }
            LoopEvent::Control(ControlEvent::RoundStart { .. }) => self.answer.clear(),
            LoopEvent::Control(ControlEvent::ContentClean { text }) => {
                self.answer = text.clone();
            }
            LoopEvent::Control(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentic::events::RawChunk;
    use crate::llm::StreamChunk;
    use serde_json::json;

    fn chunk(text: &str) -> LoopEvent {
        LoopEvent::Chunk(RawChunk::new(
            StreamChunk::content(text).to_frame(SseFraming::Base64),
        ))
    }

    #[test]
    fn answer_follows_latest_round_and_cleanups() {
        let mut p = EventPrinter::new(false, SseFraming::Base64);
        let mut out = Vec::new();
        for ev in [
            chunk("Checking"),
            chunk(" ```tool\n{}"),
            LoopEvent::Control(ControlEvent::ContentClean {
                text: "Checking".into(),
            }),
        ] {
            p.print(&ev, &mut out).unwrap();
        }
        assert_eq!(p.answer(), "Checking");

        for ev in [
            LoopEvent::Control(ControlEvent::RoundStart {
                round: 2,
                summary: false,
            }),
            chunk("It is sunny."),
        ] {
            p.print(&ev, &mut out).unwrap();
        }
        assert_eq!(p.answer(), "It is sunny.");
    }

    #[test]
    fn tool_results_render_as_bracketed_lines() {
        let mut p = EventPrinter::new(false, SseFraming::Base64);
        let mut out = Vec::new();
        let ev = LoopEvent::Control(ControlEvent::ToolResults {
            results: vec![json!({
                "service_name": "weather", "tool_name": "today",
                "status": "success", "result": "sunny"
            })],
        });
        p.print(&ev, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "[result weather: today (success)] sunny\n"
        );
    }

    #[test]
    fn raw_mode_prints_frames() {
        let mut p = EventPrinter::new(true, SseFraming::Plain);
        let mut out = Vec::new();
        let ev = LoopEvent::Control(ControlEvent::RoundEnd {
            round: 1,
            has_more: false,
        });
        p.print(&ev, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("data: {") && text.ends_with("}\n\n"));
        assert_eq!(
            crate::llm::sse::decode_frame(&text),
            Some(json!({"type": "round_end", "round": 1, "has_more": false}))
        );
    }
}
