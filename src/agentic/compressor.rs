//! Token-budget driven history compression.
//!
//! When the running history grows past the configured token threshold, the
//! older part of the conversation is summarised by a cheap auxiliary model and
//! replaced by one synthetic system message. The most recent messages are
//! always kept verbatim.

use std::sync::Arc;
use std::time::Duration;

use tiktoken_rs::CoreBPE;
use tracing::{debug, info, warn};

use super::events::ControlEvent;
use crate::auth::AuthContext;
use crate::config::CompressionConfig;
use crate::llm::{ChatMessage, CompletionModel, CompletionRequest, Role};

pub const COMPRESS_MARKER: &str = "Compressed record of the earlier conversation:";

const SUMMARY_PROMPT: &str = "You compress chat transcripts. Summarise the conversation below so \
that an assistant can continue it without the original messages. Preserve the user's goals and \
intent, decisions that were made, technical specifics (names, numbers, paths, commands, errors) \
and any open questions or pending tasks. Drop greetings and small talk. Write plain prose or short \
bullet points, at most about 800 words.";

pub trait TokenCounter: Send + Sync {
    fn count(&self, messages: &[ChatMessage]) -> usize;
}

/// Rough estimate used when no tokenizer is available.
pub fn heuristic_tokens(messages: &[ChatMessage]) -> usize {
    let chars: usize = messages.iter().map(|m| m.content.char_len()).sum();
    (chars as f64 * 1.2) as usize
}

/// Model-aware BPE counter. Falls back to [`heuristic_tokens`] when the
/// encoding cannot be loaded.
pub struct TiktokenCounter {
    bpe: Option<CoreBPE>,
}

impl TiktokenCounter {
    pub fn for_model(model: &str) -> Self {
        let bpe = tiktoken_rs::get_bpe_from_model(model)
            .or_else(|_| tiktoken_rs::cl100k_base())
            .map_err(|e| warn!(err = %e, model, "tokenizer unavailable, using estimate"))
            .ok();
        Self { bpe }
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, messages: &[ChatMessage]) -> usize {
        let Some(bpe) = &self.bpe else {
            return heuristic_tokens(messages);
        };
        messages
            .iter()
            .map(|m| bpe.encode_with_special_tokens(&m.text()).len() + 4)
            .sum()
    }
}

/// Result of one compression attempt. When `compressed` is false,
/// `messages` is the input list, untouched.
#[derive(Debug)]
pub struct CompressionOutcome {
    pub compressed: bool,
    pub messages: Vec<ChatMessage>,
    pub sse_events: Vec<ControlEvent>,
}

impl CompressionOutcome {
    fn unchanged(messages: Vec<ChatMessage>, sse_events: Vec<ControlEvent>) -> Self {
        Self {
            compressed: false,
            messages,
            sse_events,
        }
    }
}

pub struct ContextCompressor {
    summarizer: Arc<dyn CompletionModel>,
    auth: Arc<dyn AuthContext>,
    counter: Arc<dyn TokenCounter>,
    cfg: CompressionConfig,
}

impl ContextCompressor {
    pub fn new(
        summarizer: Arc<dyn CompletionModel>,
        auth: Arc<dyn AuthContext>,
        counter: Arc<dyn TokenCounter>,
        cfg: CompressionConfig,
    ) -> Self {
        Self {
            summarizer,
            auth,
            counter,
            cfg,
        }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.cfg
    }

    pub async fn compress(&self, mut messages: Vec<ChatMessage>) -> CompressionOutcome {
        let keep = self.cfg.keep_recent;
        if messages.len() <= keep + 1 {
            return CompressionOutcome::unchanged(messages, Vec::new());
        }

        let before = self.counter.count(&messages);
        if before <= self.cfg.token_threshold {
            debug!(tokens = before, threshold = self.cfg.token_threshold, "below compression threshold");
            return CompressionOutcome::unchanged(messages, Vec::new());
        }

        let mut events = vec![ControlEvent::CompressStart {
            text: format!("Context is too long ({before} tokens), compressing earlier messages..."),
        }];

        let start = usize::from(messages[0].role == Role::System);
        let rest = messages.len() - start;
        if rest <= keep {
            info!("nothing early enough to compress");
            events.push(ControlEvent::CompressEnd {
                text: "No compression needed, every message is within the kept range".into(),
            });
            return CompressionOutcome::unchanged(messages, events);
        }

        let split = messages.len() - keep;
        let early = &messages[start..split];
        events.push(ControlEvent::CompressProgress {
            text: format!(
                "Compressing {} earlier messages, keeping the latest {keep}...",
                early.len()
            ),
        });

        let transcript = format_transcript(early, self.cfg.per_message_chars);
        let summary = match self.summarize(transcript).await {
            Ok(s) if !s.trim().is_empty() => s.trim().to_string(),
            Ok(_) => {
                warn!("summarizer returned empty text, keeping original context");
                events.push(compress_failed());
                return CompressionOutcome::unchanged(messages, events);
            }
            Err(e) => {
                warn!(err = %format!("{e:#}"), "summarizer failed, keeping original context");
                events.push(compress_failed());
                return CompressionOutcome::unchanged(messages, events);
            }
        };

        let recent = messages.split_off(split);
        let mut out = Vec::with_capacity(keep + 2);
        if start == 1 {
            out.push(messages.swap_remove(0));
        }
        out.push(ChatMessage::system(format!(
            "{COMPRESS_MARKER}\n<compress>\n{summary}\n</compress>"
        )));
        out.extend(recent);

        let after = self.counter.count(&out);
        let saved = before.saturating_sub(after);
        info!(before, after, saved, "context compressed");
        events.push(ControlEvent::CompressEnd {
            text: format!("Compression done: {before} -> {after} tokens (saved {saved})"),
        });
        events.push(ControlEvent::CompressInfo {
            text: "[context compressed]".into(),
        });

        CompressionOutcome {
            compressed: true,
            messages: out,
            sse_events: events,
        }
    }

    async fn summarize(&self, transcript: String) -> anyhow::Result<String> {
        let request = CompletionRequest {
            credentials: self.auth.aux_credentials(&self.cfg.model),
            messages: vec![
                ChatMessage::system(SUMMARY_PROMPT),
                ChatMessage::user(transcript),
            ],
            temperature: self.cfg.temperature,
            max_tokens: Some(self.cfg.max_tokens),
            timeout: Some(Duration::from_secs(self.cfg.timeout_secs)),
        };
        self.summarizer.complete(request).await
    }
}

fn compress_failed() -> ControlEvent {
    ControlEvent::CompressEnd {
        text: "Compression failed, using the original context".into(),
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "User",
        Role::Assistant => "Assistant",
        Role::System => "System",
    }
}

/// Role-labelled transcript; each message capped at `max_chars` characters.
pub fn format_transcript(messages: &[ChatMessage], max_chars: usize) -> String {
    messages
        .iter()
        .map(|m| {
            let text = m.text();
            let body = if text.chars().count() > max_chars {
                let head: String = text.chars().take(max_chars).collect();
                format!("{head}...[truncated]")
            } else {
                text
            };
            format!("[{}] {}", role_label(m.role), body)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentic::test_utils::{FakeSummarizer, FixedCounter, anonymous_auth};

    fn cfg(keep_recent: usize) -> CompressionConfig {
        CompressionConfig {
            keep_recent,
            token_threshold: 1_000,
            ..CompressionConfig::default()
        }
    }

    fn history(n: usize) -> Vec<ChatMessage> {
        let mut v = vec![ChatMessage::system("you are naga")];
        for i in 0..n {
            if i % 2 == 0 {
                v.push(ChatMessage::user(format!("question {i}")));
            } else {
                v.push(ChatMessage::assistant(format!("answer {i}")));
            }
        }
        v
    }

    fn compressor(
        summarizer: Arc<FakeSummarizer>,
        tokens: usize,
        keep: usize,
    ) -> ContextCompressor {
        ContextCompressor::new(
            summarizer,
            anonymous_auth(),
            Arc::new(FixedCounter(tokens)),
            cfg(keep),
        )
    }

    #[tokio::test]
    async fn below_threshold_is_a_no_op() {
        let summarizer = Arc::new(FakeSummarizer::replying("summary"));
        let c = compressor(summarizer.clone(), 1_000, 4);
        let input = history(12);
        let out = c.compress(input.clone()).await;
        assert!(!out.compressed);
        assert_eq!(out.messages, input);
        assert!(out.sse_events.is_empty());
        assert_eq!(summarizer.request_count(), 0);
    }

    #[tokio::test]
    async fn short_histories_are_never_compressed() {
        let summarizer = Arc::new(FakeSummarizer::replying("summary"));
        let c = compressor(summarizer.clone(), 1_000_000, 4);
        let input = history(4);
        let out = c.compress(input.clone()).await;
        assert!(!out.compressed);
        assert_eq!(out.messages, input);
        assert_eq!(summarizer.request_count(), 0);
    }

    #[tokio::test]
    async fn over_threshold_keeps_system_summary_and_recent() {
        let summarizer = Arc::new(FakeSummarizer::replying("they talked about rust"));
        let c = compressor(summarizer.clone(), 5_000, 4);
        let input = history(12);
        let out = c.compress(input.clone()).await;

        assert!(out.compressed);
        assert_eq!(out.messages.len(), 1 + 1 + 4);
        assert_eq!(out.messages[0], input[0]);
        assert_eq!(out.messages[1].role, Role::System);
        let summary = out.messages[1].text();
        assert!(summary.starts_with(COMPRESS_MARKER));
        assert!(summary.contains("<compress>\nthey talked about rust\n</compress>"));
        assert_eq!(&out.messages[2..], &input[input.len() - 4..]);

        let kinds: Vec<&str> = out
            .sse_events
            .iter()
            .map(|e| match e {
                ControlEvent::CompressStart { .. } => "start",
                ControlEvent::CompressProgress { .. } => "progress",
                ControlEvent::CompressEnd { .. } => "end",
                ControlEvent::CompressInfo { .. } => "info",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["start", "progress", "end", "info"]);

        let req = summarizer.last_request().unwrap();
        assert_eq!(req.credentials.model, "gpt-4.1-nano");
        let transcript = req.messages[1].text();
        assert!(transcript.starts_with("[User] question 0"));
        assert!(!transcript.contains("you are naga"));
        assert!(!transcript.contains("question 8"));
    }

    #[tokio::test]
    async fn without_system_prompt_summary_leads() {
        let summarizer = Arc::new(FakeSummarizer::replying("s"));
        let c = compressor(summarizer, 5_000, 3);
        let input: Vec<ChatMessage> = history(10).into_iter().skip(1).collect();
        let out = c.compress(input.clone()).await;
        assert!(out.compressed);
        assert_eq!(out.messages.len(), 1 + 3);
        assert!(out.messages[0].text().starts_with(COMPRESS_MARKER));
        assert_eq!(&out.messages[1..], &input[input.len() - 3..]);
    }

    #[tokio::test]
    async fn summarizer_failure_returns_original_messages() {
        let summarizer = Arc::new(FakeSummarizer::failing("model down"));
        let c = compressor(summarizer.clone(), 5_000, 4);
        let input = history(12);
        let out = c.compress(input.clone()).await;
        assert!(!out.compressed);
        assert_eq!(out.messages, input);
        assert_eq!(summarizer.request_count(), 1);
        assert!(matches!(
            out.sse_events.last(),
            Some(ControlEvent::CompressEnd { text }) if text.contains("failed")
        ));
    }

    #[test]
    fn transcript_truncates_long_messages() {
        let msgs = vec![
            ChatMessage::user("a".repeat(10)),
            ChatMessage::assistant("short"),
        ];
        assert_eq!(
            format_transcript(&msgs, 4),
            "[User] aaaa...[truncated]\n\n[Assistant] short"
        );
    }

    #[test]
    fn heuristic_scales_characters() {
        let msgs = vec![ChatMessage::user("x".repeat(100))];
        assert_eq!(heuristic_tokens(&msgs), 120);
    }
}
