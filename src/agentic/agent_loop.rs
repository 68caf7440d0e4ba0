//! The multi-round generate, parse, dispatch, fold-back loop.
//!
//! Each round streams the model's answer straight through to the caller
//! while accumulating it, lifts tool directives out of the accumulated text,
//! runs them, and appends the assistant text plus the tool results to the
//! history before the next round. The loop ends when a round produces no
//! actionable directive. Running out of rounds, or too many consecutive
//! all-failing rounds, ends it with one summary round instead, in which
//! tools are off and the output is never parsed.

use std::sync::Arc;

use anyhow::Result;
use async_stream::try_stream;
use futures::{Stream, StreamExt};
use tracing::{debug, info, warn};

use super::compressor::ContextCompressor;
use super::directive::{ToolCallDirective, ToolResult};
use super::dispatch::{ToolDispatcher, format_tool_results};
use super::events::{ControlEvent, LoopEvent, RawChunk};
use super::live2d::{Live2dNotifier, spawn_actions};
use super::parser::parse_tool_calls;
use crate::config::AgenticConfig;
use crate::llm::{ChatMessage, ChatModel, ChunkKind, ModelCredentials};

const TOOL_ONLY_PLACEHOLDER: &str = "(calling tools)";
const NO_RESULTS: &str = "No tool produced a result in this round.";

const SUMMARY_INSTRUCTION: &str = "Tool calling is now finished. Do not emit any more tool calls \
or ```tool blocks. Using the conversation and the tool results above, answer the user's request \
directly. If the tools failed or returned nothing useful, say so plainly, explain what could not \
be done, and give the best answer you can without them.";

pub struct AgenticLoop {
    model: Arc<dyn ChatModel>,
    dispatcher: Arc<ToolDispatcher>,
    compressor: Arc<ContextCompressor>,
    live2d: Arc<dyn Live2dNotifier>,
    cfg: AgenticConfig,
    temperature: f32,
    model_override: Option<ModelCredentials>,
}

/// What one streamed generation left behind.
#[derive(Debug, Default)]
struct RoundText {
    content: String,
    reasoning: String,
}

impl AgenticLoop {
    pub fn new(
        model: Arc<dyn ChatModel>,
        dispatcher: Arc<ToolDispatcher>,
        compressor: Arc<ContextCompressor>,
        live2d: Arc<dyn Live2dNotifier>,
        cfg: AgenticConfig,
        temperature: f32,
    ) -> Self {
        Self {
            model,
            dispatcher,
            compressor,
            live2d,
            cfg,
            temperature,
            model_override: None,
        }
    }

    /// Route generation to another model (vision models and the like).
    pub fn with_model_override(mut self, model_override: Option<ModelCredentials>) -> Self {
        self.model_override = model_override;
        self
    }

    pub fn config(&self) -> &AgenticConfig {
        &self.cfg
    }

    /// Drive the loop over `messages`, which is extended in place with each
    /// round's assistant text and tool results. The stream yields model
    /// chunks verbatim interleaved with control events; it only fails when
    /// the model call itself fails.
    pub fn run<'a>(
        &'a self,
        messages: &'a mut Vec<ChatMessage>,
        session_id: &'a str,
    ) -> impl Stream<Item = Result<LoopEvent>> + 'a {
        try_stream! {
            let max_rounds = self.cfg.max_rounds;
            let mut failing_rounds = 0usize;
            let mut finished = false;

            for round in 1..=max_rounds {
                for ev in self.compress_into(messages).await {
                    yield ev;
                }
                if round > 1 {
                    yield LoopEvent::from(ControlEvent::RoundStart { round, summary: false });
                }
                info!(round, messages = messages.len(), "round start");

                let mut text = RoundText::default();
                let mut chunks = self
                    .model
                    .stream_chat(messages, self.temperature, self.model_override.as_ref())
                    .await?;
                while let Some(frame) = chunks.next().await {
                    let chunk = RawChunk::new(frame?);
                    let expired = text.absorb(&chunk);
                    yield LoopEvent::Chunk(chunk);
                    if expired {
                        warn!(round, "credentials expired mid-stream, ending round");
                        break;
                    }
                }
                debug!(
                    round,
                    content_chars = text.content.chars().count(),
                    reasoning_chars = text.reasoning.chars().count(),
                    "round generation finished"
                );

                let (clean, directives) = parse_tool_calls(&text.content);
                let had_directives = !directives.is_empty();
                let (live2d, actionable): (Vec<ToolCallDirective>, Vec<ToolCallDirective>) =
                    directives.into_iter().partition(ToolCallDirective::is_live2d);
                if !live2d.is_empty() {
                    debug!(round, count = live2d.len(), "forwarding live2d actions");
                    spawn_actions(self.live2d.clone(), live2d, session_id);
                }
                if had_directives && clean != text.content {
                    yield LoopEvent::from(ControlEvent::ContentClean { text: clean.clone() });
                }

                if actionable.is_empty() {
                    info!(round, "no tool calls, loop done");
                    yield LoopEvent::from(ControlEvent::RoundEnd { round, has_more: false });
                    finished = true;
                    break;
                }

                info!(round, count = actionable.len(), "executing tool calls");
                let calls = actionable
                    .iter()
                    .map(|d| d.describe(self.cfg.call_preview_chars))
                    .collect();
                yield LoopEvent::from(ControlEvent::ToolCalls { calls });

                let results = self.dispatcher.execute_all(actionable, session_id).await;
                let previews = results
                    .iter()
                    .map(|r| r.preview(self.cfg.result_preview_chars))
                    .collect();
                yield LoopEvent::from(ControlEvent::ToolResults { results: previews });

                if results.iter().all(ToolResult::is_error) {
                    failing_rounds += 1;
                    warn!(round, failing_rounds, "every tool call in the round failed");
                } else {
                    failing_rounds = 0;
                }
                fold_back(messages, clean, &results);

                yield LoopEvent::from(ControlEvent::RoundEnd { round, has_more: true });
                if failing_rounds >= self.cfg.max_consecutive_failures {
                    warn!(round, failing_rounds, "too many failing rounds, forcing summary");
                    break;
                }
            }

            if !finished {
                let round = max_rounds + 1;
                for ev in self.compress_into(messages).await {
                    yield ev;
                }
                info!(round, "summary round");
                yield LoopEvent::from(ControlEvent::RoundStart { round, summary: true });
                messages.push(ChatMessage::user(SUMMARY_INSTRUCTION));

                let mut chunks = self
                    .model
                    .stream_chat(messages, self.temperature, self.model_override.as_ref())
                    .await?;
                while let Some(frame) = chunks.next().await {
                    let chunk = RawChunk::new(frame?);
                    let expired = chunk.kind() == Some(ChunkKind::AuthExpired);
                    yield LoopEvent::Chunk(chunk);
                    if expired {
                        warn!(round, "credentials expired mid-stream, ending summary");
                        break;
                    }
                }
                yield LoopEvent::from(ControlEvent::RoundEnd { round, has_more: false });
            }
        }
    }

    /// Compress `messages` in place, returning the events to forward.
    async fn compress_into(&self, messages: &mut Vec<ChatMessage>) -> Vec<LoopEvent> {
        let outcome = self.compressor.compress(std::mem::take(messages)).await;
        *messages = outcome.messages;
        if outcome.compressed {
            info!(messages = messages.len(), "history compressed");
        }
        outcome.sse_events.into_iter().map(LoopEvent::from).collect()
    }
}

impl RoundText {
    /// Accumulate a chunk; returns true when it signals expired credentials.
    fn absorb(&mut self, chunk: &RawChunk) -> bool {
        let Some(decoded) = &chunk.decoded else {
            return false;
        };
        match decoded.kind {
            ChunkKind::Content => self.content.push_str(&decoded.text),
            ChunkKind::Reasoning => self.reasoning.push_str(&decoded.text),
            ChunkKind::AuthExpired => return true,
        }
        false
    }
}

/// Append the round's assistant text and the results that answer it.
fn fold_back(messages: &mut Vec<ChatMessage>, clean: String, results: &[ToolResult]) {
    let assistant = if clean.trim().is_empty() {
        TOOL_ONLY_PLACEHOLDER.to_string()
    } else {
        clean
    };
    messages.push(ChatMessage::assistant(assistant));
    let feedback = if results.is_empty() {
        NO_RESULTS.to_string()
    } else {
        format_tool_results(results)
    };
    messages.push(ChatMessage::user(feedback));
}
