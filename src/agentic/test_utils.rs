use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use super::compressor::TokenCounter;
use super::directive::ToolCallDirective;
use super::live2d::Live2dNotifier;
use crate::auth::{AuthContext, AuthState};
use crate::llm::{
    ChatMessage, ChatModel, ChunkStream, CompletionModel, CompletionRequest, ModelCredentials,
    SseFraming, StreamChunk,
};

pub fn anonymous_auth() -> Arc<dyn AuthContext> {
    Arc::new(AuthState::new(
        "https://biz.example/v1",
        "https://api.example/v1",
        "sk-default",
    ))
}

pub fn logged_in_auth() -> Arc<dyn AuthContext> {
    Arc::new(
        AuthState::new(
            "https://biz.example/v1",
            "https://api.example/v1",
            "sk-default",
        )
        .with_token(Some("tok".into())),
    )
}

/// What the model does on one call.
#[derive(Debug, Clone)]
pub enum Reply {
    Frames(Vec<String>),
    Fail(String),
}

impl Reply {
    /// Content split into two chunks so callers must accumulate.
    pub fn text(text: &str) -> Self {
        let mid = text
            .char_indices()
            .nth(text.chars().count() / 2)
            .map(|(i, _)| i)
            .unwrap_or(0);
        let (a, b) = text.split_at(mid);
        Reply::Frames(
            [a, b]
                .iter()
                .filter(|s| !s.is_empty())
                .map(|s| StreamChunk::content(*s).to_frame(SseFraming::Base64))
                .collect(),
        )
    }

    pub fn chunks(chunks: Vec<StreamChunk>) -> Self {
        Reply::Frames(
            chunks
                .iter()
                .map(|c| c.to_frame(SseFraming::Base64))
                .collect(),
        )
    }
}

/// Replays one [`Reply`] per call; the last reply repeats once the script
/// runs out. Records the message list of every call.
pub struct ScriptedModel {
    replies: Vec<Reply>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(reply: Reply) -> Self {
        Self::new(vec![reply])
    }

    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        _temperature: f32,
        _model_override: Option<&ModelCredentials>,
    ) -> Result<ChunkStream> {
        let idx = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(messages.to_vec());
            calls.len() - 1
        };
        let reply = self
            .replies
            .get(idx)
            .or(self.replies.last())
            .cloned()
            .unwrap_or(Reply::Frames(Vec::new()));
        match reply {
            Reply::Frames(frames) => Ok(Box::pin(futures::stream::iter(
                frames.into_iter().map(Ok),
            ))),
            Reply::Fail(msg) => Err(anyhow!(msg)),
        }
    }
}

type RegistryFn = dyn Fn(&str, &ToolCallDirective) -> Result<String> + Send + Sync;

/// Registry backed by a closure; records `(service, directive)` per call.
pub struct FakeRegistry {
    handler: Box<RegistryFn>,
    calls: Mutex<Vec<(String, ToolCallDirective)>>,
}

impl FakeRegistry {
    pub fn new(
        handler: impl Fn(&str, &ToolCallDirective) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn ok(text: &'static str) -> Self {
        Self::new(move |_, _| Ok(text.to_string()))
    }

    pub fn failing(msg: &'static str) -> Self {
        Self::new(move |_, _| Err(anyhow!(msg)))
    }

    pub fn calls(&self) -> Vec<(String, ToolCallDirective)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl super::dispatch::ToolRegistry for FakeRegistry {
    async fn call(&self, service_name: &str, directive: &ToolCallDirective) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((service_name.to_string(), directive.clone()));
        (self.handler)(service_name, directive)
    }
}

pub struct FakeSummarizer {
    reply: Result<String, String>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl FakeSummarizer {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(msg: &str) -> Self {
        Self {
            reply: Err(msg.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl CompletionModel for FakeSummarizer {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request);
        self.reply.clone().map_err(|e| anyhow!(e))
    }
}

/// Reports the same token count for any input.
pub struct FixedCounter(pub usize);

impl TokenCounter for FixedCounter {
    fn count(&self, _messages: &[ChatMessage]) -> usize {
        self.0
    }
}

/// Records actions; optionally fails every delivery.
#[derive(Default)]
pub struct RecordingNotifier {
    pub fail: bool,
    actions: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn actions(&self) -> Vec<String> {
        self.actions.lock().unwrap().clone()
    }
}

#[async_trait]
impl Live2dNotifier for RecordingNotifier {
    async fn notify(&self, _session_id: &str, action: &str) -> Result<()> {
        self.actions.lock().unwrap().push(action.to_string());
        if self.fail {
            return Err(anyhow!("ui offline"));
        }
        Ok(())
    }
}
