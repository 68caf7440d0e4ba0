use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::config::LlmConfig;
use crate::llm::CompletionModel;
use crate::llm::sse::SseFraming;
use crate::llm::types::CompletionRequest;

mod network;

pub(crate) use network::{auth_headers, backoff_delay, should_retry};

#[derive(Debug, Clone)]
pub struct OpenAIClient {
    pub base_url: String,
    pub api_key: String,
    /// Model used by [`ChatModel`](crate::llm::ChatModel) when no override is given.
    pub model: String,
    pub(crate) inner: reqwest::Client,
    pub llm_cfg: LlmConfig,
    /// Framing of the chunk frames this client emits.
    pub framing: SseFraming,
    /// Tracks total tokens used by this client
    pub tokens_used: Arc<AtomicU32>,
}

impl OpenAIClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let inner = reqwest::Client::builder().build()?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            inner,
            llm_cfg: LlmConfig::default(),
            framing: SseFraming::default(),
            tokens_used: Arc::new(AtomicU32::new(0)),
        })
    }

    pub fn with_llm_config(mut self, cfg: LlmConfig) -> Self {
        // No total timeout on the client itself: streamed bodies may run for
        // minutes. One-shot calls set a per-request timeout instead.
        let builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .read_timeout(Duration::from_millis(cfg.read_idle_timeout_ms));
        if let Ok(c) = builder.build() {
            self.inner = c;
        }
        self.llm_cfg = cfg;
        self
    }

    pub fn with_framing(mut self, framing: SseFraming) -> Self {
        self.framing = framing;
        self
    }

    pub(crate) fn endpoint(&self) -> String {
        endpoint_for(&self.base_url)
    }

    /// Get the total number of tokens used by this client
    pub fn get_tokens_used(&self) -> u32 {
        self.tokens_used.load(Ordering::Relaxed)
    }

    /// Add tokens to the total count
    pub fn add_tokens(&self, tokens: u32) {
        self.tokens_used.fetch_add(tokens, Ordering::Relaxed);
    }

    /// One-shot (non streamed) completion with retries.
    pub async fn chat_once(&self, request: &CompletionRequest) -> Result<String> {
        network::chat_once(self, request).await
    }
}

pub(crate) fn endpoint_for(base_url: &str) -> String {
    let mut base = base_url.trim_end_matches('/').to_string();
    if let Some(pos) = base.rfind("/v1") {
        base.truncate(pos);
        base = base.trim_end_matches('/').to_string();
    }
    format!("{base}/v1/chat/completions")
}

#[async_trait]
impl CompletionModel for OpenAIClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        self.chat_once(&request).await
    }
}
