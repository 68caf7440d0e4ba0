mod client_core;
pub mod sse;
mod stream;
pub mod types;

use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use reqwest::StatusCode;

pub use client_core::*;
pub use sse::{ChunkKind, SseFraming, StreamChunk};
pub use types::*;

/// Stream of `data: ...\n\n` frames, each decoding to a [`StreamChunk`].
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Streaming chat capability consumed by the agentic loop.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Start a streamed completion over `messages`. Transport errors while
    /// establishing or reading the stream are returned as `Err`; an expired
    /// credential is reported in-band as an `auth_expired` chunk.
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        model_override: Option<&ModelCredentials>,
    ) -> Result<ChunkStream>;
}

/// One-shot completion capability used for summarisation and routing.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlmErrorKind {
    #[error("rate limited")]
    RateLimited,
    #[error("server error")]
    Server,
    #[error("network error")]
    Network,
    #[error("request timed out")]
    Timeout,
    #[error("client error")]
    Client,
    #[error("failed to decode response")]
    Deserialize,
    #[error("cancelled")]
    Cancelled,
    #[error("credentials expired")]
    AuthExpired,
    #[error("unknown error")]
    Unknown,
}

pub fn classify_error(status: Option<StatusCode>, err: &anyhow::Error) -> LlmErrorKind {
    if let Some(st) = status {
        if st == StatusCode::TOO_MANY_REQUESTS {
            return LlmErrorKind::RateLimited;
        }
        if st == StatusCode::UNAUTHORIZED {
            return LlmErrorKind::AuthExpired;
        }
        if st.is_server_error() {
            return LlmErrorKind::Server;
        }
        if st.is_client_error() {
            return LlmErrorKind::Client;
        }
    }
    if let Some(kind) = err.downcast_ref::<LlmErrorKind>() {
        return kind.clone();
    }
    if let Some(e) = err.downcast_ref::<reqwest::Error>() {
        if e.is_timeout() {
            return LlmErrorKind::Timeout;
        }
        if e.is_connect() || e.is_body() || e.is_request() {
            return LlmErrorKind::Network;
        }
        if e.is_decode() {
            return LlmErrorKind::Deserialize;
        }
    }
    LlmErrorKind::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_take_precedence() {
        let e = anyhow::anyhow!("boom");
        assert_eq!(
            classify_error(Some(StatusCode::TOO_MANY_REQUESTS), &e),
            LlmErrorKind::RateLimited
        );
        assert_eq!(
            classify_error(Some(StatusCode::UNAUTHORIZED), &e),
            LlmErrorKind::AuthExpired
        );
        assert_eq!(
            classify_error(Some(StatusCode::BAD_GATEWAY), &e),
            LlmErrorKind::Server
        );
        assert_eq!(
            classify_error(Some(StatusCode::BAD_REQUEST), &e),
            LlmErrorKind::Client
        );
    }

    #[test]
    fn wrapped_kind_is_recovered() {
        let e = anyhow::Error::new(LlmErrorKind::Timeout);
        assert_eq!(classify_error(None, &e), LlmErrorKind::Timeout);
        assert_eq!(
            classify_error(None, &anyhow::anyhow!("x")),
            LlmErrorKind::Unknown
        );
    }
}
