use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::llm::client_core::{
    OpenAIClient, auth_headers, backoff_delay, endpoint_for, should_retry,
};
use crate::llm::sse::StreamChunk;
use crate::llm::types::{ChatMessage, ChatRequest, ModelCredentials, Usage};
use crate::llm::{ChatModel, ChunkStream, LlmErrorKind};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StreamChoiceDelta {
    #[serde(default)]
    pub content: Option<String>,
    /// Thinking tokens emitted by reasoning models (DeepSeek style).
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub delta: StreamChoiceDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatStreamChunk {
    pub id: Option<String>,
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
    pub usage: Option<Usage>,
}

impl OpenAIClient {
    /// Stream a chat completion as `data:` frames in this client's framing.
    ///
    /// Only establishing the stream is retried. A 401 from the upstream is
    /// not an error: the stream yields a single `auth_expired` frame instead.
    pub async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
        temperature: f32,
        model_override: Option<&ModelCredentials>,
    ) -> Result<ChunkStream> {
        let (url, api_key, model, user_token) = match model_override {
            Some(o) => (
                endpoint_for(o.api_base.as_deref().unwrap_or(&self.base_url)),
                if o.api_key.is_empty() {
                    self.api_key.clone()
                } else {
                    o.api_key.clone()
                },
                if o.model.is_empty() {
                    self.model.clone()
                } else {
                    o.model.clone()
                },
                o.user_token.clone(),
            ),
            None => (self.endpoint(), self.api_key.clone(), self.model.clone(), None),
        };
        let req = ChatRequest {
            model,
            messages,
            temperature: Some(temperature),
            max_tokens: None,
            stream: Some(true),
            user_token,
        };
        let headers = auth_headers(&api_key)?;

        debug!(endpoint=%url, model=%req.model, messages=req.messages.len(), "sending chat.completions (stream)");

        let framing = self.framing;
        let mut attempt = 1usize;
        let max_attempts = self.llm_cfg.max_retries.saturating_add(1);
        let resp = loop {
            let resp_res = self
                .inner
                .post(url.clone())
                .headers(headers.clone())
                .json(&req)
                .send()
                .await;

            match resp_res {
                Err(e) => {
                    let err = anyhow::Error::new(e).context("send chat request (stream)");
                    let kind = crate::llm::classify_error(None, &err);
                    if should_retry(&kind) && attempt < max_attempts {
                        let wait = backoff_delay(self, attempt, None);
                        warn!(attempt, err=%err, wait_ms=%wait.as_millis(), "retrying stream establish after error");
                        tokio::time::sleep(wait).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(err.context(kind));
                }
                Ok(resp) => {
                    let status = resp.status();
                    if status == StatusCode::UNAUTHORIZED {
                        let text = resp.text().await.unwrap_or_default();
                        warn!(body=%text, "chat stream rejected with 401, reporting auth_expired");
                        let frame = StreamChunk::auth_expired("").to_frame(framing);
                        return Ok(Box::pin(futures::stream::iter(vec![Ok(frame)])));
                    }
                    if !status.is_success() {
                        let text = resp.text().await.unwrap_or_default();
                        let err = anyhow::anyhow!("chat error: {} - {}", status, text);
                        let kind = crate::llm::classify_error(Some(status), &err);
                        if should_retry(&kind) && attempt < max_attempts {
                            let wait = backoff_delay(self, attempt, None);
                            info!(attempt, status=%status.as_u16(), wait_ms=%wait.as_millis(), "retrying stream establish after HTTP error");
                            tokio::time::sleep(wait).await;
                            attempt += 1;
                            continue;
                        }
                        return Err(err.context(kind));
                    }
                    break resp;
                }
            }
        };

        let mut byte_stream = resp.bytes_stream();
        let mut buf = Vec::<u8>::new();
        let client = self.clone();
        let idle = Duration::from_millis(self.llm_cfg.read_idle_timeout_ms);

        let stream = async_stream::try_stream! {
            loop {
                let chunk = match tokio::time::timeout(idle, byte_stream.next()).await {
                    Err(_) => {
                        warn!(idle_ms=%idle.as_millis(), "chat stream idle timeout");
                        Err(anyhow::anyhow!(LlmErrorKind::Timeout))?;
                        break;
                    }
                    Ok(None) => break,
                    Ok(Some(Err(e))) => {
                        warn!(err=%e, "error reading chunk from byte stream");
                        Err(anyhow::Error::new(e).context(LlmErrorKind::Network))?;
                        break;
                    }
                    Ok(Some(Ok(bytes))) => bytes,
                };

                buf.extend_from_slice(&chunk);
                let mut start = 0usize;
                for i in 0..buf.len() {
                    if buf[i] != b'\n' {
                        continue;
                    }
                    let line = &buf[start..i];
                    start = i + 1;
                    let Ok(s) = std::str::from_utf8(line) else {
                        continue;
                    };
                    for frame in frames_for_line(&client, s.trim()) {
                        yield frame;
                    }
                }
                if start > 0 {
                    buf.drain(0..start);
                }
            }
            if let Ok(s) = std::str::from_utf8(&buf) {
                for frame in frames_for_line(&client, s.trim()) {
                    yield frame;
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Turn one upstream SSE line into zero or more outgoing frames.
fn frames_for_line(client: &OpenAIClient, line: &str) -> Vec<String> {
    if line.is_empty() {
        return Vec::new();
    }
    let payload = line.strip_prefix("data:").map(str::trim).unwrap_or(line);
    if payload == "[DONE]" {
        return Vec::new();
    }
    let Ok(json) = serde_json::from_str::<ChatStreamChunk>(payload) else {
        warn!(payload, "failed to parse stream chunk");
        return Vec::new();
    };
    if let Some(usage) = &json.usage {
        client.add_tokens(usage.total_tokens);
    }
    let mut out = Vec::new();
    for ch in json.choices {
        if let Some(r) = ch.delta.reasoning_content.filter(|s| !s.is_empty()) {
            out.push(StreamChunk::reasoning(r).to_frame(client.framing));
        }
        if let Some(c) = ch.delta.content.filter(|s| !s.is_empty()) {
            out.push(StreamChunk::content(c).to_frame(client.framing));
        }
    }
    out
}

#[async_trait]
impl ChatModel for OpenAIClient {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        model_override: Option<&ModelCredentials>,
    ) -> Result<ChunkStream> {
        self.chat_stream(messages.to_vec(), temperature, model_override)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::sse::{ChunkKind, SseFraming, decode_chunk};
    use futures::TryStreamExt;
    use httptest::{Expectation, Server, matchers::*, responders::*};

    fn sse_body(lines: &[&str]) -> String {
        lines
            .iter()
            .map(|l| format!("data: {l}\n\n"))
            .collect::<String>()
    }

    #[tokio::test]
    async fn stream_demuxes_content_and_reasoning() {
        let server = Server::run();
        let body = sse_body(&[
            r#"{"id":"1","choices":[{"index":0,"delta":{"reasoning_content":"thinking"}}]}"#,
            r#"{"id":"1","choices":[{"index":0,"delta":{"content":"Hel"}}]}"#,
            r#"{"id":"1","choices":[{"index":0,"delta":{"content":"lo"},"finish_reason":"stop"}]}"#,
            "[DONE]",
        ]);
        server.expect(
            Expectation::matching(request::method_path("POST", "/v1/chat/completions"))
                .respond_with(
                    status_code(200)
                        .insert_header("content-type", "text/event-stream")
                        .body(body),
                ),
        );
        let client = OpenAIClient::new(server.url_str("/"), "k", "m")
            .unwrap()
            .with_framing(SseFraming::Plain);
        let frames: Vec<String> = client
            .stream_chat(&[ChatMessage::user("hi")], 0.7, None)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        let chunks: Vec<StreamChunk> = frames.iter().filter_map(|f| decode_chunk(f)).collect();
        assert_eq!(
            chunks,
            vec![
                StreamChunk::reasoning("thinking"),
                StreamChunk::content("Hel"),
                StreamChunk::content("lo"),
            ]
        );
    }

    #[tokio::test]
    async fn unauthorized_yields_auth_expired_frame() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/v1/chat/completions"))
                .times(1)
                .respond_with(status_code(401).body("expired")),
        );
        let client = OpenAIClient::new(server.url_str("/"), "k", "m").unwrap();
        let frames: Vec<String> = client
            .stream_chat(&[ChatMessage::user("hi")], 0.7, None)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(
            decode_chunk(&frames[0]).map(|c| c.kind),
            Some(ChunkKind::AuthExpired)
        );
    }

    #[test]
    fn unparseable_lines_produce_no_frames() {
        let client = OpenAIClient::new("http://x", "k", "m").unwrap();
        assert!(frames_for_line(&client, "data: nope").is_empty());
        assert!(frames_for_line(&client, ": keep-alive").is_empty());
        assert!(frames_for_line(&client, "").is_empty());
    }
}
