use anyhow::Result;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{OpenAIClient, endpoint_for};
use crate::llm::LlmErrorKind;
use crate::llm::types::{ChatRequest, ChatResponse, CompletionRequest};

pub(crate) fn auth_headers(api_key: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert("X-Title", HeaderValue::from_static("NagaAgent"));
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {api_key}"))?,
    );
    Ok(headers)
}

pub async fn chat_once(client: &OpenAIClient, request: &CompletionRequest) -> Result<String> {
    let creds = &request.credentials;
    let url = endpoint_for(creds.api_base.as_deref().unwrap_or(&client.base_url));
    let api_key = if creds.api_key.is_empty() {
        client.api_key.as_str()
    } else {
        creds.api_key.as_str()
    };
    let model = if creds.model.is_empty() {
        client.model.clone()
    } else {
        creds.model.clone()
    };
    let req = ChatRequest {
        model,
        messages: request.messages.clone(),
        temperature: Some(request.temperature),
        max_tokens: request.max_tokens,
        stream: None,
        user_token: creds.user_token.clone(),
    };
    let headers = auth_headers(api_key)?;
    let timeout = request
        .timeout
        .unwrap_or(Duration::from_millis(client.llm_cfg.request_timeout_ms));

    debug!(endpoint=%url, model=%req.model, messages=req.messages.len(), "sending chat.completions (once)");

    let max_attempts = client.llm_cfg.max_retries.saturating_add(1);
    let mut last_err: Option<anyhow::Error> = None;

    for attempt in 1..=max_attempts {
        let resp_res = client
            .inner
            .post(&url)
            .headers(headers.clone())
            .timeout(timeout)
            .json(&req)
            .send()
            .await;

        let resp = match resp_res {
            Ok(resp) => resp,
            Err(e) => {
                error!(attempt, err=%e, "llm chat_once send error");
                let err = anyhow::Error::new(e).context("send chat request");
                let kind = crate::llm::classify_error(None, &err);
                last_err = Some(err);
                if should_retry(&kind) && attempt < max_attempts {
                    let wait = backoff_delay(client, attempt, None);
                    info!(attempt, kind=?kind, wait_ms=%wait.as_millis(), "retrying chat_once");
                    tokio::time::sleep(wait).await;
                    continue;
                }
                break;
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            let text = resp.text().await.unwrap_or_default();
            error!(attempt, status=%status.as_u16(), body=%text, "llm chat_once non-success status");
            let e = anyhow::anyhow!("chat error: {} - {}", status, text);
            let kind = crate::llm::classify_error(Some(status), &e);
            if should_retry(&kind) && attempt < max_attempts {
                let wait = backoff_delay(client, attempt, retry_after);
                info!(attempt, kind=?kind, wait_ms=%wait.as_millis(), "retrying chat_once");
                tokio::time::sleep(wait).await;
                last_err = Some(e);
                continue;
            }
            return Err(e.context(kind));
        }

        let body: ChatResponse = match resp.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!(attempt, err=%e, "llm chat_once decode error");
                last_err = Some(anyhow::Error::new(e).context(LlmErrorKind::Deserialize));
                if attempt < max_attempts {
                    tokio::time::sleep(backoff_delay(client, attempt, None)).await;
                    continue;
                }
                break;
            }
        };

        if let Some(usage) = &body.usage {
            client.add_tokens(usage.total_tokens);
        }

        return body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| anyhow::anyhow!("no choices returned"));
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("unknown error")))
}

pub(crate) fn should_retry(kind: &LlmErrorKind) -> bool {
    matches!(
        kind,
        LlmErrorKind::RateLimited
            | LlmErrorKind::Server
            | LlmErrorKind::Network
            | LlmErrorKind::Timeout
    )
}

pub(crate) fn backoff_delay(
    client: &OpenAIClient,
    attempt: usize,
    retry_after_secs: Option<u64>,
) -> Duration {
    if client.llm_cfg.respect_retry_after
        && let Some(secs) = retry_after_secs
    {
        return Duration::from_secs(secs);
    }
    let base = client.llm_cfg.retry_base_ms;
    let exp = base.saturating_mul(1u64 << (attempt.saturating_sub(1).min(16) as u32));
    let jitter = client.llm_cfg.retry_jitter_ms as i64;
    let half = jitter / 2;
    let rnd = fastrand::i64(-half..=half).max(0) as u64;
    Duration::from_millis(exp.saturating_add(rnd))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;

    #[test]
    fn backoff_grows_exponentially_without_jitter() {
        let client = OpenAIClient::new("http://x", "k", "m")
            .unwrap()
            .with_llm_config(LlmConfig {
                retry_base_ms: 100,
                retry_jitter_ms: 0,
                ..LlmConfig::default()
            });
        assert_eq!(backoff_delay(&client, 1, None), Duration::from_millis(100));
        assert_eq!(backoff_delay(&client, 3, None), Duration::from_millis(400));
        assert_eq!(backoff_delay(&client, 2, Some(7)), Duration::from_secs(7));
    }

    #[test]
    fn only_transient_kinds_retry() {
        assert!(should_retry(&LlmErrorKind::Server));
        assert!(should_retry(&LlmErrorKind::Timeout));
        assert!(!should_retry(&LlmErrorKind::Client));
        assert!(!should_retry(&LlmErrorKind::AuthExpired));
    }
}
