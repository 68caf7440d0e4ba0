//! HTTP client for the remote agent gateway (OpenClaw).
//!
//! Holds the process-wide state the gateway path needs: one pooled HTTP
//! client, a TTL-bound health cache and the one-shot auto-start flag.
//! Concurrent callers share a single auto-start attempt: whoever arrives
//! while it is in flight waits for it and then re-checks health.
//! Nothing resets that state except a new `GatewayClient` or
//! [`GatewayClient::reset_state`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::DispatchError;
use crate::agentic::directive::{GatewayMessage, GatewayToolCall};
use crate::config::GatewayConfig;

const NO_RESULT_YET: &str = "Task submitted, no result yet";
const ERROR_BODY_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy)]
struct HealthSnapshot {
    checked_at: Instant,
    healthy: bool,
}

#[derive(Debug)]
pub struct GatewayClient {
    cfg: GatewayConfig,
    http: OnceLock<reqwest::Client>,
    health: Mutex<Option<HealthSnapshot>>,
    autostart_attempted: AtomicBool,
    autostart_succeeded: AtomicBool,
    autostart_lock: tokio::sync::Mutex<()>,
}

impl GatewayClient {
    pub fn new(cfg: GatewayConfig) -> Self {
        Self {
            cfg,
            http: OnceLock::new(),
            health: Mutex::new(None),
            autostart_attempted: AtomicBool::new(false),
            autostart_succeeded: AtomicBool::new(false),
            autostart_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.cfg
    }

    fn http(&self) -> &reqwest::Client {
        self.http.get_or_init(|| {
            reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(self.cfg.connect_timeout_secs))
                .build()
                .unwrap_or_else(|e| {
                    warn!(err = %e, "gateway http client build failed, using defaults");
                    reqwest::Client::new()
                })
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.cfg.base_url.trim_end_matches('/'), path)
    }

    /// Forget the cached health result and allow another auto-start attempt.
    pub fn reset_state(&self) {
        self.store_health(None);
        self.autostart_attempted.store(false, Ordering::SeqCst);
        self.autostart_succeeded.store(false, Ordering::SeqCst);
    }

    pub fn autostart_attempted(&self) -> bool {
        self.autostart_attempted.load(Ordering::SeqCst)
    }

    fn cached_health(&self) -> Option<bool> {
        let ttl = Duration::from_secs(self.cfg.health_ttl_secs);
        let snapshot = *self.health.lock().unwrap_or_else(|p| p.into_inner());
        snapshot
            .filter(|snap| snap.checked_at.elapsed() < ttl)
            .map(|snap| snap.healthy)
    }

    fn store_health(&self, healthy: Option<bool>) {
        let mut guard = self.health.lock().unwrap_or_else(|p| p.into_inner());
        *guard = healthy.map(|healthy| HealthSnapshot {
            checked_at: Instant::now(),
            healthy,
        });
    }

    /// `GET /health`; healthy only when `success` is true and
    /// `health.status == "healthy"`. Any failure counts as unhealthy.
    pub async fn probe(&self) -> bool {
        let res = self
            .http()
            .get(self.url("/health"))
            .timeout(Duration::from_secs(self.cfg.health_timeout_secs))
            .send()
            .await;
        let body: Value = match res {
            Ok(resp) if resp.status().is_success() => match resp.json().await {
                Ok(v) => v,
                Err(e) => {
                    debug!(err = %e, "gateway health body not json");
                    return false;
                }
            },
            Ok(resp) => {
                debug!(status = %resp.status(), "gateway health non-success");
                return false;
            }
            Err(e) => {
                debug!(err = %e, "gateway health probe failed");
                return false;
            }
        };
        body["success"].as_bool() == Some(true) && body["health"]["status"] == "healthy"
    }

    /// Health with a TTL cache; unhealthy results are cached too.
    pub async fn is_healthy(&self) -> bool {
        if let Some(healthy) = self.cached_health() {
            return healthy;
        }
        let healthy = self.probe().await;
        self.store_health(Some(healthy));
        healthy
    }

    /// Make sure the gateway is up, trying one auto-start per client lifetime.
    pub async fn ensure_available(&self) -> Result<(), DispatchError> {
        if self.is_healthy().await {
            return Ok(());
        }

        let _guard = self.autostart_lock.lock().await;
        if self.autostart_attempted.swap(true, Ordering::SeqCst) {
            // Another call already ran the attempt, possibly while we waited.
            if self.autostart_succeeded.load(Ordering::SeqCst) {
                let healthy = self.probe().await;
                self.store_health(Some(healthy));
                if healthy {
                    return Ok(());
                }
            }
            return Err(DispatchError::Unavailable(self.cfg.base_url.clone()));
        }

        info!(url = %self.cfg.base_url, "gateway unhealthy, attempting auto-start");
        if let Err(e) = self
            .http()
            .post(self.url("/start"))
            .timeout(Duration::from_secs(self.cfg.request_timeout_secs))
            .send()
            .await
        {
            warn!(err = %e, "gateway start request failed");
        }

        let interval = Duration::from_secs(self.cfg.autostart_poll_interval_secs);
        for attempt in 1..=self.cfg.autostart_poll_attempts {
            tokio::time::sleep(interval).await;
            if self.probe().await {
                info!(attempt, "gateway became healthy after auto-start");
                self.autostart_succeeded.store(true, Ordering::SeqCst);
                self.store_health(Some(true));
                return Ok(());
            }
            debug!(attempt, "gateway still unhealthy");
        }
        warn!(
            attempts = self.cfg.autostart_poll_attempts,
            "gateway auto-start gave up"
        );
        self.store_health(Some(false));
        Err(DispatchError::Unavailable(self.cfg.base_url.clone()))
    }

    async fn post_json(&self, path: &str, payload: &Value) -> Result<Value, DispatchError> {
        let resp = self
            .http()
            .post(self.url(path))
            .timeout(Duration::from_secs(self.cfg.request_timeout_secs))
            .json(payload)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(DispatchError::Http {
                status: status.as_u16(),
                body: text.chars().take(ERROR_BODY_LIMIT).collect(),
            });
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// `POST /send`, returning the agent's replies.
    pub async fn send_message(
        &self,
        msg: &GatewayMessage,
        session_id: &str,
    ) -> Result<String, DispatchError> {
        self.ensure_available().await?;
        let session_key = msg
            .session_key
            .clone()
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| format!("naga_{session_id}"));
        let payload = json!({
            "message": msg.outgoing_text(),
            "session_key": session_key,
            "name": self.cfg.agent_name,
            "wake_mode": "now",
            "timeout_seconds": self.cfg.remote_timeout_seconds,
        });
        debug!(session_key = %session_key, task_type = %msg.task_type, "sending gateway message");
        let body = self.post_json("/send", &payload).await?;
        if body["success"].as_bool() == Some(false) {
            return Err(DispatchError::Gateway(error_text(&body)));
        }
        Ok(reply_text(&body))
    }

    /// `POST /tools/invoke`, unwrapping the tool output into plain text.
    pub async fn invoke_tool(&self, call: &GatewayToolCall) -> Result<String, DispatchError> {
        self.ensure_available().await?;
        let payload = json!({ "tool": call.tool_name, "args": call.args });
        debug!(tool = %call.tool_name, "invoking gateway tool");
        let body = self.post_json("/tools/invoke", &payload).await?;
        if body["success"].as_bool() != Some(true) {
            return Err(DispatchError::Gateway(error_text(&body)));
        }
        Ok(unwrap_tool_result(&body["result"]))
    }
}

fn error_text(body: &Value) -> String {
    body["error"]
        .as_str()
        .or_else(|| body["detail"].as_str())
        .unwrap_or("unknown error")
        .to_string()
}

fn reply_text(body: &Value) -> String {
    if let Some(replies) = body["replies"].as_array() {
        let joined: Vec<&str> = replies.iter().filter_map(Value::as_str).collect();
        if !joined.is_empty() {
            return joined.join("\n");
        }
    }
    match body["reply"].as_str() {
        Some(reply) if !reply.is_empty() => reply.to_string(),
        _ => NO_RESULT_YET.to_string(),
    }
}

/// `result.result.content[].text`, else `result.text`, else the JSON itself.
fn unwrap_tool_result(result: &Value) -> String {
    if let Some(content) = result["result"]["content"].as_array() {
        let texts: Vec<&str> = content
            .iter()
            .filter_map(|item| item["text"].as_str())
            .collect();
        if !texts.is_empty() {
            return texts.join("\n");
        }
    }
    if let Some(text) = result["text"].as_str() {
        return text.to_string();
    }
    match result {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies_are_joined_then_reply_then_placeholder() {
        assert_eq!(reply_text(&json!({"replies": ["a", "b"]})), "a\nb");
        assert_eq!(reply_text(&json!({"replies": [], "reply": "single"})), "single");
        assert_eq!(reply_text(&json!({"success": true})), NO_RESULT_YET);
    }

    #[test]
    fn tool_results_unwrap_known_envelopes() {
        let nested = json!({"ok": true, "result": {"content": [
            {"type": "text", "text": "line 1"},
            {"type": "image", "data": "..."},
            {"type": "text", "text": "line 2"}
        ]}});
        assert_eq!(unwrap_tool_result(&nested), "line 1\nline 2");
        assert_eq!(unwrap_tool_result(&json!({"text": "flat"})), "flat");
        assert_eq!(unwrap_tool_result(&json!({"n": 1})), r#"{"n":1}"#);
    }

    #[test]
    fn error_text_prefers_error_then_detail() {
        assert_eq!(error_text(&json!({"error": "boom", "detail": "d"})), "boom");
        assert_eq!(error_text(&json!({"detail": "d"})), "d");
        assert_eq!(error_text(&json!({})), "unknown error");
    }
}
