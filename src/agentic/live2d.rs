use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use super::directive::ToolCallDirective;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait Live2dNotifier: Send + Sync {
    async fn notify(&self, session_id: &str, action: &str) -> anyhow::Result<()>;
}

/// Posts `{session_id, action: "live2d_action", action_name}` to the UI
/// notification endpoint.
pub struct HttpLive2dNotifier {
    url: String,
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpLive2dNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_timeout(url, NOTIFY_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            http: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl Live2dNotifier for HttpLive2dNotifier {
    async fn notify(&self, session_id: &str, action: &str) -> anyhow::Result<()> {
        let payload = json!({
            "session_id": session_id,
            "action": "live2d_action",
            "action_name": action,
        });
        self.http
            .post(&self.url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Used when no notification endpoint is configured.
pub struct LogOnlyNotifier;

#[async_trait]
impl Live2dNotifier for LogOnlyNotifier {
    async fn notify(&self, session_id: &str, action: &str) -> anyhow::Result<()> {
        info!(session_id, action, "live2d action (no notify endpoint configured)");
        Ok(())
    }
}

pub fn notifier_for(notify_url: Option<&str>) -> Arc<dyn Live2dNotifier> {
    match notify_url.filter(|u| !u.is_empty()) {
        Some(url) => Arc::new(HttpLive2dNotifier::new(url)),
        None => Arc::new(LogOnlyNotifier),
    }
}

/// Deliver every action on a detached task. Directives without an `action`
/// are dropped.
pub fn spawn_actions(
    notifier: Arc<dyn Live2dNotifier>,
    calls: Vec<ToolCallDirective>,
    session_id: &str,
) {
    let actions: Vec<String> = calls
        .iter()
        .filter_map(|c| c.get_str("action").map(str::to_string))
        .collect();
    if actions.is_empty() {
        return;
    }
    let session_id = session_id.to_string();
    tokio::spawn(async move {
        for action in actions {
            debug!(action = %action, "sending live2d action");
            if let Err(e) = notifier.notify(&session_id, &action).await {
                debug!(err = %format!("{e:#}"), action = %action, "live2d delivery failed");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use httptest::matchers::*;
    use httptest::responders::*;
    use httptest::{Expectation, Server};
    use serde_json::Value;

    #[tokio::test]
    async fn http_notifier_posts_action_payload() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/ui_notification"),
                request::body(json_decoded(eq(json!({
                    "session_id": "s1",
                    "action": "live2d_action",
                    "action_name": "wave",
                })))),
            ])
            .respond_with(status_code(200)),
        );
        let notifier = HttpLive2dNotifier::new(server.url_str("/ui_notification"));
        notifier.notify("s1", "wave").await.unwrap();
    }

    #[tokio::test]
    async fn http_notifier_reports_non_success() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/ui_notification"))
                .respond_with(status_code(500)),
        );
        let notifier = HttpLive2dNotifier::new(server.url_str("/ui_notification"));
        assert!(notifier.notify("s1", "wave").await.is_err());
    }

    #[tokio::test]
    async fn http_notifier_gives_up_after_its_timeout() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/ui_notification"))
                .respond_with(delay_and_then(Duration::from_secs(2), status_code(200))),
        );
        let notifier = HttpLive2dNotifier::with_timeout(
            server.url_str("/ui_notification"),
            Duration::from_millis(100),
        );
        let started = std::time::Instant::now();
        assert!(notifier.notify("s1", "wave").await.is_err());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn spawned_actions_skip_empty_action() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/ui_notification"),
                request::body(json_decoded(|v: &Value| v["action_name"] == "nod")),
            ])
            .times(1)
            .respond_with(status_code(200)),
        );
        let calls: Vec<ToolCallDirective> = vec![
            serde_json::from_value(json!({"agentType": "live2d", "action": ""})).unwrap(),
            serde_json::from_value(json!({"agentType": "live2d", "action": "nod"})).unwrap(),
        ];
        spawn_actions(
            notifier_for(Some(&server.url_str("/ui_notification"))),
            calls,
            "s1",
        );
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
}
