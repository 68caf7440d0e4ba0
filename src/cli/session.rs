use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use tracing::{info, warn};

use super::EventPrinter;
use crate::agentic::live2d::notifier_for;
use crate::agentic::{
    AgenticLoop, ContextCompressor, GatewayClient, IntentRouter, TiktokenCounter, ToolCatalog,
    ToolDispatcher, ToolInfo, build_system_prompt,
};
use crate::auth::{AuthContext, AuthState};
use crate::config::AppConfig;
use crate::llm::{ChatMessage, OpenAIClient, Role};
use crate::mcp::McpRegistry;

const BASE_PROMPT: &str = "You are Naga, a helpful assistant. Answer in the user's language. \
Use tools when the request needs fresh information or an action in the outside world; otherwise \
answer directly.";

pub struct Session {
    cfg: AppConfig,
    client: Arc<OpenAIClient>,
    agentic: AgenticLoop,
    router: Option<IntentRouter>,
    registry: Arc<McpRegistry>,
    history: Vec<ChatMessage>,
    session_id: String,
    raw: bool,
}

impl Session {
    pub fn from_config(cfg: AppConfig, session_id: Option<String>) -> Result<Self> {
        let default_key = cfg.api_key.clone().unwrap_or_default();
        let auth = Arc::new(
            AuthState::new(
                cfg.auth.business_url.clone().unwrap_or_default(),
                cfg.base_url.clone(),
                default_key,
            )
            .with_token(cfg.auth.access_token.clone()),
        );
        if !auth.is_authenticated() && cfg.api_key.is_none() {
            warn!("no API key or access token configured; model calls will likely fail");
        }

        // Logged-in sessions talk to the business gateway with their token.
        let main = auth.aux_credentials(&cfg.model);
        let client = Arc::new(
            OpenAIClient::new(
                main.api_base.unwrap_or_else(|| cfg.base_url.clone()),
                main.api_key,
                main.model,
            )
            .context("build chat client")?
            .with_llm_config(cfg.llm.clone())
            .with_framing(cfg.agentic.sse_framing),
        );

        let registry = Arc::new(McpRegistry::new(cfg.mcp_servers.clone()));
        let gateway = Arc::new(GatewayClient::new(cfg.gateway.clone()));
        let dispatcher = Arc::new(ToolDispatcher::new(
            registry.clone(),
            gateway,
            auth.clone(),
            cfg.dispatch.clone(),
        ));
        let compressor = Arc::new(ContextCompressor::new(
            client.clone(),
            auth.clone(),
            Arc::new(TiktokenCounter::for_model(&cfg.model)),
            cfg.compression.clone(),
        ));
        let agentic = AgenticLoop::new(
            client.clone(),
            dispatcher,
            compressor,
            notifier_for(cfg.live2d.notify_url.as_deref()),
            cfg.agentic.clone(),
            cfg.temperature,
        );
        let router = cfg.router.enabled.then(|| {
            IntentRouter::new(
                client.clone(),
                auth.clone(),
                cfg.router.model.clone(),
                ToolCatalog::default(),
            )
        });

        let session_id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        info!(session_id = %session_id, model = %cfg.model, "session ready");
        Ok(Self {
            cfg,
            client,
            agentic,
            router,
            registry,
            history: Vec::new(),
            session_id,
            raw: false,
        })
    }

    /// Print SSE frames verbatim instead of rendered text.
    pub fn with_raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Tokens reported by the upstream across every call of this session.
    pub fn tokens_used(&self) -> u32 {
        self.client.get_tokens_used()
    }

    pub fn reset(&mut self) {
        self.history.clear();
        info!(session_id = %self.session_id, "history cleared");
    }

    async fn catalog(&self) -> ToolCatalog {
        let mut mcp = self.registry.catalog().await;
        if !mcp.iter().any(|t| t.name == self.cfg.dispatch.default_service) {
            mcp.push(ToolInfo::new(
                self.cfg.dispatch.default_service.clone(),
                format!("tools: {}", self.cfg.dispatch.default_service_tools.join(", ")),
            ));
        }
        ToolCatalog {
            mcp,
            skills: Vec::new(),
        }
    }

    /// Run one user turn, rendering events to `out`. The final answer is
    /// appended to the history.
    pub async fn run_turn(&mut self, prompt: &str, out: &mut impl Write) -> Result<()> {
        let catalog = self.catalog().await;
        let route = match &self.router {
            Some(router) => {
                router.set_catalog(catalog.clone());
                router.classify(&self.history, prompt).await
            }
            None => None,
        };
        let system = build_system_prompt(BASE_PROMPT, route.as_ref(), &catalog);
        if self.history.first().is_some_and(|m| m.role == Role::System) {
            self.history[0] = ChatMessage::system(system);
        } else {
            self.history.insert(0, ChatMessage::system(system));
        }
        self.history.push(ChatMessage::user(prompt));

        let mut printer = EventPrinter::new(self.raw, self.cfg.agentic.sse_framing);
        self.stream_turn(&mut printer, out).await?;
        let answer = printer.answer().to_string();
        if !answer.is_empty() {
            self.history.push(ChatMessage::assistant(answer));
        }
        info!(
            session_id = %self.session_id,
            messages = self.history.len(),
            tokens_used = self.tokens_used(),
            "turn finished"
        );
        Ok(())
    }

    async fn stream_turn(&mut self, printer: &mut EventPrinter, out: &mut impl Write) -> Result<()> {
        let events = self.agentic.run(&mut self.history, &self.session_id);
        futures::pin_mut!(events);
        while let Some(ev) = events.next().await {
            printer.print(&ev?, out)?;
        }
        Ok(())
    }
}
