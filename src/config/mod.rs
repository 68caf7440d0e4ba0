use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::llm::SseFraming;

pub const PROJECT_CONFIG_DIR: &str = ".naga";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub project_root: PathBuf,
    pub llm: LlmConfig,
    pub agentic: AgenticConfig,
    pub compression: CompressionConfig,
    pub gateway: GatewayConfig,
    pub dispatch: DispatchConfig,
    pub live2d: Live2dConfig,
    pub auth: AuthConfig,
    pub router: RouterConfig,
    pub mcp_servers: Vec<McpServerConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            temperature: 0.7,
            project_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            llm: LlmConfig::default(),
            agentic: AgenticConfig::default(),
            compression: CompressionConfig::default(),
            gateway: GatewayConfig::default(),
            dispatch: DispatchConfig::default(),
            live2d: Live2dConfig::default(),
            auth: AuthConfig::default(),
            router: RouterConfig::default(),
            mcp_servers: Vec::new(),
        }
    }
}

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    pub enabled: bool,
    pub address: String,
    pub transport: String, // "stdio" or "http"
}

impl Default for McpServerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            enabled: false,
            address: "127.0.0.1:8000".to_string(),
            transport: "http".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub read_idle_timeout_ms: u64,
    pub max_retries: usize,
    pub retry_base_ms: u64,
    pub retry_jitter_ms: u64,
    pub respect_retry_after: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            request_timeout_ms: 60_000,
            read_idle_timeout_ms: 60_000,
            max_retries: 3,
            retry_base_ms: 1000,
            retry_jitter_ms: 2000,
            respect_retry_after: true,
        }
    }
}

/// Loop policy knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct AgenticConfig {
    pub max_rounds: usize,
    /// All-error rounds in a row before the loop jumps to the summary round.
    pub max_consecutive_failures: usize,
    pub result_preview_chars: usize,
    pub call_preview_chars: usize,
    pub sse_framing: SseFraming,
}

impl Default for AgenticConfig {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            max_consecutive_failures: 2,
            result_preview_chars: 500,
            call_preview_chars: 100,
            sse_framing: SseFraming::Base64,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompressionConfig {
    pub keep_recent: usize,
    pub token_threshold: usize,
    pub model: String,
    pub per_message_chars: usize,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            keep_recent: 20,
            token_threshold: 100_000,
            model: "gpt-4.1-nano".to_string(),
            per_message_chars: 3000,
            temperature: 0.3,
            max_tokens: 1200,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub base_url: String,
    pub health_ttl_secs: u64,
    pub health_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub autostart_poll_attempts: u32,
    pub autostart_poll_interval_secs: u64,
    pub agent_name: String,
    pub remote_timeout_seconds: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8001/openclaw".to_string(),
            health_ttl_secs: 30,
            health_timeout_secs: 3,
            request_timeout_secs: 150,
            connect_timeout_secs: 10,
            autostart_poll_attempts: 5,
            autostart_poll_interval_secs: 3,
            agent_name: "Naga".to_string(),
            remote_timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    /// Service assumed for well-known tools that omit `service_name`.
    pub default_service: String,
    pub default_service_tools: Vec<String>,
    /// Services that refuse calls from sessions without a login.
    pub auth_gated_services: Vec<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_service: "game_guide".to_string(),
            default_service_tools: [
                "ask_guide",
                "ask_guide_with_screenshot",
                "calculate_damage",
                "get_team_recommendation",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            auth_gated_services: vec!["game_guide".to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Live2dConfig {
    pub notify_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthConfig {
    pub business_url: Option<String>,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouterConfig {
    pub enabled: bool,
    pub model: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: "gpt-4.1-nano".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct FileConfig {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub temperature: Option<f32>,
    pub project_root: Option<PathBuf>,
    pub llm: Option<PartialLlmConfig>,
    pub agentic: Option<PartialAgenticConfig>,
    pub compression: Option<PartialCompressionConfig>,
    pub gateway: Option<PartialGatewayConfig>,
    pub dispatch: Option<PartialDispatchConfig>,
    pub live2d: Option<PartialLive2dConfig>,
    pub auth: Option<PartialAuthConfig>,
    pub router: Option<PartialRouterConfig>,
    pub mcp_servers: Option<Vec<PartialMcpServerConfig>>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PartialMcpServerConfig {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub address: Option<String>,
    pub transport: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PartialLlmConfig {
    pub connect_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub read_idle_timeout_ms: Option<u64>,
    pub max_retries: Option<usize>,
    pub retry_base_ms: Option<u64>,
    pub retry_jitter_ms: Option<u64>,
    pub respect_retry_after: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PartialAgenticConfig {
    pub max_rounds: Option<usize>,
    pub max_consecutive_failures: Option<usize>,
    pub result_preview_chars: Option<usize>,
    pub call_preview_chars: Option<usize>,
    pub sse_framing: Option<SseFraming>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PartialCompressionConfig {
    pub keep_recent: Option<usize>,
    pub token_threshold: Option<usize>,
    pub model: Option<String>,
    pub per_message_chars: Option<usize>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PartialGatewayConfig {
    pub base_url: Option<String>,
    pub health_ttl_secs: Option<u64>,
    pub health_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub autostart_poll_attempts: Option<u32>,
    pub autostart_poll_interval_secs: Option<u64>,
    pub agent_name: Option<String>,
    pub remote_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PartialDispatchConfig {
    pub default_service: Option<String>,
    pub default_service_tools: Option<Vec<String>>,
    pub auth_gated_services: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PartialLive2dConfig {
    pub notify_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PartialAuthConfig {
    pub business_url: Option<String>,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PartialRouterConfig {
    pub enabled: Option<bool>,
    pub model: Option<String>,
}

/// Overwrite each field of `$target` that is set in `$partial`.
macro_rules! overlay {
    ($target:expr, $partial:expr; $($field:ident),+ $(,)?) => {
        $(
            if let Some(v) = &$partial.$field {
                $target.$field = v.clone();
            }
        )+
    };
}

impl FileConfig {
    /// Apply every value this file sets on top of `cfg`.
    pub fn apply_to(&self, cfg: &mut AppConfig) {
        overlay!(cfg, self; base_url, temperature, project_root);
        if let Some(m) = &self.model {
            cfg.model = m.clone();
        }
        if let Some(k) = &self.api_key {
            cfg.api_key = Some(k.clone());
        }
        if let Some(p) = &self.llm {
            overlay!(cfg.llm, p; connect_timeout_ms, request_timeout_ms, read_idle_timeout_ms,
                max_retries, retry_base_ms, retry_jitter_ms, respect_retry_after);
        }
        if let Some(p) = &self.agentic {
            overlay!(cfg.agentic, p; max_rounds, max_consecutive_failures,
                result_preview_chars, call_preview_chars, sse_framing);
        }
        if let Some(p) = &self.compression {
            overlay!(cfg.compression, p; keep_recent, token_threshold, model,
                per_message_chars, temperature, max_tokens, timeout_secs);
        }
        if let Some(p) = &self.gateway {
            overlay!(cfg.gateway, p; base_url, health_ttl_secs, health_timeout_secs,
                request_timeout_secs, connect_timeout_secs, autostart_poll_attempts,
                autostart_poll_interval_secs, agent_name, remote_timeout_seconds);
        }
        if let Some(p) = &self.dispatch {
            overlay!(cfg.dispatch, p; default_service, default_service_tools, auth_gated_services);
        }
        if let Some(p) = &self.live2d
            && p.notify_url.is_some()
        {
            cfg.live2d.notify_url = p.notify_url.clone();
        }
        if let Some(p) = &self.auth {
            if p.business_url.is_some() {
                cfg.auth.business_url = p.business_url.clone();
            }
            if p.access_token.is_some() {
                cfg.auth.access_token = p.access_token.clone();
            }
        }
        if let Some(p) = &self.router {
            overlay!(cfg.router, p; enabled, model);
        }
    }
}

/// Merge MCP server lists; `upper` entries override `lower` entries by name.
fn merge_mcp_servers(
    lower: Option<&Vec<PartialMcpServerConfig>>,
    upper: Option<&Vec<PartialMcpServerConfig>>,
) -> Vec<McpServerConfig> {
    let mut merged: Vec<PartialMcpServerConfig> = lower.cloned().unwrap_or_default();
    for server in upper.into_iter().flatten() {
        let existing = server
            .name
            .as_ref()
            .and_then(|name| merged.iter_mut().find(|s| s.name.as_ref() == Some(name)));
        match existing {
            Some(existing) => {
                if let Some(enabled) = server.enabled {
                    existing.enabled = Some(enabled);
                }
                if let Some(address) = &server.address {
                    existing.address = Some(address.clone());
                }
                if let Some(transport) = &server.transport {
                    existing.transport = Some(transport.clone());
                }
            }
            None => merged.push(server.clone()),
        }
    }

    let defaults = McpServerConfig::default();
    merged
        .into_iter()
        .map(|partial| McpServerConfig {
            name: partial.name.unwrap_or_else(|| defaults.name.clone()),
            enabled: partial.enabled.unwrap_or(defaults.enabled),
            address: partial.address.unwrap_or_else(|| defaults.address.clone()),
            transport: partial
                .transport
                .unwrap_or_else(|| defaults.transport.clone()),
        })
        .collect()
}

impl AppConfig {
    /// Defaults, then the global file, then the project file, then the
    /// environment, then command-line flags.
    pub fn from_cli(cli: &crate::cli::Cli) -> Result<Self> {
        let cwd = std::env::current_dir().context("resolve current dir")?;
        let project_cfg = load_project_config(&cwd).unwrap_or_default();
        let file_cfg = load_file_config().unwrap_or_default();

        let mut cfg = Self::layered(&file_cfg, &project_cfg, |k| std::env::var(k).ok());
        if cfg.project_root == PathBuf::new() {
            cfg.project_root = cwd;
        }

        if let Some(v) = &cli.base_url {
            cfg.base_url = v.clone();
        }
        if let Some(v) = &cli.model {
            cfg.model = v.clone();
        }
        if let Some(v) = &cli.api_key {
            cfg.api_key = Some(v.clone());
        }
        if let Some(v) = cli.max_rounds {
            cfg.agentic.max_rounds = v;
        }
        if let Some(v) = &cli.gateway_url {
            cfg.gateway.base_url = v.clone();
        }
        if cli.plain_frames {
            cfg.agentic.sse_framing = SseFraming::Plain;
        }
        if cli.route {
            cfg.router.enabled = true;
        }
        Ok(cfg)
    }

    /// Build a config from the file layers and an environment lookup.
    pub fn layered(
        file_cfg: &FileConfig,
        project_cfg: &FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let mut cfg = Self {
            project_root: PathBuf::new(),
            ..Self::default()
        };
        file_cfg.apply_to(&mut cfg);
        project_cfg.apply_to(&mut cfg);
        cfg.mcp_servers =
            merge_mcp_servers(file_cfg.mcp_servers.as_ref(), project_cfg.mcp_servers.as_ref());

        if let Some(v) = env("OPENAI_API_KEY") {
            cfg.api_key = Some(v);
        }
        if let Some(v) = env("OPENAI_BASE_URL") {
            cfg.base_url = v;
        }
        if let Some(v) = env("OPENAI_MODEL") {
            cfg.model = v;
        }
        if let Some(v) = env("NAGA_ACCESS_TOKEN").filter(|v| !v.is_empty()) {
            cfg.auth.access_token = Some(v);
        }
        if let Some(v) = env("NAGA_BUSINESS_URL") {
            cfg.auth.business_url = Some(v);
        }
        if let Some(v) = env("NAGA_GATEWAY_URL") {
            cfg.gateway.base_url = v;
        }
        if let Some(v) = env("NAGA_MAX_ROUNDS").and_then(|v| v.parse().ok()) {
            cfg.agentic.max_rounds = v;
        }
        if let Some(v) = env("NAGA_COMPRESS_TOKEN_THRESHOLD").and_then(|v| v.parse().ok()) {
            cfg.compression.token_threshold = v;
        }
        cfg
    }
}

pub fn load_file_config() -> Result<FileConfig> {
    use std::env;

    fn candidate_paths() -> Vec<PathBuf> {
        let mut v = Vec::new();
        if let Ok(p) = env::var("NAGA_LOOP_CONFIG") {
            v.push(PathBuf::from(p));
        }
        if let Ok(xdg_home) = env::var("XDG_CONFIG_HOME") {
            v.push(Path::new(&xdg_home).join("naga-loop/config.toml"));
        } else if let Some(config_dir) = dirs::home_dir().map(|h| h.join(".config")) {
            v.push(config_dir.join("naga-loop/config.toml"));
        }
        v
    }

    for p in candidate_paths() {
        if p.exists() {
            return read_config_file(&p);
        }
    }
    Ok(FileConfig::default())
}

/// Load project-specific configuration from .naga/config.toml
pub fn load_project_config(project_root: &Path) -> Result<FileConfig> {
    let path = project_root.join(PROJECT_CONFIG_DIR).join("config.toml");
    if path.exists() {
        read_config_file(&path)
    } else {
        Ok(FileConfig::default())
    }
}

fn read_config_file(path: &Path) -> Result<FileConfig> {
    let s = fs::read_to_string(path)
        .with_context(|| format!("read config file: {}", path.display()))?;
    match toml::from_str::<FileConfig>(&s) {
        Ok(cfg) => {
            info!(path=%path.display(), "loaded config file");
            Ok(cfg)
        }
        Err(e) => {
            warn!(path=%path.display(), error=%e.to_string(), "parse config failed");
            Ok(FileConfig::default())
        }
    }
}
