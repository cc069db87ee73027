//! open-workflows configuration loader.

use ow_llm::{ModelRef, ProviderEndpoint};
use ow_tools::RetryPolicy;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "minimax/MiniMax-M2.1";
const GRACE_PERIOD_MAX: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkflowsConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// Prepended to every session as the system message.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    ow_tools::DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    ow_tools::DEFAULT_BASE_DELAY.as_millis() as u64
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// How long the stream consumer keeps draining after the prompt returns.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    #[serde(default = "default_tool_loops_max")]
    pub tool_loops_max: usize,
    #[serde(default = "default_sink_capacity")]
    pub sink_capacity: usize,
    /// Per-request timeout for model calls.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_grace_period_ms() -> u64 {
    500
}

fn default_tool_loops_max() -> usize {
    16
}

fn default_sink_capacity() -> usize {
    64
}

fn default_request_timeout_secs() -> u64 {
    300
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
            tool_loops_max: default_tool_loops_max(),
            sink_capacity: default_sink_capacity(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl SessionConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_command_timeout_secs() -> u64 {
    120
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl ToolsConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

fn builtin_base_url(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some("https://api.openai.com/v1"),
        "minimax" => Some("https://api.minimax.io/v1"),
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        _ => None,
    }
}

impl WorkflowsConfig {
    /// A missing file means defaults; a present but invalid file is an error.
    pub async fn load(path: Option<PathBuf>, workdir: &Path) -> anyhow::Result<Self> {
        let path = path.unwrap_or_else(|| default_config_path(workdir));
        let mut cfg = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Self::parse(&contents)
                .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Self::default()
            }
            Err(e) => return Err(anyhow::anyhow!("read config {}: {e}", path.display())),
        };

        cfg.apply_env_overrides(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// `lookup` stands in for the process environment.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let present = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = present("OPEN_WORKFLOWS_MODEL") {
            self.general.model = v.trim().to_string();
        }

        let mut providers: Vec<String> = self.providers.keys().cloned().collect();
        for builtin in ["openai", "minimax", "openrouter"] {
            if !providers.iter().any(|p| p == builtin) {
                providers.push(builtin.to_string());
            }
        }
        if let Ok(model) = self.model() {
            if !providers.contains(&model.provider_id) {
                providers.push(model.provider_id);
            }
        }
        for provider in providers {
            let var = format!("{}_API_KEY", provider.to_ascii_uppercase().replace('-', "_"));
            if let Some(key) = present(&var) {
                self.providers.entry(provider).or_default().api_key = Some(key);
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let model = self.model()?;
        if self.endpoint(&model.provider_id).is_none() {
            return Err(anyhow::anyhow!(
                "provider {:?} has no base_url; add [providers.{}] base_url = \"...\"",
                model.provider_id,
                model.provider_id
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow::anyhow!("retry.max_attempts must be >= 1"));
        }
        if self.session.grace_period() > GRACE_PERIOD_MAX {
            return Err(anyhow::anyhow!("session.grace_period_ms must be <= 60000"));
        }
        if self.session.tool_loops_max == 0 {
            return Err(anyhow::anyhow!("session.tool_loops_max must be > 0"));
        }
        if self.session.sink_capacity == 0 {
            return Err(anyhow::anyhow!("session.sink_capacity must be > 0"));
        }
        if self.tools.command_timeout_secs == 0 {
            return Err(anyhow::anyhow!("tools.command_timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn model(&self) -> anyhow::Result<ModelRef> {
        self.general
            .model
            .parse::<ModelRef>()
            .map_err(|e| anyhow::anyhow!("general.model: {e}"))
    }

    /// Configured endpoint for `provider`, falling back to the built-in URL.
    pub fn endpoint(&self, provider: &str) -> Option<ProviderEndpoint> {
        let configured = self.providers.get(provider);
        let base_url = configured
            .and_then(|p| p.base_url.clone())
            .filter(|u| !u.trim().is_empty())
            .or_else(|| builtin_base_url(provider).map(str::to_string))?;
        Some(ProviderEndpoint {
            base_url,
            api_key: configured
                .and_then(|p| p.api_key.clone())
                .filter(|k| !k.is_empty()),
        })
    }
}

pub fn default_config_path(workdir: &Path) -> PathBuf {
    workdir.join(".open-workflows").join("config.toml")
}
