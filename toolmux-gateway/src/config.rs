//! Gateway configuration file (TOML).
//!
//! ```toml
//! bind_addr = "127.0.0.1:8080"
//! tools_config = "tools.yaml"
//! tool_timeout_secs = 30
//!
//! [model]
//! provider = "openai"
//! model = "gpt-4o"
//! api_key_env = "OPENAI_API_KEY"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

use toolmux::model::ModelConfig;
use toolmux::{DispatcherConfig, ModelClient, OpenAiModelClient, UnconfiguredModel};

pub const DEFAULT_CONFIG_FILE: &str = "toolmux.toml";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind_addr: String,
    /// Tools document loaded at startup.
    pub tools_config: Option<PathBuf>,
    pub tool_timeout_secs: u64,
    pub model_timeout_secs: u64,
    pub validate_parameters: bool,
    pub allow_remote_registration: bool,
    /// Register the built-in `toolmux` service (list_services, list_tools).
    pub builtin_tools: bool,
    /// Abort startup when the tools document fails to load.
    pub strict_load: bool,
    pub model: ModelSection,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            tools_config: None,
            tool_timeout_secs: 30,
            model_timeout_secs: 30,
            validate_parameters: false,
            allow_remote_registration: false,
            builtin_tools: true,
            strict_load: false,
            model: ModelSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelSection {
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

impl GatewayConfig {
    pub fn from_toml_str(data: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Zero timeouts would expire every tool and model call immediately.
    fn validate(&self) -> anyhow::Result<()> {
        if self.tool_timeout_secs == 0 {
            anyhow::bail!("tool_timeout_secs must be greater than zero");
        }
        if self.model_timeout_secs == 0 {
            anyhow::bail!("model_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    /// Read `path`. When the file is absent and `required` is false, defaults
    /// are returned.
    pub fn load(path: &Path, required: bool) -> anyhow::Result<Self> {
        if !required && !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read gateway config {}", path.display()))?;
        let mut config = Self::from_toml_str(&data)
            .with_context(|| format!("failed to parse gateway config {}", path.display()))?;

        // tools document is relative to the config file
        if let (Some(tools), Some(dir)) = (&config.tools_config, path.parent()) {
            if tools.is_relative() && !dir.as_os_str().is_empty() {
                config.tools_config = Some(dir.join(tools));
            }
        }
        Ok(config)
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            tool_timeout: Duration::from_secs(self.tool_timeout_secs),
            model_timeout: Duration::from_secs(self.model_timeout_secs),
            validate_parameters: self.validate_parameters,
        }
    }
}

/// Build the model client. A missing API key yields a client whose every call
/// fails, so the gateway still serves listings and direct tool calls.
pub fn build_model(section: &ModelSection) -> anyhow::Result<Arc<dyn ModelClient>> {
    if section.provider != "openai" {
        anyhow::bail!(
            "unsupported model provider '{}' (only OpenAI-compatible endpoints are supported)",
            section.provider
        );
    }
    match std::env::var(&section.api_key_env) {
        Ok(api_key) if !api_key.is_empty() => {
            let client = OpenAiModelClient::new(ModelConfig {
                model: section.model.clone(),
                api_key,
                base_url: section.base_url.clone(),
            })?;
            Ok(Arc::new(client))
        }
        _ => {
            warn!(
                "{} is not set; instructions that need the model will fail",
                section.api_key_env
            );
            Ok(Arc::new(UnconfiguredModel::new(format!(
                "{} environment variable not set",
                section.api_key_env
            ))))
        }
    }
}
