use super::{ConfigError, StatePaths};
use crate::knowledge::ResolutionOptions;
use crate::rules::RuleExecutionMode;
use crate::shared::ids::OrganizationId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub state_root: PathBuf,
    #[serde(default)]
    pub defaults: EngineConfig,
    #[serde(default)]
    pub organizations: BTreeMap<String, EngineConfig>,
}

impl Settings {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.state_root.is_absolute() {
            return Err(ConfigError::Settings(
                "`state_root` must be an absolute path".to_string(),
            ));
        }
        self.defaults.validate("defaults")?;
        for (organization_id, config) in &self.organizations {
            OrganizationId::parse(organization_id).map_err(|err| {
                ConfigError::Settings(format!("invalid organization key `{organization_id}`: {err}"))
            })?;
            config.validate(organization_id)?;
        }
        Ok(())
    }

    pub fn state_paths(&self) -> StatePaths {
        StatePaths::new(&self.state_root)
    }

    /// The organization's own block when present, otherwise `defaults`.
    pub fn engine_config_for(&self, organization_id: &str) -> EngineConfig {
        self.organizations
            .get(organization_id)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub rule_execution_mode: RuleExecutionMode,
    #[serde(default = "default_auto_respond_threshold")]
    pub auto_respond_threshold: f32,
    #[serde(default = "default_response_deadline_ms")]
    pub response_deadline_ms: u64,
    #[serde(default = "default_webhook_timeout_ms")]
    pub webhook_timeout_ms: u64,
    #[serde(default)]
    pub resolution: ResolutionConfig,
    #[serde(default)]
    pub gateway: Option<GatewayConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rule_execution_mode: RuleExecutionMode::default(),
            auto_respond_threshold: default_auto_respond_threshold(),
            response_deadline_ms: default_response_deadline_ms(),
            webhook_timeout_ms: default_webhook_timeout_ms(),
            resolution: ResolutionConfig::default(),
            gateway: None,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self, organization_id: &str) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::Engine {
            organization_id: organization_id.to_string(),
            reason,
        };
        if !(0.0..=1.0).contains(&self.auto_respond_threshold) {
            return Err(invalid(format!(
                "`auto_respond_threshold` must be in range 0.0..=1.0; got {}",
                self.auto_respond_threshold
            )));
        }
        if self.response_deadline_ms == 0 {
            return Err(invalid("`response_deadline_ms` must be >= 1".to_string()));
        }
        if self.webhook_timeout_ms == 0 {
            return Err(invalid("`webhook_timeout_ms` must be >= 1".to_string()));
        }
        self.resolution_options()
            .validate()
            .map_err(|err| invalid(err.to_string()))?;
        if let Some(gateway) = &self.gateway {
            gateway.validate().map_err(invalid)?;
        }
        Ok(())
    }

    pub fn resolution_options(&self) -> ResolutionOptions {
        ResolutionOptions {
            top_n: self.resolution.top_n,
            max_response_chars: self.resolution.max_response_chars,
            file_min_similarity: self.resolution.file_min_similarity,
            auto_respond_threshold: self.auto_respond_threshold,
            fallback_text: self.resolution.fallback_text.clone(),
        }
    }

    pub fn response_deadline(&self) -> Duration {
        Duration::from_millis(self.response_deadline_ms)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_millis(self.webhook_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScorerKind {
    Embedding,
    Lexical,
    #[default]
    Hybrid,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ResolutionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub scorer: ScorerKind,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_max_response_chars")]
    pub max_response_chars: usize,
    #[serde(default = "default_file_min_similarity")]
    pub file_min_similarity: f32,
    #[serde(default)]
    pub fallback_text: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scorer: ScorerKind::default(),
            top_n: default_top_n(),
            max_response_chars: default_max_response_chars(),
            file_min_similarity: default_file_min_similarity(),
            fallback_text: String::new(),
            embedding_dimensions: default_embedding_dimensions(),
            max_chunk_chars: default_max_chunk_chars(),
        }
    }
}

/// Outbound messaging gateway. The API key is read from `api_key_env` at
/// startup so it never lives in the settings file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    pub api_base: String,
    pub instance: String,
    #[serde(default = "default_gateway_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_gateway_timeout_ms")]
    pub timeout_ms: u64,
}

impl GatewayConfig {
    fn validate(&self) -> Result<(), String> {
        let base = self.api_base.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err("`gateway.api_base` must be an http(s) url".to_string());
        }
        if self.instance.trim().is_empty() {
            return Err("`gateway.instance` must be non-empty".to_string());
        }
        if self.api_key_env.trim().is_empty() {
            return Err("`gateway.api_key_env` must be non-empty".to_string());
        }
        if self.timeout_ms == 0 {
            return Err("`gateway.timeout_ms` must be >= 1".to_string());
        }
        Ok(())
    }

    pub fn api_key(&self) -> Result<String, ConfigError> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnv {
                name: self.api_key_env.clone(),
            })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_auto_respond_threshold() -> f32 {
    0.75
}

fn default_response_deadline_ms() -> u64 {
    10_000
}

fn default_webhook_timeout_ms() -> u64 {
    5_000
}

fn default_top_n() -> usize {
    3
}

fn default_max_response_chars() -> usize {
    1_000
}

fn default_file_min_similarity() -> f32 {
    0.5
}

fn default_embedding_dimensions() -> usize {
    crate::knowledge::embedding::DEFAULT_EMBEDDING_DIM
}

fn default_max_chunk_chars() -> usize {
    crate::knowledge::ingest::DEFAULT_MAX_CHUNK_CHARS
}

fn default_gateway_api_key_env() -> String {
    "COMODIN_GATEWAY_API_KEY".to_string()
}

fn default_gateway_timeout_ms() -> u64 {
    10_000
}
