//! Configuration loading, validation, and management for PKE.
//!
//! Loads configuration from `~/.pke/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use pke_core::Invocation;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Store backends understood by `pke-store`.
pub const STORE_BACKENDS: [&str; 3] = ["memory", "file", "sqlite"];

/// The root configuration structure.
///
/// Maps directly to `~/.pke/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default generation provider ("openai" or "anthropic")
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature, used when an invocation has no override
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per completion
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Per-invocation generation settings
    #[serde(default)]
    pub invocations: InvocationsConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Course / anchor persistence
    #[serde(default)]
    pub store: StoreConfig,

    /// Audit trail retention
    #[serde(default)]
    pub audit: AuditConfig,

    /// Workflow engine behaviour
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4000
}
fn default_true() -> bool {
    true
}

/// Default model when the Anthropic provider is selected without an explicit model.
pub const ANTHROPIC_DEFAULT_MODEL: &str = "claude-3-sonnet-20240229";

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("providers", &self.providers)
            .field("invocations", &self.invocations)
            .field("gateway", &self.gateway)
            .field("store", &self.store)
            .field("audit", &self.audit)
            .field("workflow", &self.workflow)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

/// Sampling settings for one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationSettings {
    pub temperature: f32,
    pub max_tokens: u32,

    /// Model override for this invocation only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl InvocationSettings {
    fn new(temperature: f32, max_tokens: u32) -> Self {
        Self {
            temperature,
            max_tokens,
            model: None,
        }
    }
}

/// Per-invocation settings, one table per step: `[invocations.description]` etc.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationsConfig {
    #[serde(default = "default_description")]
    pub description: InvocationSettings,
    #[serde(default = "default_objectives")]
    pub objectives: InvocationSettings,
    #[serde(default = "default_structure")]
    pub structure: InvocationSettings,
    #[serde(default = "default_full_build")]
    pub full_build: InvocationSettings,
    #[serde(default = "default_template_mapping")]
    pub template_mapping: InvocationSettings,
}

fn default_description() -> InvocationSettings {
    InvocationSettings::new(0.7, 2000)
}
fn default_objectives() -> InvocationSettings {
    InvocationSettings::new(0.5, 3000)
}
fn default_structure() -> InvocationSettings {
    InvocationSettings::new(0.6, 4000)
}
fn default_full_build() -> InvocationSettings {
    InvocationSettings::new(0.4, 8000)
}
fn default_template_mapping() -> InvocationSettings {
    InvocationSettings::new(0.3, 2000)
}

impl Default for InvocationsConfig {
    fn default() -> Self {
        Self {
            description: default_description(),
            objectives: default_objectives(),
            structure: default_structure(),
            full_build: default_full_build(),
            template_mapping: default_template_mapping(),
        }
    }
}

impl InvocationsConfig {
    pub fn get(&self, invocation: Invocation) -> &InvocationSettings {
        match invocation {
            Invocation::Description => &self.description,
            Invocation::Objectives => &self.objectives,
            Invocation::Structure => &self.structure,
            Invocation::FullBuild => &self.full_build,
            Invocation::TemplateMapping => &self.template_mapping,
        }
    }

    fn iter(&self) -> impl Iterator<Item = (Invocation, &InvocationSettings)> {
        Invocation::ALL.into_iter().map(move |i| (i, self.get(i)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Maximum request body size in bytes
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_port() -> u16 {
    3000
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "memory", "file" or "sqlite"
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// Database file (sqlite) or directory (file). Defaults under `~/.pke/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_store_backend() -> String {
    "sqlite".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: None,
        }
    }
}

impl StoreConfig {
    /// The configured path, or the backend's default location.
    pub fn resolved_path(&self) -> PathBuf {
        match (&self.path, self.backend.as_str()) {
            (Some(path), _) => path.clone(),
            (None, "file") => AppConfig::config_dir().join("data"),
            (None, _) => AppConfig::config_dir().join("pke.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Records older than this are purged by the retention sweeper
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// How often the sweeper runs
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_retention_days() -> u32 {
    90
}
fn default_sweep_interval() -> u64 {
    3600
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Re-run Gate B, prerequisite and stage checks on accept
    #[serde(default = "default_true")]
    pub revalidate_on_accept: bool,

    /// Upper bound on a single generation call
    #[serde(default = "default_generation_timeout")]
    pub generation_timeout_secs: u64,
}

fn default_generation_timeout() -> u64 {
    120
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            revalidate_on_accept: true,
            generation_timeout_secs: default_generation_timeout(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.pke/config.toml).
    ///
    /// Environment overrides, highest priority first:
    /// - `PKE_PROVIDER`, `PKE_MODEL`
    /// - `PKE_API_KEY`, then `ANTHROPIC_API_KEY` or `OPENAI_API_KEY`
    ///   depending on the selected provider
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(provider) = lookup("PKE_PROVIDER") {
            self.default_provider = provider;
        }

        if let Some(model) = lookup("PKE_MODEL") {
            self.default_model = model;
        }

        if self.api_key.is_none() {
            let vendor_var = if self.default_provider == "anthropic" {
                "ANTHROPIC_API_KEY"
            } else {
                "OPENAI_API_KEY"
            };
            self.api_key = lookup("PKE_API_KEY").or_else(|| lookup(vendor_var));
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".pke")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_temperature("default_temperature", self.default_temperature)?;

        for (invocation, settings) in self.invocations.iter() {
            check_temperature(
                &format!("invocations.{}.temperature", invocation.name()),
                settings.temperature,
            )?;
            if settings.max_tokens == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "invocations.{}.max_tokens must be > 0",
                    invocation.name()
                )));
            }
        }

        if self.workflow.generation_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "workflow.generation_timeout_secs must be > 0".into(),
            ));
        }

        if self.audit.retention_days < 1 {
            return Err(ConfigError::ValidationError(
                "audit.retention_days must be at least 1".into(),
            ));
        }

        if !STORE_BACKENDS.contains(&self.store.backend.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "store.backend must be one of {:?}, got '{}'",
                STORE_BACKENDS, self.store.backend
            )));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
            || self
                .providers
                .get(&self.default_provider)
                .is_some_and(|p| p.api_key.is_some())
    }

    /// The model to use with the default provider.
    ///
    /// A provider-specific `default_model` wins; the Anthropic provider with
    /// the untouched global default falls back to a Claude model.
    pub fn resolved_model(&self) -> String {
        if let Some(model) = self
            .providers
            .get(&self.default_provider)
            .and_then(|p| p.default_model.clone())
        {
            return model;
        }
        if self.default_provider == "anthropic" && self.default_model == default_model() {
            return ANTHROPIC_DEFAULT_MODEL.into();
        }
        self.default_model.clone()
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn check_temperature(field: &str, value: f32) -> Result<(), ConfigError> {
    if !(0.0..=2.0).contains(&value) {
        return Err(ConfigError::ValidationError(format!(
            "{field} must be between 0.0 and 2.0"
        )));
    }
    Ok(())
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            providers: HashMap::new(),
            invocations: InvocationsConfig::default(),
            gateway: GatewayConfig::default(),
            store: StoreConfig::default(),
            audit: AuditConfig::default(),
            workflow: WorkflowConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
