//! Generator: sends one prompt pair to the backend and returns raw text.

use pke_config::AppConfig;
use pke_core::invocation::Invocation;
use pke_core::message::Message;
use pke_core::provider::{Provider, ProviderRequest, Usage};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::context::ContextBundle;
use crate::error::GenerationError;
use crate::prompts;

/// Sampling settings for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A successful completion.
#[derive(Debug, Clone)]
pub struct Generation {
    pub content: String,
    pub usage: Usage,
    pub model: String,
    pub provider: String,
    pub finish_reason: Option<String>,
}

pub struct Generator {
    provider: Arc<dyn Provider>,
    settings: HashMap<Invocation, GenerationSettings>,
    timeout: Duration,
}

impl Generator {
    /// A generator using the built-in per-invocation settings with `model`.
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        let config = AppConfig {
            default_model: model.into(),
            ..AppConfig::default()
        };
        Self::from_config(provider, &config)
    }

    pub fn from_config(provider: Arc<dyn Provider>, config: &AppConfig) -> Self {
        let default_model = config.resolved_model();
        let settings = Invocation::ALL
            .into_iter()
            .map(|inv| {
                let s = config.invocations.get(inv);
                let settings = GenerationSettings {
                    model: s.model.clone().unwrap_or_else(|| default_model.clone()),
                    temperature: s.temperature,
                    max_tokens: s.max_tokens,
                };
                (inv, settings)
            })
            .collect();
        Self {
            provider,
            settings,
            timeout: Duration::from_secs(config.workflow.generation_timeout_secs.max(1)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn settings(&self, invocation: Invocation) -> &GenerationSettings {
        // Every invocation is populated in `from_config`.
        &self.settings[&invocation]
    }

    /// Run one generation call for `invocation` over `context`.
    pub async fn generate(
        &self,
        invocation: Invocation,
        context: &ContextBundle,
        is_revision: bool,
    ) -> Result<Generation, GenerationError> {
        let settings = self.settings(invocation);
        let request = ProviderRequest {
            model: settings.model.clone(),
            messages: vec![
                Message::system(prompts::system_prompt(invocation, is_revision)),
                Message::user(prompts::user_prompt(invocation, context)),
            ],
            temperature: settings.temperature,
            max_tokens: Some(settings.max_tokens),
        };

        debug!(
            invocation = invocation.number(),
            provider = self.provider.name(),
            model = %settings.model,
            is_revision,
            "Calling generation backend"
        );

        let response = match tokio::time::timeout(self.timeout, self.provider.complete(request)).await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    invocation = invocation.number(),
                    timeout_secs = self.timeout.as_secs(),
                    "Generation timed out"
                );
                return Err(GenerationError::Timeout(self.timeout.as_secs()));
            }
        };

        if response.message.content.trim().is_empty() {
            return Err(GenerationError::EmptyCompletion);
        }

        Ok(Generation {
            content: response.message.content,
            usage: response.usage.unwrap_or_default(),
            model: response.model,
            provider: self.provider.name().to_string(),
            finish_reason: response.finish_reason,
        })
    }
}
