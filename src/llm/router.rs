use std::sync::Arc;
use async_trait::async_trait;
use tracing::{info, warn};
use crate::config::LLMConfig;
use crate::errors::{with_retry, RetryConfig, WardenError};
use super::anthropic::AnthropicProvider;
use super::catalog::{self, Backend};
use super::local::LocalProvider;
use super::openai::OpenAIProvider;
use super::provider::LLMProvider;
use super::types::{ChatMessage, ChatResponse, ToolSchema};

/// Build a client for the configured provider (anthropic when unset).
pub fn create_provider(config: &LLMConfig) -> Result<Arc<dyn LLMProvider>, WardenError> {
    let provider_name = config.provider.as_deref().unwrap_or("anthropic");
    let info = catalog::get_provider(provider_name)
        .ok_or_else(|| WardenError::Config(format!("Unknown LLM provider: {}", provider_name)))?;

    let model = config.model.as_deref().unwrap_or(info.default_model);
    let base_url = config.base_url.as_deref().or(info.base_url);
    let api_key = catalog::resolve_api_key(info, config)?;

    let provider: Arc<dyn LLMProvider> = match info.backend {
        Backend::Anthropic => {
            let client = AnthropicProvider::new(&api_key, Some(model));
            match base_url {
                Some(url) => Arc::new(client.with_base_url(url)),
                None => Arc::new(client),
            }
        }
        Backend::OpenAI => {
            let url = base_url.ok_or_else(|| {
                WardenError::Config(format!("{} requires a base_url", info.name))
            })?;
            Arc::new(OpenAIProvider::with_base_url(info.id, &api_key, model, url))
        }
        Backend::Ollama => Arc::new(LocalProvider::new(base_url, Some(model))),
    };

    info!(provider = info.id, model, "LLM provider configured");
    Ok(provider)
}

/// Wraps a primary provider with retry and, once retries are exhausted, an
/// optional alternate.
pub struct FallbackProvider {
    primary: Arc<dyn LLMProvider>,
    fallback: Option<Arc<dyn LLMProvider>>,
    retry: RetryConfig,
}

impl FallbackProvider {
    pub fn new(primary: Arc<dyn LLMProvider>, fallback: Option<Arc<dyn LLMProvider>>) -> Self {
        Self { primary, fallback, retry: RetryConfig::default() }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Build from config sections; an unusable fallback section is reported
    /// immediately rather than on first failure.
    pub fn from_config(primary: &LLMConfig, fallback: Option<&LLMConfig>) -> Result<Self, WardenError> {
        let primary = create_provider(primary)?;
        let fallback = fallback.map(create_provider).transpose()?;
        Ok(Self::new(primary, fallback))
    }

    async fn call(
        &self,
        provider: &Arc<dyn LLMProvider>,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        system: &str,
    ) -> Result<ChatResponse, WardenError> {
        let operation = format!("{}:{}", provider.provider_name(), provider.model_name());
        with_retry(&operation, &self.retry, move || provider.chat_with_tools(messages, tools, system)).await
    }
}

#[async_trait]
impl LLMProvider for FallbackProvider {
    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        system: &str,
    ) -> Result<ChatResponse, WardenError> {
        match self.call(&self.primary, messages, tools, system).await {
            Ok(response) => Ok(response),
            Err(e) => match &self.fallback {
                Some(fallback) => {
                    warn!(
                        primary = self.primary.provider_name(),
                        fallback = fallback.provider_name(),
                        error = %e,
                        "Primary LLM provider failed, switching to fallback"
                    );
                    self.call(fallback, messages, tools, system).await
                }
                None => Err(e),
            },
        }
    }

    fn provider_name(&self) -> &str { self.primary.provider_name() }
    fn model_name(&self) -> &str { self.primary.model_name() }
}
