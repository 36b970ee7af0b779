use crate::config::LLMConfig;
use crate::errors::WardenError;

/// Which client implementation speaks to a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Anthropic,
    OpenAI,
    Ollama,
}

pub struct ProviderInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub env_var: Option<&'static str>,
    pub default_model: &'static str,
    pub base_url: Option<&'static str>,
    pub requires_key: bool,
    pub backend: Backend,
}

pub static PROVIDERS: &[ProviderInfo] = &[
    ProviderInfo {
        id: "anthropic",
        name: "Anthropic",
        env_var: Some("ANTHROPIC_API_KEY"),
        default_model: "claude-sonnet-4-20250514",
        base_url: None,
        requires_key: true,
        backend: Backend::Anthropic,
    },
    ProviderInfo {
        id: "openai",
        name: "OpenAI",
        env_var: Some("OPENAI_API_KEY"),
        default_model: "gpt-4",
        base_url: Some("https://api.openai.com/v1"),
        requires_key: true,
        backend: Backend::OpenAI,
    },
    ProviderInfo {
        id: "deepseek",
        name: "DeepSeek",
        env_var: Some("DEEPSEEK_API_KEY"),
        default_model: "deepseek-chat",
        base_url: Some("https://api.deepseek.com/v1"),
        requires_key: true,
        backend: Backend::OpenAI,
    },
    ProviderInfo {
        id: "ollama",
        name: "Ollama (local)",
        env_var: None,
        default_model: "llama2",
        base_url: Some("http://localhost:11434"),
        requires_key: false,
        backend: Backend::Ollama,
    },
    ProviderInfo {
        id: "openai-compatible",
        name: "OpenAI-compatible endpoint",
        env_var: None,
        default_model: "default",
        base_url: None,
        requires_key: false,
        backend: Backend::OpenAI,
    },
];

/// Case-insensitive lookup; `_` and `-` are interchangeable.
pub fn get_provider(id: &str) -> Option<&'static ProviderInfo> {
    let id = id.trim().to_lowercase().replace('_', "-");
    PROVIDERS.iter().find(|p| p.id == id)
}

pub fn get_default_model(provider_id: &str) -> &'static str {
    get_provider(provider_id)
        .map(|p| p.default_model)
        .unwrap_or("claude-sonnet-4-20250514")
}

/// Key from the config (already merged with any CLI flag), then the
/// provider's environment variable. Keyless providers get a placeholder.
pub fn resolve_api_key(info: &ProviderInfo, config: &LLMConfig) -> Result<String, WardenError> {
    if let Some(key) = config.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
        return Ok(key.to_string());
    }
    if let Some(var) = info.env_var {
        if let Ok(key) = std::env::var(var) {
            if !key.trim().is_empty() {
                return Ok(key);
            }
        }
    }
    if info.requires_key {
        let hint = info.env_var.map(|v| format!(" (set {} or pass --api-key)", v)).unwrap_or_default();
        return Err(WardenError::Config(format!("No API key for {}{}", info.name, hint)));
    }
    Ok("not-needed".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_normalises_name() {
        assert_eq!(get_provider("OpenAI_Compatible").map(|p| p.id), Some("openai-compatible"));
        assert_eq!(get_provider("DeepSeek").map(|p| p.backend), Some(Backend::OpenAI));
        assert!(get_provider("gemini").is_none());
    }

    #[test]
    fn test_default_models() {
        assert_eq!(get_default_model("ollama"), "llama2");
        assert_eq!(get_default_model("deepseek"), "deepseek-chat");
    }

    #[test]
    fn test_explicit_key_wins() {
        let info = get_provider("openai").unwrap();
        let config = LLMConfig { api_key: Some("sk-flag".into()), ..Default::default() };
        assert_eq!(resolve_api_key(info, &config).unwrap(), "sk-flag");
    }

    #[test]
    fn test_keyless_provider_gets_placeholder() {
        let info = get_provider("ollama").unwrap();
        assert_eq!(resolve_api_key(info, &LLMConfig::default()).unwrap(), "not-needed");
    }
}
