use async_trait::async_trait;
use reqwest::Response;
use serde_json::Value;
use crate::errors::WardenError;
use super::types::{ChatMessage, ChatResponse, ToolSchema};

#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// One model turn over the conversation so far, with the given tools
    /// on offer.
    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        system: &str,
    ) -> Result<ChatResponse, WardenError>;

    /// Provider name for logging
    fn provider_name(&self) -> &str;

    /// Model identifier
    fn model_name(&self) -> &str;
}

/// Map HTTP status and error bodies onto the error classes the retry layer
/// understands, returning the decoded body otherwise.
pub(crate) async fn read_json(resp: Response, provider: &str) -> Result<Value, WardenError> {
    let status = resp.status();
    if status.as_u16() == 429 {
        return Err(WardenError::RateLimit(format!("{} rate limit exceeded", provider)));
    }
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(WardenError::Authentication(format!("Invalid {} API key", provider)));
    }

    let data: Value = resp.json().await
        .map_err(|e| WardenError::LLMApi(format!("Failed to parse {} response: {}", provider, e)))?;

    if let Some(error) = data.get("error") {
        let msg = error["message"].as_str()
            .or_else(|| error.as_str())
            .unwrap_or("Unknown error");
        if msg.contains("billing") || msg.contains("quota") || msg.contains("credit") {
            return Err(WardenError::Billing(msg.to_string()));
        }
        return Err(WardenError::LLMApi(format!("{}: {}", provider, msg)));
    }
    if !status.is_success() {
        return Err(WardenError::LLMApi(format!("{} returned HTTP {}", provider, status)));
    }
    Ok(data)
}
