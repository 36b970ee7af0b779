use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use crate::errors::WardenError;
use super::provider::{read_json, LLMProvider};
use super::types::{ChatMessage, ChatResponse, StopReason, ToolCall, ToolSchema};
use tracing::debug;

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, model: Option<&str>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            model: model.unwrap_or("claude-sonnet-4-20250514").to_string(),
            base_url: "https://api.anthropic.com".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn request_body(&self, messages: &[ChatMessage], tools: &[ToolSchema], system: &str) -> Value {
        // The neutral content blocks already serialize in Anthropic's shape.
        let mut body = json!({
            "model": self.model,
            "max_tokens": 4096,
            "messages": messages,
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }
        body
    }
}

fn parse_response(data: &Value, model: &str) -> Result<ChatResponse, WardenError> {
    let blocks = data["content"].as_array()
        .ok_or_else(|| WardenError::LLMApi("No content in Anthropic response".into()))?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
        match block["type"].as_str() {
            Some("text") => text.push_str(block["text"].as_str().unwrap_or("")),
            Some("tool_use") => tool_calls.push(ToolCall {
                id: block["id"].as_str().unwrap_or_default().to_string(),
                name: block["name"].as_str().unwrap_or_default().to_string(),
                arguments: block.get("input").cloned().unwrap_or_else(|| json!({})),
            }),
            _ => {}
        }
    }

    Ok(ChatResponse {
        text,
        tool_calls,
        stop_reason: StopReason::from_wire(data["stop_reason"].as_str()),
        input_tokens: data["usage"]["input_tokens"].as_u64(),
        output_tokens: data["usage"]["output_tokens"].as_u64(),
        model: data["model"].as_str().unwrap_or(model).to_string(),
    })
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        system: &str,
    ) -> Result<ChatResponse, WardenError> {
        let body = self.request_body(messages, tools, system);

        let resp = self.client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| WardenError::Network(format!("Anthropic API request failed: {}", e)))?;

        let data = read_json(resp, "Anthropic").await?;
        let response = parse_response(&data, &self.model)?;
        debug!(
            model = %self.model,
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            tool_calls = response.tool_calls.len(),
            "Anthropic completion"
        );
        Ok(response)
    }

    fn provider_name(&self) -> &str { "anthropic" }
    fn model_name(&self) -> &str { &self.model }
}
