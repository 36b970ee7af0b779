use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use crate::errors::WardenError;
use super::provider::{read_json, LLMProvider};
use super::types::{ChatMessage, ChatResponse, ContentBlock, Role, StopReason, ToolCall, ToolSchema};
use tracing::debug;

/// OpenAI chat-completions client. Also serves DeepSeek and any other
/// endpoint speaking the same protocol.
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    name: String,
}

impl OpenAIProvider {
    pub fn new(api_key: &str, model: Option<&str>) -> Self {
        Self::with_base_url("openai", api_key, model.unwrap_or("gpt-4"), "https://api.openai.com/v1")
    }

    pub fn with_base_url(name: &str, api_key: &str, model: &str, base_url: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            name: name.to_string(),
        }
    }
}

fn to_wire_messages(messages: &[ChatMessage], system: &str) -> Vec<Value> {
    let mut wire = Vec::new();
    if !system.is_empty() {
        wire.push(json!({"role": "system", "content": system}));
    }

    for message in messages {
        match message.role {
            Role::User => {
                let text = message.text();
                if !text.is_empty() {
                    wire.push(json!({"role": "user", "content": text}));
                }
                for block in &message.content {
                    if let ContentBlock::ToolResult { tool_use_id, content } = block {
                        wire.push(json!({"role": "tool", "tool_call_id": tool_use_id, "content": content}));
                    }
                }
            }
            Role::Assistant => {
                let calls: Vec<Value> = message.content.iter()
                    .filter_map(|block| match block {
                        ContentBlock::ToolUse { id, name, input } => Some(json!({
                            "id": id,
                            "type": "function",
                            "function": {"name": name, "arguments": input.to_string()},
                        })),
                        _ => None,
                    })
                    .collect();
                let text = message.text();
                let content = if text.is_empty() { Value::Null } else { Value::String(text) };
                let mut entry = json!({"role": "assistant", "content": content});
                if !calls.is_empty() {
                    entry["tool_calls"] = json!(calls);
                }
                wire.push(entry);
            }
        }
    }
    wire
}

fn to_wire_tools(tools: &[ToolSchema]) -> Vec<Value> {
    tools.iter()
        .map(|t| json!({
            "type": "function",
            "function": {"name": t.name, "description": t.description, "parameters": t.input_schema},
        }))
        .collect()
}

fn parse_response(data: &Value, model: &str) -> Result<ChatResponse, WardenError> {
    let choice = data["choices"].get(0)
        .ok_or_else(|| WardenError::LLMApi("No choices in OpenAI response".into()))?;
    let message = &choice["message"];

    let mut tool_calls = Vec::new();
    if let Some(calls) = message["tool_calls"].as_array() {
        for call in calls {
            let raw = call["function"]["arguments"].as_str().unwrap_or("{}");
            let arguments = serde_json::from_str(raw)
                .map_err(|e| WardenError::LLMApi(format!("Malformed tool arguments: {}", e)))?;
            tool_calls.push(ToolCall {
                id: call["id"].as_str().unwrap_or_default().to_string(),
                name: call["function"]["name"].as_str().unwrap_or_default().to_string(),
                arguments,
            });
        }
    }

    Ok(ChatResponse {
        text: message["content"].as_str().unwrap_or("").to_string(),
        tool_calls,
        stop_reason: StopReason::from_wire(choice["finish_reason"].as_str()),
        input_tokens: data["usage"]["prompt_tokens"].as_u64(),
        output_tokens: data["usage"]["completion_tokens"].as_u64(),
        model: data["model"].as_str().unwrap_or(model).to_string(),
    })
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        system: &str,
    ) -> Result<ChatResponse, WardenError> {
        let mut body = json!({
            "model": self.model,
            "messages": to_wire_messages(messages, system),
            "max_tokens": 4096,
        });
        if !tools.is_empty() {
            body["tools"] = json!(to_wire_tools(tools));
        }

        let resp = self.client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| WardenError::Network(format!("{} request failed: {}", self.name, e)))?;

        let data = read_json(resp, &self.name).await?;
        let response = parse_response(&data, &self.model)?;
        debug!(provider = %self.name, model = %self.model, tool_calls = response.tool_calls.len(), "Chat completion");
        Ok(response)
    }

    fn provider_name(&self) -> &str { &self.name }
    fn model_name(&self) -> &str { &self.model }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_results_become_tool_role() {
        let messages = vec![
            ChatMessage::user("find open ports"),
            ChatMessage::assistant(vec![ContentBlock::ToolUse {
                id: "call_1".into(),
                name: "run_nmap".into(),
                input: json!({"target": "10.0.0.1"}),
            }]),
            ChatMessage::tool_result("call_1", "done"),
        ];
        let wire = to_wire_messages(&messages, "sys");

        assert_eq!(wire.len(), 4);
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[2]["content"], Value::Null);
        assert_eq!(wire[2]["tool_calls"][0]["function"]["arguments"], "{\"target\":\"10.0.0.1\"}");
        assert_eq!(wire[3]["role"], "tool");
        assert_eq!(wire[3]["tool_call_id"], "call_1");
    }

    #[test]
    fn test_tools_wrapped_as_functions() {
        let tools = vec![ToolSchema { name: "task_complete".into(), description: "done".into(), input_schema: json!({"type": "object"}) }];
        let wire = to_wire_tools(&tools);
        assert_eq!(wire[0]["type"], "function");
        assert_eq!(wire[0]["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn test_parse_function_call() {
        let data = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{"id": "call_9", "type": "function",
                        "function": {"name": "get_scan_status", "arguments": "{\"scan_id\":\"abc\"}"}}]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 4}
        });
        let response = parse_response(&data, "gpt-4").unwrap();
        assert!(response.text.is_empty());
        assert_eq!(response.tool_calls[0].arguments["scan_id"], "abc");
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.model, "gpt-4");
    }

    #[test]
    fn test_malformed_arguments_rejected() {
        let data = json!({"choices": [{"message": {"tool_calls": [
            {"id": "c", "function": {"name": "x", "arguments": "{not json"}}
        ]}}]});
        assert!(parse_response(&data, "m").is_err());
    }
}
