use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use crate::errors::WardenError;
use super::provider::{read_json, LLMProvider};
use super::types::{ChatMessage, ChatResponse, ContentBlock, Role, StopReason, ToolCall, ToolSchema};

/// Ollama chat endpoint. The models it serves have no native tool calling,
/// so tools are described in the system prompt and the call is read back
/// out of the reply text.
pub struct LocalProvider {
    client: Client,
    base_url: String,
    model: String,
}

impl LocalProvider {
    pub fn new(base_url: Option<&str>, model: Option<&str>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.unwrap_or("http://localhost:11434").trim_end_matches('/').to_string(),
            model: model.unwrap_or("llama2").to_string(),
        }
    }
}

fn system_prompt(system: &str, tools: &[ToolSchema]) -> String {
    let mut prompt = system.to_string();
    if tools.is_empty() {
        return prompt;
    }
    prompt.push_str("\n\nAvailable tools:\n");
    for tool in tools {
        prompt.push_str(&format!("- {}: {}\n  arguments schema: {}\n", tool.name, tool.description, tool.input_schema));
    }
    prompt.push_str(
        "\nTo use a tool, respond with a single JSON object of the form \
         {\"tool\": \"<name>\", \"arguments\": {...}} and nothing else.",
    );
    prompt
}

fn to_wire_messages(messages: &[ChatMessage], system: &str) -> Vec<Value> {
    let mut wire = vec![json!({"role": "system", "content": system})];
    for message in messages {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        let parts: Vec<String> = message.content.iter()
            .map(|block| match block {
                ContentBlock::Text { text } => text.clone(),
                ContentBlock::ToolUse { name, input, .. } => json!({"tool": name, "arguments": input}).to_string(),
                ContentBlock::ToolResult { content, .. } => format!("Tool result: {}", content),
            })
            .collect();
        wire.push(json!({"role": role, "content": parts.join("\n")}));
    }
    wire
}

/// Pull a `{"tool": ..., "arguments": ...}` object out of free text, taking
/// everything from the first `{` to the last `}`.
pub fn extract_tool_call(text: &str) -> Option<ToolCall> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if start >= end {
        return None;
    }
    let value: Value = serde_json::from_str(&text[start..=end]).ok()?;
    let name = value["tool"].as_str()?.to_string();
    let arguments = match value.get("arguments") {
        Some(args) if args.is_object() => args.clone(),
        _ => json!({}),
    };
    Some(ToolCall { id: format!("local-{}", uuid::Uuid::new_v4()), name, arguments })
}

#[async_trait]
impl LLMProvider for LocalProvider {
    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        system: &str,
    ) -> Result<ChatResponse, WardenError> {
        let body = json!({
            "model": self.model,
            "messages": to_wire_messages(messages, &system_prompt(system, tools)),
            "stream": false,
        });

        let resp = self.client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| WardenError::Network(format!("Local LLM request failed: {}", e)))?;

        let data = read_json(resp, "ollama").await?;
        let text = data["message"]["content"].as_str().unwrap_or("").to_string();

        let tool_calls: Vec<ToolCall> = extract_tool_call(&text).into_iter().collect();
        let stop_reason = if tool_calls.is_empty() { StopReason::EndTurn } else { StopReason::ToolUse };
        Ok(ChatResponse {
            text,
            tool_calls,
            stop_reason,
            input_tokens: data["prompt_eval_count"].as_u64(),
            output_tokens: data["eval_count"].as_u64(),
            model: self.model.clone(),
        })
    }

    fn provider_name(&self) -> &str { "ollama" }
    fn model_name(&self) -> &str { &self.model }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_tool_call_from_prose() {
        let text = "I will scan first.\n{\"tool\": \"run_nmap\", \"arguments\": {\"target\": \"10.0.0.1\"}}\nThanks";
        let call = extract_tool_call(text).unwrap();
        assert_eq!(call.name, "run_nmap");
        assert_eq!(call.arguments["target"], "10.0.0.1");
        assert!(call.id.starts_with("local-"));
    }

    #[test]
    fn test_extract_requires_tool_name() {
        assert!(extract_tool_call("no json here").is_none());
        assert!(extract_tool_call("{\"arguments\": {}}").is_none());
        assert!(extract_tool_call("} backwards {").is_none());
    }

    #[test]
    fn test_missing_arguments_default_to_object() {
        let call = extract_tool_call("{\"tool\": \"task_complete\"}").unwrap();
        assert!(call.arguments.as_object().unwrap().is_empty());
    }

    #[test]
    fn test_system_prompt_lists_tools() {
        let tools = vec![ToolSchema { name: "run_nuclei".into(), description: "templates".into(), input_schema: json!({}) }];
        let prompt = system_prompt("You are a tester.", &tools);
        assert!(prompt.starts_with("You are a tester."));
        assert!(prompt.contains("- run_nuclei: templates"));
        assert!(prompt.contains("\"tool\""));
    }

    #[test]
    fn test_tool_history_flattened_to_text() {
        let messages = vec![
            ChatMessage::assistant(vec![ContentBlock::ToolUse { id: "x".into(), name: "run_nmap".into(), input: json!({}) }]),
            ChatMessage::tool_result("x", "22/tcp open"),
        ];
        let wire = to_wire_messages(&messages, "s");
        assert_eq!(wire[1]["role"], "assistant");
        assert!(wire[1]["content"].as_str().unwrap().contains("run_nmap"));
        assert_eq!(wire[2]["content"], "Tool result: 22/tcp open");
    }
}
