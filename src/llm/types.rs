use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: String },
}

/// Provider-neutral conversation turn. Each provider converts these into its
/// own wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl ChatMessage {
    pub fn user(text: &str) -> Self {
        Self { role: Role::User, content: vec![ContentBlock::Text { text: text.to_string() }] }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self { role: Role::Assistant, content }
    }

    pub fn tool_result(tool_use_id: &str, content: &str) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::ToolResult {
                tool_use_id: tool_use_id.to_string(),
                content: content.to_string(),
            }],
        }
    }

    /// Concatenated text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// A tool the model may call, described by a JSON Schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Other(String),
}

impl StopReason {
    pub fn from_wire(value: Option<&str>) -> Self {
        match value {
            Some("end_turn") | Some("stop") | None => Self::EndTurn,
            Some("tool_use") | Some("tool_calls") => Self::ToolUse,
            Some("max_tokens") | Some("length") => Self::MaxTokens,
            Some(other) => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub model: String,
}

impl ChatResponse {
    /// Content blocks to append to the conversation as the assistant turn.
    pub fn to_blocks(&self) -> Vec<ContentBlock> {
        let mut blocks = Vec::new();
        if !self.text.is_empty() {
            blocks.push(ContentBlock::Text { text: self.text.clone() });
        }
        for call in &self.tool_calls {
            blocks.push(ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.arguments.clone(),
            });
        }
        blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stop_reason_mapping() {
        assert_eq!(StopReason::from_wire(Some("tool_calls")), StopReason::ToolUse);
        assert_eq!(StopReason::from_wire(Some("stop")), StopReason::EndTurn);
        assert_eq!(StopReason::from_wire(Some("length")), StopReason::MaxTokens);
        assert_eq!(StopReason::from_wire(Some("refusal")), StopReason::Other("refusal".into()));
    }

    #[test]
    fn test_response_blocks() {
        let response = ChatResponse {
            text: "scanning".into(),
            tool_calls: vec![ToolCall { id: "c1".into(), name: "run_nmap".into(), arguments: json!({"target": "10.0.0.1"}) }],
            stop_reason: StopReason::ToolUse,
            input_tokens: None,
            output_tokens: None,
            model: "m".into(),
        };
        let message = ChatMessage::assistant(response.to_blocks());
        assert_eq!(message.content.len(), 2);
        assert_eq!(message.text(), "scanning");
    }
}
