//! OpenAI-compatible chat-completions request/response shapes.

use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, ChatResponse, Role, ToolCall, ToolDefinition, Usage};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
}

impl ChatRequest {
    pub(crate) fn new(model: &str, messages: &[ChatMessage], tools: &[ToolDefinition]) -> Self {
        let tools: Vec<WireTool> = tools.iter().map(to_wire_tool).collect();
        let tool_choice = (!tools.is_empty()).then(|| "auto".to_string());
        Self {
            model: model.to_string(),
            messages: messages.iter().map(to_wire_message).collect(),
            tools,
            tool_choice,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireTool {
    r#type: String,
    function: WireToolFunction,
}

#[derive(Debug, Serialize)]
struct WireToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

fn to_wire_tool(t: &ToolDefinition) -> WireTool {
    WireTool {
        r#type: "function".to_string(),
        function: WireToolFunction {
            name: t.name.clone(),
            description: t.description.clone(),
            parameters: t.parameters.clone(),
        },
    }
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireToolCall {
    id: String,
    r#type: String,
    function: WireToolCallFunction,
}

#[derive(Debug, Serialize)]
struct WireToolCallFunction {
    name: String,
    arguments: String,
}

fn to_wire_message(m: &ChatMessage) -> WireMessage {
    let role = match m.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    // Tool results must carry content even when empty, or providers reject the turn.
    let content = if m.role == Role::Tool {
        Some(m.content.clone())
    } else {
        Some(m.content.clone()).filter(|s| !s.is_empty())
    };
    WireMessage {
        role: role.to_string(),
        content,
        tool_calls: m
            .tool_calls
            .iter()
            .map(|tc| WireToolCall {
                id: tc.id.clone(),
                r#type: "function".to_string(),
                function: WireToolCallFunction {
                    name: tc.name.clone(),
                    arguments: tc.arguments.clone(),
                },
            })
            .collect(),
        tool_call_id: m.tool_call_id.clone(),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChoiceToolCall>,
}

#[derive(Debug, Deserialize)]
struct ChoiceToolCall {
    id: String,
    #[serde(default)]
    function: ChoiceToolCallFunction,
}

#[derive(Debug, Deserialize, Default)]
struct ChoiceToolCallFunction {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl TryFrom<ChatCompletion> for ChatResponse {
    type Error = LlmError;

    fn try_from(v: ChatCompletion) -> Result<Self> {
        let choice = v.choices.into_iter().next().ok_or_else(|| {
            LlmError::ResponseFormat("chat completion missing choices".to_string())
        })?;

        let usage = v
            .usage
            .map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        let raw_content = choice.message.content.unwrap_or_default();
        let (reasoning, content) = match choice.message.reasoning_content {
            Some(r) if !r.trim().is_empty() => (Some(r), raw_content),
            _ => split_think_block(&raw_content),
        };

        Ok(ChatResponse {
            message: ChatMessage {
                role: Role::Assistant,
                content,
                reasoning,
                tool_calls,
                tool_call_id: None,
            },
            usage,
            finish_reason: choice
                .finish_reason
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

/// Some providers inline reasoning as a leading `<think>...</think>` block.
fn split_think_block(content: &str) -> (Option<String>, String) {
    let trimmed = content.trim_start();
    let Some(rest) = trimmed.strip_prefix("<think>") else {
        return (None, content.to_string());
    };
    let Some((thinking, answer)) = rest.split_once("</think>") else {
        return (None, content.to_string());
    };
    let thinking = thinking.trim();
    let reasoning = (!thinking.is_empty()).then(|| thinking.to_string());
    (reasoning, answer.trim_start().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn completion_with_tool_calls_maps_to_chat_response() {
        let raw = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "apply_labels", "arguments": "{\"labels\":[]}" }
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 3 }
        });
        let parsed: ChatCompletion = serde_json::from_value(raw).unwrap();
        let resp = ChatResponse::try_from(parsed).unwrap();
        assert_eq!(resp.finish_reason, "tool_calls");
        assert_eq!(resp.message.tool_calls.len(), 1);
        assert_eq!(resp.message.tool_calls[0].name, "apply_labels");
        assert_eq!(resp.usage.prompt_tokens, 12);
        assert!(resp.message.content.is_empty());
    }

    #[test]
    fn leading_think_block_becomes_reasoning() {
        let raw = json!({
            "choices": [{ "message": { "content": "<think>check diff</think>\n\nLooks good." } }]
        });
        let parsed: ChatCompletion = serde_json::from_value(raw).unwrap();
        let resp = ChatResponse::try_from(parsed).unwrap();
        assert_eq!(resp.message.reasoning.as_deref(), Some("check diff"));
        assert_eq!(resp.message.content, "Looks good.");
    }

    #[test]
    fn empty_choices_is_a_format_error() {
        let parsed: ChatCompletion = serde_json::from_value(json!({ "choices": [] })).unwrap();
        let err = ChatResponse::try_from(parsed).unwrap_err();
        assert!(matches!(err, LlmError::ResponseFormat(_)));
    }

    #[test]
    fn tool_result_messages_keep_empty_content() {
        let req = ChatRequest::new("m", &[ChatMessage::tool_result("call_1", "")], &[]);
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["messages"][0]["content"], json!(""));
        assert_eq!(value["messages"][0]["tool_call_id"], json!("call_1"));
        assert!(value.get("tool_choice").is_none());
    }
}
