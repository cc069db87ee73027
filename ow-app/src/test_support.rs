//! Scripted chat model for driving the tool loop in tests.

use crate::local_backend::ChatModel;
use async_trait::async_trait;
use ow_llm::{ChatMessage, ChatResponse, ModelRef, ToolCall, ToolDefinition, Usage};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Replies from a queue and records every conversation it was sent. An empty
/// queue answers with a plain `done`.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<anyhow::Result<ChatMessage>>>,
    pub seen: Mutex<Vec<Vec<ChatMessage>>>,
    pub offered_tools: Mutex<Vec<Vec<String>>>,
}

impl ScriptedModel {
    pub fn reply(self, message: ChatMessage) -> Self {
        self.replies.lock().unwrap().push_back(Ok(message));
        self
    }

    pub fn call(self, id: &str, name: &str, arguments: serde_json::Value) -> Self {
        self.reply(tool_call(id, name, &arguments.to_string()))
    }

    pub fn fail(self, message: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Err(anyhow::anyhow!(message.to_string())));
        self
    }
}

pub fn tool_call(id: &str, name: &str, arguments: &str) -> ChatMessage {
    ChatMessage {
        tool_calls: vec![ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }],
        ..ChatMessage::assistant("")
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn chat(
        &self,
        _model: &ModelRef,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> anyhow::Result<ChatResponse> {
        self.seen.lock().unwrap().push(messages.to_vec());
        self.offered_tools
            .lock()
            .unwrap()
            .push(tools.iter().map(|t| t.name.clone()).collect());
        let message = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ChatMessage::assistant("done")))?;
        Ok(ChatResponse {
            message,
            usage: Usage::default(),
            finish_reason: "stop".to_string(),
        })
    }
}
