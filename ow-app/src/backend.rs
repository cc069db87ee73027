//! Model backend boundary: sessions, prompts and the message event stream.

use async_trait::async_trait;
use futures_util::Stream;
use ow_llm::ModelRef;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Unix milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTime {
    pub created: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub id: String,
    #[serde(rename = "sessionID")]
    pub session_id: String,
    pub role: MessageRole,
    pub time: MessageTime,
}

impl MessageInfo {
    pub fn is_completed(&self) -> bool {
        self.time.completed.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl ToolStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Part {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    Tool {
        tool: String,
        status: ToolStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    StepStart,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub info: MessageInfo,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Message {
    /// Every `text` part, in order, concatenated.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "properties")]
pub enum BackendEvent {
    #[serde(rename = "message.updated")]
    MessageUpdated { info: MessageInfo },
    #[serde(rename = "session.idle")]
    SessionIdle {
        #[serde(rename = "sessionID")]
        session_id: String,
    },
}

pub type EventStream = Pin<Box<dyn Stream<Item = BackendEvent> + Send>>;

#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn create_session(&self, title: &str) -> anyhow::Result<String>;

    /// Events for every session; consumers filter by session id.
    async fn subscribe(&self) -> anyhow::Result<EventStream>;

    /// Resolves with the final assistant message once the turn is over.
    async fn prompt(&self, session_id: &str, model: &ModelRef, text: &str) -> anyhow::Result<Message>;

    async fn message(&self, session_id: &str, message_id: &str) -> anyhow::Result<Message>;

    async fn delete_session(&self, session_id: &str) -> anyhow::Result<()>;
}
