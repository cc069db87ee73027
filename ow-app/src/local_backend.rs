//! In-process model backend: sessions live in memory and each prompt runs a
//! chat/tool loop over `ow-llm`, publishing every message change as a
//! `message.updated` event.

use crate::backend::{
    BackendEvent, EventStream, Message, MessageInfo, MessageRole, MessageTime, ModelBackend, Part,
    ToolStatus,
};
use crate::config::WorkflowsConfig;
use async_trait::async_trait;
use ow_llm::{ChatMessage, ChatResponse, LlmClient, ModelRef, ToolDefinition};
use ow_tools::{RetryPolicy, Tool, ToolContext, ToolError, to_llm_tool_def, with_retry};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

const EVENT_BUFFER: usize = 256;
const LOOP_LIMIT_TEXT: &str = "Tool loop limit reached.";

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(
        &self,
        model: &ModelRef,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> anyhow::Result<ChatResponse>;
}

/// Resolves a `provider/model` to a cached client for its endpoint.
pub struct ProviderRouter {
    config: WorkflowsConfig,
    timeout: Duration,
    clients: Mutex<HashMap<ModelRef, Arc<LlmClient>>>,
}

impl ProviderRouter {
    pub fn new(config: WorkflowsConfig) -> Self {
        let timeout = config.session.request_timeout();
        Self {
            config,
            timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client(&self, model: &ModelRef) -> anyhow::Result<Arc<LlmClient>> {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(model) {
            return Ok(client.clone());
        }
        let endpoint = self.config.endpoint(&model.provider_id).ok_or_else(|| {
            anyhow::anyhow!("provider {:?} has no configured base_url", model.provider_id)
        })?;
        if endpoint.api_key.is_none() {
            tracing::warn!(provider = %model.provider_id, "no api key configured for provider");
        }
        let client = Arc::new(LlmClient::new(endpoint, model.clone(), self.timeout));
        clients.insert(model.clone(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl ChatModel for ProviderRouter {
    async fn chat(
        &self,
        model: &ModelRef,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> anyhow::Result<ChatResponse> {
        let client = self.client(model)?;
        Ok(client.chat(messages, tools).await?)
    }
}

struct LocalSession {
    history: Vec<ChatMessage>,
    messages: Vec<Message>,
}

pub struct LocalBackend {
    model: Arc<dyn ChatModel>,
    tools: Vec<Arc<dyn Tool>>,
    system_prompt: Option<String>,
    retry: RetryPolicy,
    cancel: CancellationToken,
    tool_loops_max: usize,
    sessions: Mutex<HashMap<String, LocalSession>>,
    events: broadcast::Sender<BackendEvent>,
}

impl LocalBackend {
    pub fn new(model: Arc<dyn ChatModel>, tools: Vec<Arc<dyn Tool>>, cancel: CancellationToken) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            model,
            tools,
            system_prompt: None,
            retry: RetryPolicy::default(),
            cancel,
            tool_loops_max: 16,
            sessions: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: Option<String>) -> Self {
        self.system_prompt = system_prompt.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_tool_loops_max(mut self, tool_loops_max: usize) -> Self {
        self.tool_loops_max = tool_loops_max.max(1);
        self
    }

    fn with_session<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut LocalSession) -> T,
    ) -> anyhow::Result<T> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| anyhow::anyhow!("session not found: {session_id}"))?;
        Ok(f(session))
    }

    /// Stores the latest snapshot of `message` and announces it.
    fn publish(&self, message: &Message) -> anyhow::Result<()> {
        self.with_session(&message.info.session_id, |session| {
            match session
                .messages
                .iter_mut()
                .find(|m| m.info.id == message.info.id)
            {
                Some(existing) => *existing = message.clone(),
                None => session.messages.push(message.clone()),
            }
        })?;
        // No subscribers is fine.
        let _ = self.events.send(BackendEvent::MessageUpdated {
            info: message.info.clone(),
        });
        Ok(())
    }

    fn announce_idle(&self, session_id: &str) {
        let _ = self.events.send(BackendEvent::SessionIdle {
            session_id: session_id.to_string(),
        });
    }

    fn push_history(&self, session_id: &str, message: ChatMessage) -> anyhow::Result<()> {
        self.with_session(session_id, |session| session.history.push(message))
    }

    async fn chat_with_retry(
        &self,
        model: &ModelRef,
        history: &[ChatMessage],
        tool_defs: &[ToolDefinition],
    ) -> anyhow::Result<ChatResponse> {
        let chat_model = &self.model;
        let response = with_retry(&self.retry, &self.cancel, move || async move {
            chat_model
                .chat(model, history, tool_defs)
                .await
                .map_err(|e| ToolError::ExecutionFailed(format!("{e:#}")))
        })
        .await?;
        Ok(response)
    }

    /// Runs one tool call, updating its part in `message` as it moves
    /// through pending, running and a terminal status.
    async fn run_tool(
        &self,
        message: &mut Message,
        call: &ow_llm::ToolCall,
    ) -> anyhow::Result<String> {
        let index = message.parts.len();
        message.parts.push(Part::Tool {
            tool: call.name.clone(),
            status: ToolStatus::Pending,
            title: None,
            output: None,
            error: None,
        });
        self.publish(message)?;

        let Some(tool) = self.tools.iter().find(|t| t.spec().name == call.name).cloned() else {
            tracing::error!(tool_call_id = %call.id, tool_name = %call.name, "tool call referenced unknown tool");
            let error = format!("unknown tool: {}", call.name);
            set_tool_part(message, index, ToolStatus::Error, None, Some(error.clone()));
            self.publish(message)?;
            return Ok(json!({ "error": error }).to_string());
        };

        let args: serde_json::Value = match serde_json::from_str(&call.arguments) {
            Ok(v) => v,
            Err(e) => {
                let error = format!("invalid tool arguments for {}: {e}", call.name);
                tracing::warn!(tool_call_id = %call.id, tool_name = %call.name, error = %error, "tool arguments rejected");
                set_tool_part(message, index, ToolStatus::Error, None, Some(error.clone()));
                self.publish(message)?;
                return Ok(json!({ "error": error }).to_string());
            }
        };

        set_tool_part(message, index, ToolStatus::Running, None, None);
        self.publish(message)?;

        let started = Instant::now();
        let ctx = ToolContext {
            cancel: self.cancel.clone(),
        };
        match tool.execute(args, &ctx).await {
            Ok(output) => {
                tracing::info!(
                    tool_call_id = %call.id,
                    tool_name = %call.name,
                    latency_ms = started.elapsed().as_millis() as u64,
                    output_len = output.len(),
                    "tool call executed"
                );
                set_tool_part(message, index, ToolStatus::Completed, Some(output.clone()), None);
                self.publish(message)?;
                Ok(output)
            }
            Err(ToolError::Aborted) => {
                set_tool_part(message, index, ToolStatus::Error, None, Some(ToolError::Aborted.to_string()));
                self.publish(message)?;
                Err(ToolError::Aborted.into())
            }
            Err(e) => {
                tracing::warn!(tool_call_id = %call.id, tool_name = %call.name, error = %e, "tool call failed");
                set_tool_part(message, index, ToolStatus::Error, None, Some(e.to_string()));
                self.publish(message)?;
                Ok(json!({ "error": e.to_string() }).to_string())
            }
        }
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn new_message(session_id: &str, role: MessageRole) -> Message {
    Message {
        info: MessageInfo {
            id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            session_id: session_id.to_string(),
            role,
            time: MessageTime {
                created: now_millis(),
                completed: None,
            },
        },
        parts: Vec::new(),
    }
}

fn set_tool_part(
    message: &mut Message,
    index: usize,
    next: ToolStatus,
    next_output: Option<String>,
    next_error: Option<String>,
) {
    if let Some(Part::Tool {
        status,
        title,
        output,
        error,
        ..
    }) = message.parts.get_mut(index)
    {
        *status = next;
        if let Some(first) = next_output.as_deref().and_then(|o| o.lines().next()) {
            *title = Some(first.to_string());
        }
        *output = next_output;
        *error = next_error;
    }
}

#[async_trait]
impl ModelBackend for LocalBackend {
    async fn create_session(&self, title: &str) -> anyhow::Result<String> {
        let id = format!("ses_{}", uuid::Uuid::new_v4().simple());
        let history = self
            .system_prompt
            .iter()
            .map(ChatMessage::system)
            .collect();
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).insert(
            id.clone(),
            LocalSession {
                history,
                messages: Vec::new(),
            },
        );
        tracing::debug!(session_id = %id, title, "local session created");
        Ok(id)
    }

    async fn subscribe(&self) -> anyhow::Result<EventStream> {
        let rx = self.events.subscribe();
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(stream))
    }

    #[tracing::instrument(level = "info", skip(self, text), fields(model = %model))]
    async fn prompt(&self, session_id: &str, model: &ModelRef, text: &str) -> anyhow::Result<Message> {
        let mut user = new_message(session_id, MessageRole::User);
        user.parts.push(Part::Text {
            text: text.to_string(),
        });
        user.info.time.completed = Some(now_millis());
        self.push_history(session_id, ChatMessage::user(text))?;
        self.publish(&user)?;

        let tool_defs: Vec<ToolDefinition> = self
            .tools
            .iter()
            .map(|t| to_llm_tool_def(t.as_ref()))
            .collect();

        for tool_loop in 1..=self.tool_loops_max {
            tracing::debug!(tool_loop, "tool loop iteration started");
            let mut message = new_message(session_id, MessageRole::Assistant);
            message.parts.push(Part::StepStart);
            self.publish(&message)?;

            let history = self.with_session(session_id, |s| s.history.clone())?;
            let started = Instant::now();
            let response = self.chat_with_retry(model, &history, &tool_defs).await?;
            tracing::info!(
                tool_loop,
                latency_ms = started.elapsed().as_millis() as u64,
                prompt_tokens = response.usage.prompt_tokens,
                completion_tokens = response.usage.completion_tokens,
                tool_calls = response.message.tool_calls.len(),
                "llm call completed"
            );

            let reply = response.message;
            if let Some(reasoning) = reply.reasoning.as_ref().filter(|r| !r.trim().is_empty()) {
                message.parts.push(Part::Reasoning {
                    text: reasoning.clone(),
                });
            }
            if !reply.content.is_empty() {
                message.parts.push(Part::Text {
                    text: reply.content.clone(),
                });
            }
            self.push_history(session_id, reply.clone())?;

            if reply.tool_calls.is_empty() {
                message.info.time.completed = Some(now_millis());
                self.publish(&message)?;
                self.announce_idle(session_id);
                return Ok(message);
            }

            for call in &reply.tool_calls {
                let result = self.run_tool(&mut message, call).await?;
                self.push_history(session_id, ChatMessage::tool_result(call.id.clone(), result))?;
            }
            message.info.time.completed = Some(now_millis());
            self.publish(&message)?;
        }

        tracing::error!(tool_loops_max = self.tool_loops_max, "tool loop limit reached");
        let mut message = new_message(session_id, MessageRole::Assistant);
        message.parts.push(Part::Text {
            text: LOOP_LIMIT_TEXT.to_string(),
        });
        message.info.time.completed = Some(now_millis());
        self.publish(&message)?;
        self.announce_idle(session_id);
        Ok(message)
    }

    async fn message(&self, session_id: &str, message_id: &str) -> anyhow::Result<Message> {
        self.with_session(session_id, |s| {
            s.messages.iter().find(|m| m.info.id == message_id).cloned()
        })?
        .ok_or_else(|| anyhow::anyhow!("message not found: {message_id}"))
    }

    async fn delete_session(&self, session_id: &str) -> anyhow::Result<()> {
        let removed = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);
        if removed.is_none() {
            return Err(anyhow::anyhow!("session not found: {session_id}"));
        }
        tracing::debug!(session_id, "local session deleted");
        Ok(())
    }
}
