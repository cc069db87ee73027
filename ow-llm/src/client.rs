use crate::error::{LlmError, Result};
use crate::model::ModelRef;
use crate::types::{ChatMessage, ChatResponse, ToolDefinition};
use crate::wire::{ChatCompletion, ChatRequest};
use std::collections::HashMap;
use std::time::Duration;

/// Where a provider's chat-completions API lives and how to authenticate.
#[derive(Debug, Clone)]
pub struct ProviderEndpoint {
    pub base_url: String,
    pub api_key: Option<String>,
}

#[derive(Clone)]
pub struct LlmClient {
    endpoint: ProviderEndpoint,
    model: ModelRef,
    client: reqwest::Client,
}

impl LlmClient {
    #[tracing::instrument(level = "debug", skip_all, fields(model = %model))]
    pub fn new(endpoint: ProviderEndpoint, model: ModelRef, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(%e, "reqwest client build failed; falling back to default client");
                reqwest::Client::new()
            });
        Self {
            endpoint,
            model,
            client,
        }
    }

    pub fn model(&self) -> &ModelRef {
        &self.model
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.endpoint.base_url.trim_end_matches('/')
        )
    }

    #[tracing::instrument(level = "info", skip_all, fields(model = %self.model))]
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse> {
        let (tools_sanitized, forward, reverse) = sanitize_tools(tools);
        let messages_sanitized = sanitize_messages(messages, &forward);
        let req = ChatRequest::new(&self.model.model_id, &messages_sanitized, &tools_sanitized);

        let mut builder = self.client.post(self.completions_url()).json(&req);
        if let Some(key) = self.endpoint.api_key.as_deref().filter(|k| !k.is_empty()) {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            // Keep the numeric status in the message; retry classification keys on it.
            let hint = if status.as_u16() == 429 {
                " (rate limit)"
            } else {
                ""
            };
            return Err(LlmError::Http(format!(
                "chat completion status={}{hint} body={body}",
                status.as_u16()
            )));
        }

        let parsed: ChatCompletion = serde_json::from_str(&body)?;
        let mut resp = ChatResponse::try_from(parsed)?;
        for tc in resp.message.tool_calls.iter_mut() {
            if let Some(orig) = reverse.get(&tc.name) {
                tc.name = orig.clone();
            }
        }
        tracing::debug!(
            finish_reason = %resp.finish_reason,
            tool_calls = resp.message.tool_calls.len(),
            prompt_tokens = resp.usage.prompt_tokens,
            completion_tokens = resp.usage.completion_tokens,
            "chat completion received"
        );
        Ok(resp)
    }
}

type NameMap = HashMap<String, String>;

fn sanitize_tools(tools: &[ToolDefinition]) -> (Vec<ToolDefinition>, NameMap, NameMap) {
    let mut used: HashMap<String, usize> = HashMap::new();
    let mut forward = NameMap::new();
    let mut reverse = NameMap::new();
    let mut out = Vec::with_capacity(tools.len());

    for t in tools {
        let mut name = sanitize_tool_name(&t.name);
        if let Some(n) = used.get_mut(&name) {
            *n += 1;
            name = format!("{name}_{}", *n);
        } else {
            used.insert(name.clone(), 0);
        }
        forward.insert(t.name.clone(), name.clone());
        reverse.insert(name.clone(), t.name.clone());
        out.push(ToolDefinition {
            name,
            ..t.clone()
        });
    }

    (out, forward, reverse)
}

fn sanitize_messages(messages: &[ChatMessage], forward: &NameMap) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|m| {
            let mut m = m.clone();
            for tc in m.tool_calls.iter_mut() {
                tc.name = forward
                    .get(&tc.name)
                    .cloned()
                    .unwrap_or_else(|| sanitize_tool_name(&tc.name));
            }
            m
        })
        .collect()
}

/// Tool names must match `^[a-zA-Z0-9_-]+$` on every compatible provider.
fn sanitize_tool_name(name: &str) -> String {
    let out: String = name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() {
        "tool".to_string()
    } else {
        out
    }
}
