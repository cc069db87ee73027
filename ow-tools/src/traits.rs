use crate::error::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// Per-call context handed to a tool by the model loop.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    /// Returns a human-readable, line-oriented status summary.
    async fn execute(&self, arguments: serde_json::Value, ctx: &ToolContext) -> Result<String>;
}

pub fn to_llm_tool_def(tool: &dyn Tool) -> ow_llm::ToolDefinition {
    let spec = tool.spec();
    ow_llm::ToolDefinition {
        name: spec.name,
        description: spec.description,
        parameters: spec.parameters_schema,
    }
}
