use crate::error::{LlmError, Result};
use std::fmt;
use std::str::FromStr;

/// A `provider/model` pair, e.g. `minimax/MiniMax-M2.1`.
///
/// Everything after the first `/` is the model id, so ids that contain
/// slashes themselves (`openrouter/anthropic/claude-sonnet`) survive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelRef {
    pub provider_id: String,
    pub model_id: String,
}

impl ModelRef {
    pub fn new(provider_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_id: model_id.into(),
        }
    }
}

impl FromStr for ModelRef {
    type Err = LlmError;

    fn from_str(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let Some((provider, model)) = raw.split_once('/') else {
            return Err(LlmError::InvalidInput(format!(
                "invalid model format: {raw}. Expected \"provider/model\"."
            )));
        };
        if provider.is_empty() || model.is_empty() {
            return Err(LlmError::InvalidInput(format!(
                "invalid model format: {raw}. Expected \"provider/model\"."
            )));
        }
        Ok(Self::new(provider, model))
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider_id, self.model_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_and_model() {
        let m: ModelRef = "minimax/MiniMax-M2.1".parse().unwrap();
        assert_eq!(m.provider_id, "minimax");
        assert_eq!(m.model_id, "MiniMax-M2.1");
        assert_eq!(m.to_string(), "minimax/MiniMax-M2.1");
    }

    #[test]
    fn keeps_nested_model_path() {
        let m: ModelRef = "openrouter/anthropic/claude-sonnet-4".parse().unwrap();
        assert_eq!(m.provider_id, "openrouter");
        assert_eq!(m.model_id, "anthropic/claude-sonnet-4");
    }

    #[test]
    fn rejects_missing_halves() {
        for raw in ["gpt-4o", "/gpt-4o", "openai/", ""] {
            let err = raw.parse::<ModelRef>().unwrap_err();
            assert!(err.to_string().contains("provider/model"), "{raw}: {err}");
        }
    }
}
