use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ToolError>;

/// One rejected field of a tool payload, addressed by a JSON-ish path
/// such as `issues[2].severity`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

/// Every field-level problem found in a single payload. Validation never stops
/// at the first problem, so callers get the whole list at once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(path: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.push(path, message);
        errors
    }

    pub fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldError {
            path: path.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has_path(&self, path: &str) -> bool {
        self.0.iter().any(|e| e.path == path)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", e.path, e.message)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("operation aborted")]
    Aborted,

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<ValidationErrors> for ToolError {
    fn from(e: ValidationErrors) -> Self {
        Self::Validation(e)
    }
}

impl From<std::io::Error> for ToolError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(e: serde_json::Error) -> Self {
        Self::ExecutionFailed(format!("unexpected json: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_render_field_addressed() {
        let mut errors = ValidationErrors::new();
        errors.push("labels", "at least one label is required");
        errors.push("explanation", "too short");
        assert_eq!(
            errors.to_string(),
            "labels: at least one label is required; explanation: too short"
        );
        assert!(errors.has_path("explanation"));
        assert!(!errors.has_path("issues"));
    }
}
