//! Terminal rendering for messages arriving through the session sink.

use crate::backend::{Message, Part, ToolStatus};
use tokio::sync::mpsc;

pub fn render_message(message: &Message) -> String {
    let mut lines = Vec::new();
    for part in &message.parts {
        match part {
            Part::Text { text } if !text.trim().is_empty() => lines.push(text.trim_end().to_string()),
            Part::Tool {
                tool,
                status,
                title,
                error,
                ..
            } => {
                let mut line = format!("[tool] {tool}: {}", status.as_str());
                match (status, title, error) {
                    (ToolStatus::Error, _, Some(error)) => line.push_str(&format!(" ({error})")),
                    (_, Some(title), _) => line.push_str(&format!(" ({title})")),
                    _ => {}
                }
                lines.push(line);
            }
            _ => {}
        }
    }
    lines.join("\n")
}

/// Writes every message to stderr until the sink closes; stdout is kept for
/// the final result.
pub async fn print_messages(mut rx: mpsc::Receiver<Message>) {
    while let Some(message) = rx.recv().await {
        let rendered = render_message(&message);
        if !rendered.is_empty() {
            eprintln!("{rendered}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MessageInfo, MessageRole, MessageTime};

    fn message(parts: Vec<Part>) -> Message {
        Message {
            info: MessageInfo {
                id: "m".to_string(),
                session_id: "s".to_string(),
                role: MessageRole::Assistant,
                time: MessageTime {
                    created: 1,
                    completed: Some(2),
                },
            },
            parts,
        }
    }

    #[test]
    fn renders_text_and_tool_status_lines() {
        let msg = message(vec![
            Part::StepStart,
            Part::Reasoning {
                text: "hidden".to_string(),
            },
            Part::Text {
                text: "Looking at the diff.\n".to_string(),
            },
            Part::Tool {
                tool: "submit_review".to_string(),
                status: ToolStatus::Completed,
                title: Some("Posted review comment".to_string()),
                output: Some("Posted review comment".to_string()),
                error: None,
            },
            Part::Tool {
                tool: "apply_labels".to_string(),
                status: ToolStatus::Error,
                title: None,
                output: None,
                error: Some("validation failed".to_string()),
            },
        ]);
        assert_eq!(
            render_message(&msg),
            "Looking at the diff.\n\
             [tool] submit_review: completed (Posted review comment)\n\
             [tool] apply_labels: error (validation failed)"
        );
    }

    #[test]
    fn empty_messages_render_nothing() {
        assert_eq!(render_message(&message(vec![Part::StepStart])), "");
    }
}
