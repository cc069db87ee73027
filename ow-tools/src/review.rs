//! Sticky review comment: one marker-tagged comment per pull request, updated
//! in place.

use crate::command::{ReviewIssue, ReviewSubmission};
use crate::error::{Result, ToolError};
use crate::github::GitHub;
use crate::retry::{RetryPolicy, check_aborted, with_retry};
use regex::Regex;
use std::sync::LazyLock;
use tokio_util::sync::CancellationToken;

pub const STICKY_MARKER: &str = "<!-- open-workflows:review-sticky -->";
const TITLE_LEN_MAX: usize = 80;
const NO_EXPLANATION: &str = "No explanation provided.";

static SUMMARY_ARTIFACT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)^(.*?)(?:",\s*"?verdict"?|"verdict")"#).expect("summary artifact regex")
});
static CODE_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```[A-Za-z0-9_-]*\n((?s:.*?))```").expect("code fence regex")
});
static SUGGESTION_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:change to:|change it to:|replace with:|suggestion:|add a comment:)\s*")
        .expect("suggestion prefix regex")
});

/// Models sometimes leak the rest of the JSON call into the summary string.
pub fn sanitize_summary(summary: &str) -> String {
    let trimmed = summary.trim();
    match SUMMARY_ARTIFACT_RE.captures(trimmed) {
        Some(caps) => caps[1].trim().to_string(),
        None => trimmed.to_string(),
    }
}

/// First sentence of the first line, capped at 80 characters.
pub fn derive_title(explanation: &str, index: usize) -> String {
    let fallback = || format!("Issue {}", index + 1);
    let trimmed = explanation.trim();
    if trimmed.is_empty() {
        return fallback();
    }
    let first_line = trimmed.lines().next().unwrap_or_default().trim();
    let first_sentence = first_line.split(". ").next().unwrap_or_default().trim();
    let title = if !first_sentence.is_empty() {
        first_sentence.to_string()
    } else if !first_line.is_empty() {
        first_line.to_string()
    } else {
        fallback()
    };
    if title.chars().count() <= TITLE_LEN_MAX {
        return title;
    }
    let head: String = title.chars().take(TITLE_LEN_MAX - 3).collect();
    format!("{head}...")
}

/// Code only: the first fenced block wins, prose prefixes are stripped.
pub fn normalize_suggestion(suggestion: &str) -> String {
    let trimmed = suggestion.trim();
    let code = match CODE_FENCE_RE.captures(trimmed) {
        Some(caps) => caps[1].trim().to_string(),
        None => trimmed.to_string(),
    };
    let mut normalized = code;
    loop {
        let stripped = SUGGESTION_PREFIX_RE.replace(&normalized, "").trim().to_string();
        if stripped == normalized {
            break;
        }
        normalized = stripped;
    }
    normalized
}

fn indent(text: &str, prefix: &str) -> String {
    text.lines()
        .map(|line| format!("{prefix}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn location(issue: &ReviewIssue) -> String {
    match (issue.file.is_empty(), issue.line) {
        (true, _) => "unknown".to_string(),
        (false, 0) => issue.file.clone(),
        (false, line) => format!("{}:{line}", issue.file),
    }
}

/// Deterministic comment body; the marker is always the final line.
pub fn build_comment_body(review: &ReviewSubmission) -> String {
    let mut body = String::from("## AI Review Summary\n\n");
    body.push_str(&format!("**Verdict:** {}\n", review.verdict.label()));
    let sha: String = review.commit_sha.chars().take(7).collect();
    if !sha.is_empty() {
        body.push_str(&format!("**Commit:** `{sha}`\n"));
    }
    body.push('\n');

    body.push_str("### Findings\n\n");
    if review.issues.is_empty() {
        body.push_str("No significant issues found.\n\n");
    } else {
        for (index, issue) in review.issues.iter().enumerate() {
            let explanation = issue.explanation.trim();
            let title = issue
                .title
                .clone()
                .unwrap_or_else(|| derive_title(explanation, index));
            body.push_str(&format!(
                "- **[{}]** `{}` – {title}\n",
                issue.severity.tag(),
                location(issue)
            ));
            let explanation = if explanation.is_empty() {
                NO_EXPLANATION
            } else {
                explanation
            };
            body.push_str(&format!("  - {explanation}\n"));

            let suggestion = issue
                .suggestion
                .as_deref()
                .map(normalize_suggestion)
                .unwrap_or_default();
            if suggestion.contains('\n') {
                body.push_str("  - **Suggested fix:**\n\n");
                body.push_str(&format!("    ```\n{}\n    ```\n", indent(&suggestion, "    ")));
            } else if !suggestion.is_empty() {
                body.push_str(&format!("  - **Suggested fix:** {suggestion}\n"));
            }
        }
        body.push('\n');
    }

    body.push_str(&format!(
        "### Overall Assessment\n\n{}\n\n",
        sanitize_summary(&review.summary)
    ));
    body.push_str(STICKY_MARKER);
    body
}

/// Find-then-write. The listing is retried; the write is issued exactly once.
/// A failed listing degrades to "not found" so the review is never dropped.
#[tracing::instrument(level = "info", skip_all, fields(repository = %review.repository, pull = review.pull_number))]
pub async fn upsert_review_comment(
    github: &GitHub,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
    review: &ReviewSubmission,
) -> Result<String> {
    let body = build_comment_body(review);

    let listed = with_retry(retry, cancel, || {
        github.list_issue_comments(&review.repository, review.pull_number)
    })
    .await;
    let (existing, warning) = match listed {
        Ok(comments) => (
            comments
                .into_iter()
                .find(|c| c.body.contains(STICKY_MARKER))
                .map(|c| c.id),
            None,
        ),
        Err(ToolError::Aborted) => return Err(ToolError::Aborted),
        Err(e) => {
            tracing::warn!(error = %e, "listing review comments failed, posting a new one");
            (None, Some(e.to_string()))
        }
    };

    check_aborted(cancel)?;
    let outcome = match existing {
        Some(id) => {
            github
                .update_issue_comment(&review.repository, id, &body)
                .await?;
            tracing::info!(comment_id = id, "updated sticky review comment");
            "Updated existing review comment".to_string()
        }
        None => {
            let id = github
                .create_issue_comment(&review.repository, review.pull_number, &body)
                .await?;
            tracing::info!(comment_id = id, "created sticky review comment");
            if warning.is_some() {
                "Posted new review comment".to_string()
            } else {
                "Posted review comment".to_string()
            }
        }
    };

    Ok(match warning {
        Some(w) => format!("Warning: {w}. {outcome}"),
        None => outcome,
    })
}
