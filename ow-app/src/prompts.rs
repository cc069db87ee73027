//! Built-in prompt templates. Placeholders are `$NAME` or `${NAME}`;
//! placeholders with no value are left as written.

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

static VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)").expect("var regex")
});

/// Diffs beyond this are cut before they reach the model.
pub const DIFF_CHARS_MAX: usize = 120_000;

pub const REVIEW: &str = r#"You are reviewing pull request #$PR_NUMBER in $REPOSITORY as a senior engineer.

Title: $TITLE
Head commit: $HEAD_SHA

Description:
$BODY

Diff:
```diff
$DIFF
```

Review priorities, in order: correctness, security, reliability, performance, maintainability. Report only problems that are visible in the diff, with the file and the line in the new version of the file. Severity is one of low, medium, high, critical. Approve only when every finding is low severity; otherwise request changes and list at least one issue.

$MODE_NOTE
"#;

pub const LABEL: &str = r#"You are labeling issue #$ISSUE_NUMBER in $REPOSITORY.

Title: $TITLE
Current labels: $EXISTING_LABELS

Body:
$BODY

Labels available in the repository:
$AVAILABLE_LABELS

Choose at most three labels that describe the type and priority of the issue. Prefer existing labels. Propose a new label only when nothing existing fits; new label names are lowercase, hyphen-separated, one to three words, with a six-digit hex color and a short description. If the issue is ambiguous, prefer broader labels.

$MODE_NOTE
"#;

pub const DOC_SYNC: &str = r#"You keep documentation in sync with code changes in $REPOSITORY ($TARGET).

Diff:
```diff
$DIFF
```

Work through every changed file and decide whether README.md, files under docs/, or other Markdown files must change: new features are documented, changed behavior is updated, removed features are removed or marked deprecated, new configuration options are described. Keep the existing tone and prefer targeted edits. Only touch documentation files. When nothing needs to change, say so and do not commit.

Each file you commit must contain its complete new content.

$MODE_NOTE
"#;

pub const RELEASE: &str = r#"You are the release manager for $REPOSITORY.

Previous version: $CURRENT_VERSION
Next version: $NEXT_VERSION ($BUMP bump)

Commits since the previous release:
$COMMITS

Draft release notes:
$NOTES

Call bun_release with version $NEXT_VERSION first. Only when it reports that the release is complete, call github_release with tag v$NEXT_VERSION and the release notes, editing the draft notes for clarity if needed. If bun_release fails, stop and report the failure; never create the platform release on its own.
"#;

pub const PLATFORM_RELEASE: &str = r#"The package for $REPOSITORY version $NEXT_VERSION is already published, but its platform release is missing.

Commits in the release:
$COMMITS

Draft release notes:
$NOTES

Call github_release once with tag $TAG and the release notes. Do not publish the package again.
"#;

pub const DRY_RUN_NOTE: &str =
    "This is a dry run: do not call any tools. Write your full result as plain text instead.";

/// Single pass: substituted values are never rescanned for placeholders.
pub fn render(template: &str, vars: &HashMap<&str, String>) -> String {
    VAR_RE
        .replace_all(template, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            match vars.get(name) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

pub fn truncate_diff(diff: &str) -> String {
    if diff.chars().count() <= DIFF_CHARS_MAX {
        return diff.to_string();
    }
    let mut cut: String = diff.chars().take(DIFF_CHARS_MAX).collect();
    cut.push_str("\n... [diff truncated]");
    cut
}
