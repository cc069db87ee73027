//! Per-tool input contracts.
//!
//! Every validator reads the whole payload and reports every problem it finds;
//! a payload is either accepted as a [`ValidatedCommand`] or rejected with the
//! complete field-addressed list. Nothing here performs I/O.

use crate::command::{
    DocCommit, DocFile, GitHubRelease, LabelApplication, LabelSpec, ReleasePublish, ReviewIssue,
    ReviewSubmission, Severity, ValidatedCommand, Verdict, Workflow, WorkflowSetup,
};
use crate::error::{Result, ToolError, ValidationErrors};
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Component, Path};
use std::sync::LazyLock;

pub const LABELS_MAX: usize = 3;
pub const EXPLANATION_LEN_MIN: usize = 10;
pub const SUMMARY_LEN_MIN: usize = 20;
pub const COMMIT_SHA_LEN_MIN: usize = 7;
const PLACEHOLDER_SUMMARIES: &[&str] = &["test", "testing"];

static REPOSITORY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^/\s]+/[^/\s]+$").expect("repository regex"));
static SEMVER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^v?\d+\.\d+\.\d+(-[\w.]+)?$").expect("semver regex"));
static COLOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-fA-F]{6}$").expect("color regex"));

/// Parse and check the payload for `tool`.
pub fn validate(tool: &str, args: &Value) -> Result<ValidatedCommand> {
    let command = match tool {
        "apply_labels" => apply_labels(args).map(ValidatedCommand::LabelApplication),
        "submit_review" => submit_review(args).map(ValidatedCommand::ReviewSubmission),
        "github_release" => github_release(args).map(ValidatedCommand::GitHubRelease),
        "bun_release" => bun_release(args).map(ValidatedCommand::ReleasePublish),
        "commit_docs" => commit_docs(args).map(ValidatedCommand::DocCommit),
        "setup_workflows" => setup_workflows(args).map(ValidatedCommand::WorkflowSetup),
        other => return Err(ToolError::InvalidArguments(format!("unknown tool: {other}"))),
    };
    command.map_err(ToolError::Validation)
}

/// Whitespace runs collapsed to one space, then trimmed.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn collapsed_len(s: &str) -> usize {
    collapse_whitespace(s).chars().count()
}

/// Field reader over one JSON object. Problems are pushed to the shared list
/// and the getter returns `None`, so reading continues past bad fields.
struct Fields<'v> {
    value: &'v Value,
    prefix: String,
}

impl<'v> Fields<'v> {
    fn root(value: &'v Value, errors: &mut ValidationErrors) -> Option<Self> {
        if !value.is_object() {
            errors.push("$", "expected a JSON object");
            return None;
        }
        Some(Self {
            value,
            prefix: String::new(),
        })
    }

    fn nested(value: &'v Value, prefix: String, errors: &mut ValidationErrors) -> Option<Self> {
        if !value.is_object() {
            errors.push(prefix, "expected an object");
            return None;
        }
        Some(Self { value, prefix })
    }

    fn path(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{key}", self.prefix)
        }
    }

    fn get(&self, key: &str) -> Option<&'v Value> {
        self.value.get(key).filter(|v| !v.is_null())
    }

    fn require_string(&self, key: &str, errors: &mut ValidationErrors) -> Option<String> {
        match self.get(key) {
            None => {
                errors.push(self.path(key), "is required");
                None
            }
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                errors.push(self.path(key), "must be a string");
                None
            }
        }
    }

    fn optional_string(&self, key: &str, errors: &mut ValidationErrors) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s.clone()),
            _ => {
                errors.push(self.path(key), "must be a string");
                None
            }
        }
    }

    fn optional_bool(&self, key: &str, errors: &mut ValidationErrors) -> bool {
        match self.get(key) {
            None => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => {
                errors.push(self.path(key), "must be a boolean");
                false
            }
        }
    }

    fn require_positive_int(&self, key: &str, errors: &mut ValidationErrors) -> Option<u64> {
        let Some(v) = self.get(key) else {
            errors.push(self.path(key), "is required");
            return None;
        };
        match v.as_u64() {
            Some(n) if n > 0 => Some(n),
            _ => {
                errors.push(self.path(key), "must be a positive integer");
                None
            }
        }
    }

    fn require_array(&self, key: &str, errors: &mut ValidationErrors) -> Option<&'v Vec<Value>> {
        match self.get(key) {
            None => {
                errors.push(self.path(key), "is required");
                None
            }
            Some(v) => self.as_array(key, v, errors),
        }
    }

    fn optional_array(&self, key: &str, errors: &mut ValidationErrors) -> Option<&'v Vec<Value>> {
        let v = self.get(key)?;
        self.as_array(key, v, errors)
    }

    fn as_array(
        &self,
        key: &str,
        v: &'v Value,
        errors: &mut ValidationErrors,
    ) -> Option<&'v Vec<Value>> {
        match v {
            Value::Array(items) => Some(items),
            _ => {
                errors.push(self.path(key), "must be an array");
                None
            }
        }
    }

    fn element(&self, key: &str, idx: usize) -> String {
        format!("{}[{idx}]", self.path(key))
    }

    /// String entries paired with their index in the original array.
    fn strings(
        &self,
        key: &str,
        items: &[Value],
        errors: &mut ValidationErrors,
    ) -> Vec<(usize, String)> {
        items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| match item {
                Value::String(s) => Some((i, s.clone())),
                _ => {
                    errors.push(self.element(key, i), "must be a string");
                    None
                }
            })
            .collect()
    }
}

fn check_repository(fields: &Fields<'_>, errors: &mut ValidationErrors) -> Option<String> {
    let repo = fields.require_string("repository", errors)?;
    let repo = repo.trim().to_string();
    if !REPOSITORY_RE.is_match(&repo) {
        errors.push("repository", "must be in owner/repo format");
        return None;
    }
    Some(repo)
}

fn check_semver(path: &str, raw: Option<String>, errors: &mut ValidationErrors) -> Option<String> {
    let raw = raw?;
    let version = raw.trim().to_string();
    if !SEMVER_RE.is_match(&version) {
        errors.push(path, "must be a semantic version such as 1.2.3 or v1.2.3-rc.1");
        return None;
    }
    Some(version)
}

fn finish<T>(value: Option<T>, errors: ValidationErrors) -> std::result::Result<T, ValidationErrors> {
    match value {
        Some(v) if errors.is_empty() => Ok(v),
        _ if !errors.is_empty() => Err(errors),
        // Unreachable while every `None` is paired with a pushed error.
        _ => Err(ValidationErrors::single("$", "payload could not be read")),
    }
}

/// `gh issue edit --add-label` splits its value on commas.
fn label_name_problem(name: &str) -> Option<&'static str> {
    if name.is_empty() {
        Some("must not be empty")
    } else if name.contains(',') {
        Some("must not contain a comma")
    } else {
        None
    }
}

pub fn apply_labels(args: &Value) -> std::result::Result<LabelApplication, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    let Some(fields) = Fields::root(args, &mut errors) else {
        return Err(errors);
    };

    let repository = check_repository(&fields, &mut errors);
    let issue_number = fields.require_positive_int("issueNumber", &mut errors);
    let mut labels = Vec::new();
    let entries = fields
        .require_array("labels", &mut errors)
        .map(|items| fields.strings("labels", items, &mut errors))
        .unwrap_or_default();
    for (i, label) in entries {
        let label = label.trim().to_string();
        if let Some(problem) = label_name_problem(&label) {
            errors.push(fields.element("labels", i), problem);
        }
        labels.push(label);
    }

    let mut new_labels = Vec::new();
    if let Some(items) = fields.optional_array("newLabels", &mut errors) {
        for (i, item) in items.iter().enumerate() {
            let Some(label) = Fields::nested(item, fields.element("newLabels", i), &mut errors)
            else {
                continue;
            };
            let name = label.require_string("name", &mut errors).map(|s| s.trim().to_string());
            let color = label.require_string("color", &mut errors).map(|s| {
                s.trim().trim_start_matches('#').to_string()
            });
            let description = label.require_string("description", &mut errors);
            if let Some(problem) = name.as_deref().and_then(label_name_problem) {
                errors.push(label.path("name"), problem);
            }
            if color.as_deref().is_some_and(|c| !COLOR_RE.is_match(c)) {
                errors.push(label.path("color"), "must be a six-digit hex color");
            }
            if let (Some(name), Some(color), Some(description)) = (name, color, description) {
                new_labels.push(LabelSpec {
                    name,
                    color,
                    description: description.trim().to_string(),
                });
            }
        }
    }

    let total = labels.len() + new_labels.len();
    if total == 0 {
        errors.push("labels", "at least one label or new label must be provided");
    }
    if total > LABELS_MAX {
        errors.push(
            "labels",
            format!("at most {LABELS_MAX} labels may be applied in total (existing plus new)"),
        );
    }

    let explanation = fields.require_string("explanation", &mut errors);
    if explanation
        .as_deref()
        .is_some_and(|e| collapsed_len(e) < EXPLANATION_LEN_MIN)
    {
        errors.push(
            "explanation",
            "too short; briefly describe why these labels were chosen",
        );
    }

    let value = match (repository, issue_number, explanation) {
        (Some(repository), Some(issue_number), Some(explanation)) => Some(LabelApplication {
            repository,
            issue_number,
            labels,
            new_labels,
            explanation: collapse_whitespace(&explanation),
        }),
        _ => None,
    };
    finish(value, errors)
}

pub fn submit_review(args: &Value) -> std::result::Result<ReviewSubmission, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    let Some(fields) = Fields::root(args, &mut errors) else {
        return Err(errors);
    };

    let repository = check_repository(&fields, &mut errors);
    let pull_number = fields.require_positive_int("pullNumber", &mut errors);
    let commit_sha = fields
        .require_string("commitSha", &mut errors)
        .map(|s| s.trim().to_string());
    if commit_sha
        .as_deref()
        .is_some_and(|sha| sha.chars().count() < COMMIT_SHA_LEN_MIN)
    {
        errors.push(
            "commitSha",
            format!("must be at least {COMMIT_SHA_LEN_MIN} characters"),
        );
    }

    let verdict = match fields.require_string("verdict", &mut errors) {
        Some(raw) => {
            let parsed = Verdict::parse(raw.trim());
            if parsed.is_none() {
                errors.push("verdict", "must be one of: approve, request_changes");
            }
            parsed
        }
        None => None,
    };

    let mut issues = Vec::new();
    let mut issues_seen = 0usize;
    if let Some(items) = fields.require_array("issues", &mut errors) {
        issues_seen = items.len();
        for (i, item) in items.iter().enumerate() {
            if let Some(issue) = review_issue(item, fields.element("issues", i), &mut errors) {
                issues.push(issue);
            }
        }
    }

    let summary = fields.require_string("summary", &mut errors);
    if let Some(summary) = summary.as_deref() {
        let lowered = summary.trim().to_lowercase();
        if PLACEHOLDER_SUMMARIES.contains(&lowered.as_str()) {
            errors.push(
                "summary",
                "looks like a placeholder; submit a real review summary after analyzing the diff",
            );
        }
        let needs_detail = verdict == Some(Verdict::RequestChanges) || issues_seen > 0;
        if needs_detail && collapsed_len(summary) < SUMMARY_LEN_MIN {
            errors.push(
                "summary",
                format!("too short; give a meaningful assessment of at least {SUMMARY_LEN_MIN} characters"),
            );
        }
    }

    match verdict {
        Some(Verdict::RequestChanges) if issues_seen == 0 => errors.push(
            "issues",
            "request_changes requires at least one issue with file, line, severity and explanation",
        ),
        Some(Verdict::Approve) if issues.iter().any(|i| i.severity.blocks_approval()) => errors
            .push(
                "verdict",
                "approve is only allowed when there are no critical, high or medium issues",
            ),
        _ => {}
    }

    let value = match (repository, pull_number, commit_sha, summary, verdict) {
        (Some(repository), Some(pull_number), Some(commit_sha), Some(summary), Some(verdict)) => {
            Some(ReviewSubmission {
                repository,
                pull_number,
                commit_sha,
                summary,
                verdict,
                issues,
            })
        }
        _ => None,
    };
    finish(value, errors)
}

fn review_issue(item: &Value, prefix: String, errors: &mut ValidationErrors) -> Option<ReviewIssue> {
    let fields = Fields::nested(item, prefix, errors)?;
    let file = fields.require_string("file", errors).map(|s| s.trim().to_string());
    if file.as_deref().is_some_and(str::is_empty) {
        errors.push(fields.path("file"), "must not be empty");
    }
    let line = match fields.get("line") {
        None => Some(0),
        Some(v) => match v.as_f64() {
            Some(n) if n.is_finite() && n >= 1.0 => Some(n.trunc() as u64),
            Some(_) => Some(0),
            None => {
                errors.push(fields.path("line"), "must be a number");
                None
            }
        },
    };
    let severity = match fields.require_string("severity", errors) {
        Some(raw) => {
            let parsed = Severity::parse(raw.trim());
            if parsed.is_none() {
                errors.push(
                    fields.path("severity"),
                    "must be one of: critical, high, medium, low",
                );
            }
            parsed
        }
        None => None,
    };
    let title = fields
        .optional_string("title", errors)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let explanation = fields.optional_string("explanation", errors).unwrap_or_default();
    let suggestion = fields
        .optional_string("suggestion", errors)
        .filter(|s| !s.trim().is_empty());

    Some(ReviewIssue {
        file: file?,
        line: line?,
        severity: severity?,
        title,
        explanation,
        suggestion,
    })
}

pub fn github_release(args: &Value) -> std::result::Result<GitHubRelease, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    let Some(fields) = Fields::root(args, &mut errors) else {
        return Err(errors);
    };

    let repository = check_repository(&fields, &mut errors);
    let tag = check_semver("tag", fields.require_string("tag", &mut errors), &mut errors);
    let notes = fields
        .require_array("notes", &mut errors)
        .map(|items| fields.strings("notes", items, &mut errors));
    if let Some(notes) = notes.as_deref() {
        if notes.is_empty() {
            errors.push("notes", "at least one release note must be provided");
        }
        for (i, note) in notes {
            if note.trim().is_empty() {
                errors.push(fields.element("notes", *i), "must not be empty");
            }
        }
    }
    let title = fields
        .optional_string("title", &mut errors)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let prerelease = fields.optional_bool("prerelease", &mut errors);
    let draft = fields.optional_bool("draft", &mut errors);

    let value = match (repository, tag, notes) {
        (Some(repository), Some(tag), Some(notes)) => Some(GitHubRelease {
            repository,
            tag,
            notes: notes.into_iter().map(|(_, n)| n.trim().to_string()).collect(),
            title,
            prerelease,
            draft,
        }),
        _ => None,
    };
    finish(value, errors)
}

pub fn bun_release(args: &Value) -> std::result::Result<ReleasePublish, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    let Some(fields) = Fields::root(args, &mut errors) else {
        return Err(errors);
    };
    let version = check_semver(
        "version",
        fields.require_string("version", &mut errors),
        &mut errors,
    );
    finish(version.map(|version| ReleasePublish { version }), errors)
}

pub fn commit_docs(args: &Value) -> std::result::Result<DocCommit, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    let Some(fields) = Fields::root(args, &mut errors) else {
        return Err(errors);
    };

    let mut files = Vec::new();
    let mut seen = HashSet::new();
    let items = fields.require_array("files", &mut errors);
    if let Some(items) = items {
        if items.is_empty() {
            errors.push("files", "at least one documentation file must be provided");
        }
        for (i, item) in items.iter().enumerate() {
            let Some(file) = Fields::nested(item, fields.element("files", i), &mut errors) else {
                continue;
            };
            let path = file.require_string("path", &mut errors);
            let content = file.require_string("content", &mut errors);
            let normalized = match path.as_deref().map(normalize_relative) {
                Some(Ok(p)) => Some(p),
                Some(Err(reason)) => {
                    errors.push(file.path("path"), reason);
                    None
                }
                None => None,
            };
            if normalized
                .as_deref()
                .is_some_and(|p| !seen.insert(p.to_string()))
            {
                errors.push(file.path("path"), "duplicate path");
            }
            if let (Some(path), Some(content)) = (normalized, content) {
                files.push(DocFile { path, content });
            }
        }
    }

    let message = fields.require_string("message", &mut errors).map(|m| collapse_whitespace(&m));
    if message.as_deref().is_some_and(str::is_empty) {
        errors.push("message", "commit message must not be empty");
    }

    let value = match (items, message) {
        (Some(_), Some(message)) => Some(DocCommit { files, message }),
        _ => None,
    };
    finish(value, errors)
}

/// Lexically resolve `raw` against the working tree root. Absolute paths, `..`
/// escapes and paths into `.git` are rejected; the result uses `/` separators.
pub fn normalize_relative(raw: &str) -> std::result::Result<String, &'static str> {
    if raw.trim().is_empty() {
        return Err("must not be empty");
    }
    let mut parts: Vec<String> = Vec::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Prefix(_) | Component::RootDir => {
                return Err("must be relative to the repository root");
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err("resolves outside the repository root");
                }
            }
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
        }
    }
    match parts.first().map(String::as_str) {
        None => Err("must name a file inside the repository"),
        Some(".git") => Err("must not point into .git"),
        Some(_) => Ok(parts.join("/")),
    }
}

pub fn setup_workflows(args: &Value) -> std::result::Result<WorkflowSetup, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    let Some(fields) = Fields::root(args, &mut errors) else {
        return Err(errors);
    };

    let mut workflows: Vec<Workflow> = Vec::new();
    let items = fields.require_array("workflows", &mut errors);
    if let Some(items) = items {
        if items.is_empty() {
            errors.push("workflows", "at least one workflow must be specified");
        }
        for (i, name) in fields.strings("workflows", items, &mut errors) {
            match Workflow::parse(name.trim()) {
                Some(w) if !workflows.contains(&w) => workflows.push(w),
                Some(_) => {}
                None => errors.push(
                    fields.element("workflows", i),
                    "must be one of: review, label, doc-sync, release",
                ),
            }
        }
    }
    finish(items.map(|_| WorkflowSetup { workflows }), errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn review(verdict: &str, issues: Value) -> Value {
        json!({
            "repository": "acme/widgets",
            "pullNumber": 12,
            "commitSha": "abc1234def",
            "summary": "The change is mostly sound but needs a fix.",
            "verdict": verdict,
            "issues": issues,
        })
    }

    fn issue(severity: &str) -> Value {
        json!({
            "file": "src/lib.rs",
            "line": 10,
            "severity": severity,
            "title": "Unchecked index",
            "explanation": "Indexing may panic on empty input.",
        })
    }

    #[test]
    fn approve_rejects_medium_and_above() {
        for severity in ["medium", "high", "critical"] {
            let err = submit_review(&review("approve", json!([issue(severity)]))).unwrap_err();
            assert!(err.has_path("verdict"), "{severity}: {err}");
        }
        let ok = submit_review(&review("approve", json!([issue("low")]))).unwrap();
        assert_eq!(ok.issues[0].severity, Severity::Low);
    }

    #[test]
    fn request_changes_requires_issues() {
        let err = submit_review(&review("request_changes", json!([]))).unwrap_err();
        assert!(err.has_path("issues"));
    }

    #[test]
    fn placeholder_and_short_summaries_are_rejected() {
        let mut payload = review("approve", json!([]));
        payload["summary"] = json!("  Testing ");
        assert!(submit_review(&payload).unwrap_err().has_path("summary"));

        let mut payload = review("request_changes", json!([issue("high")]));
        payload["summary"] = json!("too   short\n here");
        assert!(submit_review(&payload).unwrap_err().has_path("summary"));

        let mut payload = review("approve", json!([]));
        payload["summary"] = json!("LGTM");
        assert!(submit_review(&payload).is_ok());
    }

    #[test]
    fn review_errors_are_collected_with_paths() {
        let payload = json!({
            "repository": "not-a-repo",
            "pullNumber": 0,
            "commitSha": "abc",
            "summary": "A summary that is long enough.",
            "verdict": "approve",
            "issues": [{ "file": "a.rs", "line": 3, "severity": "urgent" }],
        });
        let err = submit_review(&payload).unwrap_err();
        assert!(err.has_path("repository"));
        assert!(err.has_path("pullNumber"));
        assert!(err.has_path("commitSha"));
        assert!(err.has_path("issues[0].severity"));
    }

    #[test]
    fn non_positive_lines_become_unknown() {
        let mut bad_line = issue("low");
        bad_line["line"] = json!(-4);
        let ok = submit_review(&review("approve", json!([bad_line]))).unwrap();
        assert_eq!(ok.issues[0].line, 0);
    }

    fn labels(existing: &[&str], new: usize) -> Value {
        let new_labels: Vec<Value> = (0..new)
            .map(|i| json!({ "name": format!("area-{i}"), "color": "#a2eeef", "description": "Area" }))
            .collect();
        json!({
            "repository": "acme/widgets",
            "issueNumber": 7,
            "labels": existing,
            "newLabels": new_labels,
            "explanation": "Crash report in the parser module.",
        })
    }

    #[test]
    fn label_count_bounds() {
        assert!(apply_labels(&labels(&[], 0)).unwrap_err().has_path("labels"));
        assert!(apply_labels(&labels(&["bug", "parser"], 2)).unwrap_err().has_path("labels"));
        let ok = apply_labels(&labels(&["bug", "parser"], 1)).unwrap();
        assert_eq!(ok.labels.len() + ok.new_labels.len(), 3);
        assert_eq!(ok.new_labels[0].color, "a2eeef");
    }

    #[test]
    fn label_names_cannot_smuggle_extra_labels() {
        let mut payload = labels(&["a,b,c,d", "e"], 1);
        payload["newLabels"][0]["name"] = json!("x,y");
        let err = apply_labels(&payload).unwrap_err();
        assert!(err.has_path("labels[0]"), "{err}");
        assert!(!err.has_path("labels[1]"), "{err}");
        assert!(err.has_path("newLabels[0].name"), "{err}");
    }

    #[test]
    fn non_string_entries_keep_their_position() {
        let payload = json!({
            "repository": "acme/widgets",
            "tag": "v1.0.0",
            "notes": [7, "Fix x", " "],
        });
        let err = github_release(&payload).unwrap_err();
        assert!(err.has_path("notes[0]"), "{err}");
        assert!(err.has_path("notes[2]"), "{err}");
        assert!(!err.has_path("notes[1]"), "{err}");

        let mut payload = labels(&[], 0);
        payload["labels"] = json!([null, ""]);
        let err = apply_labels(&payload).unwrap_err();
        assert!(err.has_path("labels[0]"), "{err}");
        assert!(err.has_path("labels[1]"), "{err}");

        let err = setup_workflows(&json!({ "workflows": [1, "deploy"] })).unwrap_err();
        assert!(err.has_path("workflows[1]"), "{err}");
    }

    #[test]
    fn label_explanation_uses_collapsed_length() {
        let mut payload = labels(&["bug"], 0);
        payload["explanation"] = json!("  a    b   c  ");
        assert!(apply_labels(&payload).unwrap_err().has_path("explanation"));
    }

    #[test]
    fn release_tags_follow_semver() {
        let base = json!({ "repository": "acme/widgets", "tag": "v1.2.3-rc.1", "notes": ["Fix x"] });
        assert!(github_release(&base).is_ok());

        let mut bad = base.clone();
        bad["tag"] = json!("1.2");
        bad["notes"] = json!(["Fix x", "  "]);
        let err = github_release(&bad).unwrap_err();
        assert!(err.has_path("tag"));
        assert!(err.has_path("notes[1]"));

        assert!(bun_release(&json!({ "version": "2.0.0" })).is_ok());
        assert!(bun_release(&json!({ "version": "latest" })).unwrap_err().has_path("version"));
    }

    #[test]
    fn doc_paths_must_stay_inside_root() {
        let payload = json!({
            "files": [{ "path": "../outside.md", "content": "x" }],
            "message": "update docs",
        });
        let err = commit_docs(&payload).unwrap_err();
        assert!(err.has_path("files[0].path"), "{err}");

        assert!(normalize_relative("/etc/passwd").is_err());
        assert!(normalize_relative(".git/config").is_err());
        assert_eq!(normalize_relative("./docs/../README.md").unwrap(), "README.md");
        assert_eq!(normalize_relative("docs/guide/intro.md").unwrap(), "docs/guide/intro.md");
    }

    #[test]
    fn doc_commit_requires_files_and_message() {
        let err = commit_docs(&json!({ "files": [], "message": "   " })).unwrap_err();
        assert!(err.has_path("files"));
        assert!(err.has_path("message"));
    }

    #[test]
    fn workflows_are_deduplicated() {
        let ok = setup_workflows(&json!({ "workflows": ["review", "label", "review"] })).unwrap();
        assert_eq!(ok.workflows, vec![Workflow::Review, Workflow::Label]);
        let err = setup_workflows(&json!({ "workflows": ["deploy"] })).unwrap_err();
        assert!(err.has_path("workflows[0]"));
    }

    #[test]
    fn dispatch_wraps_errors() {
        assert!(matches!(
            validate("bun_release", &json!({})),
            Err(ToolError::Validation(_))
        ));
        assert!(matches!(
            validate("rm_rf", &json!({})),
            Err(ToolError::InvalidArguments(_))
        ));
        let cmd = validate("bun_release", &json!({ "version": "v1.0.0" })).unwrap();
        assert_eq!(cmd.tool_name(), "bun_release");
    }
}
