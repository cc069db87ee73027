//! The tool surface exposed to the model: validation, then the matching
//! executor.

use crate::command::ValidatedCommand;
use crate::docs::commit_docs;
use crate::error::Result;
use crate::git::Git;
use crate::github::GitHub;
use crate::labels::apply_labels;
use crate::package::PackageRegistry;
use crate::process::CommandRunner;
use crate::release::{ReleaseLedger, create_platform_release, publish_package};
use crate::retry::{RetryPolicy, check_aborted};
use crate::review::upsert_review_comment;
use crate::traits::{Tool, ToolContext, ToolSpec};
use crate::validate::validate;
use crate::workflows::setup_workflows;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Adapters, retry policy and per-run release ledger shared by every tool.
pub struct Toolbox {
    github: GitHub,
    git: Git,
    registry: PackageRegistry,
    root: PathBuf,
    retry: RetryPolicy,
    ledger: Mutex<ReleaseLedger>,
    platform_only: bool,
}

impl Toolbox {
    pub fn new(runner: Arc<dyn CommandRunner>, root: impl AsRef<Path>, retry: RetryPolicy) -> Self {
        Self {
            github: GitHub::new(runner.clone()),
            git: Git::new(runner.clone()),
            registry: PackageRegistry::new(runner),
            root: root.as_ref().to_path_buf(),
            retry,
            ledger: Mutex::new(ReleaseLedger::default()),
            platform_only: false,
        }
    }

    /// Allow phase 2 without a phase 1 in this run, for an operator retry of a
    /// missing platform release.
    pub fn with_platform_only(mut self, platform_only: bool) -> Self {
        self.platform_only = platform_only;
        self
    }

    pub fn ledger(&self) -> ReleaseLedger {
        self.ledger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn with_ledger<T>(&self, f: impl FnOnce(&mut ReleaseLedger) -> T) -> T {
        let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut ledger)
    }

    /// Validate, then execute. Validation failures never reach an executor.
    #[tracing::instrument(level = "info", skip(self, args, cancel))]
    pub async fn invoke(
        &self,
        tool_name: &str,
        args: &Value,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let command = validate(tool_name, args).inspect_err(|e| {
            tracing::info!(error = %e, "tool call rejected");
        })?;
        self.execute(&command, cancel).await
    }

    pub async fn execute(
        &self,
        command: &ValidatedCommand,
        cancel: &CancellationToken,
    ) -> Result<String> {
        check_aborted(cancel)?;
        match command {
            ValidatedCommand::ReviewSubmission(review) => {
                upsert_review_comment(&self.github, &self.retry, cancel, review).await
            }
            ValidatedCommand::LabelApplication(cmd) => {
                apply_labels(&self.github, &self.retry, cancel, cmd).await
            }
            ValidatedCommand::ReleasePublish(cmd) => {
                let report =
                    publish_package(&self.git, &self.registry, &self.retry, cancel, cmd).await;
                if report.published() {
                    self.with_ledger(|l| l.record_published(&report.version));
                }
                Ok(report.summary())
            }
            ValidatedCommand::GitHubRelease(cmd) => {
                let version = cmd.bare_version();
                let published = self.with_ledger(|l| l.is_published(version));
                if !published && !self.platform_only {
                    tracing::warn!(tag = %cmd.tag, "platform release requested before package publish");
                    return Ok(format!(
                        "Skipped: platform release {} (package {version} has not been published in this run; \
                         call bun_release first, or retry with `release --platform-only`)",
                        cmd.tag
                    ));
                }
                if self.with_ledger(|l| l.has_platform_release(version)) {
                    return Ok(format!(
                        "Skipped: platform release {} (already created in this run)",
                        cmd.tag
                    ));
                }
                let report = create_platform_release(&self.github, &self.retry, cancel, cmd).await?;
                if report.created {
                    self.with_ledger(|l| l.record_platform_release(version));
                }
                Ok(report.summary())
            }
            ValidatedCommand::DocCommit(cmd) => {
                commit_docs(&self.git, &self.root, &self.retry, cancel, cmd).await
            }
            ValidatedCommand::WorkflowSetup(cmd) => setup_workflows(&self.root, cancel, cmd).await,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    SubmitReview,
    ApplyLabels,
    BunRelease,
    GithubRelease,
    CommitDocs,
    SetupWorkflows,
}

impl ToolKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::SubmitReview => "submit_review",
            Self::ApplyLabels => "apply_labels",
            Self::BunRelease => "bun_release",
            Self::GithubRelease => "github_release",
            Self::CommitDocs => "commit_docs",
            Self::SetupWorkflows => "setup_workflows",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Self::SubmitReview => {
                "Submit a single sticky review comment on a GitHub pull request. Call once, after analyzing the diff."
            }
            Self::ApplyLabels => "Apply up to three labels to a GitHub issue, creating new labels first if needed.",
            Self::BunRelease => {
                "Release the package: bump the version, push the commit and tags, pack and publish to npm. Call before github_release."
            }
            Self::GithubRelease => {
                "Create a GitHub release with release notes. Only call after bun_release succeeded."
            }
            Self::CommitDocs => "Write documentation files and commit them to the current branch.",
            Self::SetupWorkflows => "Install GitHub Actions workflows for open-workflows.",
        }
    }

    fn schema(self) -> Value {
        match self {
            Self::SubmitReview => json!({
                "type": "object",
                "properties": {
                    "repository": { "type": "string", "description": "GitHub repository in owner/repo format" },
                    "pullNumber": { "type": "integer", "minimum": 1 },
                    "commitSha": { "type": "string", "description": "Head commit SHA of the pull request" },
                    "summary": { "type": "string", "description": "Overall assessment of the changes" },
                    "verdict": { "type": "string", "enum": ["approve", "request_changes"] },
                    "issues": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "file": { "type": "string" },
                                "line": { "type": "number", "description": "Line on the RIGHT (new) side; 0 if unknown" },
                                "severity": { "type": "string", "enum": ["critical", "high", "medium", "low"] },
                                "title": { "type": "string" },
                                "explanation": { "type": "string" },
                                "suggestion": { "type": "string", "description": "Replacement code only" }
                            },
                            "required": ["file", "line", "severity", "explanation"]
                        }
                    }
                },
                "required": ["repository", "pullNumber", "commitSha", "summary", "verdict", "issues"]
            }),
            Self::ApplyLabels => json!({
                "type": "object",
                "properties": {
                    "repository": { "type": "string" },
                    "issueNumber": { "type": "integer", "minimum": 1 },
                    "labels": { "type": "array", "items": { "type": "string" }, "description": "Existing label names" },
                    "newLabels": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "name": { "type": "string" },
                                "color": { "type": "string", "description": "Hex color without #" },
                                "description": { "type": "string" }
                            },
                            "required": ["name", "color", "description"]
                        }
                    },
                    "explanation": { "type": "string" }
                },
                "required": ["repository", "issueNumber", "labels", "explanation"]
            }),
            Self::BunRelease => json!({
                "type": "object",
                "properties": {
                    "version": { "type": "string", "description": "e.g. v1.2.3 or 1.2.3" }
                },
                "required": ["version"]
            }),
            Self::GithubRelease => json!({
                "type": "object",
                "properties": {
                    "repository": { "type": "string" },
                    "tag": { "type": "string" },
                    "notes": { "type": "array", "items": { "type": "string" } },
                    "title": { "type": "string" },
                    "prerelease": { "type": "boolean" },
                    "draft": { "type": "boolean" }
                },
                "required": ["repository", "tag", "notes"]
            }),
            Self::CommitDocs => json!({
                "type": "object",
                "properties": {
                    "files": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "path": { "type": "string", "description": "Relative to the repository root" },
                                "content": { "type": "string", "description": "Full new file content" }
                            },
                            "required": ["path", "content"]
                        }
                    },
                    "message": { "type": "string", "description": "Commit message; the [skip ci] docs: prefix is added" }
                },
                "required": ["files", "message"]
            }),
            Self::SetupWorkflows => json!({
                "type": "object",
                "properties": {
                    "workflows": {
                        "type": "array",
                        "items": { "type": "string", "enum": ["review", "label", "doc-sync", "release"] }
                    }
                },
                "required": ["workflows"]
            }),
        }
    }
}

pub struct WorkflowTool {
    kind: ToolKind,
    toolbox: Arc<Toolbox>,
}

impl WorkflowTool {
    pub fn new(kind: ToolKind, toolbox: Arc<Toolbox>) -> Self {
        Self { kind, toolbox }
    }
}

#[async_trait]
impl Tool for WorkflowTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.kind.name().to_string(),
            description: self.kind.description().to_string(),
            parameters_schema: self.kind.schema(),
        }
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<String> {
        self.toolbox
            .invoke(self.kind.name(), &arguments, &ctx.cancel)
            .await
    }
}

pub fn workflow_tools(toolbox: &Arc<Toolbox>, kinds: &[ToolKind]) -> Vec<Arc<dyn Tool>> {
    kinds
        .iter()
        .map(|kind| Arc::new(WorkflowTool::new(*kind, toolbox.clone())) as Arc<dyn Tool>)
        .collect()
}
