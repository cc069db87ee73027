//! Typed, invariant-checked tool commands. Values here are only produced by
//! [`crate::validate`], so executors never re-inspect raw payloads.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "critical" => Some(Self::Critical),
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }

    /// Medium and above block an approval.
    pub fn blocks_approval(self) -> bool {
        self >= Self::Medium
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Approve,
    RequestChanges,
}

impl Verdict {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approve" => Some(Self::Approve),
            "request_changes" => Some(Self::RequestChanges),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Approve => "APPROVE",
            Self::RequestChanges => "REQUEST CHANGES",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewIssue {
    pub file: String,
    /// 1-based line on the new side of the diff; 0 when unknown.
    pub line: u64,
    pub severity: Severity,
    pub title: Option<String>,
    pub explanation: String,
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewSubmission {
    pub repository: String,
    pub pull_number: u64,
    pub commit_sha: String,
    pub summary: String,
    pub verdict: Verdict,
    pub issues: Vec<ReviewIssue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSpec {
    pub name: String,
    pub color: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelApplication {
    pub repository: String,
    pub issue_number: u64,
    pub labels: Vec<String>,
    pub new_labels: Vec<LabelSpec>,
    pub explanation: String,
}

/// Phase 1 of a release: the package registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasePublish {
    /// As supplied, with or without a leading `v`.
    pub version: String,
}

impl ReleasePublish {
    pub fn bare_version(&self) -> &str {
        self.version.strip_prefix('v').unwrap_or(&self.version)
    }
}

/// Phase 2 of a release: the tagged platform release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubRelease {
    pub repository: String,
    pub tag: String,
    pub notes: Vec<String>,
    pub title: Option<String>,
    pub prerelease: bool,
    pub draft: bool,
}

impl GitHubRelease {
    pub fn bare_version(&self) -> &str {
        self.tag.strip_prefix('v').unwrap_or(&self.tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocFile {
    /// Normalized, relative to the working tree root.
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocCommit {
    pub files: Vec<DocFile>,
    /// Collapsed; the executor adds the commit prefix.
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Workflow {
    Review,
    Label,
    DocSync,
    Release,
}

impl Workflow {
    pub const ALL: [Workflow; 4] = [Self::Review, Self::Label, Self::DocSync, Self::Release];

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|w| w.name() == s)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Review => "review",
            Self::Label => "label",
            Self::DocSync => "doc-sync",
            Self::Release => "release",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            Self::Review => "pr-review.yml",
            Self::Label => "issue-label.yml",
            Self::DocSync => "doc-sync.yml",
            Self::Release => "release.yml",
        }
    }
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowSetup {
    /// Non-empty, duplicates collapsed, request order kept.
    pub workflows: Vec<Workflow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatedCommand {
    LabelApplication(LabelApplication),
    ReviewSubmission(ReviewSubmission),
    ReleasePublish(ReleasePublish),
    GitHubRelease(GitHubRelease),
    DocCommit(DocCommit),
    WorkflowSetup(WorkflowSetup),
}

impl ValidatedCommand {
    pub fn tool_name(&self) -> &'static str {
        match self {
            Self::LabelApplication(_) => "apply_labels",
            Self::ReviewSubmission(_) => "submit_review",
            Self::ReleasePublish(_) => "bun_release",
            Self::GitHubRelease(_) => "github_release",
            Self::DocCommit(_) => "commit_docs",
            Self::WorkflowSetup(_) => "setup_workflows",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_drives_approval_blocking() {
        assert!(Severity::Critical.blocks_approval());
        assert!(Severity::High.blocks_approval());
        assert!(Severity::Medium.blocks_approval());
        assert!(!Severity::Low.blocks_approval());
    }

    #[test]
    fn workflow_names_round_trip() {
        for w in Workflow::ALL {
            assert_eq!(Workflow::parse(w.name()), Some(w));
        }
        assert_eq!(Workflow::parse("deploy"), None);
    }
}
