//! Tool-invocation safety layer for open-workflows.
//!
//! Tool calls from the model are validated into typed commands, then executed
//! against git, the GitHub CLI and the package registry through a
//! [`CommandRunner`]. Every external call goes through the retry primitive and
//! honours a cancellation token between steps.

mod command;
mod docs;
mod error;
mod git;
mod github;
mod labels;
mod package;
mod process;
mod release;
mod retry;
mod review;
mod toolbox;
mod traits;
mod validate;
mod version;
mod workflows;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use command::{
    DocCommit, DocFile, GitHubRelease, LabelApplication, LabelSpec, ReleasePublish, ReviewIssue,
    ReviewSubmission, Severity, ValidatedCommand, Verdict, Workflow, WorkflowSetup,
};
pub use docs::{COMMIT_PREFIX, commit_docs};
pub use error::{FieldError, Result, ToolError, ValidationErrors};
pub use git::{Git, parse_remote};
pub use github::{GitHub, IssueComment, IssueDetails, NewLabel, PullRequestDetails, ReleaseRequest, RepoLabel};
pub use labels::apply_labels;
pub use package::PackageRegistry;
pub use process::{CommandRunner, Invocation, ProcessRunner};
pub use release::{
    PackageReleaseReport, PhaseOutcome, PlatformReleaseReport, ReleaseLedger, ReleaseStep,
    create_platform_release, format_release_notes, publish_package,
};
pub use retry::{
    DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, ErrorClass, RetryPolicy, TRANSIENT_SIGNATURES,
    check_aborted, classify, is_transient_message, with_retry,
};
pub use review::{STICKY_MARKER, build_comment_body, upsert_review_comment};
pub use toolbox::{ToolKind, Toolbox, WorkflowTool, workflow_tools};
pub use traits::{Tool, ToolContext, ToolSpec, to_llm_tool_def};
pub use validate::{collapse_whitespace, normalize_relative, validate};
pub use version::{
    BumpKind, Commit, InvalidVersion, ReleasePlan, bump_version, classify_commit, decide_bump,
    plan_release,
};
pub use workflows::setup_workflows;
