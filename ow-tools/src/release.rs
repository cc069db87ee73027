//! Two-phase release. Phase 1 publishes the package; phase 2 creates the tagged
//! platform release. The phases are separate calls and are never combined.

use crate::command::{GitHubRelease, ReleasePublish};
use crate::error::{Result, ToolError};
use crate::git::Git;
use crate::github::{GitHub, ReleaseRequest};
use crate::package::PackageRegistry;
use crate::retry::{RetryPolicy, with_retry};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Registry replies meaning this version is already live.
const ALREADY_PUBLISHED: &[&str] = &[
    "cannot publish over the previously published",
    "epublishconflict",
];
const RELEASE_EXISTS: &[&str] = &["already exists"];

/// How a retried write finished.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Write<T> {
    Done(T),
    /// A retry hit a conflict: an earlier attempt that reported failure landed.
    LandedEarlier,
}

/// Retries a non-idempotent write. Only after the first attempt has failed
/// does a conflict reply from `landed` count as success.
async fn retry_write<T, F, Fut>(
    retry: &RetryPolicy,
    cancel: &CancellationToken,
    landed: &[&str],
    mut op: F,
) -> Result<Write<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts = 0u32;
    with_retry(retry, cancel, || {
        attempts += 1;
        let first = attempts == 1;
        let call = op();
        async move {
            match call.await {
                Ok(value) => Ok(Write::Done(value)),
                Err(err) if !first && is_conflict(&err, landed) => {
                    tracing::info!(error = %err, "retried write had already landed");
                    Ok(Write::LandedEarlier)
                }
                Err(err) => Err(err),
            }
        }
    })
    .await
}

fn is_conflict(err: &ToolError, landed: &[&str]) -> bool {
    if matches!(err, ToolError::Aborted) {
        return false;
    }
    let lower = err.to_string().to_ascii_lowercase();
    landed.iter().any(|sig| lower.contains(sig))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseStep {
    BumpVersion,
    Push,
    PushTags,
    Pack,
    Publish,
}

impl fmt::Display for ReleaseStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BumpVersion => "bump version",
            Self::Push => "push",
            Self::PushTags => "push tags",
            Self::Pack => "pack",
            Self::Publish => "publish",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    Completed,
    Failed(ReleaseStep),
    Aborted(ReleaseStep),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageReleaseReport {
    /// Without the `v` prefix.
    pub version: String,
    pub lines: Vec<String>,
    pub outcome: PhaseOutcome,
}

impl PackageReleaseReport {
    pub fn published(&self) -> bool {
        self.outcome == PhaseOutcome::Completed
    }

    pub fn summary(&self) -> String {
        self.lines.join("\n")
    }
}

/// Phase 1. Each step is a complete external call; the first failure stops the
/// sequence and names the step.
#[tracing::instrument(level = "info", skip_all, fields(version = %cmd.version))]
pub async fn publish_package(
    git: &Git,
    registry: &PackageRegistry,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
    cmd: &ReleasePublish,
) -> PackageReleaseReport {
    let version = cmd.bare_version().to_string();
    let mut report = PackageReleaseReport {
        version: version.clone(),
        lines: Vec::new(),
        outcome: PhaseOutcome::Completed,
    };

    macro_rules! step {
        ($step:expr, $call:expr) => {
            match $call.await {
                Ok(value) => value,
                Err(err) => {
                    report.outcome = stop(&mut report.lines, $step, err);
                    return report;
                }
            }
        };
    }

    step!(
        ReleaseStep::BumpVersion,
        guarded(cancel, || registry.bump_version(&version))
    );
    report.lines.push(format!("Bumped version to {version}"));

    step!(ReleaseStep::Push, with_retry(retry, cancel, || git.push()));
    report.lines.push("Pushed release commit".to_string());

    step!(
        ReleaseStep::PushTags,
        with_retry(retry, cancel, || git.push_tags())
    );
    report.lines.push("Pushed tags".to_string());

    let tarball = step!(ReleaseStep::Pack, guarded(cancel, || registry.pack()));
    report.lines.push(format!("Packed {tarball}"));

    let published = step!(
        ReleaseStep::Publish,
        retry_write(retry, cancel, ALREADY_PUBLISHED, || registry.publish(&tarball))
    );
    report.lines.push(match published {
        Write::Done(()) => format!("Published {version} to npm"),
        Write::LandedEarlier => {
            format!("Published {version} to npm (an earlier attempt had already landed)")
        }
    });

    if let Err(e) = registry.remove_artifact(&tarball).await {
        tracing::warn!(tarball = %tarball, error = %e, "could not remove packed artifact");
        report
            .lines
            .push(format!("Warning: could not remove {tarball}: {e}"));
    }

    tracing::info!("package release complete");
    report.lines.push(format!("Release {version} complete"));
    report
}

/// One attempt, after an abort check.
async fn guarded<T, F, Fut>(cancel: &CancellationToken, op: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    crate::retry::check_aborted(cancel)?;
    op().await
}

fn stop(lines: &mut Vec<String>, step: ReleaseStep, err: ToolError) -> PhaseOutcome {
    if matches!(err, ToolError::Aborted) {
        tracing::info!(step = %step, "package release aborted");
        lines.push(format!("Aborted before {step}"));
        return PhaseOutcome::Aborted(step);
    }
    tracing::warn!(step = %step, error = %err, "package release failed");
    lines.push(format!("Failed at {step}: {err}"));
    PhaseOutcome::Failed(step)
}

/// Every note starts with `- `.
pub fn format_release_notes(notes: &[String]) -> String {
    notes
        .iter()
        .map(|note| {
            let trimmed = note.trim();
            if trimmed.starts_with('-') {
                trimmed.to_string()
            } else {
                format!("- {trimmed}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformReleaseReport {
    pub tag: String,
    pub lines: Vec<String>,
    pub url: Option<String>,
    pub created: bool,
}

impl PlatformReleaseReport {
    pub fn summary(&self) -> String {
        self.lines.join("\n")
    }
}

/// Phase 2. Callers only reach this after phase 1 reported success.
#[tracing::instrument(level = "info", skip_all, fields(repository = %cmd.repository, tag = %cmd.tag))]
pub async fn create_platform_release(
    github: &GitHub,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
    cmd: &GitHubRelease,
) -> Result<PlatformReleaseReport> {
    let request = ReleaseRequest {
        tag: cmd.tag.clone(),
        title: cmd.title.clone().unwrap_or_else(|| cmd.tag.clone()),
        notes: format_release_notes(&cmd.notes),
        prerelease: cmd.prerelease,
        draft: cmd.draft,
    };
    let mut report = PlatformReleaseReport {
        tag: cmd.tag.clone(),
        lines: Vec::new(),
        url: None,
        created: false,
    };
    let created = retry_write(retry, cancel, RELEASE_EXISTS, || {
        github.create_release(&cmd.repository, &request)
    })
    .await;
    match created {
        Ok(Write::LandedEarlier) => {
            report.created = true;
            report.lines.push(format!(
                "Created release: {} (an earlier attempt had already landed)",
                cmd.tag
            ));
        }
        Ok(Write::Done(url)) => {
            report.created = true;
            report.lines.push(format!("Created release: {}", cmd.tag));
            if !url.is_empty() {
                report.lines.push(format!("Release URL: {url}"));
                report.url = Some(url);
            }
        }
        Err(ToolError::Aborted) => return Err(ToolError::Aborted),
        Err(e) => {
            tracing::warn!(error = %e, "platform release failed");
            report.lines.push(format!("Failed to create release: {e}"));
        }
    }
    Ok(report)
}

/// Which versions finished each phase, for one release run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseLedger {
    published: BTreeSet<String>,
    platform: BTreeSet<String>,
}

fn bare(version: &str) -> &str {
    version.strip_prefix('v').unwrap_or(version)
}

impl ReleaseLedger {
    pub fn record_published(&mut self, version: &str) {
        self.published.insert(bare(version).to_string());
    }

    pub fn record_platform_release(&mut self, version: &str) {
        self.platform.insert(bare(version).to_string());
    }

    pub fn is_published(&self, version: &str) -> bool {
        self.published.contains(bare(version))
    }

    pub fn has_platform_release(&self, version: &str) -> bool {
        self.platform.contains(bare(version))
    }

    /// Published packages whose platform release is still missing.
    pub fn missing_platform_releases(&self) -> Vec<String> {
        self.published.difference(&self.platform).cloned().collect()
    }
}
