//! Documentation commit: write files, then stage, commit and push them.

use crate::command::DocCommit;
use crate::error::{Result, ToolError};
use crate::git::Git;
use crate::retry::{RetryPolicy, check_aborted, with_retry};
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub const COMMIT_PREFIX: &str = "[skip ci] docs: ";

async fn write_file(root: &Path, relative: &str, content: &str) -> Result<()> {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, content).await?;
    Ok(())
}

/// Written files stay on disk if a later step fails. The git sequence stages
/// exactly the listed paths, so it only runs once every file was written.
#[tracing::instrument(level = "info", skip_all, fields(files = cmd.files.len()))]
pub async fn commit_docs(
    git: &Git,
    root: &Path,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
    cmd: &DocCommit,
) -> Result<String> {
    let mut lines = Vec::new();
    let mut failed = 0usize;

    for file in &cmd.files {
        check_aborted(cancel)?;
        match write_file(root, &file.path, &file.content).await {
            Ok(()) => {
                lines.push(format!("Updated: {}", file.path));
            }
            Err(e) => {
                tracing::warn!(path = %file.path, error = %e, "writing doc file failed");
                lines.push(format!("Failed to write {}: {e}", file.path));
                failed += 1;
            }
        }
    }

    if failed > 0 {
        lines.push(format!(
            "Skipped: commit (could not write {failed} of {} files)",
            cmd.files.len()
        ));
        return Ok(lines.join("\n"));
    }
    let paths: Vec<String> = cmd.files.iter().map(|f| f.path.clone()).collect();

    let message = format!("{COMMIT_PREFIX}{}", cmd.message);

    if let Err(e) = step(cancel, git.add(&paths)).await {
        return halt(lines, "add", e);
    }
    if let Err(e) = step(cancel, git.commit(&message)).await {
        return halt(lines, "commit", e);
    }
    if let Err(e) = with_retry(retry, cancel, || git.push()).await {
        return halt(lines, "push", e);
    }

    tracing::info!(message = %message, "documentation committed");
    lines.push(format!("Committed and pushed: {message}"));
    Ok(lines.join("\n"))
}

async fn step(
    cancel: &CancellationToken,
    call: impl std::future::Future<Output = Result<()>>,
) -> Result<()> {
    check_aborted(cancel)?;
    call.await
}

fn halt(mut lines: Vec<String>, step: &str, err: ToolError) -> Result<String> {
    if matches!(err, ToolError::Aborted) {
        return Err(err);
    }
    tracing::warn!(step, error = %err, "documentation commit halted");
    lines.push(format!("Git {step} failed: {err}"));
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::DocFile;
    use crate::test_support::ScriptedRunner;
    use std::sync::Arc;
    use std::time::Duration;

    fn cmd(paths: &[&str]) -> DocCommit {
        DocCommit {
            files: paths
                .iter()
                .map(|p| DocFile {
                    path: p.to_string(),
                    content: format!("# {p}\n"),
                })
                .collect(),
            message: "sync README with new flags".to_string(),
        }
    }

    #[tokio::test]
    async fn writes_then_commits_listed_paths() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let git = Git::new(runner.clone());
        let out = commit_docs(
            &git,
            dir.path(),
            &RetryPolicy::new(3, Duration::from_millis(1)),
            &CancellationToken::new(),
            &cmd(&["README.md", "docs/guide/flags.md"]),
        )
        .await
        .unwrap();

        assert!(dir.path().join("docs/guide/flags.md").exists());
        assert!(out.ends_with("Committed and pushed: [skip ci] docs: sync README with new flags"));
        let calls = runner.calls();
        assert_eq!(calls[0].args, vec!["add", "--", "README.md", "docs/guide/flags.md"]);
        assert_eq!(
            calls[1].args,
            vec!["commit", "-m", "[skip ci] docs: sync README with new flags"]
        );
        assert_eq!(calls[2].args, vec!["push"]);
    }

    #[tokio::test]
    async fn commit_failure_halts_before_push_and_keeps_files() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_err("git", &["commit"], "nothing to commit, working tree clean");
        let git = Git::new(runner.clone());
        let out = commit_docs(
            &git,
            dir.path(),
            &RetryPolicy::default(),
            &CancellationToken::new(),
            &cmd(&["README.md"]),
        )
        .await
        .unwrap();

        assert!(out.contains("Git commit failed"), "{out}");
        assert!(runner.calls_matching("git", &["push"]).is_empty());
        assert!(dir.path().join("README.md").exists());
    }

    #[tokio::test]
    async fn failed_write_skips_the_git_sequence() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("blocker"), "not a directory").unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let git = Git::new(runner.clone());
        let out = commit_docs(
            &git,
            dir.path(),
            &RetryPolicy::default(),
            &CancellationToken::new(),
            &cmd(&["README.md", "blocker/guide.md"]),
        )
        .await
        .unwrap();

        assert!(out.contains("Updated: README.md"), "{out}");
        assert!(out.contains("Failed to write blocker/guide.md"), "{out}");
        assert!(out.ends_with("Skipped: commit (could not write 1 of 2 files)"), "{out}");
        assert!(runner.calls().is_empty());
    }
}
