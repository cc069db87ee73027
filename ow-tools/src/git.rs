//! Source-control adapter over the `git` CLI.

use crate::error::{Result, ToolError};
use crate::process::{CommandRunner, Invocation};
use crate::version::Commit;
use regex::Regex;
use std::sync::{Arc, LazyLock};

const FIELD_SEP: char = '\u{1f}';
const RECORD_SEP: char = '\u{1e}';

static REMOTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"github\.com[:/]([^/\s]+)/([^/\s]+?)(?:\.git)?/?$").expect("remote regex")
});

#[derive(Clone)]
pub struct Git {
    runner: Arc<dyn CommandRunner>,
}

impl Git {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn git<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runner.run(&Invocation::new("git", args)).await
    }

    /// Stages exactly `paths`; the `--` keeps paths from being read as options.
    pub async fn add(&self, paths: &[String]) -> Result<()> {
        let mut args = vec!["add".to_string(), "--".to_string()];
        args.extend(paths.iter().cloned());
        self.git(args).await?;
        Ok(())
    }

    pub async fn commit(&self, message: &str) -> Result<()> {
        self.git(["commit", "-m", message]).await?;
        Ok(())
    }

    pub async fn push(&self) -> Result<()> {
        self.git(["push"]).await?;
        Ok(())
    }

    pub async fn push_tags(&self) -> Result<()> {
        self.git(["push", "--tags"]).await?;
        Ok(())
    }

    pub async fn latest_tag(&self) -> Result<Option<String>> {
        match self.git(["describe", "--tags", "--abbrev=0"]).await {
            Ok(out) => {
                let tag = out.trim();
                Ok((!tag.is_empty()).then(|| tag.to_string()))
            }
            Err(ToolError::ExecutionFailed(msg))
                if msg.contains("No names found") || msg.contains("No tags can describe") =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Commits in `(from, to]`, oldest first. Without `from` the whole history up
    /// to `to` is returned.
    pub async fn commits_between(&self, from: Option<&str>, to: &str) -> Result<Vec<Commit>> {
        let range = match from {
            Some(from) => format!("{from}..{to}"),
            None => to.to_string(),
        };
        let out = self
            .git([
                "log".to_string(),
                "--reverse".to_string(),
                "--format=%H%x1f%an%x1f%B%x1e".to_string(),
                range,
            ])
            .await?;
        Ok(parse_log(&out))
    }

    pub async fn current_branch(&self) -> Result<String> {
        Ok(self
            .git(["rev-parse", "--abbrev-ref", "HEAD"])
            .await?
            .trim()
            .to_string())
    }

    pub async fn head_sha(&self) -> Result<String> {
        Ok(self.git(["rev-parse", "HEAD"]).await?.trim().to_string())
    }

    /// `owner/repo` of the `origin` remote, when it points at GitHub.
    pub async fn remote_repository(&self) -> Result<Option<String>> {
        let url = self.git(["remote", "get-url", "origin"]).await?;
        Ok(parse_remote(url.trim()))
    }

    /// Staged and unstaged changes against `HEAD`; a clean tree falls back to the
    /// last commit.
    pub async fn local_diff(&self) -> Result<String> {
        let diff = self.git(["diff", "HEAD"]).await?;
        if !diff.trim().is_empty() {
            return Ok(diff);
        }
        self.git(["diff", "HEAD~1", "HEAD"]).await
    }
}

fn parse_log(out: &str) -> Vec<Commit> {
    out.split(RECORD_SEP)
        .filter_map(|record| {
            let record = record.trim_start_matches(['\n', '\r']);
            if record.trim().is_empty() {
                return None;
            }
            let mut fields = record.splitn(3, FIELD_SEP);
            let sha = fields.next()?.trim().to_string();
            let author = fields.next()?.trim().to_string();
            let message = fields.next().unwrap_or_default().trim().to_string();
            Some(Commit {
                sha,
                message,
                author,
            })
        })
        .collect()
}

pub fn parse_remote(url: &str) -> Option<String> {
    let caps = REMOTE_RE.captures(url)?;
    Some(format!("{}/{}", &caps[1], &caps[2]))
}
