//! Where a command is running (GitHub Actions, a local checkout, or with
//! explicit flags) and what it targets.

use ow_tools::Git;
use serde_json::Value;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Ci,
    Local,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub mode: RunMode,
    pub repository: Option<String>,
    /// Pull request or issue number.
    pub number: Option<u64>,
    pub head_sha: Option<String>,
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ContextFlags {
    pub number: Option<u64>,
    pub repository: Option<String>,
    pub local: bool,
}

impl RunContext {
    pub fn require_repository(&self) -> anyhow::Result<&str> {
        self.repository.as_deref().ok_or_else(|| {
            anyhow::anyhow!("could not determine the repository; pass --repo owner/name")
        })
    }

    pub fn require_number(&self, what: &str) -> anyhow::Result<u64> {
        self.number
            .ok_or_else(|| anyhow::anyhow!("no {what} number found; pass --{what} N"))
    }
}

/// Pull request or issue number and head sha from a webhook payload.
pub fn event_target(event: &Value) -> (Option<u64>, Option<String>) {
    let number = event
        .pointer("/pull_request/number")
        .or_else(|| event.pointer("/issue/number"))
        .or_else(|| event.get("number"))
        .and_then(Value::as_u64);
    let head_sha = event
        .pointer("/pull_request/head/sha")
        .and_then(Value::as_str)
        .map(str::to_string);
    (number, head_sha)
}

/// Resolve from flags and the environment alone; `event` is the parsed
/// `GITHUB_EVENT_PATH` payload when there is one.
pub fn resolve(
    flags: &ContextFlags,
    lookup: impl Fn(&str) -> Option<String>,
    event: Option<&Value>,
) -> RunContext {
    let env = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    let in_ci = env("GITHUB_ACTIONS").is_some_and(|v| v == "true");
    let mode = if flags.local {
        RunMode::Local
    } else if in_ci {
        RunMode::Ci
    } else {
        RunMode::Manual
    };

    let mut ctx = RunContext {
        mode,
        repository: flags.repository.clone(),
        number: flags.number,
        head_sha: None,
        branch: None,
    };
    if mode == RunMode::Ci {
        let (number, head_sha) = event.map(event_target).unwrap_or((None, None));
        ctx.repository = ctx.repository.or_else(|| env("GITHUB_REPOSITORY"));
        ctx.number = ctx.number.or(number);
        ctx.head_sha = head_sha.or_else(|| env("GITHUB_SHA"));
        ctx.branch = env("GITHUB_HEAD_REF").or_else(|| env("GITHUB_REF_NAME"));
    }
    ctx
}

/// Full detection: environment, event payload, then git for whatever is
/// still missing.
#[tracing::instrument(level = "debug", skip_all)]
pub async fn detect(flags: &ContextFlags, git: &Git) -> anyhow::Result<RunContext> {
    let lookup = |key: &str| std::env::var(key).ok();
    let event = match lookup("GITHUB_EVENT_PATH").filter(|p| !p.is_empty()) {
        Some(path) if lookup("GITHUB_ACTIONS").is_some_and(|v| v == "true") => {
            read_event(PathBuf::from(path)).await
        }
        _ => None,
    };
    let mut ctx = resolve(flags, lookup, event.as_ref());

    if ctx.repository.is_none() {
        ctx.repository = git.remote_repository().await.unwrap_or_else(|e| {
            tracing::debug!(error = %e, "no git remote");
            None
        });
    }
    if ctx.mode == RunMode::Local {
        ctx.head_sha = git.head_sha().await.ok();
        ctx.branch = git.current_branch().await.ok();
    }
    tracing::debug!(
        mode = ?ctx.mode,
        repository = ?ctx.repository,
        number = ?ctx.number,
        "run context resolved"
    );
    Ok(ctx)
}

async fn read_event(path: PathBuf) -> Option<Value> {
    let raw = match tokio::fs::read_to_string(&path).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not read event payload");
            return None;
        }
    };
    serde_json::from_str(&raw)
        .inspect_err(|e| tracing::warn!(path = %path.display(), error = %e, "invalid event payload"))
        .ok()
}
