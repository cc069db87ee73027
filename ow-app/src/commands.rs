//! CLI command flows. Model-driven commands gather context up front, render a
//! prompt, and run one session with the tools the command allows.

use crate::config::WorkflowsConfig;
use crate::context::{ContextFlags, RunContext, RunMode, detect};
use crate::local_backend::{ChatModel, LocalBackend};
use crate::printer::print_messages;
use crate::prompts::{self, DRY_RUN_NOTE, render, truncate_diff};
use crate::session::{SessionOrchestrator, SessionOutcome};
use clap::Args;
use ow_tools::{CommandRunner, Git, GitHub, ToolKind, Toolbox, plan_release, workflow_tools};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default, Args)]
pub struct ReviewArgs {
    /// Pull request number.
    #[arg(long)]
    pub pr: Option<u64>,
    /// Repository in owner/name form.
    #[arg(long)]
    pub repo: Option<String>,
    /// Review uncommitted local changes instead of a pull request.
    #[arg(long)]
    pub local: bool,
    /// Print the review without posting it.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, Args)]
pub struct LabelArgs {
    #[arg(long)]
    pub issue: Option<u64>,
    #[arg(long)]
    pub repo: Option<String>,
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, Args)]
pub struct DocSyncArgs {
    #[arg(long)]
    pub pr: Option<u64>,
    #[arg(long)]
    pub local: bool,
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, Args)]
pub struct ReleaseArgs {
    /// Previous release tag; defaults to the latest tag.
    #[arg(long)]
    pub from_tag: Option<String>,
    /// End of the commit range; defaults to HEAD.
    #[arg(long)]
    pub to_tag: Option<String>,
    /// Print the release plan and stop.
    #[arg(long)]
    pub dry_run: bool,
    /// Only create the platform release for an already published version.
    #[arg(long)]
    pub platform_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Done,
    NothingToDo,
    /// Finished, but an operator has to follow up.
    NeedsAttention,
}

impl Completion {
    pub fn exit_code(self) -> ExitCode {
        match self {
            Self::Done | Self::NothingToDo => ExitCode::SUCCESS,
            Self::NeedsAttention => ExitCode::FAILURE,
        }
    }
}

pub struct Runtime {
    config: WorkflowsConfig,
    workdir: PathBuf,
    runner: Arc<dyn CommandRunner>,
    model: Arc<dyn ChatModel>,
    cancel: CancellationToken,
}

impl Runtime {
    pub fn new(
        config: WorkflowsConfig,
        workdir: PathBuf,
        runner: Arc<dyn CommandRunner>,
        model: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            config,
            workdir,
            runner,
            model,
            cancel: CancellationToken::new(),
        }
    }

    /// First Ctrl-C cancels in-flight work at the next step boundary.
    pub fn cancel_on_ctrl_c(&self) {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    fn git(&self) -> Git {
        Git::new(self.runner.clone())
    }

    fn github(&self) -> GitHub {
        GitHub::new(self.runner.clone())
    }

    fn toolbox(&self, platform_only: bool) -> Arc<Toolbox> {
        Arc::new(
            Toolbox::new(self.runner.clone(), &self.workdir, self.config.retry.policy())
                .with_platform_only(platform_only),
        )
    }

    async fn run_session(
        &self,
        title: &str,
        prompt: &str,
        toolbox: &Arc<Toolbox>,
        kinds: &[ToolKind],
    ) -> anyhow::Result<SessionOutcome> {
        let model = self.config.model()?;
        let backend = LocalBackend::new(
            self.model.clone(),
            workflow_tools(toolbox, kinds),
            self.cancel.clone(),
        )
        .with_system_prompt(self.config.general.system_prompt.clone())
        .with_retry(self.config.retry.policy())
        .with_tool_loops_max(self.config.session.tool_loops_max);
        let orchestrator =
            SessionOrchestrator::new(Arc::new(backend), self.config.session.grace_period());

        let (tx, rx) = mpsc::channel(self.config.session.sink_capacity);
        let printer = tokio::spawn(print_messages(rx));
        let outcome = orchestrator.run(title, &model, prompt, tx).await;
        if let Err(e) = printer.await {
            tracing::warn!(error = %e, "message printer task failed");
        }
        let outcome = outcome?;
        tracing::info!(
            session_id = %outcome.session_id,
            state = %outcome.state,
            tools = kinds.len(),
            "session finished"
        );
        println!("{}", outcome.text);
        Ok(outcome)
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub async fn review(&self, args: &ReviewArgs) -> anyhow::Result<Completion> {
        let flags = ContextFlags {
            number: args.pr,
            repository: args.repo.clone(),
            local: args.local,
        };
        let ctx = detect(&flags, &self.git()).await?;

        let mut vars: HashMap<&str, String> = HashMap::new();
        let mut kinds = Vec::new();
        if ctx.mode == RunMode::Local {
            let diff = self.git().local_diff().await?;
            if diff.trim().is_empty() {
                println!("no local changes to review");
                return Ok(Completion::NothingToDo);
            }
            vars.insert("REPOSITORY", ctx.repository.clone().unwrap_or_else(|| "this repository".to_string()));
            vars.insert("PR_NUMBER", "local".to_string());
            vars.insert("TITLE", format!("Local changes on {}", ctx.branch.as_deref().unwrap_or("HEAD")));
            vars.insert("HEAD_SHA", ctx.head_sha.clone().unwrap_or_default());
            vars.insert("BODY", String::new());
            vars.insert("DIFF", truncate_diff(&diff));
            vars.insert("MODE_NOTE", DRY_RUN_NOTE.to_string());
        } else {
            let repo = ctx.require_repository()?;
            let number = ctx.require_number("pr")?;
            let pr = self.github().pull_request(repo, number).await?;
            vars.insert("REPOSITORY", repo.to_string());
            vars.insert("PR_NUMBER", number.to_string());
            vars.insert("TITLE", pr.title);
            vars.insert("HEAD_SHA", pr.head_sha.clone());
            vars.insert("BODY", pr.body);
            vars.insert("DIFF", truncate_diff(&pr.diff));
            if args.dry_run {
                vars.insert("MODE_NOTE", DRY_RUN_NOTE.to_string());
            } else {
                kinds.push(ToolKind::SubmitReview);
                vars.insert(
                    "MODE_NOTE",
                    format!(
                        "Finish by calling submit_review exactly once with repository {repo}, \
                         pullNumber {number} and commitSha {}.",
                        pr.head_sha
                    ),
                );
            }
        }

        let prompt = render(prompts::REVIEW, &vars);
        self.run_session("review", &prompt, &self.toolbox(false), &kinds)
            .await?;
        Ok(Completion::Done)
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub async fn label(&self, args: &LabelArgs) -> anyhow::Result<Completion> {
        let flags = ContextFlags {
            number: args.issue,
            repository: args.repo.clone(),
            local: false,
        };
        let ctx = detect(&flags, &self.git()).await?;
        let repo = ctx.require_repository()?;
        let number = ctx.require_number("issue")?;

        let github = self.github();
        let issue = github.issue(repo, number).await?;
        let available = github.labels(repo).await?;
        let available = if available.is_empty() {
            "(none)".to_string()
        } else {
            available
                .iter()
                .map(|l| match l.description.as_deref().filter(|d| !d.is_empty()) {
                    Some(d) => format!("- {}: {d}", l.name),
                    None => format!("- {}", l.name),
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        let mut vars: HashMap<&str, String> = HashMap::new();
        vars.insert("REPOSITORY", repo.to_string());
        vars.insert("ISSUE_NUMBER", number.to_string());
        vars.insert("TITLE", issue.title);
        vars.insert("BODY", issue.body);
        vars.insert(
            "EXISTING_LABELS",
            if issue.labels.is_empty() {
                "(none)".to_string()
            } else {
                issue.labels.join(", ")
            },
        );
        vars.insert("AVAILABLE_LABELS", available);
        let kinds = if args.dry_run {
            vars.insert("MODE_NOTE", DRY_RUN_NOTE.to_string());
            vec![]
        } else {
            vars.insert(
                "MODE_NOTE",
                format!(
                    "Apply them with one apply_labels call (repository {repo}, issueNumber {number}) \
                     and explain the choice."
                ),
            );
            vec![ToolKind::ApplyLabels]
        };

        let prompt = render(prompts::LABEL, &vars);
        self.run_session("label", &prompt, &self.toolbox(false), &kinds)
            .await?;
        Ok(Completion::Done)
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub async fn doc_sync(&self, args: &DocSyncArgs) -> anyhow::Result<Completion> {
        let flags = ContextFlags {
            number: args.pr,
            repository: None,
            local: args.local,
        };
        let ctx = detect(&flags, &self.git()).await?;
        let (target, diff) = self.change_set(&ctx).await?;
        if diff.trim().is_empty() {
            println!("no changes to document");
            return Ok(Completion::NothingToDo);
        }

        let mut vars: HashMap<&str, String> = HashMap::new();
        vars.insert(
            "REPOSITORY",
            ctx.repository.clone().unwrap_or_else(|| "this repository".to_string()),
        );
        vars.insert("TARGET", target);
        vars.insert("DIFF", truncate_diff(&diff));
        let kinds = if args.dry_run {
            vars.insert("MODE_NOTE", DRY_RUN_NOTE.to_string());
            vec![]
        } else {
            vars.insert(
                "MODE_NOTE",
                "Commit every documentation change with a single commit_docs call; the commit \
                 message prefix is added for you."
                    .to_string(),
            );
            vec![ToolKind::CommitDocs]
        };

        let prompt = render(prompts::DOC_SYNC, &vars);
        self.run_session("doc-sync", &prompt, &self.toolbox(false), &kinds)
            .await?;
        Ok(Completion::Done)
    }

    async fn change_set(&self, ctx: &RunContext) -> anyhow::Result<(String, String)> {
        if ctx.mode == RunMode::Local {
            return Ok(("local changes".to_string(), self.git().local_diff().await?));
        }
        let repo = ctx.require_repository()?;
        let number = ctx.require_number("pr")?;
        let pr = self.github().pull_request(repo, number).await?;
        Ok((format!("pull request #{number}: {}", pr.title), pr.diff))
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub async fn release(&self, args: &ReleaseArgs) -> anyhow::Result<Completion> {
        let git = self.git();
        let latest = git.latest_tag().await?;
        let ctx = detect(&ContextFlags::default(), &git).await?;

        if args.platform_only {
            return self.platform_release(args, &ctx, latest).await;
        }

        let from = args.from_tag.clone().or(latest);
        let to = args.to_tag.clone().unwrap_or_else(|| "HEAD".to_string());
        let commits = git.commits_between(from.as_deref(), &to).await?;
        let current = from.as_deref().unwrap_or("0.0.0");
        let Some(plan) = plan_release(current, &commits)? else {
            println!("nothing to release");
            return Ok(Completion::NothingToDo);
        };
        tracing::info!(version = %plan.version, bump = %plan.bump, commits = commits.len(), "release planned");
        if args.dry_run {
            print!("{plan}");
            return Ok(Completion::Done);
        }

        let repo = ctx.require_repository()?;
        let version = plan.version.trim_start_matches('v').to_string();
        let mut vars: HashMap<&str, String> = HashMap::new();
        vars.insert("REPOSITORY", repo.to_string());
        vars.insert("CURRENT_VERSION", current.to_string());
        vars.insert("NEXT_VERSION", version.clone());
        vars.insert("BUMP", plan.bump.to_string());
        vars.insert("COMMITS", commit_lines(&commits));
        vars.insert("NOTES", note_lines(&plan.notes));

        let toolbox = self.toolbox(false);
        let prompt = render(prompts::RELEASE, &vars);
        self.run_session(
            "release",
            &prompt,
            &toolbox,
            &[ToolKind::BunRelease, ToolKind::GithubRelease],
        )
        .await?;

        let ledger = toolbox.ledger();
        if !ledger.is_published(&version) {
            eprintln!("release {version} was not published");
            return Ok(Completion::NeedsAttention);
        }
        let missing = ledger.missing_platform_releases();
        if !missing.is_empty() {
            for v in &missing {
                tracing::warn!(version = %v, "package published, platform release missing");
                eprintln!(
                    "package published, platform release missing: {v}\n\
                     retry with: open-workflows release --platform-only --to-tag v{v}"
                );
            }
            return Ok(Completion::NeedsAttention);
        }
        Ok(Completion::Done)
    }

    async fn platform_release(
        &self,
        args: &ReleaseArgs,
        ctx: &RunContext,
        latest: Option<String>,
    ) -> anyhow::Result<Completion> {
        let Some(tag) = args.to_tag.clone().or(latest) else {
            return Err(anyhow::anyhow!(
                "no release tag found; pass --to-tag for the published version"
            ));
        };
        let repo = ctx.require_repository()?;
        let version = tag.trim_start_matches('v').to_string();
        let existing = self.github().latest_release_tag(repo).await?;
        if existing.as_deref() == Some(tag.as_str()) {
            tracing::info!(tag = %tag, "platform release already exists");
            println!("platform release {tag} already exists");
            return Ok(Completion::Done);
        }
        let commits = self
            .git()
            .commits_between(args.from_tag.as_deref(), &tag)
            .await?;
        let notes = plan_release(&tag, &commits)?
            .map(|p| p.notes)
            .unwrap_or_default();
        if args.dry_run {
            println!("Platform release: {tag}");
            print!("{}", note_lines(&notes));
            return Ok(Completion::Done);
        }

        let mut vars: HashMap<&str, String> = HashMap::new();
        vars.insert("REPOSITORY", repo.to_string());
        vars.insert("NEXT_VERSION", version.clone());
        vars.insert("TAG", tag.clone());
        vars.insert("COMMITS", commit_lines(&commits));
        vars.insert("NOTES", note_lines(&notes));

        let toolbox = self.toolbox(true);
        let prompt = render(prompts::PLATFORM_RELEASE, &vars);
        self.run_session("release", &prompt, &toolbox, &[ToolKind::GithubRelease])
            .await?;

        if !toolbox.ledger().has_platform_release(&version) {
            eprintln!("platform release {tag} was not created");
            return Ok(Completion::NeedsAttention);
        }
        Ok(Completion::Done)
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub async fn setup(&self, workflows: &[String]) -> anyhow::Result<Completion> {
        let out = self
            .toolbox(false)
            .invoke("setup_workflows", &json!({ "workflows": workflows }), &self.cancel)
            .await?;
        println!("{out}");
        Ok(Completion::Done)
    }
}

fn commit_lines(commits: &[ow_tools::Commit]) -> String {
    commits
        .iter()
        .map(|c| {
            let short: String = c.sha.chars().take(7).collect();
            format!("- {short} {} ({})", c.header(), c.author)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn note_lines(notes: &[String]) -> String {
    notes.iter().map(|n| format!("- {n}\n")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedModel;
    use ow_tools::test_support::ScriptedRunner;

    const LOG: &str = "1111111aaaa\u{1f}Ada\u{1f}feat: add widgets\u{1e}\n\
                       2222222bbbb\u{1f}Bob\u{1f}fix: handle empty input\u{1e}\n";

    fn config() -> WorkflowsConfig {
        let mut cfg = WorkflowsConfig::default();
        cfg.retry.base_delay_ms = 1;
        cfg.session.grace_period_ms = 0;
        cfg
    }

    fn runtime(dir: &std::path::Path, runner: Arc<ScriptedRunner>, model: Arc<ScriptedModel>) -> Runtime {
        Runtime::new(config(), dir.to_path_buf(), runner, model)
    }

    fn release_runner() -> Arc<ScriptedRunner> {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .on_ok("git", &["describe", "--tags", "--abbrev=0"], "v1.2.3\n")
            .on_ok("git", &["remote", "get-url", "origin"], "https://github.com/acme/widgets.git\n")
            .on_ok("git", &["log"], LOG)
            .on_ok("bun", &["pm", "pack"], "acme-widgets-1.3.0.tgz\n");
        runner
    }

    #[tokio::test]
    async fn empty_range_is_nothing_to_release() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .on_ok("git", &["describe", "--tags", "--abbrev=0"], "v1.2.3\n")
            .on_ok("git", &["log"], "");
        let model = Arc::new(ScriptedModel::default());
        let rt = runtime(dir.path(), runner, model.clone());

        let done = rt.release(&ReleaseArgs::default()).await.unwrap();

        assert_eq!(done, Completion::NothingToDo);
        assert!(model.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dry_run_plans_without_a_session() {
        let dir = tempfile::tempdir().unwrap();
        let runner = release_runner();
        let model = Arc::new(ScriptedModel::default());
        let rt = runtime(dir.path(), runner.clone(), model.clone());

        let args = ReleaseArgs {
            dry_run: true,
            ..ReleaseArgs::default()
        };
        assert_eq!(rt.release(&args).await.unwrap(), Completion::Done);
        assert!(model.seen.lock().unwrap().is_empty());
        let log = runner.calls_matching("git", &["log"]);
        assert!(log[0].args.iter().any(|a| a == "v1.2.3..HEAD"));
        assert!(runner.calls_matching("bun", &[]).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_platform_release_is_reported_for_retry() {
        let dir = tempfile::tempdir().unwrap();
        let runner = release_runner();
        runner.on_err("gh", &["release", "create"], "HTTP 422: Validation Failed");
        let model = Arc::new(
            ScriptedModel::default()
                .call("c1", "bun_release", json!({ "version": "1.3.0" }))
                .call(
                    "c2",
                    "github_release",
                    json!({
                        "repository": "acme/widgets",
                        "tag": "v1.3.0",
                        "notes": ["Add widgets"]
                    }),
                )
                .reply(ow_llm::ChatMessage::assistant("Release attempted.")),
        );
        let rt = runtime(dir.path(), runner.clone(), model.clone());

        let done = rt.release(&ReleaseArgs::default()).await.unwrap();

        assert_eq!(done, Completion::NeedsAttention);
        assert_eq!(runner.calls_matching("npm", &["publish"]).len(), 1);
        assert_eq!(runner.calls_matching("gh", &["release", "create"]).len(), 1);
        assert_eq!(
            model.offered_tools.lock().unwrap()[0],
            vec!["bun_release".to_string(), "github_release".to_string()]
        );
        let prompt = &model.seen.lock().unwrap()[0];
        let user = prompt.iter().find(|m| m.role == ow_llm::Role::User).unwrap();
        assert!(user.content.contains("Next version: 1.3.0 (minor bump)"));
    }

    #[tokio::test(start_paused = true)]
    async fn platform_release_is_refused_before_publish() {
        let dir = tempfile::tempdir().unwrap();
        let runner = release_runner();
        let model = Arc::new(
            ScriptedModel::default()
                .call(
                    "c1",
                    "github_release",
                    json!({ "repository": "acme/widgets", "tag": "v1.3.0", "notes": ["x"] }),
                )
                .reply(ow_llm::ChatMessage::assistant("Gave up.")),
        );
        let rt = runtime(dir.path(), runner.clone(), model);

        let done = rt.release(&ReleaseArgs::default()).await.unwrap();

        assert_eq!(done, Completion::NeedsAttention);
        assert!(runner.calls_matching("gh", &["release", "create"]).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn platform_only_retry_creates_the_missing_release() {
        let dir = tempfile::tempdir().unwrap();
        let runner = release_runner();
        runner.on_ok("gh", &["release", "create"], "https://github.com/acme/widgets/releases/tag/v1.2.3\n");
        let model = Arc::new(
            ScriptedModel::default()
                .call(
                    "c1",
                    "github_release",
                    json!({ "repository": "acme/widgets", "tag": "v1.2.3", "notes": ["Add widgets"] }),
                )
                .reply(ow_llm::ChatMessage::assistant("Created.")),
        );
        let rt = runtime(dir.path(), runner.clone(), model.clone());

        let args = ReleaseArgs {
            platform_only: true,
            ..ReleaseArgs::default()
        };
        assert_eq!(rt.release(&args).await.unwrap(), Completion::Done);
        assert!(runner.calls_matching("npm", &[]).is_empty());
        assert_eq!(
            model.offered_tools.lock().unwrap()[0],
            vec!["github_release".to_string()]
        );
    }

    #[tokio::test]
    async fn platform_only_skips_an_existing_release() {
        let dir = tempfile::tempdir().unwrap();
        let runner = release_runner();
        runner.on_ok("gh", &["release", "view"], "v1.2.3\n");
        let model = Arc::new(ScriptedModel::default());
        let rt = runtime(dir.path(), runner.clone(), model.clone());

        let args = ReleaseArgs {
            platform_only: true,
            ..ReleaseArgs::default()
        };
        assert_eq!(rt.release(&args).await.unwrap(), Completion::Done);
        assert!(model.seen.lock().unwrap().is_empty());
        assert!(runner.calls_matching("gh", &["release", "create"]).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dry_run_review_offers_no_tools() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.on_ok(
            "gh",
            &["pr", "view"],
            r#"{"number":5,"title":"Add cache","body":"","headRefOid":"abcdef1234","baseRefName":"main","headRefName":"cache"}"#,
        );
        runner.on_ok("gh", &["pr", "diff"], "+fn cache() {}\n");
        let model = Arc::new(ScriptedModel::default().reply(ow_llm::ChatMessage::assistant("Looks fine.")));
        let rt = runtime(dir.path(), runner, model.clone());

        let args = ReviewArgs {
            pr: Some(5),
            repo: Some("acme/widgets".to_string()),
            local: false,
            dry_run: true,
        };
        assert_eq!(rt.review(&args).await.unwrap(), Completion::Done);
        assert!(model.offered_tools.lock().unwrap()[0].is_empty());
        let prompt = &model.seen.lock().unwrap()[0];
        let user = prompt.iter().find(|m| m.role == ow_llm::Role::User).unwrap();
        assert!(user.content.contains("+fn cache() {}"));
        assert!(user.content.contains(DRY_RUN_NOTE));
    }

    #[tokio::test]
    async fn setup_runs_without_a_model() {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(ScriptedModel::default());
        let rt = runtime(dir.path(), Arc::new(ScriptedRunner::new()), model.clone());

        let done = rt
            .setup(&["review".to_string(), "release".to_string()])
            .await
            .unwrap();

        assert_eq!(done, Completion::Done);
        assert!(dir.path().join(".github/workflows/pr-review.yml").exists());
        assert!(dir.path().join(".github/workflows/release.yml").exists());
        assert!(model.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn setup_rejects_unknown_workflows() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(
            dir.path(),
            Arc::new(ScriptedRunner::new()),
            Arc::new(ScriptedModel::default()),
        );
        let err = rt.setup(&["deploy".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("workflows[0]"));
    }
}
