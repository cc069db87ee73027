//! Collaboration-platform adapter over the `gh` CLI.

use crate::error::{Result, ToolError};
use crate::process::{CommandRunner, Invocation};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IssueComment {
    pub id: u64,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLabel {
    pub name: String,
    /// Hex without the leading `#`.
    pub color: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRequest {
    pub tag: String,
    pub title: String,
    pub notes: String,
    pub prerelease: bool,
    pub draft: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestDetails {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub head_sha: String,
    pub base_ref: String,
    pub head_ref: String,
    pub diff: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueDetails {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepoLabel {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRequestView {
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    head_ref_oid: String,
    #[serde(default)]
    base_ref_name: String,
    #[serde(default)]
    head_ref_name: String,
}

#[derive(Deserialize)]
struct IssueView {
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    labels: Vec<RepoLabel>,
}

#[derive(Deserialize)]
struct CreatedComment {
    id: u64,
}

#[derive(Clone)]
pub struct GitHub {
    runner: Arc<dyn CommandRunner>,
}

impl GitHub {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn gh<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runner.run(&Invocation::new("gh", args)).await
    }

    pub async fn list_issue_comments(&self, repo: &str, number: u64) -> Result<Vec<IssueComment>> {
        let out = self
            .gh([
                "api".to_string(),
                format!("/repos/{repo}/issues/{number}/comments"),
                "--paginate".to_string(),
            ])
            .await?;
        parse_paginated(&out)
    }

    /// Returns the id of the new comment.
    pub async fn create_issue_comment(&self, repo: &str, number: u64, body: &str) -> Result<u64> {
        let payload = json!({ "body": body }).to_string();
        let inv = Invocation::new(
            "gh",
            [
                "api".to_string(),
                "--method".to_string(),
                "POST".to_string(),
                format!("/repos/{repo}/issues/{number}/comments"),
                "--input".to_string(),
                "-".to_string(),
            ],
        )
        .with_stdin(payload);
        let out = self.runner.run(&inv).await?;
        let created: CreatedComment = serde_json::from_str(out.trim())?;
        Ok(created.id)
    }

    pub async fn update_issue_comment(&self, repo: &str, comment_id: u64, body: &str) -> Result<()> {
        let payload = json!({ "body": body }).to_string();
        let inv = Invocation::new(
            "gh",
            [
                "api".to_string(),
                "--method".to_string(),
                "PATCH".to_string(),
                format!("/repos/{repo}/issues/comments/{comment_id}"),
                "--input".to_string(),
                "-".to_string(),
            ],
        )
        .with_stdin(payload);
        self.runner.run(&inv).await?;
        Ok(())
    }

    pub async fn create_label(&self, repo: &str, label: &NewLabel) -> Result<()> {
        self.gh([
            "label",
            "create",
            label.name.as_str(),
            "--color",
            label.color.as_str(),
            "--description",
            label.description.as_str(),
            "--repo",
            repo,
        ])
        .await?;
        Ok(())
    }

    pub async fn add_labels(&self, repo: &str, issue: u64, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Err(ToolError::InvalidArguments(
                "no labels to apply".to_string(),
            ));
        }
        self.gh([
            "issue".to_string(),
            "edit".to_string(),
            issue.to_string(),
            "--add-label".to_string(),
            names.join(","),
            "--repo".to_string(),
            repo.to_string(),
        ])
        .await?;
        Ok(())
    }

    /// Returns the release URL printed by `gh`.
    pub async fn create_release(&self, repo: &str, request: &ReleaseRequest) -> Result<String> {
        let mut args = vec![
            "release".to_string(),
            "create".to_string(),
            request.tag.clone(),
            "--title".to_string(),
            request.title.clone(),
            "--notes".to_string(),
            request.notes.clone(),
            "--repo".to_string(),
            repo.to_string(),
        ];
        if request.prerelease {
            args.push("--prerelease".to_string());
        }
        if request.draft {
            args.push("--draft".to_string());
        }
        let out = self.gh(args).await?;
        Ok(out.trim().to_string())
    }

    pub async fn pull_request(&self, repo: &str, number: u64) -> Result<PullRequestDetails> {
        let n = number.to_string();
        let out = self
            .gh([
                "pr",
                "view",
                n.as_str(),
                "--repo",
                repo,
                "--json",
                "title,body,headRefOid,baseRefName,headRefName",
            ])
            .await?;
        let view: PullRequestView = serde_json::from_str(out.trim())?;
        let diff = self
            .gh(["pr", "diff", n.as_str(), "--repo", repo])
            .await?;
        Ok(PullRequestDetails {
            number,
            title: view.title,
            body: view.body,
            head_sha: view.head_ref_oid,
            base_ref: view.base_ref_name,
            head_ref: view.head_ref_name,
            diff,
        })
    }

    pub async fn issue(&self, repo: &str, number: u64) -> Result<IssueDetails> {
        let n = number.to_string();
        let out = self
            .gh([
                "issue",
                "view",
                n.as_str(),
                "--repo",
                repo,
                "--json",
                "title,body,labels",
            ])
            .await?;
        let view: IssueView = serde_json::from_str(out.trim())?;
        Ok(IssueDetails {
            number,
            title: view.title,
            body: view.body,
            labels: view.labels.into_iter().map(|l| l.name).collect(),
        })
    }

    pub async fn labels(&self, repo: &str) -> Result<Vec<RepoLabel>> {
        let out = self
            .gh([
                "label",
                "list",
                "--repo",
                repo,
                "--limit",
                "200",
                "--json",
                "name,description",
            ])
            .await?;
        if out.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(out.trim())?)
    }

    pub async fn latest_release_tag(&self, repo: &str) -> Result<Option<String>> {
        match self
            .gh([
                "release",
                "view",
                "--repo",
                repo,
                "--json",
                "tagName",
                "--jq",
                ".tagName",
            ])
            .await
        {
            Ok(out) => {
                let tag = out.trim();
                Ok((!tag.is_empty()).then(|| tag.to_string()))
            }
            Err(ToolError::ExecutionFailed(msg)) if msg.contains("release not found") => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// `gh api --paginate` prints one JSON array per page back to back.
fn parse_paginated<T: serde::de::DeserializeOwned>(out: &str) -> Result<Vec<T>> {
    let mut items = Vec::new();
    for page in serde_json::Deserializer::from_str(out).into_iter::<Vec<T>>() {
        items.extend(page?);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;

    fn github() -> (Arc<ScriptedRunner>, GitHub) {
        let runner = Arc::new(ScriptedRunner::new());
        (runner.clone(), GitHub::new(runner))
    }

    #[tokio::test]
    async fn list_comments_concatenates_pages() {
        let (runner, gh) = github();
        runner.push_ok("[{\"id\":1,\"body\":\"a\"}]\n[{\"id\":2,\"body\":\"b\"}]\n");
        let comments = gh.list_issue_comments("acme/widgets", 7).await.unwrap();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[1].id, 2);
        let call = &runner.calls()[0];
        assert_eq!(call.args[1], "/repos/acme/widgets/issues/7/comments");
        assert!(call.args.contains(&"--paginate".to_string()));
    }

    #[tokio::test]
    async fn comment_body_travels_on_stdin() {
        let (runner, gh) = github();
        runner.push_ok("{\"id\": 991, \"body\": \"x\"}");
        let id = gh
            .create_issue_comment("acme/widgets", 7, "body with `backticks`")
            .await
            .unwrap();
        assert_eq!(id, 991);
        let call = &runner.calls()[0];
        assert!(!call.args.iter().any(|a| a.contains("backticks")));
        let sent: serde_json::Value =
            serde_json::from_str(call.stdin.as_deref().unwrap()).unwrap();
        assert_eq!(sent["body"], "body with `backticks`");
    }

    #[tokio::test]
    async fn release_flags_follow_request() {
        let (runner, gh) = github();
        runner.push_ok("https://github.com/acme/widgets/releases/tag/v1.2.0\n");
        let url = gh
            .create_release(
                "acme/widgets",
                &ReleaseRequest {
                    tag: "v1.2.0".to_string(),
                    title: "v1.2.0".to_string(),
                    notes: "- fix".to_string(),
                    prerelease: true,
                    draft: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(url, "https://github.com/acme/widgets/releases/tag/v1.2.0");
        let args = &runner.calls()[0].args;
        assert!(args.contains(&"--prerelease".to_string()));
        assert!(!args.contains(&"--draft".to_string()));
    }

    #[tokio::test]
    async fn missing_release_is_none() {
        let (runner, gh) = github();
        runner.push_err("release not found");
        assert_eq!(gh.latest_release_tag("acme/widgets").await.unwrap(), None);
    }

    #[tokio::test]
    async fn pull_request_reads_view_and_diff() {
        let (runner, gh) = github();
        runner.push_ok(
            r#"{"title":"Add cache","body":"","headRefOid":"abc1234def","baseRefName":"main","headRefName":"cache"}"#,
        );
        runner.push_ok("diff --git a/x b/x\n");
        let pr = gh.pull_request("acme/widgets", 12).await.unwrap();
        assert_eq!(pr.head_sha, "abc1234def");
        assert_eq!(pr.head_ref, "cache");
        assert!(pr.diff.starts_with("diff --git"));
    }
}
