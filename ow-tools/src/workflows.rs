//! GitHub Actions scaffolding. Existing workflow files are never overwritten.

use crate::command::{Workflow, WorkflowSetup};
use crate::error::Result;
use crate::retry::check_aborted;
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub const WORKFLOW_DIR: &str = ".github/workflows";

const INSTALL_STEP: &str = "      - name: Install open-workflows
        run: cargo install open-workflows --locked
";

fn template(workflow: Workflow) -> String {
    let (header, run) = match workflow {
        Workflow::Review => (
            "name: PR Review

on:
  pull_request:
    types: [opened, synchronize, reopened]

jobs:
  review:
    runs-on: ubuntu-latest
    permissions:
      contents: read
      pull-requests: write
    steps:
      - uses: actions/checkout@v6
",
            "      - name: Review PR
        run: open-workflows review --pr ${{ github.event.pull_request.number }}
",
        ),
        Workflow::Label => (
            "name: Issue Label

on:
  issues:
    types: [opened, edited]

jobs:
  label:
    runs-on: ubuntu-latest
    permissions:
      issues: write
    steps:
      - uses: actions/checkout@v6
",
            "      - name: Label Issue
        run: open-workflows label --issue ${{ github.event.issue.number }}
",
        ),
        Workflow::DocSync => (
            "name: Doc Sync

on:
  pull_request:
    types: [opened, synchronize]

jobs:
  sync:
    runs-on: ubuntu-latest
    permissions:
      contents: write
      pull-requests: read
    steps:
      - uses: actions/checkout@v6
        with:
          ref: ${{ github.head_ref }}

      - name: Configure Git
        run: |
          git config user.name \"github-actions[bot]\"
          git config user.email \"41898282+github-actions[bot]@users.noreply.github.com\"
",
            "      - name: Sync Documentation
        run: open-workflows doc-sync --pr ${{ github.event.pull_request.number }}
",
        ),
        Workflow::Release => (
            "name: Release

on:
  workflow_dispatch:

jobs:
  release:
    runs-on: ubuntu-latest
    permissions:
      contents: write
      id-token: write
    steps:
      - uses: actions/checkout@v6
        with:
          fetch-depth: 0

      - name: Configure Git
        run: |
          git config user.name \"github-actions[bot]\"
          git config user.email \"41898282+github-actions[bot]@users.noreply.github.com\"

      - name: Setup Bun
        uses: oven-sh/setup-bun@v2
",
            "      - name: Release
        run: open-workflows release
",
        ),
    };
    let env = "        env:
          GITHUB_TOKEN: ${{ secrets.GITHUB_TOKEN }}
          MINIMAX_API_KEY: ${{ secrets.MINIMAX_API_KEY }}
";
    let npm = if workflow == Workflow::Release {
        "          NPM_TOKEN: ${{ secrets.NPM_TOKEN }}\n"
    } else {
        ""
    };
    format!("{header}\n{INSTALL_STEP}\n{run}{env}{npm}")
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn setup_workflows(
    root: &Path,
    cancel: &CancellationToken,
    cmd: &WorkflowSetup,
) -> Result<String> {
    let dir = root.join(WORKFLOW_DIR);
    tokio::fs::create_dir_all(&dir).await?;

    let mut lines = Vec::new();
    for workflow in &cmd.workflows {
        check_aborted(cancel)?;
        let relative = format!("{WORKFLOW_DIR}/{}", workflow.file_name());
        let path = dir.join(workflow.file_name());
        if tokio::fs::try_exists(&path).await? {
            lines.push(format!("Skipped: {relative} (already exists)"));
            continue;
        }
        match tokio::fs::write(&path, template(*workflow)).await {
            Ok(()) => {
                tracing::info!(path = %relative, "workflow created");
                lines.push(format!("Created: {relative}"));
            }
            Err(e) => lines.push(format!("Failed to write {relative}: {e}")),
        }
    }

    lines.push(String::new());
    lines.push("Next steps:".to_string());
    lines.push("1. Add the MINIMAX_API_KEY secret: gh secret set MINIMAX_API_KEY".to_string());
    if cmd.workflows.contains(&Workflow::Release) {
        lines.push("2. Add the NPM_TOKEN secret: gh secret set NPM_TOKEN".to_string());
        lines.push("3. Commit and push the workflow files".to_string());
    } else {
        lines.push("2. Commit and push the workflow files".to_string());
    }
    Ok(lines.join("\n"))
}
