//! Label application: create what is missing, then apply the union in one call.

use crate::command::LabelApplication;
use crate::error::{Result, ToolError};
use crate::github::{GitHub, NewLabel};
use crate::retry::{RetryPolicy, check_aborted, with_retry};
use crate::validate::LABELS_MAX;
use tokio_util::sync::CancellationToken;

fn is_duplicate_label(err: &ToolError) -> bool {
    let msg = err.to_string();
    msg.contains("already exists") || msg.contains("Conflict")
}

/// Union of existing and usable new label names, first occurrence wins, capped.
fn label_union(existing: &[String], created: &[String]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in existing.iter().chain(created) {
        if !names.contains(name) {
            names.push(name.clone());
        }
    }
    names.truncate(LABELS_MAX);
    names
}

#[tracing::instrument(level = "info", skip_all, fields(repository = %cmd.repository, issue = cmd.issue_number))]
pub async fn apply_labels(
    github: &GitHub,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
    cmd: &LabelApplication,
) -> Result<String> {
    let mut lines = Vec::new();
    let mut usable_new = Vec::new();

    for spec in &cmd.new_labels {
        check_aborted(cancel)?;
        let label = NewLabel {
            name: spec.name.clone(),
            color: spec.color.clone(),
            description: spec.description.clone(),
        };
        match with_retry(retry, cancel, || github.create_label(&cmd.repository, &label)).await {
            Ok(()) => {
                lines.push(format!("Created label: {}", spec.name));
                usable_new.push(spec.name.clone());
            }
            Err(ToolError::Aborted) => return Err(ToolError::Aborted),
            Err(e) if is_duplicate_label(&e) => {
                lines.push(format!("Skipped: label {} (already exists)", spec.name));
                usable_new.push(spec.name.clone());
            }
            Err(e) => {
                tracing::warn!(label = %spec.name, error = %e, "label creation failed");
                lines.push(format!("Failed to create label \"{}\": {e}", spec.name));
            }
        }
    }

    let names = label_union(&cmd.labels, &usable_new);
    if names.is_empty() {
        lines.push("Failed to apply labels: no usable labels remain".to_string());
        return Ok(lines.join("\n"));
    }

    check_aborted(cancel)?;
    let list = names.join(",");
    match with_retry(retry, cancel, || {
        github.add_labels(&cmd.repository, cmd.issue_number, &names)
    })
    .await
    {
        Ok(()) => {
            tracing::info!(labels = %list, "labels applied");
            lines.push(format!("Applied labels: {list}"));
            lines.push(format!("Reason: {}", cmd.explanation));
        }
        Err(ToolError::Aborted) => return Err(ToolError::Aborted),
        Err(e) => {
            tracing::warn!(labels = %list, error = %e, "applying labels failed");
            lines.push(format!("Failed to apply labels: {list}: {e}"));
        }
    }
    Ok(lines.join("\n"))
}
