//! open-workflows: AI-driven repository workflows (review, label, doc sync,
//! release) with validated, idempotent tool execution.

mod backend;
mod commands;
mod config;
mod context;
mod local_backend;
mod printer;
mod prompts;
mod session;
#[cfg(test)]
mod test_support;

use clap::{Parser, Subcommand};
use commands::{DocSyncArgs, LabelArgs, ReleaseArgs, ReviewArgs, Runtime};
use config::WorkflowsConfig;
use local_backend::ProviderRouter;
use ow_tools::ProcessRunner;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, Parser)]
#[command(
    name = "open-workflows",
    version,
    about = "AI-driven pull request review, issue labeling, doc sync and releases"
)]
struct Cli {
    /// Config file; defaults to .open-workflows/config.toml in the working directory.
    #[arg(long, global = true, env = "OPEN_WORKFLOWS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Review a pull request and post one sticky review comment.
    Review(ReviewArgs),
    /// Apply up to three labels to an issue.
    Label(LabelArgs),
    /// Update documentation to match a pull request or local changes.
    DocSync(DocSyncArgs),
    /// Publish the next version, then create its platform release.
    Release(ReleaseArgs),
    /// Write GitHub Actions workflows (review, label, doc-sync, release).
    Setup {
        #[arg(required = true)]
        workflows: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    init_tracing()?;
    install_panic_hook();

    let cli = Cli::parse();
    let workdir = std::env::current_dir()?;
    let config = WorkflowsConfig::load(cli.config, &workdir).await?;
    tracing::debug!(model = %config.general.model, workdir = %workdir.display(), "config loaded");

    let runner = Arc::new(ProcessRunner::new(&workdir, config.tools.command_timeout()));
    let model = Arc::new(ProviderRouter::new(config.clone()));
    let runtime = Runtime::new(config, workdir, runner, model);
    runtime.cancel_on_ctrl_c();

    let completion = match cli.command {
        Command::Review(args) => runtime.review(&args).await?,
        Command::Label(args) => runtime.label(&args).await?,
        Command::DocSync(args) => runtime.doc_sync(&args).await?,
        Command::Release(args) => runtime.release(&args).await?,
        Command::Setup { workflows } => runtime.setup(&workflows).await?,
    };
    Ok(completion.exit_code())
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(v) => v,
        Err(_) => EnvFilter::new(
            "info,open_workflows=debug,ow_app=debug,ow_tools=debug,ow_llm=debug",
        ),
    };
    let log_format = std::env::var("OPEN_WORKFLOWS_LOG_FORMAT")
        .unwrap_or_else(|_| "pretty".to_string())
        .to_ascii_lowercase();

    // stdout carries command results.
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(true)
                .init();
        }
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .pretty()
                .init();
        }
        "compact" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact()
                .init();
        }
        other => {
            return Err(anyhow::anyhow!(
                "unsupported OPEN_WORKFLOWS_LOG_FORMAT={other:?}; expected one of: json, pretty, compact"
            ));
        }
    }

    tracing::debug!(
        log_format = %log_format,
        env_filter = ?std::env::var("RUST_LOG").ok(),
        "tracing initialized"
    );
    Ok(())
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_payload_to_string(panic_info.payload());
        tracing::error!(
            panic_location = %location,
            panic_payload = %payload,
            "panic captured"
        );
        default_hook(panic_info);
    }));
}

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return msg.to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}
