//! Package-registry adapter: `bun` manages the manifest and artifact, `npm`
//! publishes with provenance.

use crate::error::{Result, ToolError};
use crate::process::{CommandRunner, Invocation};
use regex::Regex;
use std::sync::{Arc, LazyLock};

static TARBALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^\s]+\.tgz)").expect("tarball regex"));

#[derive(Clone)]
pub struct PackageRegistry {
    runner: Arc<dyn CommandRunner>,
}

impl PackageRegistry {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Writes the manifest version and creates the version commit and tag.
    pub async fn bump_version(&self, version: &str) -> Result<()> {
        self.runner
            .run(&Invocation::new("bun", ["pm", "version", version]))
            .await?;
        Ok(())
    }

    /// Returns the tarball file name.
    pub async fn pack(&self) -> Result<String> {
        let out = self
            .runner
            .run(&Invocation::new("bun", ["pm", "pack"]))
            .await?;
        parse_tarball(&out).ok_or_else(|| {
            ToolError::ExecutionFailed(format!(
                "could not find tarball name in pack output: {}",
                out.trim()
            ))
        })
    }

    pub async fn publish(&self, tarball: &str) -> Result<()> {
        self.runner
            .run(&Invocation::new(
                "npm",
                ["publish", tarball, "--access", "public", "--provenance"],
            ))
            .await?;
        Ok(())
    }

    pub async fn remove_artifact(&self, tarball: &str) -> Result<()> {
        self.runner
            .run(&Invocation::new("rm", ["--", tarball]))
            .await?;
        Ok(())
    }
}

/// The last `.tgz` mentioned wins; `bun pm pack` prints it after the file list.
fn parse_tarball(out: &str) -> Option<String> {
    TARBALL_RE
        .captures_iter(out)
        .last()
        .map(|caps| caps[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tarball_is_taken_from_pack_output() {
        let out = "packed 1.2kB package.json\npacked 8kB dist/index.js\n\nwidgets-1.3.0.tgz\n";
        assert_eq!(parse_tarball(out).as_deref(), Some("widgets-1.3.0.tgz"));
        assert_eq!(parse_tarball("nothing here"), None);
    }
}
